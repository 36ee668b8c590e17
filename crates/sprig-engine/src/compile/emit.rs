//! Writing words to code pages.

use crate::code::{Operation, Pc, Word, PAGE_FREE_LINES_THRESHOLD};
use crate::error::CompileResult;
use crate::exec::control as exec;

use super::Compiler;

impl Compiler<'_> {
    /// Position of the next word.
    pub(super) fn pc(&self) -> Pc {
        self.rt.code.pc(self.page)
    }

    pub(super) fn emit(&mut self, word: Word) {
        self.rt.code.emit(self.page, word);
    }

    pub(super) fn emit_slot(&mut self, slot: u16) {
        self.emit(Word::Slot(slot));
    }

    /// Make room for `lines` words plus a trailing bridge. When the page is
    /// too full, it ends in a `branch` to a fresh page and is handed back.
    pub(super) fn ensure_lines(&mut self, lines: u32) -> CompileResult<()> {
        let needed = lines.saturating_add(2);
        if self.rt.code.free_lines(self.page) >= needed {
            return Ok(());
        }
        let page = self.rt.code.acquire(&self.rt.env, needed)?;
        let start = self.rt.code.pc(page);
        self.emit(Word::Op(exec::branch));
        self.emit(Word::Pc(start));
        self.rt.code.release(self.page);
        tracing::trace!(target: "sprig.compile", from = self.page, to = page, "code page bridged");
        self.page = page;
        Ok(())
    }

    /// Emit an operation and attribute it to the opcode being compiled.
    /// Returns where it landed.
    pub(super) fn emit_op(&mut self, op: Operation) -> CompileResult<Pc> {
        self.ensure_lines(PAGE_FREE_LINES_THRESHOLD)?;
        let offset = u32::try_from(self.last_opcode_start).unwrap_or(u32::MAX);
        self.rt.code.map(self.page, self.func, offset);
        let pc = self.pc();
        self.emit(Word::Op(op));
        Ok(pc)
    }

    /// Emit a placeholder for a branch target patched later.
    pub(super) fn reserve_pc(&mut self) -> Pc {
        let pc = self.pc();
        self.emit(Word::Empty);
        pc
    }

    pub(super) fn patch(&mut self, at: Pc, target: Pc) {
        self.rt.code.set(at, Word::Pc(target));
    }

    /// Point every forward branch to the current block at the current
    /// position.
    pub(super) fn patch_branches(&mut self) {
        let here = self.pc();
        for at in std::mem::take(&mut self.block.patches) {
            self.patch(at, here);
        }
    }

    /// Take a fresh page for out-of-line code. Returns the page that was
    /// current.
    pub(super) fn switch_to_new_page(&mut self) -> CompileResult<u32> {
        let page = self.rt.code.acquire(&self.rt.env, PAGE_FREE_LINES_THRESHOLD)?;
        Ok(std::mem::replace(&mut self.page, page))
    }

    /// Hand the current page back and resume on `page`.
    pub(super) fn restore_page(&mut self, page: u32) {
        if self.page != page {
            self.rt.code.release(self.page);
        }
        self.page = page;
    }

    pub(super) fn release_page(&mut self) {
        self.rt.code.release(self.page);
    }
}
