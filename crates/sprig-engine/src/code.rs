//! Code pages: the storage compiled functions are threaded through.
//!
//! A page is an append-only array of [`Word`]s. Compilation fills pages
//! monotonically; a function that outgrows its page continues on a fresh one
//! behind a `Branch`. Each runtime keeps its pages in an open pool (room left)
//! and a full pool. Pages of dropped runtimes go to the
//! [`Environment`](crate::Environment) and are reset on reuse.

use std::fmt;

use crate::environment::Environment;
use crate::error::{CompileError, CompileResult};
use crate::exec::{Machine, OpResult};
use crate::function::{FuncId, ModuleId};

/// A threaded-code operation. Receives the position of its first immediate
/// and returns where dispatch continues.
pub(crate) type Operation = fn(&mut Machine<'_>, Pc) -> OpResult;

/// Lines a page must have left before an operation is emitted: the widest
/// operation plus a trailing `Branch` to a continuation page.
pub(crate) const PAGE_FREE_LINES_THRESHOLD: u32 = 4 + 2;

/// Position of a word: page index and line within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pc {
    pub page: u32,
    pub line: u32,
}

impl Pc {
    pub(crate) fn next(self) -> Pc {
        self.offset(1)
    }

    pub(crate) fn offset(self, lines: u32) -> Pc {
        Pc {
            page: self.page,
            line: self.line.wrapping_add(lines),
        }
    }

    pub(crate) fn prev(self) -> Pc {
        Pc {
            page: self.page,
            line: self.line.wrapping_sub(1),
        }
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.line)
    }
}

/// One line of compiled code.
#[derive(Clone, Copy)]
pub(crate) enum Word {
    Op(Operation),
    Slot(u16),
    Imm32(u32),
    Imm64(u64),
    Pc(Pc),
    Func(FuncId),
    Global(u32),
    /// Module-relative type index.
    Type(u32),
    Module(ModuleId),
    /// A reserved line waiting for a branch patch.
    Empty,
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Op(_) => f.write_str("Op"),
            Word::Slot(s) => write!(f, "Slot({s})"),
            Word::Imm32(v) => write!(f, "Imm32({v:#x})"),
            Word::Imm64(v) => write!(f, "Imm64({v:#x})"),
            Word::Pc(pc) => write!(f, "Pc({pc})"),
            Word::Func(id) => write!(f, "Func({})", id.index()),
            Word::Global(g) => write!(f, "Global({g})"),
            Word::Type(t) => write!(f, "Type({t})"),
            Word::Module(m) => write!(f, "Module({})", m.index()),
            Word::Empty => f.write_str("Empty"),
        }
    }
}

/// Source attribution for the operation emitted at `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineMapping {
    pub(crate) line: u32,
    pub(crate) function: FuncId,
    /// Byte offset of the opcode in the module binary.
    pub(crate) module_offset: u32,
}

#[derive(Debug)]
pub(crate) struct CodePage {
    words: Vec<Word>,
    capacity: u32,
    mapping: Vec<LineMapping>,
}

impl CodePage {
    fn new(capacity: u32) -> Self {
        Self {
            words: Vec::with_capacity(capacity as usize),
            capacity,
            mapping: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.words.clear();
        self.mapping.clear();
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    fn used(&self) -> u32 {
        self.words.len() as u32
    }

    fn free_lines(&self) -> u32 {
        self.capacity.saturating_sub(self.used())
    }
}

/// The pages owned by one runtime.
#[derive(Debug)]
pub(crate) struct CodeSpace {
    pages: Vec<CodePage>,
    open: Vec<u32>,
    full: Vec<u32>,
    page_lines: u32,
    max_pages: u32,
}

impl CodeSpace {
    pub(crate) fn new(page_lines: u32, max_pages: u32) -> Self {
        Self {
            pages: Vec::new(),
            open: Vec::new(),
            full: Vec::new(),
            page_lines,
            max_pages,
        }
    }

    pub(crate) fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Take a page with at least `min_lines` free lines: an open page, then a
    /// page released by another runtime, then a new one.
    pub(crate) fn acquire(&mut self, env: &Environment, min_lines: u32) -> CompileResult<u32> {
        let pages = &self.pages;
        if let Some(pos) = self
            .open
            .iter()
            .position(|&p| pages[p as usize].free_lines() >= min_lines)
        {
            return Ok(self.open.swap_remove(pos));
        }
        if self.pages.len() as u32 >= self.max_pages {
            return Err(CompileError::OutOfCodeSpace);
        }

        let page = match env.take_page(min_lines) {
            Some(mut page) => {
                page.reset();
                page
            }
            None => CodePage::new(self.page_lines.max(min_lines)),
        };
        let index = self.pages.len() as u32;
        tracing::debug!(
            target: "sprig.compile",
            page = index,
            capacity = page.capacity,
            "code page acquired"
        );
        self.pages.push(page);
        Ok(index)
    }

    /// Hand a page back after compilation stops writing to it.
    pub(crate) fn release(&mut self, page: u32) {
        let Some(p) = self.pages.get(page as usize) else {
            return;
        };
        if p.free_lines() < PAGE_FREE_LINES_THRESHOLD {
            self.full.push(page);
        } else {
            self.open.push(page);
        }
    }

    pub(crate) fn free_lines(&self, page: u32) -> u32 {
        self.pages.get(page as usize).map_or(0, CodePage::free_lines)
    }

    /// Position of the next word emitted to `page`.
    pub(crate) fn pc(&self, page: u32) -> Pc {
        Pc {
            page,
            line: self.pages.get(page as usize).map_or(0, CodePage::used),
        }
    }

    pub(crate) fn emit(&mut self, page: u32, word: Word) {
        if let Some(p) = self.pages.get_mut(page as usize) {
            p.words.push(word);
        }
    }

    /// Attribute the next word emitted to `page` to a module byte offset.
    pub(crate) fn map(&mut self, page: u32, function: FuncId, module_offset: u32) {
        if let Some(p) = self.pages.get_mut(page as usize) {
            let line = p.used();
            p.mapping.push(LineMapping {
                line,
                function,
                module_offset,
            });
        }
    }

    pub(crate) fn word(&self, pc: Pc) -> Option<Word> {
        self.pages
            .get(pc.page as usize)
            .and_then(|p| p.words.get(pc.line as usize))
            .copied()
    }

    pub(crate) fn set(&mut self, pc: Pc, word: Word) {
        if let Some(w) = self
            .pages
            .get_mut(pc.page as usize)
            .and_then(|p| p.words.get_mut(pc.line as usize))
        {
            *w = word;
        }
    }

    /// The operation whose line range covers `pc`.
    pub(crate) fn locate(&self, pc: Pc) -> Option<LineMapping> {
        let page = self.pages.get(pc.page as usize)?;
        let after = page.mapping.partition_point(|m| m.line <= pc.line);
        after.checked_sub(1).map(|i| page.mapping[i])
    }

    /// Give up every page, for return to the environment.
    pub(crate) fn drain(&mut self) -> Vec<CodePage> {
        self.open.clear();
        self.full.clear();
        std::mem::take(&mut self.pages)
    }
}
