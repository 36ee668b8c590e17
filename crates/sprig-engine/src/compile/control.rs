//! Blocks, branches, calls and returns.
//!
//! A block's results land in slots chosen when the block is opened, so every
//! branch to it and its own end copy values to the same place. A trailing
//! float result travels in `fp0` instead. Loops re-enter with their params
//! in the slots the params occupied on entry.

use std::rc::Rc;

use sprig_decode::opcode;
use sprig_decode::ByteStream;
use sprig_types::{FuncType, ValueType};

use crate::code::{Pc, Word, PAGE_FREE_LINES_THRESHOLD};
use crate::error::{CompileError, CompileResult};
use crate::exec::control as exec;

use super::{Compiler, Location, Reg, Scope, ScopeKind, Target, IO_SLOTS};

fn count(n: usize) -> CompileResult<u16> {
    u16::try_from(n).map_err(|_| CompileError::FunctionStackOverflow)
}

impl Compiler<'_> {
    // ── Scopes ───────────────────────────────────────────────────────────────

    fn scope(&self, relative: u32) -> CompileResult<&Scope> {
        if relative == 0 {
            return Ok(&self.block);
        }
        self.outer
            .len()
            .checked_sub(relative as usize)
            .and_then(|i| self.outer.get(i))
            .ok_or(CompileError::InvalidBlockDepth(relative))
    }

    pub(super) fn target(&self, relative: u32) -> CompileResult<Target> {
        let scope = self.scope(relative)?;
        Ok(Target {
            relative,
            kind: scope.kind,
            pc: scope.pc,
            ty: Rc::clone(&scope.ty),
            exit_stack_index: scope.exit_stack_index,
        })
    }

    fn add_patch(&mut self, relative: u32, at: Pc) {
        if relative == 0 {
            self.block.patches.push(at);
            return;
        }
        let index = self.outer.len().checked_sub(relative as usize);
        if let Some(scope) = index.and_then(|i| self.outer.get_mut(i)) {
            scope.patches.push(at);
        }
    }

    /// Emit a `branch` whose target is patched when the block closes.
    fn emit_patching_branch(&mut self, relative: u32) -> CompileResult<()> {
        self.emit_op(exec::branch)?;
        let at = self.reserve_pc();
        self.add_patch(relative, at);
        Ok(())
    }

    fn read_block_type(&mut self) -> CompileResult<Rc<FuncType>> {
        let raw = self.reader.read_leb_signed(33)?;
        if raw >= 0 {
            let index = raw as u32;
            return self.rt.instances[self.module.index()]
                .types
                .get(index as usize)
                .cloned()
                .ok_or(CompileError::TypeIndexOutOfBounds(index));
        }
        let results = match raw {
            -0x40 => vec![],
            -0x01 => vec![ValueType::I32],
            -0x02 => vec![ValueType::I64],
            -0x03 => vec![ValueType::F32],
            -0x04 => vec![ValueType::F64],
            _ => return Err(CompileError::Malformed("unsupported block type")),
        };
        Ok(self.rt.env.intern(FuncType::new(vec![], results)))
    }

    // ── Block results ────────────────────────────────────────────────────────

    /// Move the values a branch (or the block's end) delivers into the
    /// target's landing slots.
    pub(super) fn resolve_block_results(&mut self, target: &Target, is_branch: bool) -> CompileResult<()> {
        let is_loop = target.kind == ScopeKind::Loop && is_branch;
        let ty = &target.ty;
        let mut records = target.exit_stack_index;
        let num_values = if is_loop {
            count(ty.num_params())?
        } else {
            records += count(ty.num_params())?;
            count(ty.num_results())?
        };

        let height = self.stack_index.saturating_sub(self.block.block_stack_index);
        let mismatch = if is_branch {
            height < num_values
        } else {
            height != num_values
        };
        if mismatch {
            return Err(CompileError::TypeCountMismatch);
        }
        if num_values == 0 {
            return Ok(());
        }

        let mut end = self.stack_index;
        let mut remaining = num_values;
        if !is_loop && ty.results().last().is_some_and(|t| t.is_float()) {
            self.copy_stack_top_to_register(false)?;
            end -= 1;
            remaining -= 1;
        }
        let temp = (self.max_stack_slots + 1) & !1;
        self.copy_stack_slots(records, end - remaining, end, temp)
    }

    /// Copy the function's results into the return slots. Only called on
    /// reachable code.
    fn return_values(&mut self, is_branch: bool) -> CompileResult<()> {
        let ty = Rc::clone(&self.func_type);
        let n = count(ty.num_results())?;
        let height = self.stack_index.saturating_sub(self.block.block_stack_index);
        let mismatch = if is_branch { height < n } else { height != n };
        if mismatch {
            return Err(CompileError::TypeCountMismatch);
        }

        let mut ret_slot = n * IO_SLOTS;
        let mut index = self.stack_index;
        for (i, &expected) in ty.results().iter().rev().enumerate() {
            if self.type_from_top(i as u16) != Some(expected) {
                return Err(CompileError::TypeMismatch);
            }
            ret_slot -= IO_SLOTS;
            index -= 1;
            self.copy_stack_index_to_slot(ret_slot, index)?;
        }
        if !is_branch {
            for _ in 0..n {
                self.pop()?;
            }
        }
        Ok(())
    }

    /// Spill `fp0` unless it holds `keep`. Used before code that only runs
    /// on one path and may need the register.
    fn free_float_register(&mut self, keep: Option<u16>) -> CompileResult<()> {
        match self.registers[Reg::Float.index()] {
            Some(index) if Some(index) != keep => self.preserve_register(Reg::Float),
            _ => Ok(()),
        }
    }

    // ── Block structure ──────────────────────────────────────────────────────

    pub(super) fn compile_loop_or_block(&mut self, is_loop: bool) -> CompileResult<()> {
        self.preserve_registers()?;
        self.preserve_args_and_locals()?;
        let ty = self.read_block_type()?;

        if !is_loop {
            return self.compile_block(ty, ScopeKind::Block);
        }

        // A loop writes its params back on every iteration, so none of them
        // may live in the constant table.
        let num_params = count(ty.num_params())?;
        let height = self.stack_index.saturating_sub(self.block.block_stack_index);
        if num_params > 0 && height >= num_params {
            for index in self.stack_index - num_params..self.stack_index {
                let Location::Slot(slot) = self.wasm_stack[usize::from(index)] else {
                    continue;
                };
                if self.is_constant_slot(slot) {
                    let ty = self.type_stack[usize::from(index)];
                    let fresh = self.allocate_slots(ty)?;
                    self.copy_stack_index_to_slot(fresh, index)?;
                    self.wasm_stack[usize::from(index)] = Location::Slot(fresh);
                }
            }
        }
        self.emit_op(exec::enter_loop)?;
        self.compile_block(ty, ScopeKind::Loop)
    }

    pub(super) fn compile_if(&mut self) -> CompileResult<()> {
        self.preserve_non_top_registers()?;
        self.preserve_args_and_locals()?;

        let op = if self.top_in_register() { exec::if_r } else { exec::if_s };
        self.emit_op(op)?;
        self.emit_slot_of_top_and_pop()?;
        let else_pc = self.reserve_pc();

        let ty = self.read_block_type()?;
        let stack_index = self.stack_index;
        self.compile_block(Rc::clone(&ty), ScopeKind::If)?;

        if self.previous_opcode == opcode::ELSE {
            self.stack_index = stack_index;
            self.compile_else_block(else_pc, ty)
        } else if ty.num_results() > 0 {
            // No `else`, but results must still reach their slots: compile
            // an empty `else` that ends at the same `end`.
            let end = self.reader.position() - 1;
            self.reader.seek(end)?;
            self.stack_index = stack_index;
            self.compile_else_block(else_pc, ty)
        } else {
            let here = self.pc();
            self.patch(else_pc, here);
            Ok(())
        }
    }

    /// The `else` arm lives on its own page and branches back to the code
    /// after the `if`.
    fn compile_else_block(&mut self, else_pc: Pc, ty: Rc<FuncType>) -> CompileResult<()> {
        let resume_page = self.switch_to_new_page()?;
        let start = self.pc();
        self.patch(else_pc, start);

        let result = self.compile_else_body(ty, resume_page);
        self.restore_page(resume_page);
        result
    }

    fn compile_else_body(&mut self, ty: Rc<FuncType>, resume_page: u32) -> CompileResult<()> {
        self.compile_block(ty, ScopeKind::Else)?;
        self.emit_op(exec::branch)?;
        let resume = self.rt.code.pc(resume_page);
        self.emit(Word::Pc(resume));
        Ok(())
    }

    fn compile_block(&mut self, ty: Rc<FuncType>, kind: ScopeKind) -> CompileResult<()> {
        let scope = Scope {
            kind,
            pc: self.pc(),
            patches: Vec::new(),
            depth: self.block.depth + 1,
            ty,
            polymorphic: self.block.polymorphic,
            block_stack_index: self.block.block_stack_index,
            exit_stack_index: self.block.exit_stack_index,
        };
        let outer = std::mem::replace(&mut self.block, scope);
        self.outer.push(outer);

        let result = self.compile_block_body(kind);
        if let Some(outer) = self.outer.pop() {
            self.block = outer;
        }
        result
    }

    fn compile_block_body(&mut self, kind: ScopeKind) -> CompileResult<()> {
        let ty = Rc::clone(&self.block.ty);
        let num_params = count(ty.num_params())?;
        let num_results = count(ty.num_results())?;

        // Consume the params but keep their records: an `else` arm reuses
        // them and loops branch back to them.
        let stack_index = self.stack_index;
        if kind != ScopeKind::Else {
            for &param in ty.params().iter().rev() {
                self.pop_type(param)?;
            }
        } else if self.block.polymorphic
            && self.block.block_stack_index + num_params > self.stack_index
        {
            self.stack_index = self.block.block_stack_index;
        } else {
            self.stack_index = self
                .stack_index
                .checked_sub(num_params)
                .ok_or(CompileError::FunctionStackUnderrun)?;
        }
        let param_index = self.stack_index;
        self.block.exit_stack_index = param_index;
        self.stack_index = stack_index;

        // Allocate the result slots, then free them while keeping the
        // records for branches to find.
        self.push_block_results()?;
        let block_stack_index = self.stack_index;
        for _ in 0..num_results {
            self.pop()?;
        }
        self.block.block_stack_index = block_stack_index;
        self.stack_index = block_stack_index;

        for (i, &param) in ty.params().iter().enumerate() {
            match self.wasm_stack[usize::from(param_index) + i] {
                Location::Slot(slot) => self.push_shared_slot(param, slot)?,
                location => self.push(param, location)?,
            }
        }

        self.compile_block_statements()?;

        if !self.block.polymorphic {
            let target = self.target(0)?;
            self.resolve_block_results(&target, false)?;
        }
        self.unwind_block_stack()?;

        let results_pending = kind == ScopeKind::If && num_results > 0;
        if !(results_pending || self.previous_opcode == opcode::ELSE) {
            self.stack_index = self.block.exit_stack_index;
            self.push_block_results()?;
        }
        self.patch_branches();
        Ok(())
    }

    pub(super) fn compile_end(&mut self) -> CompileResult<()> {
        if self.block.depth != 0 {
            return Ok(());
        }
        if !self.block.polymorphic {
            self.return_values(false)?;
        }
        self.emit_op(exec::ret)?;
        Ok(())
    }

    pub(super) fn compile_return(&mut self) -> CompileResult<()> {
        if !self.block.polymorphic {
            self.return_values(true)?;
            self.emit_op(exec::ret)?;
        }
        self.set_stack_polymorphic()
    }

    pub(super) fn compile_unreachable(&mut self) -> CompileResult<()> {
        self.emit_op(exec::unreachable)?;
        self.set_stack_polymorphic()
    }

    // ── Branches ─────────────────────────────────────────────────────────────

    pub(super) fn compile_branch(&mut self, conditional: bool) -> CompileResult<()> {
        let relative = self.reader.read_u32_leb()?;
        let target = self.target(relative)?;
        let has_params = target.ty.num_params() > 0;

        if target.kind == ScopeKind::Loop {
            if conditional && has_params {
                let op = if self.top_in_register() {
                    exec::branch_if_prologue_r
                } else {
                    exec::branch_if_prologue_s
                };
                self.emit_op(op)?;
                self.emit_slot_of_top_and_pop()?;
                let skip = self.reserve_pc();
                if !self.block.polymorphic {
                    self.resolve_block_results(&target, true)?;
                }
                self.emit_op(exec::continue_loop)?;
                self.emit(Word::Pc(target.pc));
                let here = self.pc();
                self.patch(skip, here);
            } else if conditional {
                self.copy_stack_top_to_register(false)?;
                self.pop_type(ValueType::I32)?;
                self.emit_op(exec::continue_loop_if)?;
                self.emit(Word::Pc(target.pc));
            } else {
                if has_params && !self.block.polymorphic {
                    self.resolve_block_results(&target, true)?;
                }
                self.emit_op(exec::continue_loop)?;
                self.emit(Word::Pc(target.pc));
                self.set_stack_polymorphic()?;
            }
            return Ok(());
        }

        let is_return = target.kind == ScopeKind::Function;
        let has_results = target.ty.num_results() > 0;
        let mut skip = None;

        if conditional {
            if !has_results && !is_return {
                let op = if self.top_in_register() {
                    exec::branch_if_r
                } else {
                    exec::branch_if_s
                };
                self.emit_op(op)?;
                self.emit_slot_of_top_and_pop()?;
                let at = self.reserve_pc();
                self.add_patch(relative, at);
                return Ok(());
            }
            if !is_return && target.ty.results().last().is_some_and(|t| t.is_float()) {
                self.free_float_register(self.stack_index.checked_sub(2))?;
            }
            let op = if self.top_in_register() {
                exec::branch_if_prologue_r
            } else {
                exec::branch_if_prologue_s
            };
            self.emit_op(op)?;
            self.emit_slot_of_top_and_pop()?;
            skip = Some(self.reserve_pc());
        }

        if !self.block.polymorphic {
            if is_return {
                self.return_values(true)?;
                self.emit_op(exec::ret)?;
            } else {
                self.resolve_block_results(&target, true)?;
                self.emit_patching_branch(relative)?;
            }
        }

        if let Some(skip) = skip {
            let here = self.pc();
            self.patch(skip, here);
        }
        if !conditional {
            self.set_stack_polymorphic()?;
        }
        Ok(())
    }

    pub(super) fn compile_branch_table(&mut self) -> CompileResult<()> {
        let num_targets = self.reader.read_u32_leb()?;

        // The index goes to a slot and `fp0` is freed, so every target's
        // prologue starts from the same register state.
        self.preserve_registers()?;
        let slot = self.top_slot();
        self.pop()?;

        self.ensure_lines(num_targets.saturating_add(4).max(PAGE_FREE_LINES_THRESHOLD))?;
        self.emit_op(exec::branch_table)?;
        self.emit_slot(slot);
        self.emit(Word::Imm32(num_targets));

        for _ in 0..=num_targets {
            let relative = self.reader.read_u32_leb()?;
            let target = self.target(relative)?;

            let saved = self.switch_to_new_page()?;
            let start = self.pc();
            let result = self.compile_table_target(&target);
            self.restore_page(saved);
            result?;
            self.emit(Word::Pc(start));
        }
        self.set_stack_polymorphic()
    }

    fn compile_table_target(&mut self, target: &Target) -> CompileResult<()> {
        if self.block.polymorphic {
            return Ok(());
        }
        match target.kind {
            ScopeKind::Loop => {
                self.resolve_block_results(target, true)?;
                self.emit_op(exec::continue_loop)?;
                self.emit(Word::Pc(target.pc));
            }
            ScopeKind::Function => {
                self.return_values(true)?;
                self.emit_op(exec::ret)?;
            }
            _ => {
                self.resolve_block_results(target, true)?;
                self.emit_patching_branch(target.relative)?;
            }
        }
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────────────

    /// Copy the arguments into a fresh frame above every live slot and push
    /// the result slots. Returns the frame's offset.
    fn call_args_and_return(&mut self, ty: &FuncType, indirect: bool) -> CompileResult<u16> {
        // At least one slot, so runaway recursion exhausts the value stack.
        let top = (self.max_used_slot_plus_one().max(1) + 1) & !1;
        if indirect {
            self.pop()?;
        }

        let frame_end = usize::from(top) + (ty.num_params() + ty.num_results()) * usize::from(IO_SLOTS);
        if frame_end >= usize::from(self.max_function_slots) {
            return Err(CompileError::FunctionStackOverflow);
        }
        let frame_end = frame_end as u16;
        if frame_end > top {
            self.touch_slot(frame_end - 1);
        }

        let mut arg_slot = frame_end;
        for _ in 0..ty.num_params() {
            arg_slot -= IO_SLOTS;
            self.copy_stack_top_to_slot(arg_slot)?;
            self.pop()?;
        }

        let mut slot = top;
        for &result in ty.results() {
            self.push(result, Location::Slot(slot))?;
            self.mark_slots_allocated(slot, result)?;
            slot += IO_SLOTS;
        }
        Ok(top)
    }

    pub(super) fn compile_call(&mut self) -> CompileResult<()> {
        let index = self.reader.read_u32_leb()?;
        let id = *self.rt.instances[self.module.index()]
            .functions
            .get(index as usize)
            .ok_or(CompileError::FunctionLookupFailed(index))?;
        let callee = self
            .rt
            .functions
            .get(id.index())
            .ok_or(CompileError::FunctionLookupFailed(index))?;
        let ty = Rc::clone(&callee.ty);
        let compiled = callee.compiled;

        let offset = self.call_args_and_return(&ty, false)?;
        match compiled {
            Some(entry) => {
                self.emit_op(exec::call)?;
                self.emit(Word::Pc(entry));
            }
            None => {
                self.emit_op(exec::compile)?;
                self.emit(Word::Func(id));
            }
        }
        self.emit_slot(offset);
        Ok(())
    }

    pub(super) fn compile_call_indirect(&mut self) -> CompileResult<()> {
        let type_index = self.reader.read_u32_leb()?;
        let _table = self.reader.read_u32_leb()?;
        let ty = self.rt.instances[self.module.index()]
            .types
            .get(type_index as usize)
            .cloned()
            .ok_or(CompileError::TypeIndexOutOfBounds(type_index))?;

        if self.top_in_register() {
            self.preserve_register(Reg::Int)?;
        }
        let table_slot = self.top_slot();
        let offset = self.call_args_and_return(&ty, true)?;

        self.emit_op(exec::call_indirect)?;
        self.emit_slot(table_slot);
        self.emit(Word::Module(self.module));
        self.emit(Word::Type(type_index));
        self.emit_slot(offset);
        Ok(())
    }
}
