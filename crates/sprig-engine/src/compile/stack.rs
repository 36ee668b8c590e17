//! The virtual operand stack, slot allocation and the moves between slots
//! and registers.

use sprig_types::ValueType;

use crate::code::{Operation, Word};
use crate::error::{CompileError, CompileResult};
use crate::exec::variables as var;

use super::{Compiler, Location, Reg, ScopeKind, UNUSED_SLOT};

fn align(slot: u32, ty: ValueType) -> u32 {
    let mask = u32::from(ty.slots()) - 1;
    (slot + mask) & !mask
}

pub(super) fn set_register_op(ty: ValueType) -> Operation {
    match ty {
        ValueType::I32 => var::set_register_i32,
        ValueType::I64 => var::set_register_i64,
        ValueType::F32 => var::set_register_f32,
        ValueType::F64 => var::set_register_f64,
    }
}

pub(super) fn set_slot_op(ty: ValueType) -> Operation {
    match ty {
        ValueType::I32 => var::set_slot_i32,
        ValueType::I64 => var::set_slot_i64,
        ValueType::F32 => var::set_slot_f32,
        ValueType::F64 => var::set_slot_f64,
    }
}

fn preserve_set_slot_op(ty: ValueType) -> Operation {
    match ty {
        ValueType::I32 => var::preserve_set_slot_i32,
        ValueType::I64 => var::preserve_set_slot_i64,
        ValueType::F32 => var::preserve_set_slot_f32,
        ValueType::F64 => var::preserve_set_slot_f64,
    }
}

pub(super) fn copy_slot_op(ty: ValueType) -> Operation {
    if ty.is_64bit() {
        var::copy_slot_64
    } else {
        var::copy_slot_32
    }
}

fn preserve_copy_slot_op(ty: ValueType) -> Operation {
    if ty.is_64bit() {
        var::preserve_copy_slot_64
    } else {
        var::preserve_copy_slot_32
    }
}

impl Compiler<'_> {
    // ── Stack queries ────────────────────────────────────────────────────────

    pub(super) fn top_index(&self) -> Option<u16> {
        self.stack_index.checked_sub(1)
    }

    /// Type `offset` entries below the top, limited to dynamic entries.
    pub(super) fn type_from_top(&self, offset: u16) -> Option<ValueType> {
        let index = self.stack_index.checked_sub(offset + 1)?;
        (index >= self.stack_first_dynamic).then(|| self.type_stack[usize::from(index)])
    }

    pub(super) fn type_at(&self, index: u16) -> CompileResult<ValueType> {
        if index < self.stack_index {
            Ok(self.type_stack[usize::from(index)])
        } else {
            Err(CompileError::FunctionStackUnderrun)
        }
    }

    pub(super) fn in_register(&self, index: Option<u16>) -> bool {
        match index {
            Some(i) if i < self.stack_index => {
                matches!(self.wasm_stack[usize::from(i)], Location::Register(_))
            }
            _ => false,
        }
    }

    pub(super) fn top_in_register(&self) -> bool {
        self.in_register(self.top_index())
    }

    pub(super) fn below_top_in_register(&self, depth: u16) -> bool {
        self.in_register(self.stack_index.checked_sub(depth + 1))
    }

    /// Slot of entry `index`, or [`UNUSED_SLOT`] for register entries.
    pub(super) fn slot_at(&self, index: u16) -> u16 {
        match self.wasm_stack.get(usize::from(index)) {
            Some(Location::Slot(slot)) => *slot,
            _ => UNUSED_SLOT,
        }
    }

    /// Upper half of a two-slot entry.
    fn extra_slot_at(&self, index: u16) -> u16 {
        let slot = self.slot_at(index);
        if slot == UNUSED_SLOT {
            return UNUSED_SLOT;
        }
        slot + self.type_stack[usize::from(index)].slots() - 1
    }

    pub(super) fn top_slot(&self) -> u16 {
        self.top_index().map_or(UNUSED_SLOT, |i| self.slot_at(i))
    }

    pub(super) fn is_constant_slot(&self, slot: u16) -> bool {
        slot >= self.slot_first_const && slot < self.slot_max_const
    }

    // ── Slot allocation ──────────────────────────────────────────────────────

    pub(super) fn touch_slot(&mut self, slot: u16) {
        self.max_stack_slots = self.max_stack_slots.max(slot + 1);
    }

    pub(super) fn mark_slot_allocated(&mut self, slot: u16) -> CompileResult<()> {
        let cell = self
            .slots
            .get_mut(usize::from(slot))
            .ok_or(CompileError::FunctionStackOverflow)?;
        *cell = 1;
        self.slot_max_allocated_plus_one = self.slot_max_allocated_plus_one.max(slot + 1);
        self.touch_slot(slot);
        Ok(())
    }

    pub(super) fn mark_slots_allocated(&mut self, slot: u16, ty: ValueType) -> CompileResult<()> {
        for i in 0..ty.slots() {
            self.mark_slot_allocated(slot + i)?;
        }
        Ok(())
    }

    /// First free run of slots for `ty` in `[start, end)`.
    fn allocate_slots_within(&mut self, ty: ValueType, start: u16, end: u16) -> CompileResult<u16> {
        let n = u32::from(ty.slots());
        let end = u32::from(end).min(self.slots.len() as u32);
        let mut i = align(u32::from(start), ty);
        while i + n - 1 < end {
            let free = (i..i + n).all(|s| self.slots[s as usize] == 0);
            if free {
                let slot = i as u16;
                self.mark_slots_allocated(slot, ty)?;
                return Ok(slot);
            }
            i += n;
        }
        Err(CompileError::FunctionStackOverflow)
    }

    pub(super) fn allocate_slots(&mut self, ty: ValueType) -> CompileResult<u16> {
        self.allocate_slots_within(ty, self.slot_first_dynamic, self.max_function_slots)
    }

    fn allocate_constant_slots(&mut self, ty: ValueType) -> CompileResult<u16> {
        let end = self
            .slot_first_dynamic
            .min(self.slot_first_const.saturating_add(self.max_constant_slots));
        self.allocate_slots_within(ty, self.slot_first_const, end)
    }

    /// One more stack entry shares `slot`.
    fn retain_slot(&mut self, slot: u16) -> CompileResult<()> {
        let cell = self
            .slots
            .get_mut(usize::from(slot))
            .ok_or(CompileError::FunctionStackOverflow)?;
        if *cell == u8::MAX {
            return Err(CompileError::SlotUsageOverflow);
        }
        *cell += 1;
        Ok(())
    }

    fn release_slots(&mut self, slot: u16, ty: ValueType) {
        for i in 0..ty.slots() {
            if let Some(cell) = self.slots.get_mut(usize::from(slot + i)) {
                *cell = cell.saturating_sub(1);
            }
        }
    }

    /// One past the highest allocated slot.
    pub(super) fn max_used_slot_plus_one(&mut self) -> u16 {
        while self.slot_max_allocated_plus_one > self.slot_first_dynamic
            && self.slots[usize::from(self.slot_max_allocated_plus_one - 1)] == 0
        {
            self.slot_max_allocated_plus_one -= 1;
        }
        self.slot_max_allocated_plus_one
    }

    // ── Registers ────────────────────────────────────────────────────────────

    /// Spill whatever lives in `reg` to a fresh slot.
    pub(super) fn preserve_register(&mut self, reg: Reg) -> CompileResult<()> {
        let Some(index) = self.registers[reg.index()].take() else {
            return Ok(());
        };
        let ty = self.type_stack[usize::from(index)];
        let slot = self.allocate_slots(ty)?;
        self.wasm_stack[usize::from(index)] = Location::Slot(slot);
        self.emit_op(set_slot_op(ty))?;
        self.emit_slot(slot);
        Ok(())
    }

    pub(super) fn preserve_registers(&mut self) -> CompileResult<()> {
        self.preserve_register(Reg::Float)?;
        self.preserve_register(Reg::Int)
    }

    /// Spill both registers unless they hold the stack top.
    pub(super) fn preserve_non_top_registers(&mut self) -> CompileResult<()> {
        let top = self.top_index();
        for reg in [Reg::Int, Reg::Float] {
            if let Some(index) = self.registers[reg.index()] {
                if Some(index) != top {
                    self.preserve_register(reg)?;
                }
            }
        }
        Ok(())
    }

    // ── Push and pop ─────────────────────────────────────────────────────────

    pub(super) fn push(&mut self, ty: ValueType, location: Location) -> CompileResult<()> {
        let index = self.stack_index;
        if index >= self.max_stack_height {
            return Err(CompileError::FunctionStackOverflow);
        }
        self.wasm_stack[usize::from(index)] = location;
        self.type_stack[usize::from(index)] = ty;
        if let Location::Register(reg) = location {
            self.registers[reg.index()] = Some(index);
        }
        self.stack_index += 1;
        Ok(())
    }

    pub(super) fn push_register(&mut self, ty: ValueType) -> CompileResult<()> {
        self.push(ty, Location::Register(Reg::of(ty)))
    }

    pub(super) fn push_allocated_slot(&mut self, ty: ValueType) -> CompileResult<u16> {
        let slot = self.allocate_slots(ty)?;
        self.push(ty, Location::Slot(slot))?;
        Ok(slot)
    }

    pub(super) fn push_allocated_slot_and_emit(&mut self, ty: ValueType) -> CompileResult<()> {
        let slot = self.push_allocated_slot(ty)?;
        self.emit_slot(slot);
        Ok(())
    }

    /// Push an entry at `slot`, sharing it if it is a dynamic slot.
    pub(super) fn push_shared_slot(&mut self, ty: ValueType, slot: u16) -> CompileResult<()> {
        self.push(ty, Location::Slot(slot))?;
        if slot >= self.slot_first_dynamic && slot != UNUSED_SLOT {
            for i in 0..ty.slots() {
                self.retain_slot(slot + i)?;
            }
            self.slot_max_allocated_plus_one = self.slot_max_allocated_plus_one.max(slot + ty.slots());
            self.touch_slot(slot + ty.slots() - 1);
        }
        Ok(())
    }

    pub(super) fn pop(&mut self) -> CompileResult<()> {
        if self.stack_index > self.block.block_stack_index {
            self.stack_index -= 1;
            let index = usize::from(self.stack_index);
            match self.wasm_stack[index] {
                Location::Register(reg) => self.registers[reg.index()] = None,
                Location::Slot(slot) if slot >= self.slot_first_dynamic && slot != UNUSED_SLOT => {
                    self.release_slots(slot, self.type_stack[index]);
                }
                Location::Slot(_) => {}
            }
            Ok(())
        } else if self.block.polymorphic {
            Ok(())
        } else {
            Err(CompileError::FunctionStackUnderrun)
        }
    }

    pub(super) fn pop_type(&mut self, ty: ValueType) -> CompileResult<()> {
        if self.type_from_top(0) == Some(ty) || self.block.polymorphic {
            self.pop()
        } else {
            Err(CompileError::TypeMismatch)
        }
    }

    /// Pop everything the current block pushed.
    pub(super) fn unwind_block_stack(&mut self) -> CompileResult<()> {
        let count = self.stack_index.saturating_sub(self.block.block_stack_index);
        for _ in 0..count {
            self.pop()?;
        }
        Ok(())
    }

    pub(super) fn set_stack_polymorphic(&mut self) -> CompileResult<()> {
        self.block.polymorphic = true;
        self.unwind_block_stack()
    }

    // ── Constants ────────────────────────────────────────────────────────────

    /// Push a constant: reuse an equal table entry, else add one, else emit
    /// it inline. 32-bit values arrive zero-extended.
    pub(super) fn push_const(&mut self, bits: u64, ty: ValueType) -> CompileResult<()> {
        let used = self.slot_max_const - self.slot_first_const;
        if ty.is_64bit() {
            let mut slot = align(u32::from(self.slot_first_const), ty) as u16;
            while slot + 1 < self.slot_max_const {
                let i = usize::from(slot - self.slot_first_const);
                if self.slots[usize::from(slot)] != 0 && self.slots[usize::from(slot) + 1] != 0 {
                    let value = u64::from(self.constants[i]) | (u64::from(self.constants[i + 1]) << 32);
                    if value == bits {
                        return self.push(ty, Location::Slot(slot));
                    }
                }
                slot += 2;
            }
        } else {
            for i in 0..used {
                let slot = self.slot_first_const + i;
                if self.slots[usize::from(slot)] != 0 && u64::from(self.constants[usize::from(i)]) == bits {
                    return self.push(ty, Location::Slot(slot));
                }
            }
        }

        match self.allocate_constant_slots(ty) {
            Ok(slot) => {
                let i = usize::from(slot - self.slot_first_const);
                self.constants[i] = bits as u32;
                if ty.is_64bit() {
                    self.constants[i + 1] = (bits >> 32) as u32;
                }
                self.slot_max_const = self.slot_max_const.max(slot + ty.slots());
                self.push(ty, Location::Slot(slot))
            }
            Err(_) => {
                if ty.is_64bit() {
                    self.emit_op(var::const64)?;
                    self.emit(Word::Imm64(bits));
                } else {
                    self.emit_op(var::const32)?;
                    self.emit(Word::Imm32(bits as u32));
                }
                self.push_allocated_slot_and_emit(ty)
            }
        }
    }

    // ── Moves ────────────────────────────────────────────────────────────────

    /// Emit the top's slot if it is in one, then pop it.
    pub(super) fn emit_slot_of_top_and_pop(&mut self) -> CompileResult<()> {
        if !self.top_in_register() {
            let slot = self.top_slot();
            self.emit_slot(slot);
        }
        self.pop()
    }

    pub(super) fn copy_stack_index_to_slot(&mut self, dest: u16, index: u16) -> CompileResult<()> {
        let ty = self.type_at(index)?;
        if self.in_register(Some(index)) {
            self.emit_op(set_slot_op(ty))?;
            self.emit_slot(dest);
        } else {
            let src = self.slot_at(index);
            self.emit_op(copy_slot_op(ty))?;
            self.emit_slot(dest);
            self.emit_slot(src);
        }
        Ok(())
    }

    pub(super) fn copy_stack_top_to_slot(&mut self, dest: u16) -> CompileResult<()> {
        match self.top_index() {
            Some(top) => self.copy_stack_index_to_slot(dest, top),
            None if self.block.polymorphic => Ok(()),
            None => Err(CompileError::FunctionStackUnderrun),
        }
    }

    /// Copy the top into `dest`, first saving `dest`'s old value to
    /// `preserve`.
    fn preserved_copy_top_slot(&mut self, dest: u16, preserve: u16) -> CompileResult<()> {
        let Some(ty) = self.type_from_top(0) else {
            return self.underrun_unless_polymorphic();
        };
        if self.top_in_register() {
            self.emit_op(preserve_set_slot_op(ty))?;
            self.emit_slot(dest);
            self.emit_slot(preserve);
        } else {
            let src = self.top_slot();
            self.emit_op(preserve_copy_slot_op(ty))?;
            self.emit_slot(dest);
            self.emit_slot(src);
            self.emit_slot(preserve);
        }
        Ok(())
    }

    /// Load the top into its register. With `update`, the stack entry moves
    /// to the register too.
    pub(super) fn copy_stack_top_to_register(&mut self, update: bool) -> CompileResult<()> {
        if self.top_in_register() {
            return Ok(());
        }
        let Some(ty) = self.type_from_top(0) else {
            return self.underrun_unless_polymorphic();
        };
        self.preserve_register(Reg::of(ty))?;
        let slot = self.top_slot();
        self.emit_op(set_register_op(ty))?;
        self.emit_slot(slot);
        if update {
            self.pop_type(ty)?;
            self.push_register(ty)?;
        }
        Ok(())
    }

    pub(super) fn underrun_unless_polymorphic(&self) -> CompileResult<()> {
        if self.block.polymorphic {
            Ok(())
        } else {
            Err(CompileError::FunctionStackUnderrun)
        }
    }

    // ── Locals ───────────────────────────────────────────────────────────────

    /// Before a local's slot is overwritten, move the stack entries still
    /// reading it to a shared preserve slot. Returns that slot, or
    /// `local_slot` when nothing refers to the local.
    fn find_referenced_local(&mut self, local_slot: u16) -> CompileResult<u16> {
        let mut start = self.block.block_stack_index;
        let mut kind = self.block.kind;
        let mut outer = self.outer.iter().rev();
        while kind == ScopeKind::Block {
            match outer.next() {
                Some(scope) => {
                    start = scope.block_stack_index;
                    kind = scope.kind;
                }
                None => break,
            }
        }

        let mut preserved = local_slot;
        for i in start..self.stack_index {
            if self.wasm_stack[usize::from(i)] != Location::Slot(local_slot) {
                continue;
            }
            if preserved == local_slot {
                preserved = self.allocate_slots(self.type_stack[usize::from(i)])?;
            } else {
                self.retain_slot(preserved)?;
            }
            self.wasm_stack[usize::from(i)] = Location::Slot(preserved);
        }
        Ok(preserved)
    }

    /// `local.set` and `local.tee`.
    pub(super) fn set_local(&mut self, index: u32, tee: bool) -> CompileResult<()> {
        if index >= self.num_args_and_locals {
            return Err(CompileError::LocalIndexOutOfBounds(index));
        }
        let local_slot = self.slot_at(index as u16);
        let preserved = self.find_referenced_local(local_slot)?;
        if preserved == local_slot {
            self.copy_stack_top_to_slot(local_slot)?;
        } else {
            self.preserved_copy_top_slot(local_slot, preserved)?;
        }
        if !tee {
            self.pop()?;
        }
        Ok(())
    }

    pub(super) fn get_local(&mut self, index: u32) -> CompileResult<()> {
        if index >= self.num_args_and_locals {
            return Err(CompileError::LocalIndexOutOfBounds(index));
        }
        let i = usize::from(index as u16);
        let (ty, location) = (self.type_stack[i], self.wasm_stack[i]);
        self.push(ty, location)
    }

    /// Before entering a block, copy locals that stack entries still read so
    /// code inside the block may overwrite them.
    pub(super) fn preserve_args_and_locals(&mut self) -> CompileResult<()> {
        if self.stack_index <= self.stack_first_dynamic {
            return Ok(());
        }
        for i in 0..self.num_args_and_locals {
            let i = i as u16;
            let slot = self.slot_at(i);
            let preserved = self.find_referenced_local(slot)?;
            if preserved != slot {
                let ty = self.type_stack[usize::from(i)];
                self.emit_op(copy_slot_op(ty))?;
                self.emit_slot(preserved);
                self.emit_slot(slot);
            }
        }
        Ok(())
    }

    // ── Block results ────────────────────────────────────────────────────────

    /// Copy entries `[index, end)` into the slots recorded from
    /// `target_index` on. A source that would be clobbered before it is read
    /// is first moved to a temporary slot.
    pub(super) fn copy_stack_slots(
        &mut self,
        target_index: u16,
        index: u16,
        end: u16,
        mut temp: u16,
    ) -> CompileResult<()> {
        if index >= end {
            return Ok(());
        }
        let source = self.wasm_stack[usize::from(index)];
        let source_slot = self.slot_at(index);
        let extra = self.type_stack[usize::from(index)].slots() - 1;
        let target = self.slot_at(target_index);

        let mut preserve_index = index;
        let mut collision = source;

        if target != source_slot {
            for check in index + 1..end {
                let other = self.slot_at(check);
                let other_extra = self.extra_slot_at(check);
                if target == other || target == other_extra || target.saturating_add(extra) == other {
                    if temp >= self.max_function_slots {
                        return Err(CompileError::FunctionStackOverflow);
                    }
                    self.copy_stack_index_to_slot(temp, check)?;
                    collision = self.wasm_stack[usize::from(check)];
                    self.wasm_stack[usize::from(check)] = Location::Slot(temp);
                    temp += 2;
                    self.touch_slot(temp - 1);
                    preserve_index = check;
                    break;
                }
            }
            self.copy_stack_index_to_slot(target, index)?;
            self.wasm_stack[usize::from(index)] = Location::Slot(target);
        }

        self.copy_stack_slots(target_index + 1, index + 1, end, temp)?;
        self.wasm_stack[usize::from(index)] = source;
        self.wasm_stack[usize::from(preserve_index)] = collision;
        Ok(())
    }

    /// Push a block's results as fresh slots; a trailing float result goes
    /// to the float register.
    pub(super) fn push_block_results(&mut self) -> CompileResult<()> {
        let ty = std::rc::Rc::clone(&self.block.ty);
        let results = ty.results();
        for (i, &result) in results.iter().enumerate() {
            if i + 1 == results.len() && result.is_float() {
                self.push_register(result)?;
            } else {
                self.push_allocated_slot(result)?;
            }
        }
        Ok(())
    }
}
