//! Branches, loops, calls and function entry.

use std::rc::Rc;

use sprig_memory::Offset;
use sprig_types::same_type;

use super::{execute, Machine, OpResult, Unwind};
use crate::code::{Pc, Word};
use crate::compile;
use crate::error::Trap;
use crate::function::{FuncId, FunctionKind};
use crate::host::HostContext;

// ══════════════════════════════════════════════════════════════════════════════
// Branches
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn branch(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (target, _) = m.imm_pc(pc)?;
    Ok(target)
}

/// Falls through into the `if` body when the condition holds, else jumps to
/// the `else` code.
pub(crate) fn if_r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let condition: i32 = m.reg();
    let (else_pc, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { pc } else { else_pc })
}

pub(crate) fn if_s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (slot, pc) = m.imm_slot(pc)?;
    let condition: i32 = m.slot(slot)?;
    let (else_pc, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { pc } else { else_pc })
}

pub(crate) fn branch_if_r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let condition: i32 = m.reg();
    let (target, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { target } else { pc })
}

pub(crate) fn branch_if_s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (slot, pc) = m.imm_slot(pc)?;
    let condition: i32 = m.slot(slot)?;
    let (target, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { target } else { pc })
}

/// A conditional branch that has to move values first. The prologue that
/// follows ends in the actual branch; a false condition skips it.
pub(crate) fn branch_if_prologue_r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let condition: i32 = m.reg();
    let (skip, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { pc } else { skip })
}

pub(crate) fn branch_if_prologue_s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (slot, pc) = m.imm_slot(pc)?;
    let condition: i32 = m.slot(slot)?;
    let (skip, pc) = m.imm_pc(pc)?;
    Ok(if condition != 0 { pc } else { skip })
}

/// Index slot, target count `n`, then `n + 1` targets; the last one is the
/// default.
pub(crate) fn branch_table(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (slot, pc) = m.imm_slot(pc)?;
    let (count, pc) = m.imm_u32(pc)?;
    let index: u32 = m.slot(slot)?;
    let (target, _) = m.imm_pc(pc.offset(index.min(count)))?;
    Ok(target)
}

// ══════════════════════════════════════════════════════════════════════════════
// Loops
// ══════════════════════════════════════════════════════════════════════════════

/// Run the loop body starting right after this operation until it unwinds
/// with something other than its own continuation.
pub(crate) fn enter_loop(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    loop {
        m.r0 = 0;
        m.fp0 = 0;
        match execute(m, pc) {
            Unwind::ContinueLoop(target) if target == pc => continue,
            unwind => return Err(unwind),
        }
    }
}

pub(crate) fn continue_loop(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (target, _) = m.imm_pc(pc)?;
    Err(Unwind::ContinueLoop(target))
}

pub(crate) fn continue_loop_if(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let condition: i32 = m.reg();
    let (target, pc) = m.imm_pc(pc)?;
    if condition != 0 {
        Err(Unwind::ContinueLoop(target))
    } else {
        Ok(pc)
    }
}

pub(crate) fn ret(_m: &mut Machine<'_>, _pc: Pc) -> OpResult {
    Err(Unwind::Return)
}

pub(crate) fn unreachable(_m: &mut Machine<'_>, _pc: Pc) -> OpResult {
    Err(Trap::Unreachable.into())
}

// ══════════════════════════════════════════════════════════════════════════════
// Calls
// ══════════════════════════════════════════════════════════════════════════════

impl Machine<'_> {
    /// Run the code at `target` in a frame `offset` slots above the current
    /// one. Registers survive the call.
    pub(crate) fn invoke(&mut self, target: Pc, offset: u16) -> Result<(), Unwind> {
        if self.depth >= self.rt.config.max_call_depth {
            return Err(Trap::StackOverflow.into());
        }
        let (sp, r0, fp0) = (self.sp, self.r0, self.fp0);
        self.sp += u32::from(offset);
        self.depth += 1;
        let unwind = execute(self, target);
        self.depth -= 1;
        self.sp = sp;
        self.r0 = r0;
        self.fp0 = fp0;

        match unwind {
            Unwind::Return => Ok(()),
            // Re-raised so this call site gets its own frame.
            Unwind::Trapped(trap) | Unwind::Trap(trap) => Err(Unwind::Trap(trap)),
            Unwind::ContinueLoop(_) => Err(Trap::CorruptCode.into()),
        }
    }

    /// Entry position of `id`, compiling it first if needed.
    fn ensure_compiled(&mut self, id: FuncId) -> Result<Pc, Trap> {
        if let Some(entry) = self.function(id)?.compiled {
            return Ok(entry);
        }
        compile::compile_function(self.rt, id).map_err(Trap::CompileFailed)
    }
}

/// Callee entry, then the outgoing frame offset.
pub(crate) fn call(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (target, pc) = m.imm_pc(pc)?;
    let (offset, pc) = m.imm_slot(pc)?;
    m.invoke(target, offset)?;
    Ok(pc)
}

/// A call to a function that was not compiled when the caller was. Compiles
/// the callee and rewrites itself into a [`call`].
pub(crate) fn compile(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (id, next) = m.imm_func(pc)?;
    let entry = m.ensure_compiled(id)?;
    m.rt.code.set(pc.prev(), Word::Op(call));
    m.rt.code.set(pc, Word::Pc(entry));
    let (offset, next) = m.imm_slot(next)?;
    m.invoke(entry, offset)?;
    Ok(next)
}

/// Table index slot, module, expected type, frame offset.
pub(crate) fn call_indirect(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (slot, pc) = m.imm_slot(pc)?;
    let (module, pc) = m.imm_module(pc)?;
    let (type_index, pc) = m.imm_type(pc)?;
    let (offset, pc) = m.imm_slot(pc)?;
    let index: u32 = m.slot(slot)?;

    let instance = m.rt.instances.get(module.index()).ok_or(Trap::CorruptCode)?;
    let expected = Rc::clone(instance.types.get(type_index).ok_or(Trap::CorruptCode)?);
    let id = match instance.table.get(index as usize) {
        None => return Err(Trap::TableIndexOutOfRange.into()),
        Some(None) => return Err(Trap::TableElementIsNull.into()),
        Some(Some(id)) => *id,
    };
    if !same_type(&m.function(id)?.ty, &expected) {
        return Err(Trap::IndirectCallTypeMismatch.into());
    }

    let entry = m.ensure_compiled(id)?;
    m.invoke(entry, offset)?;
    Ok(pc)
}

/// The whole body of a host function's stub.
pub(crate) fn call_host(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (id, _) = m.imm_func(pc)?;
    let function = m.rt.functions.get_mut(id.index()).ok_or(Trap::CorruptCode)?;
    let FunctionKind::Host(handler) = &function.kind else {
        return Err(Trap::CorruptCode.into());
    };
    let handler = Rc::clone(handler);
    let ty = Rc::clone(&function.ty);
    function.hits += 1;

    let frame = m.rt.stack.get() + m.sp * 4;
    let frame_slots = m.rt.stack_slots.saturating_sub(m.sp);
    let rt = &mut *m.rt;
    let mut ctx = HostContext::new(&mut rt.heap, frame, frame_slots, rt.memory.as_mut(), &ty);
    handler(&mut ctx)?;
    Err(Unwind::Return)
}

/// First operation of every compiled function: checks stack space, zeroes
/// the locals and copies the constant table in after them.
pub(crate) fn entry(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    m.r0 = 0;
    m.fp0 = 0;
    let (id, pc) = m.imm_func(pc)?;
    let stack_slots = u64::from(m.rt.stack_slots);
    let function = m.rt.functions.get_mut(id.index()).ok_or(Trap::CorruptCode)?;
    if u64::from(m.sp) + u64::from(function.max_stack_slots) > stack_slots {
        return Err(Trap::StackOverflow.into());
    }
    function.hits += 1;
    let locals = m.sp + u32::from(function.num_ret_and_arg_slots);
    let local_bytes = function.num_local_bytes;
    let constants = function.constants;

    let locals_at = m.rt.stack.get() + locals * 4;
    if local_bytes > 0 {
        m.rt
            .heap
            .fill(Offset::new(locals_at), 0, local_bytes as usize)
            .map_err(Trap::from)?;
    }
    if let Some(table) = constants {
        m.rt
            .heap
            .copy_within(table.offset, Offset::new(locals_at + local_bytes), table.len as usize)
            .map_err(Trap::from)?;
    }
    Ok(pc)
}
