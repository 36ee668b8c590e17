//! Threaded-code execution.
//!
//! Every operation is a plain function that reads its immediates from the
//! words following it and returns the position dispatch continues at. The
//! driving loop in [`execute`] calls operations until one unwinds: a return,
//! a loop continuation or a trap. Calls and loops run a nested driving loop,
//! so native stack use grows with guest call depth and loop nesting, never
//! with the number of operations executed.
//!
//! The machine state is the value stack pointer `sp` (in slots), one integer
//! register `r0` and one float register `fp0`. Slots live in the runtime's
//! private heap; slot `n` of the current frame is the 32-bit cell at
//! `stack + (sp + n) * 4`.

pub(crate) mod control;
pub(crate) mod convert;
pub(crate) mod memory;
pub(crate) mod numeric;
pub(crate) mod variables;

use sprig_memory::Offset;

use crate::code::{Pc, Word};
use crate::error::Trap;
use crate::function::{FuncId, Function, ModuleId};
use crate::runtime::Runtime;

/// Why a driving loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unwind {
    /// The function returned; results are in its return slots.
    Return,
    /// Restart the loop whose body starts at this position.
    ContinueLoop(Pc),
    /// An operation trapped. Its frame has not been recorded yet.
    Trap(Trap),
    /// A trap already attributed to the operation that raised it.
    Trapped(Trap),
}

impl From<Trap> for Unwind {
    fn from(trap: Trap) -> Self {
        Unwind::Trap(trap)
    }
}

pub(crate) type OpResult = Result<Pc, Unwind>;

/// Execution state of one guest call.
pub(crate) struct Machine<'r> {
    pub(crate) rt: &'r mut Runtime,
    pub(crate) sp: u32,
    pub(crate) r0: u64,
    pub(crate) fp0: u64,
    pub(crate) depth: u32,
}

/// Run operations from `pc` until one unwinds.
pub(crate) fn execute(m: &mut Machine<'_>, mut pc: Pc) -> Unwind {
    loop {
        if let Some(hook) = m.rt.yield_hook.as_mut() {
            let signal = hook();
            if signal != 0 {
                m.rt.record_frame(pc);
                return Unwind::Trapped(Trap::Yielded(signal));
            }
        }
        let op = match m.rt.code.word(pc) {
            Some(Word::Op(op)) => op,
            _ => {
                m.rt.record_frame(pc);
                return Unwind::Trapped(Trap::CorruptCode);
            }
        };
        match op(m, pc.next()) {
            Ok(next) => pc = next,
            Err(Unwind::Trap(trap)) => {
                m.rt.record_frame(pc);
                return Unwind::Trapped(trap);
            }
            Err(unwind) => return unwind,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Raw slot and register values
// ══════════════════════════════════════════════════════════════════════════════

/// A value type as it sits in slots and registers.
pub(crate) trait Raw: Copy {
    /// Occupies two slots.
    const WIDE: bool;
    /// Lives in `fp0` rather than `r0`.
    const FLOAT: bool;

    fn from_raw(raw: u64) -> Self;
    fn into_raw(self) -> u64;
}

macro_rules! raw_int {
    ($t:ty, $wide:expr, $via:ty) => {
        impl Raw for $t {
            const WIDE: bool = $wide;
            const FLOAT: bool = false;

            fn from_raw(raw: u64) -> Self {
                raw as $via as $t
            }

            fn into_raw(self) -> u64 {
                self as $via as u64
            }
        }
    };
}

raw_int!(i32, false, u32);
raw_int!(u32, false, u32);
raw_int!(i64, true, u64);
raw_int!(u64, true, u64);

impl Raw for f32 {
    const WIDE: bool = false;
    const FLOAT: bool = true;

    fn from_raw(raw: u64) -> Self {
        f32::from_bits(raw as u32)
    }

    fn into_raw(self) -> u64 {
        u64::from(self.to_bits())
    }
}

impl Raw for f64 {
    const WIDE: bool = true;
    const FLOAT: bool = true;

    fn from_raw(raw: u64) -> Self {
        f64::from_bits(raw)
    }

    fn into_raw(self) -> u64 {
        self.to_bits()
    }
}

impl Machine<'_> {
    // ── Registers and slots ──────────────────────────────────────────────────

    pub(crate) fn reg<T: Raw>(&self) -> T {
        T::from_raw(if T::FLOAT { self.fp0 } else { self.r0 })
    }

    pub(crate) fn set_reg<T: Raw>(&mut self, value: T) {
        if T::FLOAT {
            self.fp0 = value.into_raw();
        } else {
            self.r0 = value.into_raw();
        }
    }

    pub(crate) fn slot_offset(&self, slot: u16, wide: bool) -> Result<Offset, Trap> {
        let index = u64::from(self.sp) + u64::from(slot);
        let end = index + if wide { 2 } else { 1 };
        if end > u64::from(self.rt.stack_slots) {
            return Err(Trap::StackOverflow);
        }
        Ok(Offset::new(self.rt.stack.get() + index as u32 * 4))
    }

    pub(crate) fn slot<T: Raw>(&mut self, slot: u16) -> Result<T, Trap> {
        let at = self.slot_offset(slot, T::WIDE)?;
        let raw = if T::WIDE {
            u64::from_le_bytes(self.rt.heap.read_array::<8>(at)?)
        } else {
            u64::from(u32::from_le_bytes(self.rt.heap.read_array::<4>(at)?))
        };
        Ok(T::from_raw(raw))
    }

    pub(crate) fn set_slot<T: Raw>(&mut self, slot: u16, value: T) -> Result<(), Trap> {
        let at = self.slot_offset(slot, T::WIDE)?;
        let raw = value.into_raw();
        if T::WIDE {
            self.rt.heap.write_array(at, raw.to_le_bytes())?;
        } else {
            self.rt.heap.write_array(at, (raw as u32).to_le_bytes())?;
        }
        Ok(())
    }

    // ── Immediates ───────────────────────────────────────────────────────────

    fn word(&self, pc: Pc) -> Result<Word, Trap> {
        self.rt.code.word(pc).ok_or(Trap::CorruptCode)
    }

    pub(crate) fn imm_slot(&self, pc: Pc) -> Result<(u16, Pc), Trap> {
        match self.word(pc)? {
            Word::Slot(slot) => Ok((slot, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_u32(&self, pc: Pc) -> Result<(u32, Pc), Trap> {
        match self.word(pc)? {
            Word::Imm32(value) => Ok((value, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_u64(&self, pc: Pc) -> Result<(u64, Pc), Trap> {
        match self.word(pc)? {
            Word::Imm64(value) => Ok((value, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_pc(&self, pc: Pc) -> Result<(Pc, Pc), Trap> {
        match self.word(pc)? {
            Word::Pc(target) => Ok((target, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_func(&self, pc: Pc) -> Result<(FuncId, Pc), Trap> {
        match self.word(pc)? {
            Word::Func(id) => Ok((id, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_global(&self, pc: Pc) -> Result<(usize, Pc), Trap> {
        match self.word(pc)? {
            Word::Global(index) => Ok((index as usize, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_type(&self, pc: Pc) -> Result<(usize, Pc), Trap> {
        match self.word(pc)? {
            Word::Type(index) => Ok((index as usize, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn imm_module(&self, pc: Pc) -> Result<(ModuleId, Pc), Trap> {
        match self.word(pc)? {
            Word::Module(id) => Ok((id, pc.next())),
            _ => Err(Trap::CorruptCode),
        }
    }

    pub(crate) fn function(&self, id: FuncId) -> Result<&Function, Trap> {
        self.rt.functions.get(id.index()).ok_or(Trap::CorruptCode)
    }

    // ── Linear memory ────────────────────────────────────────────────────────

    /// Bounds-check `[addr + offset, addr + offset + len)`.
    pub(crate) fn effective_address(&self, addr: u32, offset: u32, len: u64) -> Result<Offset, Trap> {
        let memory = self.rt.memory.as_ref().ok_or(Trap::OutOfBoundsMemoryAccess)?;
        let start = u64::from(addr) + u64::from(offset);
        if start + len > memory.total_size() {
            return Err(Trap::OutOfBoundsMemoryAccess);
        }
        Offset::try_from(start).map_err(|_| Trap::OutOfBoundsMemoryAccess)
    }

    pub(crate) fn load<const N: usize>(&mut self, addr: u32, offset: u32) -> Result<[u8; N], Trap> {
        let at = self.effective_address(addr, offset, N as u64)?;
        let memory = self.rt.memory.as_mut().ok_or(Trap::OutOfBoundsMemoryAccess)?;
        Ok(memory.read_array::<N>(at)?)
    }

    pub(crate) fn store<const N: usize>(&mut self, addr: u32, offset: u32, bytes: [u8; N]) -> Result<(), Trap> {
        let at = self.effective_address(addr, offset, N as u64)?;
        let memory = self.rt.memory.as_mut().ok_or(Trap::OutOfBoundsMemoryAccess)?;
        memory.write_array(at, bytes)?;
        Ok(())
    }
}
