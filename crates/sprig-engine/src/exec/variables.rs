//! Register and slot moves, constants, globals and `select`.

use super::{Machine, OpResult, Raw};
use crate::code::Pc;
use crate::error::Trap;

macro_rules! moves {
    ($t:ty, $set_register:ident, $set_slot:ident, $preserve_set_slot:ident) => {
        /// Load the register from a slot.
        pub(crate) fn $set_register(m: &mut Machine<'_>, pc: Pc) -> OpResult {
            let (slot, pc) = m.imm_slot(pc)?;
            let value: $t = m.slot(slot)?;
            m.set_reg(value);
            Ok(pc)
        }

        /// Spill the register to a slot.
        pub(crate) fn $set_slot(m: &mut Machine<'_>, pc: Pc) -> OpResult {
            let (slot, pc) = m.imm_slot(pc)?;
            let value: $t = m.reg();
            m.set_slot(slot, value)?;
            Ok(pc)
        }

        /// Save the destination's old value to the preserve slot, then spill
        /// the register into it.
        pub(crate) fn $preserve_set_slot(m: &mut Machine<'_>, pc: Pc) -> OpResult {
            let (dest, pc) = m.imm_slot(pc)?;
            let (preserve, pc) = m.imm_slot(pc)?;
            let old: $t = m.slot(dest)?;
            m.set_slot(preserve, old)?;
            let value: $t = m.reg();
            m.set_slot(dest, value)?;
            Ok(pc)
        }
    };
}

moves!(i32, set_register_i32, set_slot_i32, preserve_set_slot_i32);
moves!(i64, set_register_i64, set_slot_i64, preserve_set_slot_i64);
moves!(f32, set_register_f32, set_slot_f32, preserve_set_slot_f32);
moves!(f64, set_register_f64, set_slot_f64, preserve_set_slot_f64);

fn copy<T: Raw>(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (dest, pc) = m.imm_slot(pc)?;
    let (src, pc) = m.imm_slot(pc)?;
    let value: T = m.slot(src)?;
    m.set_slot(dest, value)?;
    Ok(pc)
}

fn preserve_copy<T: Raw>(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (dest, pc) = m.imm_slot(pc)?;
    let (src, pc) = m.imm_slot(pc)?;
    let (preserve, pc) = m.imm_slot(pc)?;
    let old: T = m.slot(dest)?;
    m.set_slot(preserve, old)?;
    let value: T = m.slot(src)?;
    m.set_slot(dest, value)?;
    Ok(pc)
}

pub(crate) fn copy_slot_32(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    copy::<u32>(m, pc)
}

pub(crate) fn copy_slot_64(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    copy::<u64>(m, pc)
}

pub(crate) fn preserve_copy_slot_32(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    preserve_copy::<u32>(m, pc)
}

pub(crate) fn preserve_copy_slot_64(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    preserve_copy::<u64>(m, pc)
}

// ── Inline constants ─────────────────────────────────────────────────────────

pub(crate) fn const32(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (value, pc) = m.imm_u32(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    m.set_slot(slot, value)?;
    Ok(pc)
}

pub(crate) fn const64(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (value, pc) = m.imm_u64(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    m.set_slot(slot, value)?;
    Ok(pc)
}

// ══════════════════════════════════════════════════════════════════════════════
// Globals
// ══════════════════════════════════════════════════════════════════════════════

impl Machine<'_> {
    fn global_bits(&self, index: usize) -> Result<u64, Trap> {
        self.rt
            .globals
            .get(index)
            .map(|g| g.bits)
            .ok_or(Trap::CorruptCode)
    }

    fn set_global_bits(&mut self, index: usize, bits: u64) -> Result<(), Trap> {
        let global = self.rt.globals.get_mut(index).ok_or(Trap::CorruptCode)?;
        global.bits = bits;
        Ok(())
    }
}

pub(crate) fn get_global_32(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (index, pc) = m.imm_global(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    let bits = m.global_bits(index)?;
    m.set_slot(slot, bits as u32)?;
    Ok(pc)
}

pub(crate) fn get_global_64(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (index, pc) = m.imm_global(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    let bits = m.global_bits(index)?;
    m.set_slot(slot, bits)?;
    Ok(pc)
}

pub(crate) fn set_global_s32(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (index, pc) = m.imm_global(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    let value: u32 = m.slot(slot)?;
    m.set_global_bits(index, u64::from(value))?;
    Ok(pc)
}

pub(crate) fn set_global_s64(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let (index, pc) = m.imm_global(pc)?;
    let (slot, pc) = m.imm_slot(pc)?;
    let value: u64 = m.slot(slot)?;
    m.set_global_bits(index, value)?;
    Ok(pc)
}

macro_rules! set_global_from_register {
    ($name:ident, $t:ty) => {
        pub(crate) fn $name(m: &mut Machine<'_>, pc: Pc) -> OpResult {
            let (index, pc) = m.imm_global(pc)?;
            let value: $t = m.reg();
            m.set_global_bits(index, value.into_raw())?;
            Ok(pc)
        }
    };
}

set_global_from_register!(set_global_i32, u32);
set_global_from_register!(set_global_i64, u64);
set_global_from_register!(set_global_f32, f32);
set_global_from_register!(set_global_f64, f64);

// ══════════════════════════════════════════════════════════════════════════════
// Select
// ══════════════════════════════════════════════════════════════════════════════
//
// Form letters name the selector, operand 2 and operand 1 in that order; slot
// immediates follow the same order. The result goes to the register.

enum Source {
    Reg,
    Slot,
}

fn select<T: Raw>(m: &mut Machine<'_>, pc: Pc, form: [Source; 3]) -> OpResult {
    let [selector, second, first] = form;
    let (condition, pc) = match selector {
        Source::Reg => (m.reg::<i32>(), pc),
        Source::Slot => {
            let (slot, pc) = m.imm_slot(pc)?;
            (m.slot::<i32>(slot)?, pc)
        }
    };
    let (operand2, pc) = read_operand::<T>(m, pc, second)?;
    let (operand1, pc) = read_operand::<T>(m, pc, first)?;
    m.set_reg(if condition != 0 { operand1 } else { operand2 });
    Ok(pc)
}

fn read_operand<T: Raw>(m: &mut Machine<'_>, pc: Pc, from: Source) -> Result<(T, Pc), Trap> {
    match from {
        Source::Reg => Ok((m.reg(), pc)),
        Source::Slot => {
            let (slot, pc) = m.imm_slot(pc)?;
            Ok((m.slot(slot)?, pc))
        }
    }
}

macro_rules! select_forms {
    ($t:ty, $($name:ident => [$a:ident, $b:ident, $c:ident]),+ $(,)?) => {
        $(
            pub(crate) fn $name(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                select::<$t>(m, pc, [Source::$a, Source::$b, Source::$c])
            }
        )+
    };
}

select_forms!(i32,
    select_i32_rss => [Reg, Slot, Slot],
    select_i32_srs => [Slot, Reg, Slot],
    select_i32_ssr => [Slot, Slot, Reg],
    select_i32_sss => [Slot, Slot, Slot],
);

select_forms!(i64,
    select_i64_rss => [Reg, Slot, Slot],
    select_i64_srs => [Slot, Reg, Slot],
    select_i64_ssr => [Slot, Slot, Reg],
    select_i64_sss => [Slot, Slot, Slot],
);

select_forms!(f32,
    select_f32_sss => [Slot, Slot, Slot],
    select_f32_srs => [Slot, Reg, Slot],
    select_f32_ssr => [Slot, Slot, Reg],
    select_f32_rss => [Reg, Slot, Slot],
    select_f32_rrs => [Reg, Reg, Slot],
    select_f32_rsr => [Reg, Slot, Reg],
);

select_forms!(f64,
    select_f64_sss => [Slot, Slot, Slot],
    select_f64_srs => [Slot, Reg, Slot],
    select_f64_ssr => [Slot, Slot, Reg],
    select_f64_rss => [Reg, Slot, Slot],
    select_f64_rrs => [Reg, Reg, Slot],
    select_f64_rsr => [Reg, Slot, Reg],
);
