//! Linear memory operations.
//!
//! Loads take the address from `r0` (`r`) or a slot (`s`), followed by the
//! offset immediate. Stores are named value first: `rs` (value in the
//! register, address slot), `sr` (value slot, address in `r0`), `ss` (value
//! slot then address slot) and, for floats, `rr`. The offset immediate always
//! comes after the slots.

use sprig_memory::Offset;

use super::{Machine, OpResult};
use crate::code::Pc;
use crate::error::Trap;

macro_rules! load {
    ($name:ident, $n:expr, |$b:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (offset, pc) = m.imm_u32(pc)?;
                let addr: u32 = m.reg();
                let $b = m.load::<$n>(addr, offset)?;
                m.set_reg($body);
                Ok(pc)
            }

            pub(crate) fn s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let (offset, pc) = m.imm_u32(pc)?;
                let addr: u32 = m.slot(slot)?;
                let $b = m.load::<$n>(addr, offset)?;
                m.set_reg($body);
                Ok(pc)
            }
        }
    };
}

macro_rules! store {
    ($name:ident, $t:ty, |$v:ident| $body:expr) => {
        store!(@family $name, $t, |$v| $body,);
    };
    ($name:ident, $t:ty, float, |$v:ident| $body:expr) => {
        store!(@family $name, $t, |$v| $body, rr);
    };
    (@family $name:ident, $t:ty, |$v:ident| $body:expr, $($rr:ident)?) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn rs(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let (offset, pc) = m.imm_u32(pc)?;
                let addr: u32 = m.slot(slot)?;
                let $v: $t = m.reg();
                m.store(addr, offset, $body)?;
                Ok(pc)
            }

            pub(crate) fn sr(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let (offset, pc) = m.imm_u32(pc)?;
                let $v: $t = m.slot(slot)?;
                let addr: u32 = m.reg();
                m.store(addr, offset, $body)?;
                Ok(pc)
            }

            pub(crate) fn ss(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (value_slot, pc) = m.imm_slot(pc)?;
                let (addr_slot, pc) = m.imm_slot(pc)?;
                let (offset, pc) = m.imm_u32(pc)?;
                let $v: $t = m.slot(value_slot)?;
                let addr: u32 = m.slot(addr_slot)?;
                m.store(addr, offset, $body)?;
                Ok(pc)
            }

            $(
                /// Value in `fp0`, address in `r0`.
                pub(crate) fn $rr(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                    let (offset, pc) = m.imm_u32(pc)?;
                    let addr: u32 = m.reg();
                    let $v: $t = m.reg();
                    m.store(addr, offset, $body)?;
                    Ok(pc)
                }
            )?
        }
    };
}

load!(i32_load, 4, |b| i32::from_le_bytes(b));
load!(i64_load, 8, |b| i64::from_le_bytes(b));
load!(f32_load, 4, |b| f32::from_le_bytes(b));
load!(f64_load, 8, |b| f64::from_le_bytes(b));
load!(i32_load8_s, 1, |b| i32::from(i8::from_le_bytes(b)));
load!(i32_load8_u, 1, |b| i32::from(u8::from_le_bytes(b)));
load!(i32_load16_s, 2, |b| i32::from(i16::from_le_bytes(b)));
load!(i32_load16_u, 2, |b| i32::from(u16::from_le_bytes(b)));
load!(i64_load8_s, 1, |b| i64::from(i8::from_le_bytes(b)));
load!(i64_load8_u, 1, |b| i64::from(u8::from_le_bytes(b)));
load!(i64_load16_s, 2, |b| i64::from(i16::from_le_bytes(b)));
load!(i64_load16_u, 2, |b| i64::from(u16::from_le_bytes(b)));
load!(i64_load32_s, 4, |b| i64::from(i32::from_le_bytes(b)));
load!(i64_load32_u, 4, |b| i64::from(u32::from_le_bytes(b)));

store!(i32_store, i32, |v| v.to_le_bytes());
store!(i64_store, i64, |v| v.to_le_bytes());
store!(i32_store8, i32, |v| (v as u8).to_le_bytes());
store!(i32_store16, i32, |v| (v as u16).to_le_bytes());
store!(i64_store8, i64, |v| (v as u8).to_le_bytes());
store!(i64_store16, i64, |v| (v as u16).to_le_bytes());
store!(i64_store32, i64, |v| (v as u32).to_le_bytes());
store!(f32_store, f32, float, |v| v.to_le_bytes());
store!(f64_store, f64, float, |v| v.to_le_bytes());

// ══════════════════════════════════════════════════════════════════════════════
// Size, growth and bulk operations
// ══════════════════════════════════════════════════════════════════════════════

/// `r0 = pages`.
pub(crate) fn memory_size(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let pages = m.rt.memory.as_ref().map_or(0, |memory| memory.pages());
    m.set_reg(pages);
    Ok(pc)
}

/// Grow by `r0` pages. `r0` becomes the previous page count, or `-1` when
/// the memory cannot grow that far; a failed grow leaves the size alone.
pub(crate) fn memory_grow(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let delta: i32 = m.reg();
    let result = match (m.rt.memory.as_mut(), u32::try_from(delta)) {
        (Some(memory), Ok(delta)) => match memory.grow_pages(delta) {
            Ok(previous) => previous as i32,
            Err(err) => {
                tracing::debug!(target: "sprig.exec", %err, delta, "memory.grow refused");
                -1
            }
        },
        _ => -1,
    };
    m.set_reg(result);
    Ok(pc)
}

fn checked_range(m: &Machine<'_>, start: u32, len: u32) -> Result<Offset, Trap> {
    m.effective_address(start, 0, u64::from(len))
}

/// `memory.copy`: length in `r0`, then the source and destination slots.
pub(crate) fn memory_copy(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let len: u32 = m.reg();
    let (src_slot, pc) = m.imm_slot(pc)?;
    let (dst_slot, pc) = m.imm_slot(pc)?;
    let src: u32 = m.slot(src_slot)?;
    let dst: u32 = m.slot(dst_slot)?;
    let src = checked_range(m, src, len)?;
    let dst = checked_range(m, dst, len)?;
    if let Some(memory) = m.rt.memory.as_mut() {
        memory.copy_within(src, dst, len as usize).map_err(Trap::from)?;
    }
    Ok(pc)
}

/// `memory.fill`: length in `r0`, then the value and destination slots.
pub(crate) fn memory_fill(m: &mut Machine<'_>, pc: Pc) -> OpResult {
    let len: u32 = m.reg();
    let (value_slot, pc) = m.imm_slot(pc)?;
    let (dst_slot, pc) = m.imm_slot(pc)?;
    let value: u32 = m.slot(value_slot)?;
    let dst: u32 = m.slot(dst_slot)?;
    let dst = checked_range(m, dst, len)?;
    if let Some(memory) = m.rt.memory.as_mut() {
        memory.fill(dst, value as u8, len as usize).map_err(Trap::from)?;
    }
    Ok(pc)
}
