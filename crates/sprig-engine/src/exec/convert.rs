//! Conversions between the integer and float register classes.
//!
//! The source and destination live in different registers, so each family
//! has four forms named destination first: `r_r`, `r_s` (source in a slot),
//! `s_r` (result to a slot) and `s_s` (source slot emitted before the
//! destination slot).

use super::{Machine, OpResult};
use crate::code::Pc;
use crate::error::Trap;

macro_rules! convert {
    ($name:ident, $from:ty, |$a:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn r_r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let $a: $from = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn r_s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (src, pc) = m.imm_slot(pc)?;
                let $a: $from = m.slot(src)?;
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn s_r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (dst, pc) = m.imm_slot(pc)?;
                let $a: $from = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_slot(dst, result?)?;
                Ok(pc)
            }

            pub(crate) fn s_s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (src, pc) = m.imm_slot(pc)?;
                let (dst, pc) = m.imm_slot(pc)?;
                let $a: $from = m.slot(src)?;
                let result: Result<_, Trap> = $body;
                m.set_slot(dst, result?)?;
                Ok(pc)
            }
        }
    };
}

/// Check a float against the open interval `(lo, hi)` an integer type can
/// hold after truncation.
fn trunc_in_range(x: f64, lo: f64, hi: f64) -> Result<f64, Trap> {
    if x.is_nan() {
        Err(Trap::InvalidConversionToInteger)
    } else if x <= lo || x >= hi {
        Err(Trap::IntegerOverflow)
    } else {
        Ok(x)
    }
}

const I32_BOUNDS: (f64, f64) = (-2_147_483_649.0, 2_147_483_648.0);
const U32_BOUNDS: (f64, f64) = (-1.0, 4_294_967_296.0);
const I64_BOUNDS: (f64, f64) = (-9_223_372_036_854_777_856.0, 9_223_372_036_854_775_808.0);
const U64_BOUNDS: (f64, f64) = (-1.0, 18_446_744_073_709_551_616.0);

fn trunc_i32(x: f64) -> Result<i32, Trap> {
    trunc_in_range(x, I32_BOUNDS.0, I32_BOUNDS.1).map(|x| x as i32)
}

fn trunc_u32(x: f64) -> Result<i32, Trap> {
    trunc_in_range(x, U32_BOUNDS.0, U32_BOUNDS.1).map(|x| x as u32 as i32)
}

fn trunc_i64(x: f64) -> Result<i64, Trap> {
    trunc_in_range(x, I64_BOUNDS.0, I64_BOUNDS.1).map(|x| x as i64)
}

fn trunc_u64(x: f64) -> Result<i64, Trap> {
    trunc_in_range(x, U64_BOUNDS.0, U64_BOUNDS.1).map(|x| x as u64 as i64)
}

convert!(i32_trunc_f32_s, f32, |a| trunc_i32(f64::from(a)));
convert!(i32_trunc_f32_u, f32, |a| trunc_u32(f64::from(a)));
convert!(i32_trunc_f64_s, f64, |a| trunc_i32(a));
convert!(i32_trunc_f64_u, f64, |a| trunc_u32(a));
convert!(i64_trunc_f32_s, f32, |a| trunc_i64(f64::from(a)));
convert!(i64_trunc_f32_u, f32, |a| trunc_u64(f64::from(a)));
convert!(i64_trunc_f64_s, f64, |a| trunc_i64(a));
convert!(i64_trunc_f64_u, f64, |a| trunc_u64(a));

// Saturating forms: `as` already clamps and maps NaN to zero.
convert!(i32_trunc_sat_f32_s, f32, |a| Ok(a as i32));
convert!(i32_trunc_sat_f32_u, f32, |a| Ok(a as u32 as i32));
convert!(i32_trunc_sat_f64_s, f64, |a| Ok(a as i32));
convert!(i32_trunc_sat_f64_u, f64, |a| Ok(a as u32 as i32));
convert!(i64_trunc_sat_f32_s, f32, |a| Ok(a as i64));
convert!(i64_trunc_sat_f32_u, f32, |a| Ok(a as u64 as i64));
convert!(i64_trunc_sat_f64_s, f64, |a| Ok(a as i64));
convert!(i64_trunc_sat_f64_u, f64, |a| Ok(a as u64 as i64));

convert!(f32_convert_i32_s, i32, |a| Ok(a as f32));
convert!(f32_convert_i32_u, u32, |a| Ok(a as f32));
convert!(f32_convert_i64_s, i64, |a| Ok(a as f32));
convert!(f32_convert_i64_u, u64, |a| Ok(a as f32));
convert!(f64_convert_i32_s, i32, |a| Ok(f64::from(a)));
convert!(f64_convert_i32_u, u32, |a| Ok(f64::from(a)));
convert!(f64_convert_i64_s, i64, |a| Ok(a as f64));
convert!(f64_convert_i64_u, u64, |a| Ok(a as f64));

convert!(i32_reinterpret_f32, f32, |a| Ok(a.to_bits() as i32));
convert!(i64_reinterpret_f64, f64, |a| Ok(a.to_bits() as i64));
convert!(f32_reinterpret_i32, u32, |a| Ok(f32::from_bits(a)));
convert!(f64_reinterpret_i64, u64, |a| Ok(f64::from_bits(a)));
