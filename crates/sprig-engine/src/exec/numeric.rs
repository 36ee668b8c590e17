//! Arithmetic, comparison and bit operations.
//!
//! Binary families come in three shapes named after where the operands are:
//! `rs` (operand 1 in a slot, operand 2 in the register), `sr` (the reverse)
//! and `ss` (both in slots; operand 2's slot is emitted first). Commutative
//! operations have no `sr` form. Unary families have `r` and `s` forms.
//! Results always go to the register of the result type.

use super::{Machine, OpResult};
use crate::code::Pc;
use crate::error::Trap;

macro_rules! binary {
    ($name:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn rs(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let $a: $t = m.slot(slot)?;
                let $b: $t = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn sr(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let $b: $t = m.slot(slot)?;
                let $a: $t = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn ss(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot2, pc) = m.imm_slot(pc)?;
                let (slot1, pc) = m.imm_slot(pc)?;
                let $b: $t = m.slot(slot2)?;
                let $a: $t = m.slot(slot1)?;
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }
        }
    };
}

macro_rules! commutative {
    ($name:ident, $t:ty, |$a:ident, $b:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn rs(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let $a: $t = m.slot(slot)?;
                let $b: $t = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn ss(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot2, pc) = m.imm_slot(pc)?;
                let (slot1, pc) = m.imm_slot(pc)?;
                let $b: $t = m.slot(slot2)?;
                let $a: $t = m.slot(slot1)?;
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }
        }
    };
}

macro_rules! unary {
    ($name:ident, $t:ty, |$a:ident| $body:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn r(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let $a: $t = m.reg();
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }

            pub(crate) fn s(m: &mut Machine<'_>, pc: Pc) -> OpResult {
                let (slot, pc) = m.imm_slot(pc)?;
                let $a: $t = m.slot(slot)?;
                let result: Result<_, Trap> = $body;
                m.set_reg(result?);
                Ok(pc)
            }
        }
    };
}

// ══════════════════════════════════════════════════════════════════════════════
// Integer semantics
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! int_division {
    ($div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident, $s:ty, $u:ty) => {
        fn $div_s(a: $s, b: $s) -> Result<$s, Trap> {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else if a == <$s>::MIN && b == -1 {
                Err(Trap::IntegerOverflow)
            } else {
                Ok(a / b)
            }
        }

        fn $div_u(a: $s, b: $s) -> Result<$s, Trap> {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else {
                Ok(((a as $u) / (b as $u)) as $s)
            }
        }

        fn $rem_s(a: $s, b: $s) -> Result<$s, Trap> {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else {
                Ok(a.wrapping_rem(b))
            }
        }

        fn $rem_u(a: $s, b: $s) -> Result<$s, Trap> {
            if b == 0 {
                Err(Trap::IntegerDivideByZero)
            } else {
                Ok(((a as $u) % (b as $u)) as $s)
            }
        }
    };
}

int_division!(div_s32, div_u32, rem_s32, rem_u32, i32, u32);
int_division!(div_s64, div_u64, rem_s64, rem_u64, i64, u64);

commutative!(i32_eq, i32, |a, b| Ok(i32::from(a == b)));
commutative!(i32_ne, i32, |a, b| Ok(i32::from(a != b)));
binary!(i32_lt_s, i32, |a, b| Ok(i32::from(a < b)));
binary!(i32_lt_u, u32, |a, b| Ok(i32::from(a < b)));
binary!(i32_gt_s, i32, |a, b| Ok(i32::from(a > b)));
binary!(i32_gt_u, u32, |a, b| Ok(i32::from(a > b)));
binary!(i32_le_s, i32, |a, b| Ok(i32::from(a <= b)));
binary!(i32_le_u, u32, |a, b| Ok(i32::from(a <= b)));
binary!(i32_ge_s, i32, |a, b| Ok(i32::from(a >= b)));
binary!(i32_ge_u, u32, |a, b| Ok(i32::from(a >= b)));

commutative!(i32_add, i32, |a, b| Ok(a.wrapping_add(b)));
binary!(i32_sub, i32, |a, b| Ok(a.wrapping_sub(b)));
commutative!(i32_mul, i32, |a, b| Ok(a.wrapping_mul(b)));
binary!(i32_div_s, i32, |a, b| div_s32(a, b));
binary!(i32_div_u, i32, |a, b| div_u32(a, b));
binary!(i32_rem_s, i32, |a, b| rem_s32(a, b));
binary!(i32_rem_u, i32, |a, b| rem_u32(a, b));
commutative!(i32_and, i32, |a, b| Ok(a & b));
commutative!(i32_or, i32, |a, b| Ok(a | b));
commutative!(i32_xor, i32, |a, b| Ok(a ^ b));
binary!(i32_shl, i32, |a, b| Ok(a.wrapping_shl(b as u32)));
binary!(i32_shr_s, i32, |a, b| Ok(a.wrapping_shr(b as u32)));
binary!(i32_shr_u, u32, |a, b| Ok(a.wrapping_shr(b)));
binary!(i32_rotl, u32, |a, b| Ok(a.rotate_left(b % 32)));
binary!(i32_rotr, u32, |a, b| Ok(a.rotate_right(b % 32)));

commutative!(i64_eq, i64, |a, b| Ok(i32::from(a == b)));
commutative!(i64_ne, i64, |a, b| Ok(i32::from(a != b)));
binary!(i64_lt_s, i64, |a, b| Ok(i32::from(a < b)));
binary!(i64_lt_u, u64, |a, b| Ok(i32::from(a < b)));
binary!(i64_gt_s, i64, |a, b| Ok(i32::from(a > b)));
binary!(i64_gt_u, u64, |a, b| Ok(i32::from(a > b)));
binary!(i64_le_s, i64, |a, b| Ok(i32::from(a <= b)));
binary!(i64_le_u, u64, |a, b| Ok(i32::from(a <= b)));
binary!(i64_ge_s, i64, |a, b| Ok(i32::from(a >= b)));
binary!(i64_ge_u, u64, |a, b| Ok(i32::from(a >= b)));

commutative!(i64_add, i64, |a, b| Ok(a.wrapping_add(b)));
binary!(i64_sub, i64, |a, b| Ok(a.wrapping_sub(b)));
commutative!(i64_mul, i64, |a, b| Ok(a.wrapping_mul(b)));
binary!(i64_div_s, i64, |a, b| div_s64(a, b));
binary!(i64_div_u, i64, |a, b| div_u64(a, b));
binary!(i64_rem_s, i64, |a, b| rem_s64(a, b));
binary!(i64_rem_u, i64, |a, b| rem_u64(a, b));
commutative!(i64_and, i64, |a, b| Ok(a & b));
commutative!(i64_or, i64, |a, b| Ok(a | b));
commutative!(i64_xor, i64, |a, b| Ok(a ^ b));
binary!(i64_shl, i64, |a, b| Ok(a.wrapping_shl(b as u32)));
binary!(i64_shr_s, i64, |a, b| Ok(a.wrapping_shr(b as u32)));
binary!(i64_shr_u, u64, |a, b| Ok(a.wrapping_shr(b as u32)));
binary!(i64_rotl, u64, |a, b| Ok(a.rotate_left((b % 64) as u32)));
binary!(i64_rotr, u64, |a, b| Ok(a.rotate_right((b % 64) as u32)));

unary!(i32_eqz, i32, |a| Ok(i32::from(a == 0)));
unary!(i32_clz, i32, |a| Ok(a.leading_zeros() as i32));
unary!(i32_ctz, i32, |a| Ok(a.trailing_zeros() as i32));
unary!(i32_popcnt, i32, |a| Ok(a.count_ones() as i32));
unary!(i32_extend8_s, i32, |a| Ok(i32::from(a as i8)));
unary!(i32_extend16_s, i32, |a| Ok(i32::from(a as i16)));

unary!(i64_eqz, i64, |a| Ok(i32::from(a == 0)));
unary!(i64_clz, i64, |a| Ok(i64::from(a.leading_zeros())));
unary!(i64_ctz, i64, |a| Ok(i64::from(a.trailing_zeros())));
unary!(i64_popcnt, i64, |a| Ok(i64::from(a.count_ones())));
unary!(i64_extend8_s, i64, |a| Ok(i64::from(a as i8)));
unary!(i64_extend16_s, i64, |a| Ok(i64::from(a as i16)));
unary!(i64_extend32_s, i64, |a| Ok(i64::from(a as i32)));

unary!(i32_wrap_i64, i64, |a| Ok(a as i32));
unary!(i64_extend_i32_s, i32, |a| Ok(i64::from(a)));
unary!(i64_extend_i32_u, u32, |a| Ok(i64::from(a)));

// ══════════════════════════════════════════════════════════════════════════════
// Float semantics
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! float_min_max {
    ($min:ident, $max:ident, $t:ty) => {
        fn $min(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                // -0 and +0 compare equal; the negative one is smaller.
                if a.is_sign_negative() {
                    a
                } else {
                    b
                }
            } else {
                a.min(b)
            }
        }

        fn $max(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                <$t>::NAN
            } else if a == b {
                if a.is_sign_positive() {
                    a
                } else {
                    b
                }
            } else {
                a.max(b)
            }
        }
    };
}

float_min_max!(min32, max32, f32);
float_min_max!(min64, max64, f64);

commutative!(f32_eq, f32, |a, b| Ok(i32::from(a == b)));
commutative!(f32_ne, f32, |a, b| Ok(i32::from(a != b)));
binary!(f32_lt, f32, |a, b| Ok(i32::from(a < b)));
binary!(f32_gt, f32, |a, b| Ok(i32::from(a > b)));
binary!(f32_le, f32, |a, b| Ok(i32::from(a <= b)));
binary!(f32_ge, f32, |a, b| Ok(i32::from(a >= b)));

commutative!(f32_add, f32, |a, b| Ok(a + b));
binary!(f32_sub, f32, |a, b| Ok(a - b));
commutative!(f32_mul, f32, |a, b| Ok(a * b));
binary!(f32_div, f32, |a, b| Ok(a / b));
commutative!(f32_min, f32, |a, b| Ok(min32(a, b)));
commutative!(f32_max, f32, |a, b| Ok(max32(a, b)));
binary!(f32_copysign, f32, |a, b| Ok(a.copysign(b)));

commutative!(f64_eq, f64, |a, b| Ok(i32::from(a == b)));
commutative!(f64_ne, f64, |a, b| Ok(i32::from(a != b)));
binary!(f64_lt, f64, |a, b| Ok(i32::from(a < b)));
binary!(f64_gt, f64, |a, b| Ok(i32::from(a > b)));
binary!(f64_le, f64, |a, b| Ok(i32::from(a <= b)));
binary!(f64_ge, f64, |a, b| Ok(i32::from(a >= b)));

commutative!(f64_add, f64, |a, b| Ok(a + b));
binary!(f64_sub, f64, |a, b| Ok(a - b));
commutative!(f64_mul, f64, |a, b| Ok(a * b));
binary!(f64_div, f64, |a, b| Ok(a / b));
commutative!(f64_min, f64, |a, b| Ok(min64(a, b)));
commutative!(f64_max, f64, |a, b| Ok(max64(a, b)));
binary!(f64_copysign, f64, |a, b| Ok(a.copysign(b)));

unary!(f32_abs, f32, |a| Ok(a.abs()));
unary!(f32_neg, f32, |a| Ok(-a));
unary!(f32_ceil, f32, |a| Ok(a.ceil()));
unary!(f32_floor, f32, |a| Ok(a.floor()));
unary!(f32_trunc, f32, |a| Ok(a.trunc()));
unary!(f32_nearest, f32, |a| Ok(a.round_ties_even()));
unary!(f32_sqrt, f32, |a| Ok(a.sqrt()));

unary!(f64_abs, f64, |a| Ok(a.abs()));
unary!(f64_neg, f64, |a| Ok(-a));
unary!(f64_ceil, f64, |a| Ok(a.ceil()));
unary!(f64_floor, f64, |a| Ok(a.floor()));
unary!(f64_trunc, f64, |a| Ok(a.trunc()));
unary!(f64_nearest, f64, |a| Ok(a.round_ties_even()));
unary!(f64_sqrt, f64, |a| Ok(a.sqrt()));

unary!(f32_demote_f64, f64, |a| Ok(a as f32));
unary!(f64_promote_f32, f32, |a| Ok(f64::from(a)));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_traps() {
        assert_eq!(div_s32(7, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(div_s32(i32::MIN, -1), Err(Trap::IntegerOverflow));
        assert_eq!(div_s64(-9, 2), Ok(-4));
    }

    #[test]
    fn remainder_of_min_by_minus_one_is_zero() {
        assert_eq!(rem_s32(i32::MIN, -1), Ok(0));
        assert_eq!(rem_s64(i64::MIN, -1), Ok(0));
        assert_eq!(rem_u32(-1, 0), Err(Trap::IntegerDivideByZero));
    }

    #[test]
    fn unsigned_division_reads_bits_unsigned() {
        assert_eq!(div_u32(-2, 2), Ok(0x7FFF_FFFF));
        assert_eq!(rem_u64(-1, 10), Ok(5));
    }

    #[test]
    fn min_max_order_signed_zeros_and_propagate_nan() {
        assert!(min32(0.0, -0.0).is_sign_negative());
        assert!(max64(-0.0, 0.0).is_sign_positive());
        assert!(min64(f64::NAN, 1.0).is_nan());
        assert_eq!(max32(1.5, -3.0), 1.5);
    }
}
