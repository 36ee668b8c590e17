//! WebAssembly opcode values.
//!
//! Single-byte opcodes keep their byte value; `0xFC`-prefixed opcodes are
//! `0xFC00 | sub-opcode`.

/// A decoded opcode.
pub type Opcode = u16;

pub const PREFIX_FC: u8 = 0xFC;
pub const PREFIX_FD: u8 = 0xFD;

// ── Control ──────────────────────────────────────────────────────────
pub const UNREACHABLE: Opcode = 0x00;
pub const NOP: Opcode = 0x01;
pub const BLOCK: Opcode = 0x02;
pub const LOOP: Opcode = 0x03;
pub const IF: Opcode = 0x04;
pub const ELSE: Opcode = 0x05;
pub const END: Opcode = 0x0B;
pub const BR: Opcode = 0x0C;
pub const BR_IF: Opcode = 0x0D;
pub const BR_TABLE: Opcode = 0x0E;
pub const RETURN: Opcode = 0x0F;
pub const CALL: Opcode = 0x10;
pub const CALL_INDIRECT: Opcode = 0x11;
pub const RETURN_CALL: Opcode = 0x12;
pub const RETURN_CALL_INDIRECT: Opcode = 0x13;

// ── Parametric ───────────────────────────────────────────────────────
pub const DROP: Opcode = 0x1A;
pub const SELECT: Opcode = 0x1B;
pub const SELECT_T: Opcode = 0x1C;

// ── Variables ────────────────────────────────────────────────────────
pub const LOCAL_GET: Opcode = 0x20;
pub const LOCAL_SET: Opcode = 0x21;
pub const LOCAL_TEE: Opcode = 0x22;
pub const GLOBAL_GET: Opcode = 0x23;
pub const GLOBAL_SET: Opcode = 0x24;
pub const TABLE_GET: Opcode = 0x25;
pub const TABLE_SET: Opcode = 0x26;

// ── Memory ───────────────────────────────────────────────────────────
pub const I32_LOAD: Opcode = 0x28;
pub const I64_LOAD: Opcode = 0x29;
pub const F32_LOAD: Opcode = 0x2A;
pub const F64_LOAD: Opcode = 0x2B;
pub const I32_LOAD8_S: Opcode = 0x2C;
pub const I32_LOAD8_U: Opcode = 0x2D;
pub const I32_LOAD16_S: Opcode = 0x2E;
pub const I32_LOAD16_U: Opcode = 0x2F;
pub const I64_LOAD8_S: Opcode = 0x30;
pub const I64_LOAD8_U: Opcode = 0x31;
pub const I64_LOAD16_S: Opcode = 0x32;
pub const I64_LOAD16_U: Opcode = 0x33;
pub const I64_LOAD32_S: Opcode = 0x34;
pub const I64_LOAD32_U: Opcode = 0x35;
pub const I32_STORE: Opcode = 0x36;
pub const I64_STORE: Opcode = 0x37;
pub const F32_STORE: Opcode = 0x38;
pub const F64_STORE: Opcode = 0x39;
pub const I32_STORE8: Opcode = 0x3A;
pub const I32_STORE16: Opcode = 0x3B;
pub const I64_STORE8: Opcode = 0x3C;
pub const I64_STORE16: Opcode = 0x3D;
pub const I64_STORE32: Opcode = 0x3E;
pub const MEMORY_SIZE: Opcode = 0x3F;
pub const MEMORY_GROW: Opcode = 0x40;

// ── Constants ────────────────────────────────────────────────────────
pub const I32_CONST: Opcode = 0x41;
pub const I64_CONST: Opcode = 0x42;
pub const F32_CONST: Opcode = 0x43;
pub const F64_CONST: Opcode = 0x44;

// ── Comparison ───────────────────────────────────────────────────────
pub const I32_EQZ: Opcode = 0x45;
pub const I32_EQ: Opcode = 0x46;
pub const I32_NE: Opcode = 0x47;
pub const I32_LT_S: Opcode = 0x48;
pub const I32_LT_U: Opcode = 0x49;
pub const I32_GT_S: Opcode = 0x4A;
pub const I32_GT_U: Opcode = 0x4B;
pub const I32_LE_S: Opcode = 0x4C;
pub const I32_LE_U: Opcode = 0x4D;
pub const I32_GE_S: Opcode = 0x4E;
pub const I32_GE_U: Opcode = 0x4F;
pub const I64_EQZ: Opcode = 0x50;
pub const I64_EQ: Opcode = 0x51;
pub const I64_NE: Opcode = 0x52;
pub const I64_LT_S: Opcode = 0x53;
pub const I64_LT_U: Opcode = 0x54;
pub const I64_GT_S: Opcode = 0x55;
pub const I64_GT_U: Opcode = 0x56;
pub const I64_LE_S: Opcode = 0x57;
pub const I64_LE_U: Opcode = 0x58;
pub const I64_GE_S: Opcode = 0x59;
pub const I64_GE_U: Opcode = 0x5A;
pub const F32_EQ: Opcode = 0x5B;
pub const F32_NE: Opcode = 0x5C;
pub const F32_LT: Opcode = 0x5D;
pub const F32_GT: Opcode = 0x5E;
pub const F32_LE: Opcode = 0x5F;
pub const F32_GE: Opcode = 0x60;
pub const F64_EQ: Opcode = 0x61;
pub const F64_NE: Opcode = 0x62;
pub const F64_LT: Opcode = 0x63;
pub const F64_GT: Opcode = 0x64;
pub const F64_LE: Opcode = 0x65;
pub const F64_GE: Opcode = 0x66;

// ── Integer arithmetic ───────────────────────────────────────────────
pub const I32_CLZ: Opcode = 0x67;
pub const I32_CTZ: Opcode = 0x68;
pub const I32_POPCNT: Opcode = 0x69;
pub const I32_ADD: Opcode = 0x6A;
pub const I32_SUB: Opcode = 0x6B;
pub const I32_MUL: Opcode = 0x6C;
pub const I32_DIV_S: Opcode = 0x6D;
pub const I32_DIV_U: Opcode = 0x6E;
pub const I32_REM_S: Opcode = 0x6F;
pub const I32_REM_U: Opcode = 0x70;
pub const I32_AND: Opcode = 0x71;
pub const I32_OR: Opcode = 0x72;
pub const I32_XOR: Opcode = 0x73;
pub const I32_SHL: Opcode = 0x74;
pub const I32_SHR_S: Opcode = 0x75;
pub const I32_SHR_U: Opcode = 0x76;
pub const I32_ROTL: Opcode = 0x77;
pub const I32_ROTR: Opcode = 0x78;
pub const I64_CLZ: Opcode = 0x79;
pub const I64_CTZ: Opcode = 0x7A;
pub const I64_POPCNT: Opcode = 0x7B;
pub const I64_ADD: Opcode = 0x7C;
pub const I64_SUB: Opcode = 0x7D;
pub const I64_MUL: Opcode = 0x7E;
pub const I64_DIV_S: Opcode = 0x7F;
pub const I64_DIV_U: Opcode = 0x80;
pub const I64_REM_S: Opcode = 0x81;
pub const I64_REM_U: Opcode = 0x82;
pub const I64_AND: Opcode = 0x83;
pub const I64_OR: Opcode = 0x84;
pub const I64_XOR: Opcode = 0x85;
pub const I64_SHL: Opcode = 0x86;
pub const I64_SHR_S: Opcode = 0x87;
pub const I64_SHR_U: Opcode = 0x88;
pub const I64_ROTL: Opcode = 0x89;
pub const I64_ROTR: Opcode = 0x8A;

// ── Float arithmetic ─────────────────────────────────────────────────
pub const F32_ABS: Opcode = 0x8B;
pub const F32_NEG: Opcode = 0x8C;
pub const F32_CEIL: Opcode = 0x8D;
pub const F32_FLOOR: Opcode = 0x8E;
pub const F32_TRUNC: Opcode = 0x8F;
pub const F32_NEAREST: Opcode = 0x90;
pub const F32_SQRT: Opcode = 0x91;
pub const F32_ADD: Opcode = 0x92;
pub const F32_SUB: Opcode = 0x93;
pub const F32_MUL: Opcode = 0x94;
pub const F32_DIV: Opcode = 0x95;
pub const F32_MIN: Opcode = 0x96;
pub const F32_MAX: Opcode = 0x97;
pub const F32_COPYSIGN: Opcode = 0x98;
pub const F64_ABS: Opcode = 0x99;
pub const F64_NEG: Opcode = 0x9A;
pub const F64_CEIL: Opcode = 0x9B;
pub const F64_FLOOR: Opcode = 0x9C;
pub const F64_TRUNC: Opcode = 0x9D;
pub const F64_NEAREST: Opcode = 0x9E;
pub const F64_SQRT: Opcode = 0x9F;
pub const F64_ADD: Opcode = 0xA0;
pub const F64_SUB: Opcode = 0xA1;
pub const F64_MUL: Opcode = 0xA2;
pub const F64_DIV: Opcode = 0xA3;
pub const F64_MIN: Opcode = 0xA4;
pub const F64_MAX: Opcode = 0xA5;
pub const F64_COPYSIGN: Opcode = 0xA6;

// ── Conversions ──────────────────────────────────────────────────────
pub const I32_WRAP_I64: Opcode = 0xA7;
pub const I32_TRUNC_F32_S: Opcode = 0xA8;
pub const I32_TRUNC_F32_U: Opcode = 0xA9;
pub const I32_TRUNC_F64_S: Opcode = 0xAA;
pub const I32_TRUNC_F64_U: Opcode = 0xAB;
pub const I64_EXTEND_I32_S: Opcode = 0xAC;
pub const I64_EXTEND_I32_U: Opcode = 0xAD;
pub const I64_TRUNC_F32_S: Opcode = 0xAE;
pub const I64_TRUNC_F32_U: Opcode = 0xAF;
pub const I64_TRUNC_F64_S: Opcode = 0xB0;
pub const I64_TRUNC_F64_U: Opcode = 0xB1;
pub const F32_CONVERT_I32_S: Opcode = 0xB2;
pub const F32_CONVERT_I32_U: Opcode = 0xB3;
pub const F32_CONVERT_I64_S: Opcode = 0xB4;
pub const F32_CONVERT_I64_U: Opcode = 0xB5;
pub const F32_DEMOTE_F64: Opcode = 0xB6;
pub const F64_CONVERT_I32_S: Opcode = 0xB7;
pub const F64_CONVERT_I32_U: Opcode = 0xB8;
pub const F64_CONVERT_I64_S: Opcode = 0xB9;
pub const F64_CONVERT_I64_U: Opcode = 0xBA;
pub const F64_PROMOTE_F32: Opcode = 0xBB;
pub const I32_REINTERPRET_F32: Opcode = 0xBC;
pub const I64_REINTERPRET_F64: Opcode = 0xBD;
pub const F32_REINTERPRET_I32: Opcode = 0xBE;
pub const F64_REINTERPRET_I64: Opcode = 0xBF;

// ── Sign extension ───────────────────────────────────────────────────
pub const I32_EXTEND8_S: Opcode = 0xC0;
pub const I32_EXTEND16_S: Opcode = 0xC1;
pub const I64_EXTEND8_S: Opcode = 0xC2;
pub const I64_EXTEND16_S: Opcode = 0xC3;
pub const I64_EXTEND32_S: Opcode = 0xC4;

// ── Reference types ──────────────────────────────────────────────────
pub const REF_NULL: Opcode = 0xD0;
pub const REF_IS_NULL: Opcode = 0xD1;
pub const REF_FUNC: Opcode = 0xD2;

// ── 0xFC prefix ──────────────────────────────────────────────────────
pub const I32_TRUNC_SAT_F32_S: Opcode = 0xFC00;
pub const I32_TRUNC_SAT_F32_U: Opcode = 0xFC01;
pub const I32_TRUNC_SAT_F64_S: Opcode = 0xFC02;
pub const I32_TRUNC_SAT_F64_U: Opcode = 0xFC03;
pub const I64_TRUNC_SAT_F32_S: Opcode = 0xFC04;
pub const I64_TRUNC_SAT_F32_U: Opcode = 0xFC05;
pub const I64_TRUNC_SAT_F64_S: Opcode = 0xFC06;
pub const I64_TRUNC_SAT_F64_U: Opcode = 0xFC07;
pub const MEMORY_INIT: Opcode = 0xFC08;
pub const DATA_DROP: Opcode = 0xFC09;
pub const MEMORY_COPY: Opcode = 0xFC0A;
pub const MEMORY_FILL: Opcode = 0xFC0B;
pub const TABLE_INIT: Opcode = 0xFC0C;
pub const ELEM_DROP: Opcode = 0xFC0D;
pub const TABLE_COPY: Opcode = 0xFC0E;
pub const TABLE_GROW: Opcode = 0xFC0F;
pub const TABLE_SIZE: Opcode = 0xFC10;
pub const TABLE_FILL: Opcode = 0xFC11;

/// True for `0xFC`-prefixed opcodes.
pub fn is_prefixed(op: Opcode) -> bool {
    op >> 8 == Opcode::from(PREFIX_FC)
}
