//! The opcode table and the compilers for straight-line operations.

use sprig_decode::opcode::{self, Opcode};
use sprig_decode::ByteStream;
use sprig_types::ValueType;

use crate::code::{Operation, Word};
use crate::error::{CompileError, CompileResult};
use crate::exec::{convert as cvt, memory as mem, numeric as num, variables as var};

use super::{Compiler, Reg};

/// How an opcode is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Compile {
    Operator,
    Convert,
    LoadStore,
    Const(ValueType),
    Nop,
    Unreachable,
    Block,
    Loop,
    If,
    Else,
    End,
    Br,
    BrIf,
    BrTable,
    Return,
    Call,
    CallIndirect,
    Drop,
    Select { typed: bool },
    LocalGet,
    LocalSet,
    LocalTee,
    GlobalGet,
    GlobalSet,
    MemorySize,
    MemoryGrow,
    MemoryCopy,
    MemoryFill,
    /// Decodes, but belongs to a proposal this engine does not run.
    Unsupported,
}

#[derive(Clone, Copy)]
pub(super) struct OpInfo {
    /// Net change in stack height, not counting a pushed result.
    pub(super) stack_offset: i8,
    /// Result type, if the operation pushes one.
    pub(super) ty: Option<ValueType>,
    /// Operand-placement forms; the meaning of each position depends on
    /// [`OpInfo::compile`].
    pub(super) ops: [Option<Operation>; 4],
    pub(super) compile: Compile,
}

impl OpInfo {
    const fn new(compile: Compile) -> Self {
        Self {
            stack_offset: 0,
            ty: None,
            ops: [None; 4],
            compile,
        }
    }
}

fn binary(ty: ValueType, rs: Operation, sr: Operation, ss: Operation) -> OpInfo {
    OpInfo {
        stack_offset: -1,
        ty: Some(ty),
        ops: [Some(rs), Some(sr), Some(ss), None],
        compile: Compile::Operator,
    }
}

fn commutative(ty: ValueType, rs: Operation, ss: Operation) -> OpInfo {
    OpInfo {
        stack_offset: -1,
        ty: Some(ty),
        ops: [Some(rs), None, Some(ss), None],
        compile: Compile::Operator,
    }
}

fn unary(ty: ValueType, r: Operation, s: Operation) -> OpInfo {
    OpInfo {
        stack_offset: 0,
        ty: Some(ty),
        ops: [Some(r), Some(s), None, None],
        compile: Compile::Operator,
    }
}

fn convert(ty: ValueType, r_r: Operation, r_s: Operation, s_r: Operation, s_s: Operation) -> OpInfo {
    OpInfo {
        stack_offset: 0,
        ty: Some(ty),
        ops: [Some(r_r), Some(r_s), Some(s_r), Some(s_s)],
        compile: Compile::Convert,
    }
}

fn load(ty: ValueType, r: Operation, s: Operation) -> OpInfo {
    OpInfo {
        stack_offset: 0,
        ty: Some(ty),
        ops: [Some(r), Some(s), None, None],
        compile: Compile::LoadStore,
    }
}

fn store(rs: Operation, sr: Operation, ss: Operation, rr: Option<Operation>) -> OpInfo {
    OpInfo {
        stack_offset: -2,
        ty: None,
        ops: [Some(rs), Some(sr), Some(ss), rr],
        compile: Compile::LoadStore,
    }
}

macro_rules! bin {
    ($ty:ident, $m:ident) => {
        binary(ValueType::$ty, num::$m::rs, num::$m::sr, num::$m::ss)
    };
}

macro_rules! com {
    ($ty:ident, $m:ident) => {
        commutative(ValueType::$ty, num::$m::rs, num::$m::ss)
    };
}

macro_rules! un {
    ($ty:ident, $m:ident) => {
        unary(ValueType::$ty, num::$m::r, num::$m::s)
    };
}

macro_rules! cv {
    ($ty:ident, $m:ident) => {
        convert(ValueType::$ty, cvt::$m::r_r, cvt::$m::r_s, cvt::$m::s_r, cvt::$m::s_s)
    };
}

macro_rules! ld {
    ($ty:ident, $m:ident) => {
        load(ValueType::$ty, mem::$m::r, mem::$m::s)
    };
}

macro_rules! st {
    ($m:ident) => {
        store(mem::$m::rs, mem::$m::sr, mem::$m::ss, None)
    };
    ($m:ident, float) => {
        store(mem::$m::rs, mem::$m::sr, mem::$m::ss, Some(mem::$m::rr))
    };
}

const SIMD: Opcode = opcode::PREFIX_FD as Opcode;

/// Table entry for `opcode`, or `None` for bytes that are not opcodes.
pub(super) fn op_info(opcode: Opcode) -> Option<OpInfo> {
    use opcode::*;
    use ValueType::{F32, F64, I32, I64};

    let info = match opcode {
        UNREACHABLE => OpInfo::new(Compile::Unreachable),
        NOP => OpInfo::new(Compile::Nop),
        BLOCK => OpInfo::new(Compile::Block),
        LOOP => OpInfo::new(Compile::Loop),
        IF => OpInfo::new(Compile::If),
        ELSE => OpInfo::new(Compile::Else),
        END => OpInfo::new(Compile::End),
        BR => OpInfo::new(Compile::Br),
        BR_IF => OpInfo::new(Compile::BrIf),
        BR_TABLE => OpInfo::new(Compile::BrTable),
        RETURN => OpInfo::new(Compile::Return),
        CALL => OpInfo::new(Compile::Call),
        CALL_INDIRECT => OpInfo::new(Compile::CallIndirect),
        DROP => OpInfo::new(Compile::Drop),
        SELECT => OpInfo::new(Compile::Select { typed: false }),
        SELECT_T => OpInfo::new(Compile::Select { typed: true }),
        LOCAL_GET => OpInfo::new(Compile::LocalGet),
        LOCAL_SET => OpInfo::new(Compile::LocalSet),
        LOCAL_TEE => OpInfo::new(Compile::LocalTee),
        GLOBAL_GET => OpInfo::new(Compile::GlobalGet),
        GLOBAL_SET => OpInfo::new(Compile::GlobalSet),

        I32_LOAD => ld!(I32, i32_load),
        I64_LOAD => ld!(I64, i64_load),
        F32_LOAD => ld!(F32, f32_load),
        F64_LOAD => ld!(F64, f64_load),
        I32_LOAD8_S => ld!(I32, i32_load8_s),
        I32_LOAD8_U => ld!(I32, i32_load8_u),
        I32_LOAD16_S => ld!(I32, i32_load16_s),
        I32_LOAD16_U => ld!(I32, i32_load16_u),
        I64_LOAD8_S => ld!(I64, i64_load8_s),
        I64_LOAD8_U => ld!(I64, i64_load8_u),
        I64_LOAD16_S => ld!(I64, i64_load16_s),
        I64_LOAD16_U => ld!(I64, i64_load16_u),
        I64_LOAD32_S => ld!(I64, i64_load32_s),
        I64_LOAD32_U => ld!(I64, i64_load32_u),
        I32_STORE => st!(i32_store),
        I64_STORE => st!(i64_store),
        F32_STORE => st!(f32_store, float),
        F64_STORE => st!(f64_store, float),
        I32_STORE8 => st!(i32_store8),
        I32_STORE16 => st!(i32_store16),
        I64_STORE8 => st!(i64_store8),
        I64_STORE16 => st!(i64_store16),
        I64_STORE32 => st!(i64_store32),
        MEMORY_SIZE => OpInfo::new(Compile::MemorySize),
        MEMORY_GROW => OpInfo::new(Compile::MemoryGrow),

        I32_CONST => OpInfo::new(Compile::Const(I32)),
        I64_CONST => OpInfo::new(Compile::Const(I64)),
        F32_CONST => OpInfo::new(Compile::Const(F32)),
        F64_CONST => OpInfo::new(Compile::Const(F64)),

        I32_EQZ => un!(I32, i32_eqz),
        I32_EQ => com!(I32, i32_eq),
        I32_NE => com!(I32, i32_ne),
        I32_LT_S => bin!(I32, i32_lt_s),
        I32_LT_U => bin!(I32, i32_lt_u),
        I32_GT_S => bin!(I32, i32_gt_s),
        I32_GT_U => bin!(I32, i32_gt_u),
        I32_LE_S => bin!(I32, i32_le_s),
        I32_LE_U => bin!(I32, i32_le_u),
        I32_GE_S => bin!(I32, i32_ge_s),
        I32_GE_U => bin!(I32, i32_ge_u),

        I64_EQZ => un!(I32, i64_eqz),
        I64_EQ => com!(I32, i64_eq),
        I64_NE => com!(I32, i64_ne),
        I64_LT_S => bin!(I32, i64_lt_s),
        I64_LT_U => bin!(I32, i64_lt_u),
        I64_GT_S => bin!(I32, i64_gt_s),
        I64_GT_U => bin!(I32, i64_gt_u),
        I64_LE_S => bin!(I32, i64_le_s),
        I64_LE_U => bin!(I32, i64_le_u),
        I64_GE_S => bin!(I32, i64_ge_s),
        I64_GE_U => bin!(I32, i64_ge_u),

        F32_EQ => com!(I32, f32_eq),
        F32_NE => com!(I32, f32_ne),
        F32_LT => bin!(I32, f32_lt),
        F32_GT => bin!(I32, f32_gt),
        F32_LE => bin!(I32, f32_le),
        F32_GE => bin!(I32, f32_ge),
        F64_EQ => com!(I32, f64_eq),
        F64_NE => com!(I32, f64_ne),
        F64_LT => bin!(I32, f64_lt),
        F64_GT => bin!(I32, f64_gt),
        F64_LE => bin!(I32, f64_le),
        F64_GE => bin!(I32, f64_ge),

        I32_CLZ => un!(I32, i32_clz),
        I32_CTZ => un!(I32, i32_ctz),
        I32_POPCNT => un!(I32, i32_popcnt),
        I32_ADD => com!(I32, i32_add),
        I32_SUB => bin!(I32, i32_sub),
        I32_MUL => com!(I32, i32_mul),
        I32_DIV_S => bin!(I32, i32_div_s),
        I32_DIV_U => bin!(I32, i32_div_u),
        I32_REM_S => bin!(I32, i32_rem_s),
        I32_REM_U => bin!(I32, i32_rem_u),
        I32_AND => com!(I32, i32_and),
        I32_OR => com!(I32, i32_or),
        I32_XOR => com!(I32, i32_xor),
        I32_SHL => bin!(I32, i32_shl),
        I32_SHR_S => bin!(I32, i32_shr_s),
        I32_SHR_U => bin!(I32, i32_shr_u),
        I32_ROTL => bin!(I32, i32_rotl),
        I32_ROTR => bin!(I32, i32_rotr),

        I64_CLZ => un!(I64, i64_clz),
        I64_CTZ => un!(I64, i64_ctz),
        I64_POPCNT => un!(I64, i64_popcnt),
        I64_ADD => com!(I64, i64_add),
        I64_SUB => bin!(I64, i64_sub),
        I64_MUL => com!(I64, i64_mul),
        I64_DIV_S => bin!(I64, i64_div_s),
        I64_DIV_U => bin!(I64, i64_div_u),
        I64_REM_S => bin!(I64, i64_rem_s),
        I64_REM_U => bin!(I64, i64_rem_u),
        I64_AND => com!(I64, i64_and),
        I64_OR => com!(I64, i64_or),
        I64_XOR => com!(I64, i64_xor),
        I64_SHL => bin!(I64, i64_shl),
        I64_SHR_S => bin!(I64, i64_shr_s),
        I64_SHR_U => bin!(I64, i64_shr_u),
        I64_ROTL => bin!(I64, i64_rotl),
        I64_ROTR => bin!(I64, i64_rotr),

        F32_ABS => un!(F32, f32_abs),
        F32_NEG => un!(F32, f32_neg),
        F32_CEIL => un!(F32, f32_ceil),
        F32_FLOOR => un!(F32, f32_floor),
        F32_TRUNC => un!(F32, f32_trunc),
        F32_NEAREST => un!(F32, f32_nearest),
        F32_SQRT => un!(F32, f32_sqrt),
        F32_ADD => com!(F32, f32_add),
        F32_SUB => bin!(F32, f32_sub),
        F32_MUL => com!(F32, f32_mul),
        F32_DIV => bin!(F32, f32_div),
        F32_MIN => com!(F32, f32_min),
        F32_MAX => com!(F32, f32_max),
        F32_COPYSIGN => bin!(F32, f32_copysign),

        F64_ABS => un!(F64, f64_abs),
        F64_NEG => un!(F64, f64_neg),
        F64_CEIL => un!(F64, f64_ceil),
        F64_FLOOR => un!(F64, f64_floor),
        F64_TRUNC => un!(F64, f64_trunc),
        F64_NEAREST => un!(F64, f64_nearest),
        F64_SQRT => un!(F64, f64_sqrt),
        F64_ADD => com!(F64, f64_add),
        F64_SUB => bin!(F64, f64_sub),
        F64_MUL => com!(F64, f64_mul),
        F64_DIV => bin!(F64, f64_div),
        F64_MIN => com!(F64, f64_min),
        F64_MAX => com!(F64, f64_max),
        F64_COPYSIGN => bin!(F64, f64_copysign),

        I32_WRAP_I64 => un!(I32, i32_wrap_i64),
        I32_TRUNC_F32_S => cv!(I32, i32_trunc_f32_s),
        I32_TRUNC_F32_U => cv!(I32, i32_trunc_f32_u),
        I32_TRUNC_F64_S => cv!(I32, i32_trunc_f64_s),
        I32_TRUNC_F64_U => cv!(I32, i32_trunc_f64_u),
        I64_EXTEND_I32_S => un!(I64, i64_extend_i32_s),
        I64_EXTEND_I32_U => un!(I64, i64_extend_i32_u),
        I64_TRUNC_F32_S => cv!(I64, i64_trunc_f32_s),
        I64_TRUNC_F32_U => cv!(I64, i64_trunc_f32_u),
        I64_TRUNC_F64_S => cv!(I64, i64_trunc_f64_s),
        I64_TRUNC_F64_U => cv!(I64, i64_trunc_f64_u),
        F32_CONVERT_I32_S => cv!(F32, f32_convert_i32_s),
        F32_CONVERT_I32_U => cv!(F32, f32_convert_i32_u),
        F32_CONVERT_I64_S => cv!(F32, f32_convert_i64_s),
        F32_CONVERT_I64_U => cv!(F32, f32_convert_i64_u),
        F32_DEMOTE_F64 => un!(F32, f32_demote_f64),
        F64_CONVERT_I32_S => cv!(F64, f64_convert_i32_s),
        F64_CONVERT_I32_U => cv!(F64, f64_convert_i32_u),
        F64_CONVERT_I64_S => cv!(F64, f64_convert_i64_s),
        F64_CONVERT_I64_U => cv!(F64, f64_convert_i64_u),
        F64_PROMOTE_F32 => un!(F64, f64_promote_f32),
        I32_REINTERPRET_F32 => cv!(I32, i32_reinterpret_f32),
        I64_REINTERPRET_F64 => cv!(I64, i64_reinterpret_f64),
        F32_REINTERPRET_I32 => cv!(F32, f32_reinterpret_i32),
        F64_REINTERPRET_I64 => cv!(F64, f64_reinterpret_i64),

        I32_EXTEND8_S => un!(I32, i32_extend8_s),
        I32_EXTEND16_S => un!(I32, i32_extend16_s),
        I64_EXTEND8_S => un!(I64, i64_extend8_s),
        I64_EXTEND16_S => un!(I64, i64_extend16_s),
        I64_EXTEND32_S => un!(I64, i64_extend32_s),

        I32_TRUNC_SAT_F32_S => cv!(I32, i32_trunc_sat_f32_s),
        I32_TRUNC_SAT_F32_U => cv!(I32, i32_trunc_sat_f32_u),
        I32_TRUNC_SAT_F64_S => cv!(I32, i32_trunc_sat_f64_s),
        I32_TRUNC_SAT_F64_U => cv!(I32, i32_trunc_sat_f64_u),
        I64_TRUNC_SAT_F32_S => cv!(I64, i64_trunc_sat_f32_s),
        I64_TRUNC_SAT_F32_U => cv!(I64, i64_trunc_sat_f32_u),
        I64_TRUNC_SAT_F64_S => cv!(I64, i64_trunc_sat_f64_s),
        I64_TRUNC_SAT_F64_U => cv!(I64, i64_trunc_sat_f64_u),
        MEMORY_COPY => OpInfo::new(Compile::MemoryCopy),
        MEMORY_FILL => OpInfo::new(Compile::MemoryFill),

        RETURN_CALL | RETURN_CALL_INDIRECT | TABLE_GET | TABLE_SET | REF_NULL | REF_IS_NULL
        | REF_FUNC | MEMORY_INIT | DATA_DROP | TABLE_INIT | ELEM_DROP | TABLE_COPY
        | TABLE_GROW | TABLE_SIZE | TABLE_FILL | SIMD => OpInfo::new(Compile::Unsupported),

        _ => return None,
    };
    Some(info)
}

fn pick(info: &OpInfo, index: usize) -> CompileResult<Operation> {
    info.ops[index].ok_or(CompileError::Malformed("operand placement without an operation"))
}

impl Compiler<'_> {
    // ── Operators ────────────────────────────────────────────────────────────

    /// Choose the form matching where the operands are, emit it with the
    /// operands' slots and push the result in its register.
    pub(super) fn compile_operator(&mut self, info: &OpInfo) -> CompileResult<()> {
        // A float comparison leaves its result in `r0`, which may hold an
        // unrelated entry.
        if let (Some(top), Some(ty)) = (self.type_from_top(0), info.ty) {
            if top.is_float() && !ty.is_float() {
                self.preserve_register(Reg::Int)?;
            }
        }

        let op = if info.stack_offset == 0 {
            if self.top_in_register() {
                pick(info, 0)?
            } else {
                if let Some(ty) = info.ty {
                    self.preserve_register(Reg::of(ty))?;
                }
                pick(info, 1)?
            }
        } else if self.top_in_register() {
            if self.below_top_in_register(1) {
                pick(info, 3)?
            } else {
                pick(info, 0)?
            }
        } else if self.below_top_in_register(1) {
            match info.ops[1] {
                Some(op) => op,
                None => pick(info, 0)?,
            }
        } else {
            if let Some(ty) = info.ty {
                self.preserve_register(Reg::of(ty))?;
            }
            pick(info, 2)?
        };

        self.emit_op(op)?;
        self.emit_slot_of_top_and_pop()?;
        if info.stack_offset < 0 {
            self.emit_slot_of_top_and_pop()?;
        }
        if let Some(ty) = info.ty {
            self.push_register(ty)?;
        }
        Ok(())
    }

    /// Conversions between register classes. The destination goes to a
    /// slot when its register is taken.
    pub(super) fn compile_convert(&mut self, info: &OpInfo) -> CompileResult<()> {
        let ty = info.ty.ok_or(CompileError::Malformed("conversion without a result type"))?;
        let dest_in_slot = self.registers[Reg::of(ty).index()].is_some();
        let src_in_slot = !self.top_in_register();
        let op = pick(info, usize::from(dest_in_slot) * 2 + usize::from(src_in_slot))?;

        self.emit_op(op)?;
        self.emit_slot_of_top_and_pop()?;
        if dest_in_slot {
            self.push_allocated_slot_and_emit(ty)
        } else {
            self.push_register(ty)
        }
    }

    pub(super) fn compile_load_store(&mut self, info: &OpInfo) -> CompileResult<()> {
        let _align = self.reader.read_u32_leb()?;
        let offset = self.reader.read_u32_leb()?;
        if info.ty.is_some_and(|ty| ty.is_float()) {
            self.preserve_register(Reg::Float)?;
        }
        self.compile_operator(info)?;
        self.emit(Word::Imm32(offset));
        Ok(())
    }

    pub(super) fn compile_const(&mut self, ty: ValueType) -> CompileResult<()> {
        let bits = match ty {
            ValueType::I32 => u64::from(self.reader.read_i32_leb()? as u32),
            ValueType::I64 => self.reader.read_i64_leb()? as u64,
            ValueType::F32 => u64::from(self.reader.read_f32()?.to_bits()),
            ValueType::F64 => self.reader.read_f64()?.to_bits(),
        };
        self.push_const(bits, ty)
    }

    // ── Select ───────────────────────────────────────────────────────────────

    pub(super) fn compile_select(&mut self, typed: bool) -> CompileResult<()> {
        if typed {
            let count = self.reader.read_u32_leb()?;
            for _ in 0..count {
                self.reader.read_u8()?;
            }
        }

        let Some(ty) = self.type_from_top(1) else {
            self.underrun_unless_polymorphic()?;
            for _ in 0..3 {
                self.pop()?;
            }
            return Ok(());
        };

        let mut slots = Vec::with_capacity(3);
        let op = if ty.is_float() {
            if !self.below_top_in_register(1) && !self.below_top_in_register(2) {
                self.preserve_register(Reg::Float)?;
            }
            let selector_in_register = self.top_in_register();
            if !selector_in_register {
                slots.push(self.top_slot());
            }
            self.pop()?;

            let mut form = 0;
            for i in 1..=2 {
                if self.top_in_register() {
                    form = i;
                } else {
                    slots.push(self.top_slot());
                }
                self.pop()?;
            }
            float_select(ty, selector_in_register, form)
        } else {
            if !self.top_in_register() && !self.below_top_in_register(1) && !self.below_top_in_register(2) {
                self.preserve_register(Reg::Int)?;
            }
            let mut form = 3;
            for i in 0..3 {
                if self.top_in_register() {
                    form = i;
                } else {
                    slots.push(self.top_slot());
                }
                self.pop()?;
            }
            int_select(ty, form)
        };

        self.emit_op(op)?;
        for slot in slots {
            self.emit_slot(slot);
        }
        self.push_register(ty)
    }

    // ── Locals and globals ───────────────────────────────────────────────────

    pub(super) fn compile_get_local(&mut self) -> CompileResult<()> {
        let index = self.reader.read_u32_leb()?;
        self.get_local(index)
    }

    pub(super) fn compile_set_local(&mut self, tee: bool) -> CompileResult<()> {
        let index = self.reader.read_u32_leb()?;
        self.set_local(index, tee)
    }

    /// Runtime-wide index of the module's global `index`.
    fn global(&self, index: u32) -> CompileResult<u32> {
        self.rt.instances[self.module.index()]
            .globals
            .get(index as usize)
            .copied()
            .ok_or(CompileError::GlobalIndexOutOfBounds(index))
    }

    pub(super) fn compile_get_global(&mut self) -> CompileResult<()> {
        let index = self.reader.read_u32_leb()?;
        let global = self.global(index)?;
        let ty = self.rt.globals[global as usize].ty;

        let op = if ty.is_64bit() {
            var::get_global_64
        } else {
            var::get_global_32
        };
        self.emit_op(op)?;
        self.emit(Word::Global(global));
        self.push_allocated_slot_and_emit(ty)
    }

    pub(super) fn compile_set_global(&mut self) -> CompileResult<()> {
        let index = self.reader.read_u32_leb()?;
        let global = self.global(index)?;
        let (ty, mutable) = {
            let g = &self.rt.globals[global as usize];
            (g.ty, g.mutable)
        };
        if !mutable {
            return Err(CompileError::ImmutableGlobal(index));
        }

        if self.top_in_register() {
            let op = match ty {
                ValueType::I32 => var::set_global_i32,
                ValueType::I64 => var::set_global_i64,
                ValueType::F32 => var::set_global_f32,
                ValueType::F64 => var::set_global_f64,
            };
            self.emit_op(op)?;
            self.emit(Word::Global(global));
        } else {
            let op = if ty.is_64bit() {
                var::set_global_s64
            } else {
                var::set_global_s32
            };
            self.emit_op(op)?;
            self.emit(Word::Global(global));
            let slot = self.top_slot();
            self.emit_slot(slot);
        }
        self.pop()
    }

    // ── Memory ───────────────────────────────────────────────────────────────

    pub(super) fn compile_memory_size(&mut self) -> CompileResult<()> {
        let _memory = self.reader.read_u32_leb()?;
        self.preserve_register(Reg::Int)?;
        self.emit_op(mem::memory_size)?;
        self.push_register(ValueType::I32)
    }

    pub(super) fn compile_memory_grow(&mut self) -> CompileResult<()> {
        let _memory = self.reader.read_u32_leb()?;
        self.copy_stack_top_to_register(false)?;
        self.pop_type(ValueType::I32)?;
        self.emit_op(mem::memory_grow)?;
        self.push_register(ValueType::I32)
    }

    pub(super) fn compile_memory_copy(&mut self) -> CompileResult<()> {
        let _dst_memory = self.reader.read_u32_leb()?;
        let _src_memory = self.reader.read_u32_leb()?;
        self.compile_bulk(mem::memory_copy)
    }

    pub(super) fn compile_memory_fill(&mut self) -> CompileResult<()> {
        let _memory = self.reader.read_u32_leb()?;
        self.compile_bulk(mem::memory_fill)
    }

    /// Length to `r0`, then the two remaining operands' slots, top first.
    fn compile_bulk(&mut self, op: Operation) -> CompileResult<()> {
        self.copy_stack_top_to_register(false)?;
        self.pop_type(ValueType::I32)?;
        self.emit_op(op)?;
        self.emit_slot_of_top_and_pop()?;
        self.emit_slot_of_top_and_pop()
    }
}

fn int_select(ty: ValueType, form: usize) -> Operation {
    let forms: [Operation; 4] = if ty.is_64bit() {
        [var::select_i64_rss, var::select_i64_srs, var::select_i64_ssr, var::select_i64_sss]
    } else {
        [var::select_i32_rss, var::select_i32_srs, var::select_i32_ssr, var::select_i32_sss]
    };
    forms[form.min(3)]
}

fn float_select(ty: ValueType, selector_in_register: bool, form: usize) -> Operation {
    let forms: [[Operation; 3]; 2] = if ty.is_64bit() {
        [
            [var::select_f64_sss, var::select_f64_srs, var::select_f64_ssr],
            [var::select_f64_rss, var::select_f64_rrs, var::select_f64_rsr],
        ]
    } else {
        [
            [var::select_f32_sss, var::select_f32_srs, var::select_f32_ssr],
            [var::select_f32_rss, var::select_f32_rrs, var::select_f32_rsr],
        ]
    };
    forms[usize::from(selector_in_register)][form.min(2)]
}
