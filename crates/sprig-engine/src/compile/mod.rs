//! Function compiler.
//!
//! Translates one function body into threaded code in a single pass. The
//! compiler keeps a virtual operand stack whose entries say where each value
//! will live at run time: a frame slot or one of the two registers. Values
//! only move when an operation needs them somewhere else, so most operations
//! read their operands straight from the slots earlier code wrote.
//!
//! A frame is laid out, in slots from its base: two return slots per result,
//! two argument slots per parameter, the locals, the constant table and then
//! the temporaries allocated while compiling.

mod control;
mod emit;
mod ops;
mod stack;

use std::rc::Rc;

use sprig_decode::opcode::{self, Opcode};
use sprig_decode::{ByteStream, SliceReader};
use sprig_module::FunctionBody;
use sprig_types::{FuncType, ValueType};

use crate::code::{Pc, Word, PAGE_FREE_LINES_THRESHOLD};
use crate::error::{CompileError, CompileResult};
use crate::exec::control as exec;
use crate::function::{ConstantTable, FuncId, FunctionKind, ModuleId};
use crate::runtime::Runtime;

use ops::{Compile, OpInfo};

/// Placeholder slot number. Never a valid slot: frames are smaller.
const UNUSED_SLOT: u16 = u16::MAX;

/// Slots per argument or result in the calling convention.
const IO_SLOTS: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
    Int,
    Float,
}

impl Reg {
    fn of(ty: ValueType) -> Reg {
        if ty.is_float() {
            Reg::Float
        } else {
            Reg::Int
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Where a stack entry lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Register(Reg),
    Slot(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

/// A block being compiled.
#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    /// Loop continuation target; for other blocks, where the block starts.
    pc: Pc,
    /// Forward branches to patch with the block's end.
    patches: Vec<Pc>,
    depth: u32,
    ty: Rc<FuncType>,
    /// Code after an unconditional transfer; the stack no longer matters.
    polymorphic: bool,
    /// Stack height at which the block's own entries begin.
    block_stack_index: u16,
    /// Stack height on exit, below the block's params.
    exit_stack_index: u16,
}

/// What branch compilation needs to know about its target block.
#[derive(Debug, Clone)]
struct Target {
    /// Relative depth the branch named.
    relative: u32,
    kind: ScopeKind,
    pc: Pc,
    ty: Rc<FuncType>,
    exit_stack_index: u16,
}

/// Per-function results written back to the function record.
#[derive(Debug)]
struct Compiled {
    entry: Pc,
    max_stack_slots: u16,
    num_ret_and_arg_slots: u16,
    num_locals: u32,
    num_local_bytes: u32,
    constants: Vec<u32>,
}

/// Compile `id` if it is not compiled yet and return its entry position.
///
/// On error the function stays uncompiled and a later call may retry.
pub(crate) fn compile_function(rt: &mut Runtime, id: FuncId) -> CompileResult<Pc> {
    let function = rt
        .functions
        .get(id.index())
        .ok_or(CompileError::FunctionLookupFailed(id.0))?;
    if let Some(entry) = function.compiled {
        return Ok(entry);
    }
    match &function.kind {
        FunctionKind::Wasm(body) => {
            let body = body.clone();
            compile_wasm(rt, id, &body)
        }
        FunctionKind::Host(_) => compile_host_stub(rt, id),
        FunctionKind::Import(name) => Err(CompileError::ImportMissing(name.to_string())),
    }
}

/// A host function's code is a single `call_host`.
fn compile_host_stub(rt: &mut Runtime, id: FuncId) -> CompileResult<Pc> {
    let page = rt.code.acquire(&rt.env, PAGE_FREE_LINES_THRESHOLD)?;
    let entry = rt.code.pc(page);
    rt.code.emit(page, Word::Op(exec::call_host));
    rt.code.emit(page, Word::Func(id));
    rt.code.release(page);

    if let Some(function) = rt.functions.get_mut(id.index()) {
        let io_slots = (function.ty.num_results() + function.ty.num_params()) * usize::from(IO_SLOTS);
        function.num_ret_and_arg_slots = io_slots.min(usize::from(u16::MAX)) as u16;
        function.max_stack_slots = function.num_ret_and_arg_slots;
        function.compiled = Some(entry);
        tracing::debug!(target: "sprig.compile", function = %function.name, %entry, "host stub emitted");
    }
    Ok(entry)
}

fn compile_wasm(rt: &mut Runtime, id: FuncId, body: &FunctionBody) -> CompileResult<Pc> {
    let function = &rt.functions[id.index()];
    let module = function.module;
    let ty = Rc::clone(&function.ty);
    let bytes = Rc::clone(
        rt.instances
            .get(module.index())
            .ok_or(CompileError::FunctionLookupFailed(id.0))?
            .module
            .bytes(),
    );
    let reader = SliceReader::with_range(&bytes, body.code_start, body.range.end)?;
    let page = rt.code.acquire(&rt.env, PAGE_FREE_LINES_THRESHOLD)?;

    let mut compiler = Compiler::new(rt, reader, id, module, page, ty);
    let result = compiler.compile_body(body);
    compiler.release_page();
    let compiled = match result {
        Ok(compiled) => compiled,
        Err(err) => {
            tracing::debug!(
                target: "sprig.compile",
                function = %rt.functions[id.index()].name,
                %err,
                "compilation failed"
            );
            return Err(err);
        }
    };

    let constants = if compiled.constants.is_empty() {
        None
    } else {
        let bytes: Vec<u8> = compiled.constants.iter().flat_map(|w| w.to_le_bytes()).collect();
        let offset = rt.heap.malloc(bytes.len())?;
        rt.heap.write(offset, &bytes)?;
        Some(ConstantTable {
            offset,
            len: bytes.len() as u32,
        })
    };

    let function = &mut rt.functions[id.index()];
    function.compiled = Some(compiled.entry);
    function.max_stack_slots = compiled.max_stack_slots;
    function.num_ret_and_arg_slots = compiled.num_ret_and_arg_slots;
    function.num_locals = compiled.num_locals;
    function.num_local_bytes = compiled.num_local_bytes;
    function.constants = constants;
    tracing::debug!(
        target: "sprig.compile",
        function = %function.name,
        entry = %compiled.entry,
        max_stack_slots = compiled.max_stack_slots,
        constants = compiled.constants.len(),
        "function compiled"
    );
    Ok(compiled.entry)
}

// ══════════════════════════════════════════════════════════════════════════════
// Compiler state
// ══════════════════════════════════════════════════════════════════════════════

struct Compiler<'a> {
    rt: &'a mut Runtime,
    reader: SliceReader<'a>,
    func: FuncId,
    module: ModuleId,
    func_type: Rc<FuncType>,
    /// Page code is currently emitted to.
    page: u32,

    block: Scope,
    outer: Vec<Scope>,

    wasm_stack: Vec<Location>,
    type_stack: Vec<ValueType>,
    stack_index: u16,
    /// Entries below this are arguments and locals.
    stack_first_dynamic: u16,
    /// Stack index held by each register.
    registers: [Option<u16>; 2],

    /// Per-slot usage counts.
    slots: Vec<u8>,
    constants: Vec<u32>,
    slot_first_const: u16,
    slot_max_const: u16,
    slot_first_dynamic: u16,
    slot_first_local: u16,
    slot_max_allocated_plus_one: u16,
    max_stack_slots: u16,
    num_args_and_locals: u32,

    previous_opcode: Opcode,
    last_opcode_start: usize,

    max_function_slots: u16,
    max_constant_slots: u16,
    max_stack_height: u16,
}

impl<'a> Compiler<'a> {
    fn new(
        rt: &'a mut Runtime,
        reader: SliceReader<'a>,
        func: FuncId,
        module: ModuleId,
        page: u32,
        ty: Rc<FuncType>,
    ) -> Self {
        let max_function_slots = rt.config.max_function_slots;
        let max_constant_slots = rt.config.max_constant_slots;
        let max_stack_height = rt.config.max_stack_height;
        let entry = rt.code.pc(page);
        Self {
            rt,
            reader,
            func,
            module,
            func_type: Rc::clone(&ty),
            page,
            block: Scope {
                kind: ScopeKind::Function,
                pc: entry,
                patches: Vec::new(),
                depth: 0,
                ty,
                polymorphic: false,
                block_stack_index: 0,
                exit_stack_index: 0,
            },
            outer: Vec::new(),
            wasm_stack: vec![Location::Slot(UNUSED_SLOT); usize::from(max_stack_height)],
            type_stack: vec![ValueType::I32; usize::from(max_stack_height)],
            stack_index: 0,
            stack_first_dynamic: 0,
            registers: [None; 2],
            slots: vec![0; usize::from(max_function_slots)],
            constants: vec![0; usize::from(max_constant_slots)],
            slot_first_const: 0,
            slot_max_const: 0,
            slot_first_dynamic: 0,
            slot_first_local: 0,
            slot_max_allocated_plus_one: 0,
            max_stack_slots: 0,
            num_args_and_locals: 0,
            previous_opcode: opcode::UNREACHABLE,
            last_opcode_start: 0,
            max_function_slots,
            max_constant_slots,
            max_stack_height,
        }
    }

    fn compile_body(&mut self, body: &FunctionBody) -> CompileResult<Compiled> {
        let ty = Rc::clone(&self.func_type);

        let num_ret_slots = u16::try_from(ty.num_results() * usize::from(IO_SLOTS))
            .map_err(|_| CompileError::FunctionStackOverflow)?;
        for slot in 0..num_ret_slots {
            self.mark_slot_allocated(slot)?;
        }
        self.slot_first_dynamic = num_ret_slots;

        for &param in ty.params() {
            self.push_allocated_slot(param)?;
            self.slot_first_dynamic = self
                .slot_first_dynamic
                .checked_add(IO_SLOTS)
                .ok_or(CompileError::FunctionStackOverflow)?;
        }
        let num_ret_and_arg_slots = self.slot_first_dynamic;
        self.slot_first_local = self.slot_first_dynamic;

        let num_locals = body.num_locals();
        for local in body.local_types() {
            self.push_allocated_slot(local)?;
        }
        self.num_args_and_locals = ty.num_params() as u32 + num_locals;

        // Parameter pairs are reserved whole even when a 32-bit value marks
        // only the first slot.
        let first_const = self.max_used_slot_plus_one().max(self.slot_first_local);
        let num_local_bytes = u32::from(first_const - self.slot_first_local) * 4;
        self.slot_first_const = first_const;
        self.slot_max_const = first_const;
        self.reserve_constants()?;

        self.max_stack_slots = self.slot_first_dynamic;
        self.slot_max_allocated_plus_one = self.slot_first_dynamic;
        self.stack_first_dynamic = self.stack_index;
        self.block.block_stack_index = self.stack_index;
        self.block.exit_stack_index = self.stack_index;

        let entry = self.emit_op(exec::entry)?;
        self.emit(Word::Func(self.func));
        self.block.pc = entry;

        self.compile_block_statements()?;
        if self.previous_opcode != opcode::END {
            return Err(CompileError::Malformed("function body does not end with `end`"));
        }
        if !self.reader.is_empty() {
            return Err(CompileError::Malformed("bytes after the final `end`"));
        }

        let used = usize::from(self.slot_max_const - self.slot_first_const);
        Ok(Compiled {
            entry,
            max_stack_slots: self.max_stack_slots,
            num_ret_and_arg_slots,
            num_locals,
            num_local_bytes,
            constants: self.constants[..used].to_vec(),
        })
    }

    /// Size the constant table from a byte scan of the body. Constants that
    /// do not fit are emitted inline instead.
    fn reserve_constants(&mut self) -> CompileResult<()> {
        let limit = self.max_constant_slots;
        let mut reserved: u16 = 0;
        for &byte in self.reader.rest() {
            match u16::from(byte) {
                opcode::I32_CONST | opcode::F32_CONST => reserved += 1,
                opcode::I64_CONST | opcode::F64_CONST => reserved += 2,
                _ => {}
            }
            if reserved >= limit {
                break;
            }
        }
        let reserved = reserved.min(limit);
        let first_dynamic = u32::from(self.slot_first_const) + u32::from(reserved);
        let first_dynamic = (first_dynamic + 1) & !1;
        if first_dynamic >= u32::from(self.max_function_slots) {
            return Err(CompileError::FunctionStackOverflow);
        }
        self.slot_first_dynamic = first_dynamic as u16;
        Ok(())
    }

    /// Compile opcodes until the `end` (or `else`) that closes the current
    /// block.
    fn compile_block_statements(&mut self) -> CompileResult<()> {
        while !self.reader.is_empty() {
            self.last_opcode_start = self.reader.position();
            let opcode = self.reader.read_opcode()?;
            let info = ops::op_info(opcode).ok_or(CompileError::UnknownOpcode(opcode))?;
            self.compile_op(opcode, &info)?;
            self.previous_opcode = opcode;

            match opcode {
                opcode::ELSE if self.block.kind != ScopeKind::If => {
                    return Err(CompileError::Malformed("`else` outside of `if`"));
                }
                opcode::ELSE | opcode::END => return Ok(()),
                _ => {}
            }
        }
        Err(CompileError::Malformed("unterminated block"))
    }

    fn compile_op(&mut self, opcode: Opcode, info: &OpInfo) -> CompileResult<()> {
        match info.compile {
            Compile::Operator => self.compile_operator(info),
            Compile::Convert => self.compile_convert(info),
            Compile::LoadStore => self.compile_load_store(info),
            Compile::Const(ty) => self.compile_const(ty),
            Compile::Nop | Compile::Else => Ok(()),
            Compile::Unreachable => self.compile_unreachable(),
            Compile::Block => self.compile_loop_or_block(false),
            Compile::Loop => self.compile_loop_or_block(true),
            Compile::If => self.compile_if(),
            Compile::End => self.compile_end(),
            Compile::Br => self.compile_branch(false),
            Compile::BrIf => self.compile_branch(true),
            Compile::BrTable => self.compile_branch_table(),
            Compile::Return => self.compile_return(),
            Compile::Call => self.compile_call(),
            Compile::CallIndirect => self.compile_call_indirect(),
            Compile::Drop => self.pop(),
            Compile::Select { typed } => self.compile_select(typed),
            Compile::LocalGet => self.compile_get_local(),
            Compile::LocalSet => self.compile_set_local(false),
            Compile::LocalTee => self.compile_set_local(true),
            Compile::GlobalGet => self.compile_get_global(),
            Compile::GlobalSet => self.compile_set_global(),
            Compile::MemorySize => self.compile_memory_size(),
            Compile::MemoryGrow => self.compile_memory_grow(),
            Compile::MemoryCopy => self.compile_memory_copy(),
            Compile::MemoryFill => self.compile_memory_fill(),
            Compile::Unsupported => Err(CompileError::NoCompilerForOpcode(opcode)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_follow_the_value_class() {
        assert_eq!(Reg::of(ValueType::I64), Reg::Int);
        assert_eq!(Reg::of(ValueType::F32), Reg::Float);
        assert_ne!(Reg::Int.index(), Reg::Float.index());
    }

    #[test]
    fn every_defined_opcode_has_a_table_entry() {
        for op in [opcode::I32_ADD, opcode::F64_SQRT, opcode::BR_TABLE, opcode::MEMORY_FILL] {
            assert!(ops::op_info(op).is_some(), "0x{op:x}");
        }
        assert!(ops::op_info(0x27).is_none());
        assert!(matches!(
            ops::op_info(opcode::PREFIX_FD.into()).map(|i| i.compile),
            Some(Compile::Unsupported)
        ));
    }
}
