//! End-to-end engine tests.
//!
//! Covers: loading and calling, lazy compilation, control flow, locals,
//! memory growth and access, globals and start functions, indirect calls,
//! host functions, traps and their backtraces, yielding, module ownership,
//! code page reuse, and differential runs against `wasmi`.

use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use sprig_decode::opcode;
use sprig_engine::{
    CompileError, EngineConfig, Environment, Error, LinkError, Module, ModuleId, Runtime, Trap,
    Value,
};
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, ElementSection, Elements, EntityType, ExportKind,
    ExportSection, Function, FunctionSection, GlobalSection, GlobalType, ImportSection,
    Instruction, MemArg, MemorySection, MemoryType, RefType, StartSection, TableSection,
    TableType, TypeSection, ValType,
};

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

/// Builds small modules. Imports must be declared before functions.
#[derive(Default)]
struct TestModule {
    types: Vec<(Vec<ValType>, Vec<ValType>)>,
    imports: Vec<(&'static str, &'static str, u32)>,
    functions: Vec<(u32, Option<&'static str>, Function)>,
    memory: Option<(u64, Option<u64>)>,
    table: Option<(u64, Vec<u32>)>,
    globals: Vec<(GlobalType, ConstExpr, Option<&'static str>)>,
    start: Option<u32>,
}

impl TestModule {
    fn ty(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        let ty = (params.to_vec(), results.to_vec());
        if let Some(i) = self.types.iter().position(|t| *t == ty) {
            return i as u32;
        }
        self.types.push(ty);
        self.types.len() as u32 - 1
    }

    fn import(&mut self, module: &'static str, name: &'static str, params: &[ValType], results: &[ValType]) -> u32 {
        assert!(self.functions.is_empty());
        let ty = self.ty(params, results);
        self.imports.push((module, name, ty));
        self.imports.len() as u32 - 1
    }

    fn func(
        &mut self,
        export: Option<&'static str>,
        params: &[ValType],
        results: &[ValType],
        locals: &[(u32, ValType)],
        body: &[Instruction<'_>],
    ) -> u32 {
        let ty = self.ty(params, results);
        let mut function = Function::new(locals.to_vec());
        for instruction in body {
            function.instruction(instruction);
        }
        function.instruction(&Instruction::End);
        self.functions.push((ty, export, function));
        (self.imports.len() + self.functions.len()) as u32 - 1
    }

    fn global(&mut self, val_type: ValType, mutable: bool, init: ConstExpr, export: Option<&'static str>) -> u32 {
        let ty = GlobalType {
            val_type,
            mutable,
            shared: false,
        };
        self.globals.push((ty, init, export));
        self.globals.len() as u32 - 1
    }

    fn encode(&self) -> Vec<u8> {
        let mut module = wasm_encoder::Module::new();

        let mut types = TypeSection::new();
        for (params, results) in &self.types {
            types.ty().function(params.iter().copied(), results.iter().copied());
        }
        module.section(&types);

        if !self.imports.is_empty() {
            let mut imports = ImportSection::new();
            for &(module_name, name, ty) in &self.imports {
                imports.import(module_name, name, EntityType::Function(ty));
            }
            module.section(&imports);
        }

        let mut funcs = FunctionSection::new();
        for (ty, _, _) in &self.functions {
            funcs.function(*ty);
        }
        module.section(&funcs);

        if let Some((size, _)) = &self.table {
            let mut tables = TableSection::new();
            tables.table(TableType {
                element_type: RefType::FUNCREF,
                table64: false,
                minimum: *size,
                maximum: None,
                shared: false,
            });
            module.section(&tables);
        }

        if let Some((minimum, maximum)) = self.memory {
            let mut memory = MemorySection::new();
            memory.memory(MemoryType {
                minimum,
                maximum,
                memory64: false,
                shared: false,
                page_size_log2: None,
            });
            module.section(&memory);
        }

        if !self.globals.is_empty() {
            let mut globals = GlobalSection::new();
            for (ty, init, _) in &self.globals {
                globals.global(*ty, init);
            }
            module.section(&globals);
        }

        let mut exports = ExportSection::new();
        let first = self.imports.len() as u32;
        for (i, (_, export, _)) in self.functions.iter().enumerate() {
            if let Some(name) = export {
                exports.export(name, ExportKind::Func, first + i as u32);
            }
        }
        for (i, (_, _, export)) in self.globals.iter().enumerate() {
            if let Some(name) = export {
                exports.export(name, ExportKind::Global, i as u32);
            }
        }
        module.section(&exports);

        if let Some(function_index) = self.start {
            module.section(&StartSection { function_index });
        }

        if let Some((_, functions)) = &self.table {
            let mut elements = ElementSection::new();
            elements.active(
                Some(0),
                &ConstExpr::i32_const(0),
                Elements::Functions(Cow::Borrowed(functions)),
            );
            module.section(&elements);
        }

        let mut code = CodeSection::new();
        for (_, _, function) in &self.functions {
            code.function(function);
        }
        module.section(&code);

        let bytes = module.finish();
        wasmparser::Validator::new().validate_all(&bytes).unwrap();
        bytes
    }
}

fn runtime() -> Runtime {
    Runtime::new(&Environment::new(), EngineConfig::default()).unwrap()
}

fn load(rt: &mut Runtime, name: &str, bytes: Vec<u8>) -> ModuleId {
    rt.load(Rc::new(Module::parse(name, bytes).unwrap())).unwrap()
}

fn call(rt: &mut Runtime, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
    let id = rt.find_function(name)?;
    rt.call(id, args)
}

fn trap(result: Result<Vec<Value>, Error>) -> Trap {
    match result {
        Err(Error::Trap(err)) => err.trap,
        other => panic!("expected a trap, got {other:?}"),
    }
}

/// Run `name` under `wasmi` with integer arguments.
fn wasmi_call(bytes: &[u8], name: &str, args: &[Value]) -> Vec<Value> {
    let engine = wasmi::Engine::default();
    let module = wasmi::Module::new(&engine, bytes).unwrap();
    let mut store = wasmi::Store::new(&engine, ());
    let linker = wasmi::Linker::<()>::new(&engine);
    let instance = linker
        .instantiate(&mut store, &module)
        .unwrap()
        .start(&mut store)
        .unwrap();
    let func = instance.get_func(&store, name).unwrap();
    let params: Vec<wasmi::Val> = args
        .iter()
        .map(|arg| match *arg {
            Value::I32(v) => wasmi::Val::I32(v),
            Value::I64(v) => wasmi::Val::I64(v),
            other => panic!("unsupported argument {other:?}"),
        })
        .collect();
    let mut results = vec![wasmi::Val::I32(0); func.ty(&store).results().len()];
    func.call(&mut store, &params, &mut results).unwrap();
    results
        .into_iter()
        .map(|r| match r {
            wasmi::Val::I32(v) => Value::I32(v),
            wasmi::Val::I64(v) => Value::I64(v),
            other => panic!("unsupported result {other:?}"),
        })
        .collect()
}

/// Compare every case against `wasmi`.
fn differential(bytes: Vec<u8>, name: &str, cases: &[&[Value]]) {
    let mut rt = runtime();
    load(&mut rt, "diff", bytes.clone());
    for args in cases {
        let ours = call(&mut rt, name, args).unwrap();
        let theirs = wasmi_call(&bytes, name, args);
        assert_eq!(ours, theirs, "{name}{args:?}");
    }
}

const I32: ValType = ValType::I32;
const I64: ValType = ValType::I64;
const F64: ValType = ValType::F64;

fn mem(offset: u64, align: u32) -> MemArg {
    MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

// ─────────────────────────────────────────────────────────────────────
// Basics
// ─────────────────────────────────────────────────────────────────────

#[test]
fn constant_function_returns_42() {
    let mut m = TestModule::default();
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let mut rt = runtime();
    load(&mut rt, "answer", m.encode());

    let id = rt.find_function("answer").unwrap();
    assert!(!rt.function_info(id).unwrap().compiled);
    assert_eq!(rt.call(id, &[]).unwrap(), vec![Value::I32(42)]);

    let info = rt.function_info(id).unwrap();
    assert_eq!(info.name, "answer");
    assert_eq!(info.signature, "i()");
    assert!(info.compiled);
    assert_eq!(info.hits, 1);
}

#[test]
fn arguments_are_checked_before_the_call() {
    let mut m = TestModule::default();
    m.func(Some("id"), &[I32], &[I32], &[], &[Instruction::LocalGet(0)]);
    let mut rt = runtime();
    load(&mut rt, "id", m.encode());

    assert!(matches!(call(&mut rt, "id", &[]), Err(Error::ArgumentMismatch(_))));
    assert!(matches!(call(&mut rt, "id", &[Value::I64(1)]), Err(Error::ArgumentMismatch(_))));
    assert!(matches!(call(&mut rt, "missing", &[]), Err(Error::NotFound(_))));
    assert_eq!(call(&mut rt, "id", &[Value::I32(-3)]).unwrap(), vec![Value::I32(-3)]);
}

#[test]
fn explicit_compile_is_idempotent() {
    let mut m = TestModule::default();
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let mut rt = runtime();
    load(&mut rt, "answer", m.encode());

    let id = rt.find_function("answer").unwrap();
    rt.compile(id).unwrap();
    rt.compile(id).unwrap();
    assert!(rt.function_info(id).unwrap().compiled);
    assert_eq!(rt.function_info(id).unwrap().hits, 0);
    assert_eq!(rt.call(id, &[]).unwrap(), vec![Value::I32(42)]);
}

#[test]
fn function_types_are_interned_per_environment() {
    let env = Environment::new();
    let mut a = Runtime::new(&env, EngineConfig::default()).unwrap();
    let mut b = Runtime::new(&env, EngineConfig::default()).unwrap();

    let mut m = TestModule::default();
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    m.func(Some("seven"), &[], &[I32], &[], &[Instruction::I32Const(7)]);
    load(&mut a, "a", m.encode());
    load(&mut b, "b", m.encode());

    assert_eq!(env.num_types(), 1);
}

// ─────────────────────────────────────────────────────────────────────
// Arithmetic and locals
// ─────────────────────────────────────────────────────────────────────

#[test]
fn integer_arithmetic_matches_wasmi() {
    let mut m = TestModule::default();
    m.func(
        Some("mix32"),
        &[I32, I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Const(3),
            Instruction::I32Mul,
            Instruction::LocalGet(1),
            Instruction::I32Sub,
            Instruction::LocalGet(0),
            Instruction::I32Const(2),
            Instruction::I32ShrS,
            Instruction::I32Xor,
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::I32Rotl,
            Instruction::I32Add,
            Instruction::LocalGet(1),
            Instruction::I32Clz,
            Instruction::I32Or,
        ],
    );
    m.func(
        Some("mix64"),
        &[I64, I64],
        &[I64],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I64Mul,
            Instruction::LocalGet(0),
            Instruction::I64Const(0x1234_5678_9ABC),
            Instruction::I64And,
            Instruction::I64Add,
            Instruction::LocalGet(1),
            Instruction::I64Ctz,
            Instruction::I64ShrU,
            Instruction::LocalGet(0),
            Instruction::I32WrapI64,
            Instruction::I64ExtendI32S,
            Instruction::I64Sub,
        ],
    );
    m.func(
        Some("compare"),
        &[I32, I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32LtU,
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32GeS,
            Instruction::I32Const(2),
            Instruction::I32Shl,
            Instruction::I32Or,
        ],
    );
    let bytes = m.encode();

    let pairs32: &[&[Value]] = &[
        &[Value::I32(7), Value::I32(3)],
        &[Value::I32(-5), Value::I32(100)],
        &[Value::I32(i32::MIN), Value::I32(-1)],
        &[Value::I32(0), Value::I32(0)],
        &[Value::I32(i32::MAX), Value::I32(31)],
    ];
    differential(bytes.clone(), "mix32", pairs32);
    differential(bytes.clone(), "compare", pairs32);
    differential(
        bytes,
        "mix64",
        &[
            &[Value::I64(7), Value::I64(3)],
            &[Value::I64(-1), Value::I64(1 << 40)],
            &[Value::I64(i64::MIN), Value::I64(0)],
            &[Value::I64(0x7FFF_FFFF_FFFF), Value::I64(-9)],
        ],
    );
}

#[test]
fn float_arithmetic_and_conversions() {
    let mut m = TestModule::default();
    m.func(
        Some("hypot_ish"),
        &[F64, F64],
        &[F64],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::F64Mul,
            Instruction::LocalGet(0),
            Instruction::F64Sqrt,
            Instruction::F64Add,
        ],
    );
    m.func(
        Some("round_trip"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::F64ConvertI32S,
            Instruction::F64Const(0.5f64.into()),
            Instruction::F64Mul,
            Instruction::I32TruncF64S,
        ],
    );
    m.func(
        Some("trunc"),
        &[F64],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::I32TruncF64S],
    );
    let mut rt = runtime();
    load(&mut rt, "float", m.encode());

    assert_eq!(
        call(&mut rt, "hypot_ish", &[Value::F64(4.0), Value::F64(2.5)]).unwrap(),
        vec![Value::F64(4.0 * 2.5 + 2.0)]
    );
    assert_eq!(call(&mut rt, "round_trip", &[Value::I32(-9)]).unwrap(), vec![Value::I32(-4)]);
    assert_eq!(
        trap(call(&mut rt, "trunc", &[Value::F64(f64::NAN)])),
        Trap::InvalidConversionToInteger
    );
    assert_eq!(trap(call(&mut rt, "trunc", &[Value::F64(1e10)])), Trap::IntegerOverflow);
}

#[test]
fn integer_division_traps() {
    let mut m = TestModule::default();
    m.func(
        Some("div"),
        &[I32, I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::LocalGet(1), Instruction::I32DivS],
    );
    let mut rt = runtime();
    load(&mut rt, "div", m.encode());

    assert_eq!(call(&mut rt, "div", &[Value::I32(-9), Value::I32(2)]).unwrap(), vec![Value::I32(-4)]);
    assert_eq!(
        trap(call(&mut rt, "div", &[Value::I32(1), Value::I32(0)])),
        Trap::IntegerDivideByZero
    );
    assert_eq!(
        trap(call(&mut rt, "div", &[Value::I32(i32::MIN), Value::I32(-1)])),
        Trap::IntegerOverflow
    );
}

#[test]
fn pushed_local_keeps_its_value_after_set() {
    let mut m = TestModule::default();
    m.func(
        Some("set_after_get"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Const(7),
            Instruction::LocalSet(0),
            Instruction::LocalGet(0),
            Instruction::I32Add,
        ],
    );
    m.func(
        Some("tee_after_get"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::LocalTee(0),
            Instruction::I32Mul,
            Instruction::LocalGet(0),
            Instruction::I32Sub,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "alias", bytes.clone());
    assert_eq!(call(&mut rt, "set_after_get", &[Value::I32(5)]).unwrap(), vec![Value::I32(12)]);
    assert_eq!(call(&mut rt, "tee_after_get", &[Value::I32(5)]).unwrap(), vec![Value::I32(24)]);

    differential(bytes, "tee_after_get", &[&[Value::I32(-3)], &[Value::I32(1000)]]);
}

#[test]
fn parameters_without_locals_compile() {
    let mut m = TestModule::default();
    m.func(
        Some("inc"),
        &[I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::I32Const(1), Instruction::I32Add],
    );
    m.func(
        Some("mixed"),
        &[I64, I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32WrapI64,
            Instruction::LocalGet(1),
            Instruction::I32Sub,
        ],
    );
    let mut rt = runtime();
    load(&mut rt, "bare", m.encode());

    assert_eq!(call(&mut rt, "inc", &[Value::I32(41)]).unwrap(), vec![Value::I32(42)]);
    assert_eq!(
        call(&mut rt, "mixed", &[Value::I64(10), Value::I32(3)]).unwrap(),
        vec![Value::I32(7)]
    );
    let id = rt.find_function("inc").unwrap();
    let info = rt.function_info(id).unwrap();
    assert!(info.compiled);
    assert_eq!(info.num_locals, 0);
}

#[test]
fn pushed_local_survives_a_set_in_a_nested_block() {
    let mut m = TestModule::default();
    m.func(
        Some("block_set"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::Block(BlockType::Empty),
            Instruction::I32Const(7),
            Instruction::LocalSet(0),
            Instruction::End,
            Instruction::LocalGet(0),
            Instruction::I32Add,
        ],
    );
    // Three trips through a loop whose inner block bumps the parameter.
    m.func(
        Some("loop_block_set"),
        &[I32],
        &[I32],
        &[(1, I32)],
        &[
            Instruction::LocalGet(0),
            Instruction::Loop(BlockType::Empty),
            Instruction::Block(BlockType::Empty),
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::LocalSet(0),
            Instruction::End,
            Instruction::LocalGet(1),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::LocalTee(1),
            Instruction::I32Const(3),
            Instruction::I32LtU,
            Instruction::BrIf(0),
            Instruction::End,
            Instruction::I32Const(100),
            Instruction::I32Mul,
            Instruction::LocalGet(0),
            Instruction::I32Add,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "nested_alias", bytes.clone());
    assert_eq!(call(&mut rt, "block_set", &[Value::I32(5)]).unwrap(), vec![Value::I32(12)]);
    assert_eq!(call(&mut rt, "loop_block_set", &[Value::I32(2)]).unwrap(), vec![Value::I32(205)]);

    differential(bytes.clone(), "block_set", &[&[Value::I32(-9)], &[Value::I32(i32::MAX)]]);
    differential(bytes, "loop_block_set", &[&[Value::I32(0)], &[Value::I32(-50)]]);
}

#[test]
fn select_picks_by_condition() {
    let mut m = TestModule::default();
    m.func(
        Some("pick"),
        &[I32, I64, I64],
        &[I64],
        &[],
        &[
            Instruction::LocalGet(1),
            Instruction::LocalGet(2),
            Instruction::LocalGet(0),
            Instruction::Select,
        ],
    );
    differential(
        m.encode(),
        "pick",
        &[
            &[Value::I32(1), Value::I64(10), Value::I64(20)],
            &[Value::I32(0), Value::I64(10), Value::I64(20)],
        ],
    );
}

// ─────────────────────────────────────────────────────────────────────
// Control flow
// ─────────────────────────────────────────────────────────────────────

#[test]
fn counting_loop_matches_wasmi() {
    let mut m = TestModule::default();
    m.func(
        Some("sum_to"),
        &[I32],
        &[I32],
        &[(1, I32)],
        &[
            Instruction::Block(BlockType::Empty),
            Instruction::Loop(BlockType::Empty),
            Instruction::LocalGet(0),
            Instruction::I32Eqz,
            Instruction::BrIf(1),
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::I32Add,
            Instruction::LocalSet(1),
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Sub,
            Instruction::LocalSet(0),
            Instruction::Br(0),
            Instruction::End,
            Instruction::End,
            Instruction::LocalGet(1),
        ],
    );
    differential(
        m.encode(),
        "sum_to",
        &[&[Value::I32(0)], &[Value::I32(1)], &[Value::I32(10)], &[Value::I32(1000)]],
    );
}

#[test]
fn recursive_fibonacci_matches_wasmi() {
    let mut m = TestModule::default();
    m.func(
        Some("fib"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Const(2),
            Instruction::I32LtS,
            Instruction::If(BlockType::Result(I32)),
            Instruction::LocalGet(0),
            Instruction::Else,
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Sub,
            Instruction::Call(0),
            Instruction::LocalGet(0),
            Instruction::I32Const(2),
            Instruction::I32Sub,
            Instruction::Call(0),
            Instruction::I32Add,
            Instruction::End,
        ],
    );
    let bytes = m.encode();
    differential(
        bytes.clone(),
        "fib",
        &[&[Value::I32(0)], &[Value::I32(1)], &[Value::I32(2)], &[Value::I32(15)]],
    );

    let mut rt = runtime();
    load(&mut rt, "fib", bytes);
    assert_eq!(call(&mut rt, "fib", &[Value::I32(20)]).unwrap(), vec![Value::I32(6765)]);
}

#[test]
fn if_without_else_falls_through() {
    let mut m = TestModule::default();
    m.func(
        Some("flag"),
        &[I32],
        &[I32],
        &[(1, I32)],
        &[
            Instruction::LocalGet(0),
            Instruction::If(BlockType::Empty),
            Instruction::I32Const(9),
            Instruction::LocalSet(1),
            Instruction::End,
            Instruction::LocalGet(1),
        ],
    );
    let mut rt = runtime();
    load(&mut rt, "flag", m.encode());
    assert_eq!(call(&mut rt, "flag", &[Value::I32(3)]).unwrap(), vec![Value::I32(9)]);
    assert_eq!(call(&mut rt, "flag", &[Value::I32(0)]).unwrap(), vec![Value::I32(0)]);

    let id = rt.find_function("flag").unwrap();
    let info = rt.function_info(id).unwrap();
    assert_eq!(info.num_locals, 1);
    assert_eq!(info.hits, 2);
}

#[test]
fn branch_table_dispatches_with_default() {
    let mut m = TestModule::default();
    m.func(
        Some("switch"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::Block(BlockType::Empty),
            Instruction::Block(BlockType::Empty),
            Instruction::Block(BlockType::Empty),
            Instruction::Block(BlockType::Empty),
            Instruction::LocalGet(0),
            Instruction::BrTable(Cow::Borrowed(&[0, 1, 2]), 3),
            Instruction::End,
            Instruction::I32Const(10),
            Instruction::Return,
            Instruction::End,
            Instruction::I32Const(20),
            Instruction::Return,
            Instruction::End,
            Instruction::I32Const(30),
            Instruction::Return,
            Instruction::End,
            Instruction::I32Const(99),
        ],
    );
    differential(
        m.encode(),
        "switch",
        &[
            &[Value::I32(0)],
            &[Value::I32(1)],
            &[Value::I32(2)],
            &[Value::I32(3)],
            &[Value::I32(-1)],
        ],
    );
}

#[test]
fn block_results_flow_through_branches() {
    let mut m = TestModule::default();
    m.func(
        Some("clamp"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::Block(BlockType::Result(I32)),
            Instruction::I32Const(100),
            Instruction::LocalGet(0),
            Instruction::I32Const(100),
            Instruction::I32GtS,
            Instruction::BrIf(0),
            Instruction::Drop,
            Instruction::LocalGet(0),
            Instruction::End,
            Instruction::I32Const(1),
            Instruction::I32Add,
        ],
    );
    differential(
        m.encode(),
        "clamp",
        &[&[Value::I32(5)], &[Value::I32(100)], &[Value::I32(101)], &[Value::I32(-7)]],
    );
}

#[test]
fn both_if_arms_branch_out_with_a_value() {
    let mut m = TestModule::default();
    m.func(
        Some("pick"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::Block(BlockType::Result(I32)),
            Instruction::LocalGet(0),
            Instruction::If(BlockType::Empty),
            Instruction::I32Const(10),
            Instruction::Br(1),
            Instruction::Else,
            Instruction::I32Const(20),
            Instruction::Br(1),
            Instruction::End,
            Instruction::I32Const(30),
            Instruction::End,
            Instruction::I32Const(1),
            Instruction::I32Add,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "arms", bytes.clone());
    assert_eq!(call(&mut rt, "pick", &[Value::I32(1)]).unwrap(), vec![Value::I32(11)]);
    assert_eq!(call(&mut rt, "pick", &[Value::I32(0)]).unwrap(), vec![Value::I32(21)]);
    differential(bytes, "pick", &[&[Value::I32(-1)], &[Value::I32(0)]]);
}

#[test]
fn multi_value_blocks_match_wasmi() {
    let mut m = TestModule::default();
    let pair = m.ty(&[], &[I32, I32]);
    let swap = m.ty(&[I32, I32], &[I32, I32]);
    // Orders two values: the swapped pair leaves early when already ascending.
    m.func(
        Some("sort2"),
        &[I32, I32],
        &[I32, I32],
        &[],
        &[
            Instruction::Block(BlockType::FunctionType(pair)),
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::I32LeS,
            Instruction::BrIf(0),
            Instruction::Drop,
            Instruction::Drop,
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::End,
        ],
    );
    // The block swaps its own parameters through scratch locals.
    m.func(
        Some("swap_sub"),
        &[I32, I32],
        &[I32],
        &[(2, I32)],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::Block(BlockType::FunctionType(swap)),
            Instruction::LocalSet(2),
            Instruction::LocalSet(3),
            Instruction::LocalGet(2),
            Instruction::LocalGet(3),
            Instruction::Br(0),
            Instruction::End,
            Instruction::I32Sub,
        ],
    );
    // Loop parameters carry the Fibonacci pair between iterations.
    m.func(
        Some("fib_pair"),
        &[I32],
        &[I32],
        &[(2, I32)],
        &[
            Instruction::I32Const(0),
            Instruction::I32Const(1),
            Instruction::Loop(BlockType::FunctionType(swap)),
            Instruction::LocalSet(1),
            Instruction::LocalSet(2),
            Instruction::LocalGet(1),
            Instruction::LocalGet(2),
            Instruction::LocalGet(1),
            Instruction::I32Add,
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Sub,
            Instruction::LocalTee(0),
            Instruction::I32Const(0),
            Instruction::I32GtS,
            Instruction::BrIf(0),
            Instruction::End,
            Instruction::Drop,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "multi", bytes.clone());
    assert_eq!(
        call(&mut rt, "sort2", &[Value::I32(9), Value::I32(4)]).unwrap(),
        vec![Value::I32(4), Value::I32(9)]
    );
    assert_eq!(
        call(&mut rt, "swap_sub", &[Value::I32(3), Value::I32(10)]).unwrap(),
        vec![Value::I32(7)]
    );
    assert_eq!(call(&mut rt, "fib_pair", &[Value::I32(10)]).unwrap(), vec![Value::I32(55)]);

    differential(
        bytes.clone(),
        "sort2",
        &[&[Value::I32(1), Value::I32(2)], &[Value::I32(-5), Value::I32(-6)]],
    );
    differential(bytes.clone(), "swap_sub", &[&[Value::I32(-1), Value::I32(i32::MIN)]]);
    differential(bytes, "fib_pair", &[&[Value::I32(1)], &[Value::I32(2)], &[Value::I32(30)]]);
}

#[test]
fn if_with_parameters_and_no_else() {
    let mut m = TestModule::default();
    let unary = m.ty(&[I32], &[I32]);
    m.func(
        Some("bump_large"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(0),
            Instruction::I32Const(5),
            Instruction::I32GtS,
            Instruction::If(BlockType::FunctionType(unary)),
            Instruction::I32Const(100),
            Instruction::I32Add,
            Instruction::End,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "if_params", bytes.clone());
    assert_eq!(call(&mut rt, "bump_large", &[Value::I32(3)]).unwrap(), vec![Value::I32(3)]);
    assert_eq!(call(&mut rt, "bump_large", &[Value::I32(6)]).unwrap(), vec![Value::I32(106)]);
    differential(bytes, "bump_large", &[&[Value::I32(5)], &[Value::I32(-8)], &[Value::I32(77)]]);
}

#[test]
fn branch_table_carries_a_value() {
    let mut m = TestModule::default();
    m.func(
        Some("route"),
        &[I32],
        &[I32],
        &[],
        &[
            Instruction::Block(BlockType::Result(I32)),
            Instruction::Block(BlockType::Result(I32)),
            Instruction::I32Const(7),
            Instruction::LocalGet(0),
            Instruction::BrTable(Cow::Borrowed(&[0]), 1),
            Instruction::End,
            Instruction::I32Const(10),
            Instruction::I32Add,
            Instruction::End,
            Instruction::I32Const(1),
            Instruction::I32Add,
        ],
    );
    let bytes = m.encode();

    let mut rt = runtime();
    load(&mut rt, "table_value", bytes.clone());
    assert_eq!(call(&mut rt, "route", &[Value::I32(0)]).unwrap(), vec![Value::I32(18)]);
    assert_eq!(call(&mut rt, "route", &[Value::I32(1)]).unwrap(), vec![Value::I32(8)]);
    differential(bytes, "route", &[&[Value::I32(0)], &[Value::I32(5)], &[Value::I32(-1)]]);
}

// ─────────────────────────────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────────────────────────────

#[test]
fn memory_grow_past_maximum_fails() {
    let mut m = TestModule::default();
    m.memory = Some((1, Some(2)));
    m.func(
        Some("grow"),
        &[I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::MemoryGrow(0)],
    );
    m.func(Some("size"), &[], &[I32], &[], &[Instruction::MemorySize(0)]);
    let mut rt = runtime();
    load(&mut rt, "grow", m.encode());

    assert_eq!(rt.memory_size(), 1);
    assert_eq!(call(&mut rt, "grow", &[Value::I32(5)]).unwrap(), vec![Value::I32(-1)]);
    assert_eq!(rt.memory_size(), 1);
    assert_eq!(rt.get_memory().len(), 65_536);

    assert_eq!(call(&mut rt, "grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(1)]);
    assert_eq!(call(&mut rt, "size", &[]).unwrap(), vec![Value::I32(2)]);
    assert_eq!(call(&mut rt, "grow", &[Value::I32(1)]).unwrap(), vec![Value::I32(-1)]);
    assert_eq!(rt.memory_mut().unwrap().total_size(), 2 * 65_536);
}

#[test]
fn stores_and_loads_match_wasmi() {
    let loop_over = |body: &[Instruction<'static>]| {
        let mut out = vec![
            Instruction::I32Const(0),
            Instruction::LocalSet(1),
            Instruction::Block(BlockType::Empty),
            Instruction::Loop(BlockType::Empty),
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::I32GeU,
            Instruction::BrIf(1),
        ];
        out.extend_from_slice(body);
        out.extend([
            Instruction::LocalGet(1),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::LocalSet(1),
            Instruction::Br(0),
            Instruction::End,
            Instruction::End,
        ]);
        out
    };
    let mut body = loop_over(&[
        Instruction::LocalGet(1),
        Instruction::I32Const(4),
        Instruction::I32Mul,
        Instruction::LocalGet(1),
        Instruction::LocalGet(1),
        Instruction::I32Mul,
        Instruction::I32Store(mem(0, 2)),
    ]);
    body.extend(loop_over(&[
        Instruction::LocalGet(2),
        Instruction::LocalGet(1),
        Instruction::I32Const(4),
        Instruction::I32Mul,
        Instruction::I32Load(mem(0, 2)),
        Instruction::I32Add,
        Instruction::LocalGet(1),
        Instruction::I32Load8U(mem(1, 0)),
        Instruction::I32Add,
        Instruction::LocalSet(2),
    ]));
    body.push(Instruction::LocalGet(2));

    let mut m = TestModule::default();
    m.memory = Some((1, None));
    m.func(Some("squares"), &[I32], &[I32], &[(2, I32)], &body);
    m.func(
        Some("wide"),
        &[I64],
        &[I64],
        &[],
        &[
            Instruction::I32Const(16_380),
            Instruction::LocalGet(0),
            Instruction::I64Store(mem(0, 3)),
            Instruction::I32Const(16_380),
            Instruction::I64Load(mem(0, 3)),
            Instruction::I32Const(16_383),
            Instruction::I64Load8S(mem(0, 0)),
            Instruction::I64Add,
        ],
    );
    let bytes = m.encode();
    differential(
        bytes.clone(),
        "squares",
        &[&[Value::I32(0)], &[Value::I32(1)], &[Value::I32(100)], &[Value::I32(5000)]],
    );
    differential(
        bytes,
        "wide",
        &[&[Value::I64(-2)], &[Value::I64(0x0123_4567_89AB_CDEF)]],
    );
}

#[test]
fn out_of_bounds_access_traps() {
    let mut m = TestModule::default();
    m.memory = Some((1, None));
    m.func(
        Some("peek"),
        &[I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::I32Load(mem(0, 2))],
    );
    m.func(
        Some("fill"),
        &[I32, I32],
        &[],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Const(0xAB),
            Instruction::LocalGet(1),
            Instruction::MemoryFill(0),
        ],
    );
    let mut rt = runtime();
    load(&mut rt, "oob", m.encode());

    assert_eq!(call(&mut rt, "peek", &[Value::I32(65_532)]).unwrap(), vec![Value::I32(0)]);
    assert_eq!(trap(call(&mut rt, "peek", &[Value::I32(65_533)])), Trap::OutOfBoundsMemoryAccess);
    assert_eq!(trap(call(&mut rt, "peek", &[Value::I32(-1)])), Trap::OutOfBoundsMemoryAccess);

    call(&mut rt, "fill", &[Value::I32(10), Value::I32(4)]).unwrap();
    assert_eq!(&rt.get_memory()[9..15], &[0, 0xAB, 0xAB, 0xAB, 0xAB, 0]);
    assert_eq!(
        trap(call(&mut rt, "fill", &[Value::I32(65_530), Value::I32(7)])),
        Trap::OutOfBoundsMemoryAccess
    );
}

#[test]
fn out_of_bounds_copy_writes_nothing() {
    let mut m = TestModule::default();
    m.memory = Some((1, None));
    m.func(
        Some("fill"),
        &[I32, I32],
        &[],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Const(0x5A),
            Instruction::LocalGet(1),
            Instruction::MemoryFill(0),
        ],
    );
    m.func(
        Some("copy"),
        &[I32, I32, I32],
        &[],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::LocalGet(2),
            Instruction::MemoryCopy { src_mem: 0, dst_mem: 0 },
        ],
    );
    let mut rt = runtime();
    load(&mut rt, "copy", m.encode());
    call(&mut rt, "fill", &[Value::I32(0), Value::I32(16)]).unwrap();
    let before = rt.get_memory().to_vec();

    // Destination runs past the end.
    assert_eq!(
        trap(call(&mut rt, "copy", &[Value::I32(65_530), Value::I32(0), Value::I32(10)])),
        Trap::OutOfBoundsMemoryAccess
    );
    // Source runs past the end.
    assert_eq!(
        trap(call(&mut rt, "copy", &[Value::I32(100), Value::I32(65_530), Value::I32(10)])),
        Trap::OutOfBoundsMemoryAccess
    );
    assert!(rt.get_memory() == before);

    assert_eq!(rt.memory_mut().unwrap().total_size(), 65_536);
    call(&mut rt, "copy", &[Value::I32(65_536), Value::I32(0), Value::I32(0)]).unwrap();
    call(&mut rt, "copy", &[Value::I32(0), Value::I32(65_536), Value::I32(0)]).unwrap();
    call(&mut rt, "fill", &[Value::I32(65_536), Value::I32(0)]).unwrap();
    assert_eq!(
        trap(call(&mut rt, "copy", &[Value::I32(65_537), Value::I32(0), Value::I32(0)])),
        Trap::OutOfBoundsMemoryAccess
    );

    call(&mut rt, "copy", &[Value::I32(65_530), Value::I32(0), Value::I32(6)]).unwrap();
    assert_eq!(&rt.get_memory()[65_528..], &[0, 0, 0x5A, 0x5A, 0x5A, 0x5A, 0x5A, 0x5A]);
}

// ─────────────────────────────────────────────────────────────────────
// Globals, start functions and tables
// ─────────────────────────────────────────────────────────────────────

#[test]
fn start_function_runs_before_first_lookup() {
    let mut m = TestModule::default();
    let counter = m.global(I32, true, ConstExpr::i32_const(5), Some("counter"));
    m.global(I64, false, ConstExpr::i64_const(9), Some("limit"));
    let start = m.func(
        None,
        &[],
        &[],
        &[],
        &[
            Instruction::GlobalGet(counter),
            Instruction::I32Const(2),
            Instruction::I32Mul,
            Instruction::GlobalSet(counter),
        ],
    );
    m.func(Some("get"), &[], &[I32], &[], &[Instruction::GlobalGet(counter)]);
    m.start = Some(start);
    let mut rt = runtime();
    load(&mut rt, "globals", m.encode());

    assert_eq!(rt.get_global("counter").unwrap(), Value::I32(5));
    assert_eq!(call(&mut rt, "get", &[]).unwrap(), vec![Value::I32(10)]);
    assert_eq!(rt.get_global("counter").unwrap(), Value::I32(10));

    rt.set_global("counter", Value::I32(3)).unwrap();
    assert_eq!(call(&mut rt, "get", &[]).unwrap(), vec![Value::I32(3)]);

    assert!(matches!(rt.set_global("counter", Value::I64(3)), Err(Error::ArgumentMismatch(_))));
    assert!(matches!(rt.set_global("limit", Value::I64(1)), Err(Error::ArgumentMismatch(_))));
    assert_eq!(rt.get_global("limit").unwrap(), Value::I64(9));
}

#[test]
fn indirect_calls_check_table_and_type() {
    let mut m = TestModule::default();
    let double = m.func(
        None,
        &[I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::I32Const(2), Instruction::I32Mul],
    );
    let triple = m.func(
        None,
        &[I32],
        &[I32],
        &[],
        &[Instruction::LocalGet(0), Instruction::I32Const(3), Instruction::I32Mul],
    );
    let answer = m.func(None, &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let unary = m.ty(&[I32], &[I32]);
    m.func(
        Some("dispatch"),
        &[I32, I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(1),
            Instruction::LocalGet(0),
            Instruction::CallIndirect {
                type_index: unary,
                table_index: 0,
            },
        ],
    );
    m.table = Some((4, vec![double, triple, answer]));
    let mut rt = runtime();
    load(&mut rt, "table", m.encode());

    let dispatch = |rt: &mut Runtime, index: i32| call(rt, "dispatch", &[Value::I32(index), Value::I32(5)]);
    assert_eq!(dispatch(&mut rt, 0).unwrap(), vec![Value::I32(10)]);
    assert_eq!(dispatch(&mut rt, 1).unwrap(), vec![Value::I32(15)]);
    assert_eq!(trap(dispatch(&mut rt, 2)), Trap::IndirectCallTypeMismatch);
    assert_eq!(trap(dispatch(&mut rt, 3)), Trap::TableElementIsNull);
    assert_eq!(trap(dispatch(&mut rt, 9)), Trap::TableIndexOutOfRange);
}

// ─────────────────────────────────────────────────────────────────────
// Host functions
// ─────────────────────────────────────────────────────────────────────

fn host_module() -> Vec<u8> {
    let mut m = TestModule::default();
    let add = m.import("env", "add", &[I32, I32], &[I32]);
    m.func(
        Some("add_one"),
        &[I32, I32],
        &[I32],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::LocalGet(1),
            Instruction::Call(add),
            Instruction::I32Const(1),
            Instruction::I32Add,
        ],
    );
    m.encode()
}

#[test]
fn host_function_round_trip() {
    let mut rt = runtime();
    load(&mut rt, "host", host_module());
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    rt.link_function("env", "add", "i(ii)", move |ctx| {
        seen.set(seen.get() + 1);
        let a = ctx.arg_i32(0)?;
        let b = ctx.arg_i32(1)?;
        ctx.set_result(0, Value::I32(a.wrapping_add(b)))
    })
    .unwrap();

    assert_eq!(
        call(&mut rt, "add_one", &[Value::I32(40), Value::I32(1)]).unwrap(),
        vec![Value::I32(42)]
    );
    assert_eq!(calls.get(), 1);
}

#[test]
fn host_traps_propagate_with_their_message() {
    let mut rt = runtime();
    load(&mut rt, "host", host_module());
    rt.link_function("env", "add", "i(ii)", |_| Err(Trap::Host("refused".into())))
        .unwrap();
    assert_eq!(
        trap(call(&mut rt, "add_one", &[Value::I32(1), Value::I32(2)])),
        Trap::Host("refused".into())
    );
}

#[test]
fn linking_checks_name_and_signature() {
    let mut rt = runtime();
    load(&mut rt, "host", host_module());

    let err = rt.link_function("env", "add", "I(ii)", |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::SignatureMismatch { .. })), "{err}");
    let err = rt.link_function("env", "sub", "i(ii)", |_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::FunctionNotFound { .. })), "{err}");
}

#[test]
fn missing_import_can_be_linked_and_retried() {
    let mut rt = runtime();
    load(&mut rt, "host", host_module());

    let first = trap(call(&mut rt, "add_one", &[Value::I32(1), Value::I32(2)]));
    assert_eq!(first, Trap::CompileFailed(CompileError::ImportMissing("env.add".into())));
    // The caller compiled; only the call into the import failed.
    let caller = rt.find_function("add_one").unwrap();
    assert!(rt.function_info(caller).unwrap().compiled);

    rt.link_function("env", "add", "i(ii)", |ctx| {
        let sum = ctx.arg_i32(0)? * 10 + ctx.arg_i32(1)?;
        ctx.set_result(0, Value::I32(sum))
    })
    .unwrap();
    assert_eq!(
        call(&mut rt, "add_one", &[Value::I32(1), Value::I32(2)]).unwrap(),
        vec![Value::I32(13)]
    );
}

// ─────────────────────────────────────────────────────────────────────
// Compile errors
// ─────────────────────────────────────────────────────────────────────

#[test]
fn post_mvp_opcodes_are_rejected_at_compile_time() {
    let mut m = TestModule::default();
    m.table = Some((1, vec![]));
    m.func(Some("size"), &[], &[I32], &[], &[Instruction::TableSize(0)]);
    let mut rt = runtime();
    load(&mut rt, "tables", m.encode());

    let id = rt.find_function("size").unwrap();
    let err = rt.call(id, &[]).unwrap_err();
    assert!(
        matches!(err, Error::Compile(CompileError::NoCompilerForOpcode(op)) if op == opcode::TABLE_SIZE),
        "{err}"
    );
    assert!(!rt.function_info(id).unwrap().compiled);
}

// ─────────────────────────────────────────────────────────────────────
// Traps, backtraces and yielding
// ─────────────────────────────────────────────────────────────────────

fn countdown_module() -> Vec<u8> {
    let mut m = TestModule::default();
    m.func(
        Some("countdown"),
        &[I32],
        &[],
        &[],
        &[
            Instruction::LocalGet(0),
            Instruction::I32Eqz,
            Instruction::If(BlockType::Empty),
            Instruction::Unreachable,
            Instruction::End,
            Instruction::LocalGet(0),
            Instruction::I32Const(1),
            Instruction::I32Sub,
            Instruction::Call(0),
        ],
    );
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    m.encode()
}

#[test]
fn backtrace_records_each_frame() {
    let mut rt = runtime();
    load(&mut rt, "trace", countdown_module());

    let err = call(&mut rt, "countdown", &[Value::I32(2)]).unwrap_err();
    let Error::Trap(err) = err else {
        panic!("expected a trap, got {err:?}");
    };
    assert_eq!(err.trap, Trap::Unreachable);
    assert_eq!(err.backtrace.frames.len(), 3);
    assert!(!err.backtrace.truncated);
    assert_eq!(&err.backtrace, rt.last_backtrace());

    let innermost = &err.backtrace.frames[0];
    assert_eq!(innermost.function_name, "countdown");
    assert_eq!(innermost.module, "trace");
    assert!(innermost.module_offset > 0);
    // Every call site is the same `call` instruction.
    assert_eq!(err.backtrace.frames[1], err.backtrace.frames[2]);
    assert!(err.backtrace.frames[1].module_offset > innermost.module_offset);
}

#[test]
fn backtrace_stops_at_the_limit() {
    let config = EngineConfig::from_json(r#"{ "backtrace_limit": 3 }"#).unwrap();
    let mut rt = Runtime::new(&Environment::new(), config).unwrap();
    load(&mut rt, "trace", countdown_module());

    let err = call(&mut rt, "countdown", &[Value::I32(10)]).unwrap_err();
    let Error::Trap(err) = err else {
        panic!("expected a trap, got {err:?}");
    };
    assert_eq!(err.backtrace.frames.len(), 3);
    assert!(err.backtrace.truncated);
}

#[test]
fn runaway_recursion_is_a_stack_overflow() {
    let config = EngineConfig {
        max_call_depth: 200,
        ..EngineConfig::default()
    };
    let mut rt = Runtime::new(&Environment::new(), config).unwrap();
    let mut m = TestModule::default();
    m.func(Some("forever"), &[], &[], &[], &[Instruction::Call(0)]);
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    load(&mut rt, "forever", m.encode());

    assert_eq!(trap(call(&mut rt, "forever", &[])), Trap::StackOverflow);
    assert!(rt.last_backtrace().truncated);
    assert_eq!(call(&mut rt, "answer", &[]).unwrap(), vec![Value::I32(42)]);
}

#[test]
fn value_stack_exhaustion_is_a_stack_overflow() {
    let config = EngineConfig {
        stack_size: 1024,
        ..EngineConfig::default()
    };
    let mut rt = Runtime::new(&Environment::new(), config).unwrap();
    load(&mut rt, "trace", {
        let mut m = TestModule::default();
        m.func(
            Some("deep"),
            &[I64],
            &[I64],
            &[(4, I64)],
            &[
                Instruction::LocalGet(0),
                Instruction::I64Eqz,
                Instruction::If(BlockType::Result(I64)),
                Instruction::I64Const(0),
                Instruction::Else,
                Instruction::LocalGet(0),
                Instruction::I64Const(1),
                Instruction::I64Sub,
                Instruction::Call(0),
                Instruction::I64Const(1),
                Instruction::I64Add,
                Instruction::End,
            ],
        );
        m.encode()
    });

    assert_eq!(call(&mut rt, "deep", &[Value::I64(3)]).unwrap(), vec![Value::I64(3)]);
    assert_eq!(trap(call(&mut rt, "deep", &[Value::I64(1000)])), Trap::StackOverflow);
}

#[test]
fn yield_hook_stops_an_endless_loop() {
    let mut m = TestModule::default();
    m.func(
        Some("spin"),
        &[],
        &[],
        &[],
        &[
            Instruction::Loop(BlockType::Empty),
            Instruction::Br(0),
            Instruction::End,
        ],
    );
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let mut rt = runtime();
    load(&mut rt, "spin", m.encode());

    let mut polls = 0;
    rt.set_yield_hook(move || {
        polls += 1;
        if polls > 1_000 { 7 } else { 0 }
    });
    assert_eq!(trap(call(&mut rt, "spin", &[])), Trap::Yielded(7));

    rt.clear_yield_hook();
    assert_eq!(call(&mut rt, "answer", &[]).unwrap(), vec![Value::I32(42)]);
}

// ─────────────────────────────────────────────────────────────────────
// Ownership and code page reuse
// ─────────────────────────────────────────────────────────────────────

#[test]
fn module_links_into_one_runtime_at_a_time() {
    let env = Environment::new();
    let mut m = TestModule::default();
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let module = Rc::new(Module::parse("shared", m.encode()).unwrap());

    let mut first = Runtime::new(&env, EngineConfig::default()).unwrap();
    let mut second = Runtime::new(&env, EngineConfig::default()).unwrap();
    first.load(Rc::clone(&module)).unwrap();

    let err = second.load(Rc::clone(&module)).unwrap_err();
    assert!(matches!(err, Error::Link(LinkError::AlreadyLinked(ref name)) if name == "shared"), "{err}");

    drop(first);
    assert!(!module.is_linked());
    second.load(module).unwrap();
    assert_eq!(call(&mut second, "answer", &[]).unwrap(), vec![Value::I32(42)]);
}

#[test]
fn failed_load_releases_the_module() {
    let mut m = TestModule::default();
    m.memory = Some((2, None));
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let module = Rc::new(Module::parse("big", m.encode()).unwrap());

    let config = EngineConfig {
        max_memory_pages: 1,
        ..EngineConfig::default()
    };
    let mut rt = Runtime::new(&Environment::new(), config).unwrap();
    assert!(matches!(rt.load(Rc::clone(&module)), Err(Error::Link(LinkError::Unsupported(_)))));
    assert!(!module.is_linked());
    assert_eq!(rt.num_functions(), 0);
}

#[test]
fn dropped_runtime_hands_code_pages_back() {
    let env = Environment::new();
    let mut m = TestModule::default();
    m.func(Some("answer"), &[], &[I32], &[], &[Instruction::I32Const(42)]);
    let bytes = m.encode();

    let mut first = Runtime::new(&env, EngineConfig::default()).unwrap();
    load(&mut first, "a", bytes.clone());
    call(&mut first, "answer", &[]).unwrap();
    drop(first);
    let released = env.released_pages();
    assert!(released > 0);

    let mut second = Runtime::new(&env, EngineConfig::default()).unwrap();
    load(&mut second, "b", bytes);
    assert_eq!(call(&mut second, "answer", &[]).unwrap(), vec![Value::I32(42)]);
    assert_eq!(env.released_pages(), released - 1);
}
