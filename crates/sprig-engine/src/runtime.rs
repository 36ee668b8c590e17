//! The runtime: loaded modules, their functions and globals, linear memory
//! and the private heap that holds the value stack and constant tables.

use std::rc::Rc;

use sprig_memory::{MemoryConfig, Offset, SegmentedMemory};
use sprig_module::{ExportKind, InitExpr, Module};
use sprig_types::{same_type, FuncType, Value};

use crate::backtrace::{Backtrace, BacktraceFrame};
use crate::code::{CodeSpace, Pc};
use crate::compile;
use crate::config::EngineConfig;
use crate::environment::Environment;
use crate::error::{CompileError, EngineResult, Error, LinkError, RuntimeError, Trap};
use crate::exec::{Machine, Unwind};
use crate::function::{FuncId, Function, FunctionInfo, FunctionKind, Global, Instance, ModuleId};
use crate::host::HostContext;

/// Pages of 64 KiB a 32-bit linear memory can hold.
const MAX_WASM_PAGES: u32 = 65_536;

/// Owns everything one embedding thread runs guest code with.
///
/// Modules are loaded with [`Runtime::load`], host functions bound with
/// [`Runtime::link_function`] and exports run with [`Runtime::call`].
/// Functions compile lazily on their first call unless compiled up front
/// with [`Runtime::compile`].
pub struct Runtime {
    pub(crate) env: Environment,
    pub(crate) config: EngineConfig,
    pub(crate) code: CodeSpace,
    /// Private heap: the value stack and constant tables.
    pub(crate) heap: SegmentedMemory,
    pub(crate) stack: Offset,
    pub(crate) stack_slots: u32,
    /// Guest linear memory, shared by every loaded module that declares one.
    pub(crate) memory: Option<SegmentedMemory>,
    pub(crate) functions: Vec<Function>,
    pub(crate) instances: Vec<Instance>,
    pub(crate) globals: Vec<Global>,
    pub(crate) yield_hook: Option<Box<dyn FnMut() -> u32>>,
    pub(crate) backtrace: Backtrace,
}

impl Runtime {
    pub fn new(env: &Environment, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let mut heap = SegmentedMemory::new(config.heap_config())?;
        let stack = heap.malloc(config.stack_size as usize)?;
        let code = CodeSpace::new(config.code_page_lines, config.max_code_pages);
        tracing::debug!(
            target: "sprig.exec",
            stack_size = config.stack_size,
            %stack,
            "runtime created"
        );
        Ok(Self {
            env: env.clone(),
            stack_slots: config.stack_slots(),
            config,
            code,
            heap,
            stack,
            memory: None,
            functions: Vec::new(),
            instances: Vec::new(),
            globals: Vec::new(),
            yield_hook: None,
            backtrace: Backtrace::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Loading
    // ══════════════════════════════════════════════════════════════════════════

    /// Instantiate `module`: create its functions and globals, its linear
    /// memory and table, and apply its data and element segments.
    ///
    /// Nothing is committed unless every step succeeds. A module may be
    /// loaded into one runtime at a time.
    pub fn load(&mut self, module: Rc<Module>) -> EngineResult<ModuleId> {
        if !module.claim() {
            return Err(LinkError::AlreadyLinked(module.name().to_string()).into());
        }
        match self.instantiate(&module) {
            Ok(id) => {
                tracing::info!(
                    target: "sprig.module",
                    module = module.name(),
                    fingerprint = %module.short_fingerprint(),
                    functions = module.functions().len(),
                    "module linked"
                );
                Ok(id)
            }
            Err(err) => {
                module.release();
                tracing::debug!(target: "sprig.module", module = module.name(), %err, "load failed");
                Err(err)
            }
        }
    }

    fn instantiate(&mut self, module: &Rc<Module>) -> EngineResult<ModuleId> {
        let id = ModuleId(self.instances.len() as u32);
        let types: Vec<Rc<FuncType>> = module
            .types()
            .iter()
            .map(|ty| self.env.intern(ty.clone()))
            .collect();

        let first_function = self.functions.len() as u32;
        let mut functions = Vec::with_capacity(module.functions().len());
        for (index, decl) in module.functions().iter().enumerate() {
            let ty = types
                .get(decl.type_index as usize)
                .cloned()
                .ok_or(CompileError::TypeIndexOutOfBounds(decl.type_index))?;
            let (kind, name) = match (&decl.body, &decl.import) {
                (_, Some(import)) => (FunctionKind::Import(import.clone()), import.to_string()),
                (Some(body), None) => {
                    let name = decl
                        .export_names
                        .first()
                        .cloned()
                        .unwrap_or_else(|| format!("${index}"));
                    (FunctionKind::Wasm(body.clone()), name)
                }
                (None, None) => return Err(CompileError::MissingBody.into()),
            };
            functions.push(Function::new(id, index as u32, name, ty, kind));
        }
        let function_ids: Vec<FuncId> = (0..functions.len() as u32)
            .map(|i| FuncId(first_function + i))
            .collect();

        let first_global = self.globals.len() as u32;
        let mut globals: Vec<Global> = Vec::with_capacity(module.globals().len());
        for decl in module.globals() {
            let bits = eval_init(decl.init, &globals)?;
            globals.push(Global {
                ty: decl.ty,
                mutable: decl.mutable,
                bits,
            });
        }

        let mut memory = match module.memory() {
            Some(_) if self.memory.is_some() => {
                return Err(LinkError::Unsupported("a second linear memory".into()).into());
            }
            Some(limits) => {
                let max_pages = limits
                    .maximum
                    .unwrap_or(MAX_WASM_PAGES)
                    .min(self.config.max_memory_pages);
                if limits.initial > max_pages {
                    return Err(LinkError::Unsupported(format!(
                        "initial memory of {} pages exceeds the limit of {max_pages}",
                        limits.initial
                    ))
                    .into());
                }
                let config = MemoryConfig::linear(self.config.memory_segment_size, limits.initial, max_pages);
                Some(SegmentedMemory::new(config)?)
            }
            None => None,
        };
        if let Some(memory) = memory.as_mut() {
            for segment in module.data() {
                let start = u64::from(eval_offset(segment.offset, &globals)?);
                let end = start + segment.bytes.len() as u64;
                if end > memory.total_size() {
                    return Err(LinkError::DataOutOfBounds.into());
                }
                memory.write(Offset::try_from(start)?, &segment.bytes)?;
            }
        } else if !module.data().is_empty() {
            return Err(LinkError::DataOutOfBounds.into());
        }

        let mut table = vec![None; module.table().map_or(0, |t| t.initial as usize)];
        for segment in module.elements() {
            let start = eval_offset(segment.offset, &globals)? as usize;
            let end = start + segment.functions.len();
            if end > table.len() {
                return Err(LinkError::ElementOutOfBounds.into());
            }
            for (slot, function) in table[start..end].iter_mut().zip(&segment.functions) {
                *slot = match function {
                    Some(index) => Some(
                        *function_ids
                            .get(*index as usize)
                            .ok_or(CompileError::FunctionLookupFailed(*index))?,
                    ),
                    None => None,
                };
            }
        }

        let start = match module.start() {
            Some(index) => Some(
                *function_ids
                    .get(index as usize)
                    .ok_or(CompileError::FunctionLookupFailed(index))?,
            ),
            None => None,
        };

        self.functions.extend(functions);
        self.globals.extend(globals);
        if memory.is_some() {
            self.memory = memory;
        }
        self.instances.push(Instance {
            module: Rc::clone(module),
            types,
            functions: function_ids,
            globals: (first_global..self.globals.len() as u32).collect(),
            table,
            start,
        });
        Ok(id)
    }

    /// Bind a host function to every unlinked import named
    /// `module_name.name`. The signature uses the compact notation of
    /// [`FuncType::from_signature`] and must match the import's type.
    pub fn link_function<F>(&mut self, module_name: &str, name: &str, signature: &str, handler: F) -> EngineResult<()>
    where
        F: Fn(&mut HostContext<'_>) -> Result<(), Trap> + 'static,
    {
        let ty = self.env.intern_signature(signature)?;
        let handler: Rc<crate::function::HostHandler> = Rc::new(handler);
        let mut linked = 0;
        for function in &mut self.functions {
            let FunctionKind::Import(import) = &function.kind else {
                continue;
            };
            if import.module != module_name || import.name != name {
                continue;
            }
            if !same_type(&function.ty, &ty) {
                return Err(LinkError::SignatureMismatch {
                    name: import.to_string(),
                    expected: function.ty.to_string(),
                    found: ty.to_string(),
                }
                .into());
            }
            function.kind = FunctionKind::Host(Rc::clone(&handler));
            linked += 1;
        }
        if linked == 0 {
            return Err(LinkError::FunctionNotFound {
                module: module_name.to_string(),
                name: name.to_string(),
            }
            .into());
        }
        tracing::debug!(target: "sprig.module", module = module_name, name, signature, linked, "host function linked");
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Lookup
    // ══════════════════════════════════════════════════════════════════════════

    /// Find an exported function by name, searching modules in load order.
    ///
    /// Pending start functions run first; a failing start function is
    /// reported here.
    pub fn find_function(&mut self, name: &str) -> EngineResult<FuncId> {
        self.run_pending_starts()?;
        self.instances
            .iter()
            .find_map(|instance| {
                instance
                    .module
                    .find_export(name, ExportKind::Function)
                    .and_then(|index| instance.functions.get(index as usize).copied())
            })
            .ok_or_else(|| Error::NotFound(format!("function '{name}'")))
    }

    fn run_pending_starts(&mut self) -> EngineResult<()> {
        for i in 0..self.instances.len() {
            if let Some(start) = self.instances[i].start.take() {
                tracing::debug!(target: "sprig.module", module = self.instances[i].module.name(), "running start function");
                self.call(start, &[])?;
            }
        }
        Ok(())
    }

    pub fn function_info(&self, id: FuncId) -> Option<FunctionInfo> {
        self.functions.get(id.index()).map(|f| FunctionInfo {
            name: f.name.clone(),
            signature: f.ty.to_string(),
            compiled: f.is_compiled(),
            hits: f.hits,
            max_stack_slots: f.max_stack_slots,
            num_locals: f.num_locals,
        })
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// The module behind a loaded instance.
    pub fn module(&self, id: ModuleId) -> Option<&Rc<Module>> {
        self.instances.get(id.index()).map(|i| &i.module)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Compiling and calling
    // ══════════════════════════════════════════════════════════════════════════

    /// Compile `id` now instead of on its first call. Compiling twice is a
    /// no-op; a failed compile may be retried.
    pub fn compile(&mut self, id: FuncId) -> EngineResult<()> {
        compile::compile_function(self, id)?;
        Ok(())
    }

    /// Call `id` with `args` and return its results.
    ///
    /// A trap comes back as [`Error::Trap`] carrying the backtrace, except
    /// allocation failures, which are [`Error::Allocation`].
    pub fn call(&mut self, id: FuncId, args: &[Value]) -> EngineResult<Vec<Value>> {
        let function = self
            .functions
            .get(id.index())
            .ok_or_else(|| Error::NotFound(format!("function #{}", id.index())))?;
        let ty = Rc::clone(&function.ty);
        check_args(&function.name, &ty, args)?;

        let entry = compile::compile_function(self, id)?;
        let num_results = ty.num_results();
        let frame_slots = 2 * (num_results + ty.num_params()) as u64;
        if frame_slots > u64::from(self.stack_slots) {
            return Err(self.trap(Trap::StackOverflow));
        }
        for (j, arg) in args.iter().enumerate() {
            self.write_slot(2 * (num_results + j), *arg)?;
        }

        self.backtrace = Backtrace::default();
        tracing::trace!(target: "sprig.exec", function = %self.functions[id.index()].name, "call");
        let mut machine = Machine {
            rt: self,
            sp: 0,
            r0: 0,
            fp0: 0,
            depth: 0,
        };
        let outcome = machine.invoke(entry, 0);
        match outcome {
            Ok(()) => {}
            Err(Unwind::Trap(trap)) | Err(Unwind::Trapped(trap)) => return Err(self.trap(trap)),
            Err(Unwind::Return) | Err(Unwind::ContinueLoop(_)) => return Err(self.trap(Trap::CorruptCode)),
        }

        ty.results()
            .iter()
            .enumerate()
            .map(|(i, &result)| self.read_slot(2 * i, result))
            .collect()
    }

    fn trap(&mut self, trap: Trap) -> Error {
        tracing::debug!(
            target: "sprig.exec",
            %trap,
            frames = self.backtrace.frames.len(),
            truncated = self.backtrace.truncated,
            "call trapped"
        );
        match trap {
            Trap::AllocationFailed(err) => Error::Allocation(err),
            trap => Error::Trap(RuntimeError {
                trap,
                backtrace: self.backtrace.clone(),
            }),
        }
    }

    fn slot_offset(&self, slot: usize) -> EngineResult<Offset> {
        Ok(self.stack.add(slot as u32 * 4)?)
    }

    fn write_slot(&mut self, slot: usize, value: Value) -> EngineResult<()> {
        let at = self.slot_offset(slot)?;
        let bits = value.to_bits();
        if value.ty().is_64bit() {
            self.heap.write_array(at, bits.to_le_bytes())?;
        } else {
            self.heap.write_array(at, (bits as u32).to_le_bytes())?;
        }
        Ok(())
    }

    fn read_slot(&mut self, slot: usize, ty: sprig_types::ValueType) -> EngineResult<Value> {
        let at = self.slot_offset(slot)?;
        let bits = if ty.is_64bit() {
            u64::from_le_bytes(self.heap.read_array::<8>(at)?)
        } else {
            u64::from(u32::from_le_bytes(self.heap.read_array::<4>(at)?))
        };
        Ok(Value::from_bits(ty, bits))
    }

    /// Frames recorded by the last call that trapped.
    pub fn last_backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Record the frame of the operation at `pc` while a trap unwinds.
    pub(crate) fn record_frame(&mut self, pc: Pc) {
        let limit = self.config.backtrace_limit;
        let Some(mapping) = self.code.locate(pc) else {
            self.backtrace.mark_truncated();
            return;
        };
        let Some(function) = self.functions.get(mapping.function.index()) else {
            self.backtrace.mark_truncated();
            return;
        };
        let Some(instance) = self.instances.get(function.module.index()) else {
            self.backtrace.mark_truncated();
            return;
        };
        let frame = BacktraceFrame {
            function_index: function.index,
            function_name: function.name.clone(),
            module: instance.module.name().to_string(),
            fingerprint: instance.module.short_fingerprint(),
            module_offset: mapping.module_offset,
        };
        self.backtrace.push(frame, limit);
    }

    /// Poll `hook` before every operation. A non-zero return stops the
    /// running call with [`Trap::Yielded`].
    pub fn set_yield_hook(&mut self, hook: impl FnMut() -> u32 + 'static) {
        self.yield_hook = Some(Box::new(hook));
    }

    pub fn clear_yield_hook(&mut self) {
        self.yield_hook = None;
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Globals and memory
    // ══════════════════════════════════════════════════════════════════════════

    fn find_global(&self, name: &str) -> EngineResult<usize> {
        self.instances
            .iter()
            .find_map(|instance| {
                instance
                    .module
                    .find_export(name, ExportKind::Global)
                    .and_then(|index| instance.globals.get(index as usize).copied())
            })
            .map(|g| g as usize)
            .ok_or_else(|| Error::NotFound(format!("global '{name}'")))
    }

    /// Current value of an exported global.
    pub fn get_global(&self, name: &str) -> EngineResult<Value> {
        let global = &self.globals[self.find_global(name)?];
        Ok(Value::from_bits(global.ty, global.bits))
    }

    /// Overwrite an exported mutable global.
    pub fn set_global(&mut self, name: &str, value: Value) -> EngineResult<()> {
        let index = self.find_global(name)?;
        let global = &mut self.globals[index];
        if !global.mutable {
            return Err(Error::ArgumentMismatch(format!("global '{name}' is immutable")));
        }
        if global.ty != value.ty() {
            return Err(Error::ArgumentMismatch(format!(
                "global '{name}' is {}, got {}",
                global.ty,
                value.ty()
            )));
        }
        global.bits = value.to_bits();
        Ok(())
    }

    /// Linear memory size in pages; zero without a memory.
    pub fn memory_size(&self) -> u32 {
        self.memory.as_ref().map_or(0, SegmentedMemory::pages)
    }

    pub fn memory_mut(&mut self) -> Option<&mut SegmentedMemory> {
        self.memory.as_mut()
    }

    /// A contiguous copy of linear memory; empty without a memory.
    pub fn get_memory(&self) -> Vec<u8> {
        self.memory.as_ref().map_or_else(Vec::new, SegmentedMemory::snapshot)
    }

    /// The private heap holding the value stack and constant tables.
    pub fn heap(&self) -> &SegmentedMemory {
        &self.heap
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for instance in &self.instances {
            instance.module.release();
        }
        tracing::debug!(target: "sprig.module", pages = self.code.num_pages(), "runtime dropped");
        self.env.release_pages(self.code.drain());
    }
}

fn check_args(name: &str, ty: &FuncType, args: &[Value]) -> EngineResult<()> {
    if args.len() != ty.num_params() {
        return Err(Error::ArgumentMismatch(format!(
            "{name} takes {} arguments, got {}",
            ty.num_params(),
            args.len()
        )));
    }
    for (i, (arg, &param)) in args.iter().zip(ty.params()).enumerate() {
        if arg.ty() != param {
            return Err(Error::ArgumentMismatch(format!(
                "argument {i} of {name} must be {param}, got {}",
                arg.ty()
            )));
        }
    }
    Ok(())
}

/// Raw bits of a constant initializer. `global.get` reads a global of the
/// same module defined earlier.
fn eval_init(init: InitExpr, globals: &[Global]) -> Result<u64, LinkError> {
    match init {
        InitExpr::I32(v) => Ok(u64::from(v as u32)),
        InitExpr::I64(v) => Ok(v as u64),
        InitExpr::F32(bits) => Ok(u64::from(bits)),
        InitExpr::F64(bits) => Ok(bits),
        InitExpr::GlobalGet(index) => globals
            .get(index as usize)
            .map(|g| g.bits)
            .ok_or(LinkError::InvalidInitializer),
        InitExpr::RefNull | InitExpr::RefFunc(_) => Err(LinkError::InvalidInitializer),
    }
}

fn eval_offset(init: InitExpr, globals: &[Global]) -> Result<u32, LinkError> {
    match init {
        InitExpr::I32(_) | InitExpr::GlobalGet(_) => Ok(eval_init(init, globals)? as u32),
        _ => Err(LinkError::InvalidInitializer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_types::ValueType;

    #[test]
    fn initializers_read_earlier_globals() {
        let globals = vec![Global {
            ty: ValueType::I32,
            mutable: false,
            bits: 16,
        }];
        assert_eq!(eval_offset(InitExpr::GlobalGet(0), &globals), Ok(16));
        assert_eq!(eval_init(InitExpr::I32(-1), &globals), Ok(0xFFFF_FFFF));
        assert_eq!(eval_init(InitExpr::GlobalGet(3), &globals), Err(LinkError::InvalidInitializer));
        assert_eq!(eval_offset(InitExpr::F64(0), &globals), Err(LinkError::InvalidInitializer));
    }

    #[test]
    fn argument_checks_name_the_function() {
        let ty = FuncType::new(vec![ValueType::I32], vec![]);
        let err = check_args("f", &ty, &[Value::I64(1)]).unwrap_err();
        assert!(err.to_string().contains("argument 0 of f"), "{err}");
        assert!(check_args("f", &ty, &[]).is_err());
        assert!(check_args("f", &ty, &[Value::I32(1)]).is_ok());
    }
}
