//! Per-runtime records for functions, module instances and globals.

use std::fmt;
use std::rc::Rc;

use sprig_memory::Offset;
use sprig_module::{FunctionBody, ImportName, Module};
use sprig_types::{FuncType, ValueType};

use crate::code::Pc;
use crate::error::Trap;
use crate::host::HostContext;

/// Index of a function in its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub(crate) u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a loaded module in its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A host function body. Reads its arguments from and writes its results to
/// the [`HostContext`].
pub type HostHandler = dyn Fn(&mut HostContext<'_>) -> Result<(), Trap>;

#[derive(Clone)]
pub(crate) enum FunctionKind {
    Wasm(FunctionBody),
    /// An import nothing has been linked to yet.
    Import(ImportName),
    Host(Rc<HostHandler>),
}

impl fmt::Debug for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::Wasm(body) => write!(f, "Wasm({:?})", body.range),
            FunctionKind::Import(name) => write!(f, "Import({name})"),
            FunctionKind::Host(_) => f.write_str("Host"),
        }
    }
}

/// The constant table of a compiled function, kept in the private heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConstantTable {
    pub(crate) offset: Offset,
    /// Byte length.
    pub(crate) len: u32,
}

#[derive(Debug)]
pub(crate) struct Function {
    pub(crate) module: ModuleId,
    /// Index in the module's function space.
    pub(crate) index: u32,
    pub(crate) name: String,
    pub(crate) ty: Rc<FuncType>,
    pub(crate) kind: FunctionKind,
    pub(crate) compiled: Option<Pc>,
    pub(crate) max_stack_slots: u16,
    pub(crate) num_ret_and_arg_slots: u16,
    pub(crate) num_locals: u32,
    pub(crate) num_local_bytes: u32,
    pub(crate) constants: Option<ConstantTable>,
    /// Entries since load.
    pub(crate) hits: u64,
}

impl Function {
    pub(crate) fn new(module: ModuleId, index: u32, name: String, ty: Rc<FuncType>, kind: FunctionKind) -> Self {
        Self {
            module,
            index,
            name,
            ty,
            kind,
            compiled: None,
            max_stack_slots: 0,
            num_ret_and_arg_slots: 0,
            num_locals: 0,
            num_local_bytes: 0,
            constants: None,
            hits: 0,
        }
    }

    pub(crate) fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Global {
    pub(crate) ty: ValueType,
    pub(crate) mutable: bool,
    /// Raw bits, zero-extended for 32-bit types.
    pub(crate) bits: u64,
}

/// A module loaded into a runtime.
#[derive(Debug)]
pub(crate) struct Instance {
    pub(crate) module: Rc<Module>,
    /// The module's types, interned in the environment.
    pub(crate) types: Vec<Rc<FuncType>>,
    pub(crate) functions: Vec<FuncId>,
    /// Runtime global indices.
    pub(crate) globals: Vec<u32>,
    pub(crate) table: Vec<Option<FuncId>>,
    /// Start function that has not run yet.
    pub(crate) start: Option<FuncId>,
}

/// Summary of one function, for hosts and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub signature: String,
    pub compiled: bool,
    pub hits: u64,
    pub max_stack_slots: u16,
    /// Declared locals, not counting parameters. Zero until compiled.
    pub num_locals: u32,
}
