//! Decoded module declarations.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::ops::Range;
use std::rc::Rc;

use sprig_types::{FuncType, ValueType};

use crate::{ParseError, ParseResult};

/// `module.name` of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportName {
    pub module: String,
    pub name: String,
}

impl std::fmt::Display for ImportName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// A constant initializer expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InitExpr {
    I32(i32),
    I64(i64),
    /// Raw IEEE-754 bits.
    F32(u32),
    F64(u64),
    GlobalGet(u32),
    RefNull,
    RefFunc(u32),
}

/// Minimum and optional maximum, in pages or elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub initial: u32,
    pub maximum: Option<u32>,
}

/// Location of a function body inside the module bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    /// Whole body entry, including the local declarations.
    pub range: Range<usize>,
    /// Offset of the first opcode.
    pub code_start: usize,
    /// Declared locals, run-length encoded as in the binary.
    pub locals: Vec<(u32, ValueType)>,
}

impl FunctionBody {
    pub fn num_locals(&self) -> u32 {
        self.locals.iter().map(|(n, _)| *n).sum()
    }

    /// Declared locals expanded one entry per local.
    pub fn local_types(&self) -> impl Iterator<Item = ValueType> + '_ {
        self.locals
            .iter()
            .flat_map(|&(n, ty)| std::iter::repeat(ty).take(n as usize))
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub type_index: u32,
    /// `None` for imports.
    pub body: Option<FunctionBody>,
    pub import: Option<ImportName>,
    pub export_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub ty: ValueType,
    pub mutable: bool,
    pub init: InitExpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportKind {
    Function,
    Table,
    Memory,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// Active element segment for table 0.
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: InitExpr,
    pub functions: Vec<Option<u32>>,
}

/// Active data segment for memory 0.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: InitExpr,
    pub bytes: Vec<u8>,
}

/// A validated, decoded module.
///
/// A module may be loaded into at most one runtime at a time; the runtime
/// claims it with [`Module::claim`] and gives it back on drop.
#[derive(Debug)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) bytes: Rc<[u8]>,
    pub(crate) fingerprint: [u8; 32],
    pub(crate) types: Vec<FuncType>,
    pub(crate) functions: Vec<FunctionDecl>,
    pub(crate) num_imported_functions: u32,
    pub(crate) memory: Option<Limits>,
    pub(crate) table: Option<Limits>,
    pub(crate) globals: Vec<GlobalDecl>,
    pub(crate) exports: Vec<Export>,
    pub(crate) elements: Vec<ElementSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) start: Option<u32>,
    linked: Cell<bool>,
}

impl Module {
    pub(crate) fn empty(name: &str, bytes: Rc<[u8]>) -> Self {
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&Sha256::digest(&*bytes));
        Self {
            name: name.to_string(),
            bytes,
            fingerprint,
            types: Vec::new(),
            functions: Vec::new(),
            num_imported_functions: 0,
            memory: None,
            table: None,
            globals: Vec::new(),
            exports: Vec::new(),
            elements: Vec::new(),
            data: Vec::new(),
            start: None,
            linked: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full module binary; function bodies are ranges into it.
    pub fn bytes(&self) -> &Rc<[u8]> {
        &self.bytes
    }

    /// SHA-256 of the module bytes.
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    /// First eight fingerprint bytes in hex, for logs.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint[..8].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn func_type(&self, index: u32) -> ParseResult<&FuncType> {
        self.types
            .get(index as usize)
            .ok_or(ParseError::IndexOutOfBounds { space: "types", index })
    }

    pub fn functions(&self) -> &[FunctionDecl] {
        &self.functions
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.num_imported_functions
    }

    pub fn memory(&self) -> Option<Limits> {
        self.memory
    }

    pub fn table(&self) -> Option<Limits> {
        self.table
    }

    pub fn globals(&self) -> &[GlobalDecl] {
        &self.globals
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn find_export(&self, name: &str, kind: ExportKind) -> Option<u32> {
        self.exports
            .iter()
            .find(|e| e.name == name && e.kind == kind)
            .map(|e| e.index)
    }

    pub fn elements(&self) -> &[ElementSegment] {
        &self.elements
    }

    pub fn data(&self) -> &[DataSegment] {
        &self.data
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    // ── Ownership ────────────────────────────────────────────────────────────

    /// Mark the module as loaded. Returns `false` if it already was.
    pub fn claim(&self) -> bool {
        !self.linked.replace(true)
    }

    pub fn release(&self) {
        self.linked.set(false);
    }

    pub fn is_linked(&self) -> bool {
        self.linked.get()
    }
}
