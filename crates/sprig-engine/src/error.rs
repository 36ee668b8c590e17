//! Engine error types.
//!
//! Compile errors abort one function and leave it uncompiled. Traps unwind a
//! guest call back to [`Runtime::call`](crate::Runtime::call). Link errors are
//! raised while a module is loaded, before any of its code runs.

use std::fmt;

use sprig_decode::DecodeError;
use sprig_memory::MemoryError;
use sprig_module::ParseError;
use sprig_types::TypeError;
use thiserror::Error;

use crate::backtrace::Backtrace;

/// Errors raised while translating one function body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The byte is not an opcode at all.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u16),

    /// A known opcode from a proposal the compiler does not implement.
    #[error("no compiler for opcode 0x{0:02x}")]
    NoCompilerForOpcode(u16),

    #[error("type mismatch")]
    TypeMismatch,

    #[error("type count mismatch")]
    TypeCountMismatch,

    /// The frame ran out of slots or the virtual stack out of entries.
    #[error("function stack overflow")]
    FunctionStackOverflow,

    #[error("function stack underrun")]
    FunctionStackUnderrun,

    #[error("out of code space")]
    OutOfCodeSpace,

    #[error("local index {0} out of bounds")]
    LocalIndexOutOfBounds(u32),

    #[error("global index {0} out of bounds")]
    GlobalIndexOutOfBounds(u32),

    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),

    #[error("function lookup failed for index {0}")]
    FunctionLookupFailed(u32),

    /// A call targets an import nothing has been linked to.
    #[error("missing imported function {0}")]
    ImportMissing(String),

    #[error("invalid block depth {0}")]
    InvalidBlockDepth(u32),

    #[error("type index {0} out of bounds")]
    TypeIndexOutOfBounds(u32),

    /// A slot is shared by more stack entries than its counter can track.
    #[error("slot usage counter overflow")]
    SlotUsageOverflow,

    #[error("function has no body")]
    MissingBody,

    #[error("malformed function body: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The constant table could not be stored in the private heap.
    #[error("constant table allocation failed: {0}")]
    Allocation(#[from] MemoryError),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Conditions that stop a guest call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("out of bounds memory access")]
    OutOfBoundsMemoryAccess,

    #[error("unreachable executed")]
    Unreachable,

    #[error("stack overflow")]
    StackOverflow,

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("table index out of range")]
    TableIndexOutOfRange,

    #[error("table element is null")]
    TableElementIsNull,

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,

    /// The yield hook returned a non-zero signal.
    #[error("yielded with signal {0}")]
    Yielded(u32),

    /// Raised by a host function.
    #[error("host trap: {0}")]
    Host(String),

    /// The private heap or a linear-memory segment could not be backed.
    #[error("allocation failed: {0}")]
    AllocationFailed(MemoryError),

    /// A callee failed to compile on its first call.
    #[error("lazy compilation failed: {0}")]
    CompileFailed(CompileError),

    /// Compiled code did not have the shape its operation expects.
    #[error("corrupt compiled code")]
    CorruptCode,
}

impl From<MemoryError> for Trap {
    fn from(err: MemoryError) -> Self {
        if err.is_allocation_failure() {
            Trap::AllocationFailed(err)
        } else {
            Trap::OutOfBoundsMemoryAccess
        }
    }
}

/// Errors raised while loading a module into a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The module is already loaded into a runtime.
    #[error("module '{0}' is already linked into a runtime")]
    AlreadyLinked(String),

    #[error("no imported function {module}.{name}")]
    FunctionNotFound { module: String, name: String },

    #[error("signature mismatch for {name}: expected {expected}, found {found}")]
    SignatureMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("invalid initializer expression")]
    InvalidInitializer,

    #[error("element segment does not fit the table")]
    ElementOutOfBounds,

    #[error("data segment does not fit linear memory")]
    DataOutOfBounds,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type LinkResult<T> = Result<T, LinkError>;

/// Errors raised while reading or checking an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Invalid(String),

    #[error("engine configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A trap together with the frames it unwound through.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub trap: Trap,
    pub backtrace: Backtrace,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trap)
    }
}

impl std::error::Error for RuntimeError {}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("trap: {0}")]
    Trap(RuntimeError),

    /// The memory manager could not satisfy an allocation. Kept apart from
    /// traps so hosts can apply backpressure.
    #[error("allocation failed: {0}")]
    Allocation(MemoryError),

    #[error(transparent)]
    Memory(MemoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Types(#[from] TypeError),

    /// No function, global or memory with the requested name or index.
    #[error("not found: {0}")]
    NotFound(String),

    /// `call` was given arguments that do not match the signature.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        if err.is_allocation_failure() {
            Error::Allocation(err)
        } else {
            Error::Memory(err)
        }
    }
}

impl Error {
    /// The trap behind a failed call, if that is what this is.
    pub fn trap(&self) -> Option<&Trap> {
        match self {
            Error::Trap(err) => Some(&err.trap),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, Error>;
