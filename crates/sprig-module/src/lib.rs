//! Sprig module loader.
//!
//! Validates a WebAssembly binary with `wasmparser` and decodes it into the
//! declarations the engine needs: function types, function shells with body
//! byte ranges, memory and table limits, globals, exports, and the element
//! and data segments applied at instantiation. Function bodies are not
//! decoded here; the engine compiles them lazily from the byte ranges.

mod error;
mod module;
mod parse;

pub use error::{ParseError, ParseResult};
pub use module::{
    DataSegment, ElementSegment, Export, ExportKind, FunctionBody, FunctionDecl, GlobalDecl,
    ImportName, InitExpr, Limits, Module,
};
