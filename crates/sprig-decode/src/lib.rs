//! Sprig byte-stream reader.
//!
//! The compiler consumes function bodies through the [`ByteStream`] trait,
//! implemented by [`SliceReader`] (a flat buffer, usually the module bytes)
//! and [`MemoryReader`] (an offset range of a `SegmentedMemory`).

mod error;
pub mod opcode;
mod reader;

pub use error::{DecodeError, DecodeResult};
pub use opcode::Opcode;
pub use reader::{ByteStream, MemoryReader, SliceReader};
