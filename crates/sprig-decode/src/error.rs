use sprig_memory::MemoryError;
use thiserror::Error;

/// Errors raised by the byte-stream primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed data at byte {position}: {reason}")]
    Malformed { position: usize, reason: &'static str },

    #[error("unexpected end of data at byte {0}")]
    Underrun(usize),

    #[error("LEB128 value at byte {position} overflows {max_bits} bits")]
    LebOverflow { position: usize, max_bits: u32 },

    #[error("memory fault while decoding: {0}")]
    Memory(#[from] MemoryError),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
