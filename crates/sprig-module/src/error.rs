use sprig_types::TypeError;
use thiserror::Error;

/// Errors raised while loading a module.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid module: {0}")]
    Wasm(#[from] wasmparser::BinaryReaderError),

    #[error("unsupported module feature: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("index {index} out of bounds for {space}")]
    IndexOutOfBounds { space: &'static str, index: u32 },
}

pub type ParseResult<T> = Result<T, ParseError>;
