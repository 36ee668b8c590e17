use thiserror::Error;

/// Errors raised while building types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("invalid signature string '{signature}': {reason}")]
    InvalidSignature { signature: String, reason: String },

    #[error("unknown value type encoding 0x{0:02x}")]
    UnknownValueType(u8),
}

pub type TypesResult<T> = Result<T, TypeError>;
