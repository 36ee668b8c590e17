//! The `Offset` newtype: a position in a region's logical address space.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::MemoryError;

/// A byte offset into a [`crate::SegmentedMemory`].
///
/// Offsets are the only currency exchanged across the memory manager's API;
/// they stay valid across segment materialization and release, unlike raw
/// pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Offset(u32);

impl Offset {
    /// The null offset. Never returned by `malloc`.
    pub const NULL: Offset = Offset(0);

    pub const fn new(raw: u32) -> Self {
        Offset(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset `bytes` further on, or `None` on 32-bit overflow.
    pub fn checked_add(self, bytes: u32) -> Option<Offset> {
        self.0.checked_add(bytes).map(Offset)
    }

    /// Like [`Offset::checked_add`] but reports the overflow as an
    /// out-of-bounds access of `len` bytes.
    pub fn add(self, bytes: u32) -> Result<Offset, MemoryError> {
        self.checked_add(bytes).ok_or(MemoryError::OutOfBounds {
            offset: u64::from(self.0) + u64::from(bytes),
            len: 0,
            size: u64::from(u32::MAX),
        })
    }
}

impl From<u32> for Offset {
    fn from(raw: u32) -> Self {
        Offset(raw)
    }
}

impl TryFrom<u64> for Offset {
    type Error = MemoryError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        u32::try_from(raw).map(Offset).map_err(|_| MemoryError::OutOfBounds {
            offset: raw,
            len: 0,
            size: u64::from(u32::MAX) + 1,
        })
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_offset() {
        assert!(Offset::NULL.is_null());
        assert!(!Offset::new(8).is_null());
    }

    #[test]
    fn test_checked_add_overflow() {
        assert_eq!(Offset::new(8).checked_add(8), Some(Offset::new(16)));
        assert_eq!(Offset::new(u32::MAX).checked_add(1), None);
        assert!(Offset::new(u32::MAX).add(1).is_err());
    }

    #[test]
    fn test_try_from_u64() {
        assert_eq!(Offset::try_from(42u64).unwrap(), Offset::new(42));
        assert!(Offset::try_from(u64::from(u32::MAX) + 1).is_err());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(Offset::new(255).to_string(), "0xff");
    }
}
