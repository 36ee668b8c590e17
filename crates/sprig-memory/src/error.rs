//! Memory manager error types.

use thiserror::Error;

/// Errors raised by the segmented memory manager.
///
/// Allocation failures (`SegmentAllocationFailed`, `ChunkExhausted`,
/// `MemoryLimitExceeded`) are kept distinct from access faults so callers can
/// apply backpressure instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The access `[offset, offset + len)` leaves the grown address space.
    #[error("out of bounds access: offset {offset}, length {len}, size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// A borrowed view was requested across a segment boundary.
    #[error("access at offset {offset} with length {len} crosses a segment boundary")]
    CrossesSegment { offset: u64, len: u64 },

    /// Backing storage for a segment could not be obtained from the host.
    #[error("failed to allocate backing storage for segment {0}")]
    SegmentAllocationFailed(usize),

    /// No chunk layout can ever satisfy the request.
    #[error("chunk exhausted: cannot satisfy an allocation of {0} bytes")]
    ChunkExhausted(u64),

    /// Growing the address space would pass the configured maximum.
    #[error("memory limit exceeded: requested {requested} bytes, maximum is {maximum}")]
    MemoryLimitExceeded { requested: u64, maximum: u64 },

    /// `free`/`realloc` on an offset that is not the start of a live chunk.
    #[error("invalid free of offset {0}")]
    InvalidFree(u32),

    /// `malloc(0)`.
    #[error("zero-sized allocation")]
    ZeroSizedAllocation,

    /// The region was configured with inconsistent parameters.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(String),
}

impl MemoryError {
    /// True for the allocation-failure family (as opposed to access faults).
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            MemoryError::SegmentAllocationFailed(_)
                | MemoryError::ChunkExhausted(_)
                | MemoryError::MemoryLimitExceeded { .. }
        )
    }
}

/// Memory manager result type alias.
pub type MemoryResult<T> = Result<T, MemoryError>;
