//! Sprig segmented memory manager.
//!
//! One logical, growable address space backed by fixed-size segments that are
//! only materialized when first touched. The same [`SegmentedMemory`] type
//! serves two roles:
//!
//! - **Guest linear memory**: grown in WebAssembly pages, addressed from
//!   offset `0`, never uses the chunk allocator.
//! - **Engine heap**: the private region the engine carves its value stack and
//!   constant tables out of via [`SegmentedMemory::malloc`] /
//!   [`SegmentedMemory::free`]. Offset `0` is reserved as the null offset.
//!
//! Nothing here hands out raw pointers. Every access goes through
//! [`SegmentedMemory::resolve`] (single segment, borrowed slice) or the
//! copying helpers ([`SegmentedMemory::read`], [`SegmentedMemory::write`],
//! [`SegmentedMemory::fill`], [`SegmentedMemory::copy_within`]) that split
//! requests at segment boundaries.

mod alloc;
mod error;
mod offset;
mod region;

pub use alloc::{CHUNK_ALIGN, NUM_BUCKETS};
pub use error::{MemoryError, MemoryResult};
pub use offset::Offset;
pub use region::{MemoryConfig, MemoryStats, SegmentedMemory, WASM_PAGE_SIZE};
