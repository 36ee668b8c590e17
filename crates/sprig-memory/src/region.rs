//! Segment table, offset resolution, growth and bulk byte access.

use serde::{Deserialize, Serialize};

use crate::alloc::{Chunk, ChunkId, NUM_BUCKETS};
use crate::{MemoryError, MemoryResult, Offset};

/// Size of one WebAssembly linear-memory page.
pub const WASM_PAGE_SIZE: u64 = 65_536;

/// Smallest accepted segment size.
const MIN_SEGMENT_SIZE: usize = 64;

/// Largest logical size any region can reach (the 32-bit offset space).
const ADDRESS_SPACE: u64 = 1 << 32;

/// Scratch size used by [`SegmentedMemory::copy_within`].
const COPY_STEP: usize = 256;

// ══════════════════════════════════════════════════════════════════════════════
// Configuration
// ══════════════════════════════════════════════════════════════════════════════

/// Shape of a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Bytes per segment. Must be a power of two no larger than a wasm page.
    pub segment_size: usize,
    /// Logical size at creation, rounded up to whole segments.
    pub initial_size: u64,
    /// Growth ceiling in bytes.
    pub max_size: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            segment_size: 16 * 1024,
            initial_size: 0,
            max_size: ADDRESS_SPACE,
        }
    }
}

impl MemoryConfig {
    /// A region shaped like WebAssembly linear memory.
    pub fn linear(segment_size: usize, initial_pages: u32, max_pages: u32) -> Self {
        Self {
            segment_size,
            initial_size: u64::from(initial_pages) * WASM_PAGE_SIZE,
            max_size: u64::from(max_pages) * WASM_PAGE_SIZE,
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if !self.segment_size.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "segment size {} is not a power of two",
                self.segment_size
            )));
        }
        if self.segment_size < MIN_SEGMENT_SIZE || self.segment_size as u64 > WASM_PAGE_SIZE {
            return Err(MemoryError::InvalidConfig(format!(
                "segment size {} outside {MIN_SEGMENT_SIZE}..={WASM_PAGE_SIZE}",
                self.segment_size
            )));
        }
        if self.max_size > ADDRESS_SPACE {
            return Err(MemoryError::InvalidConfig(format!(
                "maximum size {} exceeds the 32-bit offset space",
                self.max_size
            )));
        }
        if self.initial_size > self.max_size {
            return Err(MemoryError::InvalidConfig(format!(
                "initial size {} exceeds maximum {}",
                self.initial_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Point-in-time counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_size: u64,
    pub max_size: u64,
    pub segment_size: usize,
    pub segments: usize,
    pub materialized_segments: usize,
    pub free_chunks: usize,
    pub live_chunks: usize,
}

// ══════════════════════════════════════════════════════════════════════════════
// Region
// ══════════════════════════════════════════════════════════════════════════════

/// One fixed-capacity block of the address space.
#[derive(Debug, Default)]
pub(crate) struct Segment {
    /// Backing bytes; `None` until first touched (or after collection).
    pub(crate) data: Option<Box<[u8]>>,
    /// First chunk that starts inside this segment.
    pub(crate) first_chunk: Option<ChunkId>,
    /// Multi-segment chunk covering this segment from an earlier one.
    pub(crate) spanned_by: Option<ChunkId>,
}

impl Segment {
    /// No chunk starts in or covers this segment.
    pub(crate) fn is_unclaimed(&self) -> bool {
        self.first_chunk.is_none() && self.spanned_by.is_none()
    }
}

/// A growable, segment-backed, offset-addressed memory region.
#[derive(Debug)]
pub struct SegmentedMemory {
    pub(crate) segments: Vec<Segment>,
    pub(crate) segment_size: usize,
    segment_shift: u32,
    pub(crate) total_size: u64,
    max_size: u64,
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) spare_chunks: Vec<ChunkId>,
    pub(crate) buckets: Vec<Vec<ChunkId>>,
    /// Set once `malloc` has carved chunks; segment collection is only
    /// meaningful for allocator-managed regions.
    pub(crate) allocator_active: bool,
}

impl SegmentedMemory {
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        config.validate()?;
        let mut memory = Self {
            segments: Vec::new(),
            segment_size: config.segment_size,
            segment_shift: config.segment_size.trailing_zeros(),
            total_size: 0,
            max_size: config.max_size,
            chunks: Vec::new(),
            spare_chunks: Vec::new(),
            buckets: vec![Vec::new(); NUM_BUCKETS],
            allocator_active: false,
        };
        if config.initial_size > 0 {
            let rounded = memory.round_to_segments(config.initial_size);
            memory.grow(rounded.min(config.max_size))?;
        }
        Ok(memory)
    }

    // ── Geometry ─────────────────────────────────────────────────────────────

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Current logical size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Segments whose backing storage currently exists.
    pub fn materialized_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.data.is_some()).count()
    }

    /// Logical size in whole WebAssembly pages.
    pub fn pages(&self) -> u32 {
        (self.total_size / WASM_PAGE_SIZE) as u32
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_size: self.total_size,
            max_size: self.max_size,
            segment_size: self.segment_size,
            segments: self.segments.len(),
            materialized_segments: self.materialized_segments(),
            free_chunks: self.buckets.iter().map(Vec::len).sum(),
            live_chunks: self.chunks.len() - self.spare_chunks.len(),
        }
    }

    pub(crate) fn locate(&self, offset: u64) -> (usize, usize) {
        let index = (offset >> self.segment_shift) as usize;
        let intra = (offset & (self.segment_size as u64 - 1)) as usize;
        (index, intra)
    }

    pub(crate) fn segment_base(&self, index: usize) -> u64 {
        (index as u64) << self.segment_shift
    }

    fn round_to_segments(&self, bytes: u64) -> u64 {
        let mask = self.segment_size as u64 - 1;
        (bytes + mask) & !mask
    }

    // ── Growth ───────────────────────────────────────────────────────────────

    /// Extend the logical size by `additional` bytes and return the previous
    /// size. Only the segment index grows; backing storage stays lazy.
    ///
    /// Fails with [`MemoryError::MemoryLimitExceeded`] without changing the
    /// size when the result would pass the configured maximum.
    pub fn grow(&mut self, additional: u64) -> MemoryResult<u64> {
        let previous = self.total_size;
        let requested = previous.saturating_add(additional);
        if requested > self.max_size {
            return Err(MemoryError::MemoryLimitExceeded {
                requested,
                maximum: self.max_size,
            });
        }
        let needed = (self.round_to_segments(requested) >> self.segment_shift) as usize;
        if needed > self.segments.len() {
            let extra = needed - self.segments.len();
            self.segments
                .try_reserve(extra)
                .map_err(|_| MemoryError::SegmentAllocationFailed(self.segments.len()))?;
            self.segments.resize_with(needed, Segment::default);
        }
        self.total_size = requested;
        tracing::debug!(
            target: "sprig.memory",
            previous,
            size = requested,
            segments = self.segments.len(),
            "region grown"
        );
        Ok(previous)
    }

    /// Grow by whole WebAssembly pages, returning the previous page count.
    pub fn grow_pages(&mut self, delta: u32) -> MemoryResult<u32> {
        let previous = self.pages();
        self.grow(u64::from(delta) * WASM_PAGE_SIZE)?;
        Ok(previous)
    }

    // ── Validity ─────────────────────────────────────────────────────────────

    /// True when `[offset, offset + len)` lies inside grown capacity and every
    /// segment it touches is materialized or can be materialized on demand.
    pub fn is_valid_access(&self, offset: Offset, len: usize) -> bool {
        let start = u64::from(offset.get());
        let Some(end) = start.checked_add(len as u64) else {
            return false;
        };
        if end > self.total_size {
            return false;
        }
        if len == 0 {
            return true;
        }
        let (last, _) = self.locate(end - 1);
        last < self.segments.len()
    }

    pub(crate) fn check_range(&self, offset: Offset, len: usize) -> MemoryResult<()> {
        if self.is_valid_access(offset, len) {
            Ok(())
        } else {
            Err(MemoryError::OutOfBounds {
                offset: u64::from(offset.get()),
                len: len as u64,
                size: self.total_size,
            })
        }
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// Borrow `len` bytes at `offset`, materializing the owning segment
    /// (zero-filled) if it has no backing storage yet.
    ///
    /// The range must not cross a segment boundary; use [`Self::read`] /
    /// [`Self::write`] for arbitrary spans.
    pub fn resolve(&mut self, offset: Offset, len: usize) -> MemoryResult<&mut [u8]> {
        self.check_range(offset, len)?;
        let (index, intra) = self.locate(u64::from(offset.get()));
        if intra + len > self.segment_size {
            return Err(MemoryError::CrossesSegment {
                offset: u64::from(offset.get()),
                len: len as u64,
            });
        }
        let data = self.materialize(index)?;
        Ok(&mut data[intra..intra + len])
    }

    /// Translate a pointer obtained from [`Self::resolve`] back to its offset.
    pub fn offset_of(&self, ptr: *const u8) -> Option<Offset> {
        let addr = ptr as usize;
        self.segments.iter().enumerate().find_map(|(index, segment)| {
            let data = segment.data.as_deref()?;
            let base = data.as_ptr() as usize;
            if addr < base || addr >= base + data.len() {
                return None;
            }
            let offset = self.segment_base(index) + (addr - base) as u64;
            if offset < self.total_size {
                Offset::try_from(offset).ok()
            } else {
                None
            }
        })
    }

    pub(crate) fn materialize(&mut self, index: usize) -> MemoryResult<&mut [u8]> {
        let segment_size = self.segment_size;
        let segment = self.segments.get_mut(index).ok_or(MemoryError::OutOfBounds {
            offset: (index as u64) << self.segment_shift,
            len: segment_size as u64,
            size: self.total_size,
        })?;
        if segment.data.is_none() {
            let mut bytes = Vec::new();
            bytes
                .try_reserve_exact(segment_size)
                .map_err(|_| MemoryError::SegmentAllocationFailed(index))?;
            bytes.resize(segment_size, 0);
            segment.data = Some(bytes.into_boxed_slice());
            tracing::trace!(target: "sprig.memory", segment = index, "segment materialized");
        }
        segment
            .data
            .as_deref_mut()
            .ok_or(MemoryError::SegmentAllocationFailed(index))
    }

    // ── Bulk access ──────────────────────────────────────────────────────────

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read(&mut self, offset: Offset, buf: &mut [u8]) -> MemoryResult<()> {
        self.check_range(offset, buf.len())?;
        let start = u64::from(offset.get());
        let mut done = 0;
        while done < buf.len() {
            let (index, intra) = self.locate(start + done as u64);
            let n = (buf.len() - done).min(self.segment_size - intra);
            let data = self.materialize(index)?;
            buf[done..done + n].copy_from_slice(&data[intra..intra + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `bytes` into the region starting at `offset`.
    pub fn write(&mut self, offset: Offset, bytes: &[u8]) -> MemoryResult<()> {
        self.check_range(offset, bytes.len())?;
        let start = u64::from(offset.get());
        let mut done = 0;
        while done < bytes.len() {
            let (index, intra) = self.locate(start + done as u64);
            let n = (bytes.len() - done).min(self.segment_size - intra);
            let data = self.materialize(index)?;
            data[intra..intra + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Set `len` bytes starting at `offset` to `byte`.
    pub fn fill(&mut self, offset: Offset, byte: u8, len: usize) -> MemoryResult<()> {
        self.check_range(offset, len)?;
        let start = u64::from(offset.get());
        let mut done = 0;
        while done < len {
            let (index, intra) = self.locate(start + done as u64);
            let n = (len - done).min(self.segment_size - intra);
            let data = self.materialize(index)?;
            data[intra..intra + n].fill(byte);
            done += n;
        }
        Ok(())
    }

    /// `memmove` inside the region: overlapping ranges are handled.
    pub fn copy_within(&mut self, src: Offset, dst: Offset, len: usize) -> MemoryResult<()> {
        self.check_range(src, len)?;
        self.check_range(dst, len)?;
        let (s, d) = (src.get(), dst.get());
        if len == 0 || s == d {
            return Ok(());
        }
        let mut scratch = [0u8; COPY_STEP];
        let overlaps_forward = d > s && u64::from(d) < u64::from(s) + len as u64;
        if !overlaps_forward {
            let mut done = 0;
            while done < len {
                let n = (len - done).min(COPY_STEP);
                self.read(Offset::new(s + done as u32), &mut scratch[..n])?;
                self.write(Offset::new(d + done as u32), &scratch[..n])?;
                done += n;
            }
        } else {
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(COPY_STEP);
                let at = (remaining - n) as u32;
                self.read(Offset::new(s + at), &mut scratch[..n])?;
                self.write(Offset::new(d + at), &scratch[..n])?;
                remaining -= n;
            }
        }
        Ok(())
    }

    /// Read a fixed-size little-endian cell.
    pub fn read_array<const N: usize>(&mut self, offset: Offset) -> MemoryResult<[u8; N]> {
        let mut out = [0u8; N];
        let (_, intra) = self.locate(u64::from(offset.get()));
        if intra + N <= self.segment_size {
            out.copy_from_slice(self.resolve(offset, N)?);
        } else {
            self.read(offset, &mut out)?;
        }
        Ok(out)
    }

    /// Write a fixed-size little-endian cell.
    pub fn write_array<const N: usize>(&mut self, offset: Offset, bytes: [u8; N]) -> MemoryResult<()> {
        let (_, intra) = self.locate(u64::from(offset.get()));
        if intra + N <= self.segment_size {
            self.resolve(offset, N)?.copy_from_slice(&bytes);
            Ok(())
        } else {
            self.write(offset, &bytes)
        }
    }

    /// Contiguous copy of the whole logical region; never-touched segments
    /// read as zeros and stay unmaterialized.
    pub fn snapshot(&self) -> Vec<u8> {
        let total = usize::try_from(self.total_size).unwrap_or(usize::MAX);
        let mut out = vec![0u8; total];
        for (index, segment) in self.segments.iter().enumerate() {
            let Some(data) = segment.data.as_deref() else {
                continue;
            };
            let start = index * self.segment_size;
            if start >= total {
                break;
            }
            let end = (start + self.segment_size).min(total);
            out[start..end].copy_from_slice(&data[..end - start]);
        }
        out
    }
}
