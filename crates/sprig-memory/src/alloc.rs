//! Chunk allocator carved over a [`SegmentedMemory`].
//!
//! Free chunks are kept in [`NUM_BUCKETS`] size classes indexed by
//! `floor(log2(size))`. A chunk lives inside one segment unless the request is
//! larger than a segment, in which case it spans a run of empty segments and
//! records how many bytes it covers in each.

use crate::region::SegmentedMemory;
use crate::{MemoryError, MemoryResult, Offset};

/// Allocation granularity in bytes.
pub const CHUNK_ALIGN: u64 = 8;

/// Number of free-chunk size classes.
pub const NUM_BUCKETS: usize = 32;

/// Smallest remainder worth splitting off into its own free chunk.
const MIN_SPLIT: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkId(u32);

impl ChunkId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Chunk {
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) free: bool,
    /// Never handed out and never freed (the null guard).
    pub(crate) reserved: bool,
    pub(crate) prev: Option<ChunkId>,
    pub(crate) next: Option<ChunkId>,
    pub(crate) start_segment: usize,
    /// Bytes covered in each segment; empty for single-segment chunks.
    pub(crate) segment_sizes: Vec<u32>,
}

impl Chunk {
    fn spans_segments(&self) -> bool {
        self.segment_sizes.len() > 1
    }
}

fn bucket_of(size: u64) -> usize {
    debug_assert!(size > 0);
    ((63 - size.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
}

fn align_up(size: u64) -> u64 {
    size.saturating_add(CHUNK_ALIGN - 1) & !(CHUNK_ALIGN - 1)
}

impl SegmentedMemory {
    // ══════════════════════════════════════════════════════════════════════════
    // Public allocator surface
    // ══════════════════════════════════════════════════════════════════════════

    /// Allocate `size` bytes and return the offset of the first one.
    ///
    /// The returned offset is never [`Offset::NULL`]. Contents are not zeroed
    /// when a previously used chunk is recycled.
    pub fn malloc(&mut self, size: usize) -> MemoryResult<Offset> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let size = align_up(size as u64);
        if size > self.max_size() {
            return Err(MemoryError::ChunkExhausted(size));
        }
        self.ensure_guard()?;

        let id = if size <= self.segment_size as u64 {
            let id = match self.take_from_buckets(size) {
                Some(id) => id,
                None => {
                    let index = self.acquire_empty_segments(1)?;
                    self.seed_segment(index)
                }
            };
            self.split(id, size);
            id
        } else {
            self.allocate_spanning(size)?
        };

        let chunk = &mut self.chunks[id.index()];
        chunk.free = false;
        let offset = Offset::try_from(chunk.offset)?;
        tracing::trace!(target: "sprig.memory", %offset, size, "chunk allocated");
        Ok(offset)
    }

    /// Release the chunk starting at `offset`.
    ///
    /// Offsets that are not the start of a live chunk (including a second free
    /// of the same offset) are rejected with [`MemoryError::InvalidFree`].
    pub fn free(&mut self, offset: Offset) -> MemoryResult<()> {
        let id = self.live_chunk(offset)?;
        if self.chunks[id.index()].spans_segments() {
            self.dissolve_spanning(id);
        } else {
            self.release_into_buckets(id);
        }
        tracing::trace!(target: "sprig.memory", %offset, "chunk freed");
        Ok(())
    }

    /// Resize an allocation, moving it if it no longer fits. A null `offset`
    /// behaves like `malloc`; a zero `size` frees and returns null.
    pub fn realloc(&mut self, offset: Offset, size: usize) -> MemoryResult<Offset> {
        if offset.is_null() {
            return self.malloc(size);
        }
        let id = self.live_chunk(offset)?;
        if size == 0 {
            self.free(offset)?;
            return Ok(Offset::NULL);
        }
        let current = self.chunks[id.index()].size;
        if align_up(size as u64) <= current {
            return Ok(offset);
        }
        let moved = self.malloc(size)?;
        self.copy_within(offset, moved, current as usize)?;
        self.free(offset)?;
        Ok(moved)
    }

    /// Usable size of the live allocation at `offset`.
    pub fn allocation_size(&self, offset: Offset) -> Option<u64> {
        let id = self.find_chunk(offset)?;
        let chunk = &self.chunks[id.index()];
        (!chunk.free && !chunk.reserved).then_some(chunk.size)
    }

    /// Drop the backing storage of every segment that holds no live chunk and
    /// is not covered by a multi-segment chunk. Returns the number of segments
    /// released. The logical offset space is unchanged.
    pub fn collect_empty_segments(&mut self) -> usize {
        if !self.allocator_active {
            return 0;
        }
        let mut released = 0;
        for index in 0..self.segments.len() {
            if self.segments[index].spanned_by.is_some() {
                continue;
            }
            if let Some(first) = self.segments[index].first_chunk {
                let chunk = &self.chunks[first.index()];
                if chunk.free && chunk.next.is_none() && chunk.size == self.segment_size as u64 {
                    self.bucket_remove(first);
                    self.release_chunk(first);
                    self.segments[index].first_chunk = None;
                }
            }
            if self.segment_is_idle(index) && self.segments[index].data.take().is_some() {
                released += 1;
            }
        }
        if released > 0 {
            tracing::debug!(
                target: "sprig.memory",
                released,
                materialized = self.materialized_segments(),
                "empty segments collected"
            );
        }
        released
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Chunk arena
    // ══════════════════════════════════════════════════════════════════════════

    fn new_chunk(&mut self, chunk: Chunk) -> ChunkId {
        match self.spare_chunks.pop() {
            Some(id) => {
                self.chunks[id.index()] = chunk;
                id
            }
            None => {
                let id = ChunkId(self.chunks.len() as u32);
                self.chunks.push(chunk);
                id
            }
        }
    }

    fn release_chunk(&mut self, id: ChunkId) {
        self.chunks[id.index()] = Chunk::default();
        self.spare_chunks.push(id);
    }

    fn bucket_insert(&mut self, id: ChunkId) {
        let bucket = bucket_of(self.chunks[id.index()].size);
        self.buckets[bucket].push(id);
    }

    fn bucket_remove(&mut self, id: ChunkId) {
        let bucket = bucket_of(self.chunks[id.index()].size);
        if let Some(pos) = self.buckets[bucket].iter().position(|&c| c == id) {
            self.buckets[bucket].swap_remove(pos);
        }
    }

    /// Smallest-class-first search for a free chunk of at least `size` bytes.
    fn take_from_buckets(&mut self, size: u64) -> Option<ChunkId> {
        for bucket in bucket_of(size)..NUM_BUCKETS {
            let chunks = &self.chunks;
            if let Some(pos) = self.buckets[bucket]
                .iter()
                .position(|c| chunks[c.index()].size >= size)
            {
                return Some(self.buckets[bucket].swap_remove(pos));
            }
        }
        None
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    fn find_chunk(&self, offset: Offset) -> Option<ChunkId> {
        let target = u64::from(offset.get());
        if offset.is_null() || target >= self.total_size {
            return None;
        }
        let (index, _) = self.locate(target);
        let mut cursor = self.segments.get(index)?.first_chunk;
        while let Some(id) = cursor {
            let chunk = &self.chunks[id.index()];
            if chunk.offset == target {
                return Some(id);
            }
            if chunk.offset > target {
                return None;
            }
            cursor = chunk.next;
        }
        None
    }

    fn live_chunk(&self, offset: Offset) -> MemoryResult<ChunkId> {
        let id = self
            .find_chunk(offset)
            .ok_or(MemoryError::InvalidFree(offset.get()))?;
        let chunk = &self.chunks[id.index()];
        if chunk.free || chunk.reserved {
            return Err(MemoryError::InvalidFree(offset.get()));
        }
        Ok(id)
    }

    fn segment_is_idle(&self, index: usize) -> bool {
        let mut cursor = self.segments[index].first_chunk;
        while let Some(id) = cursor {
            let chunk = &self.chunks[id.index()];
            if !chunk.free && !chunk.reserved {
                return false;
            }
            cursor = chunk.next;
        }
        true
    }

    // ── Segment acquisition ──────────────────────────────────────────────────

    /// Claim segment 0 for the null guard on first use.
    fn ensure_guard(&mut self) -> MemoryResult<()> {
        if self.allocator_active {
            return Ok(());
        }
        if self.segments.is_empty() {
            self.grow(self.segment_size as u64)?;
        }
        self.align_total()?;
        let rest_size = self.segment_size as u64 - CHUNK_ALIGN;
        let guard = self.new_chunk(Chunk {
            offset: 0,
            size: CHUNK_ALIGN,
            reserved: true,
            ..Chunk::default()
        });
        let rest = self.new_chunk(Chunk {
            offset: CHUNK_ALIGN,
            size: rest_size,
            free: true,
            prev: Some(guard),
            ..Chunk::default()
        });
        self.chunks[guard.index()].next = Some(rest);
        self.segments[0].first_chunk = Some(guard);
        self.bucket_insert(rest);
        self.allocator_active = true;
        Ok(())
    }

    /// Extend the logical size to the end of the last indexed segment.
    fn align_total(&mut self) -> MemoryResult<()> {
        let indexed = self.segments.len() as u64 * self.segment_size as u64;
        if indexed > self.total_size {
            self.grow(indexed - self.total_size)?;
        }
        Ok(())
    }

    /// Find (or grow into) `count` contiguous unclaimed segments and return the
    /// index of the first.
    fn acquire_empty_segments(&mut self, count: usize) -> MemoryResult<usize> {
        self.align_total()?;
        let mut run = 0;
        for index in 0..self.segments.len() {
            if self.segments[index].is_unclaimed() {
                run += 1;
                if run == count {
                    return Ok(index + 1 - count);
                }
            } else {
                run = 0;
            }
        }
        let start = self.segments.len() - run;
        self.grow(((count - run) * self.segment_size) as u64)?;
        Ok(start)
    }

    /// Cover an unclaimed segment with one free chunk (kept out of the buckets
    /// because the caller is about to use it).
    fn seed_segment(&mut self, index: usize) -> ChunkId {
        let id = self.new_chunk(Chunk {
            offset: self.segment_base(index),
            size: self.segment_size as u64,
            free: true,
            start_segment: index,
            ..Chunk::default()
        });
        self.segments[index].first_chunk = Some(id);
        id
    }

    // ── Splitting and merging ────────────────────────────────────────────────

    fn split(&mut self, id: ChunkId, size: u64) {
        let chunk = &self.chunks[id.index()];
        let (offset, total, next, segment) = (chunk.offset, chunk.size, chunk.next, chunk.start_segment);
        if total - size < MIN_SPLIT {
            return;
        }
        let rest = self.new_chunk(Chunk {
            offset: offset + size,
            size: total - size,
            free: true,
            prev: Some(id),
            next,
            start_segment: segment,
            ..Chunk::default()
        });
        if let Some(next) = next {
            self.chunks[next.index()].prev = Some(rest);
        }
        let chunk = &mut self.chunks[id.index()];
        chunk.next = Some(rest);
        chunk.size = size;
        self.bucket_insert(rest);
    }

    /// Fold `id`'s successor into `id`.
    fn absorb_next(&mut self, id: ChunkId) {
        let Some(next) = self.chunks[id.index()].next else {
            return;
        };
        let (size, after) = {
            let n = &self.chunks[next.index()];
            (n.size, n.next)
        };
        let chunk = &mut self.chunks[id.index()];
        chunk.size += size;
        chunk.next = after;
        if let Some(after) = after {
            self.chunks[after.index()].prev = Some(id);
        }
        self.release_chunk(next);
    }

    fn release_into_buckets(&mut self, id: ChunkId) {
        self.chunks[id.index()].free = true;
        let mut merged = id;
        if let Some(next) = self.chunks[id.index()].next {
            if self.chunks[next.index()].free {
                self.bucket_remove(next);
                self.absorb_next(id);
            }
        }
        if let Some(prev) = self.chunks[id.index()].prev {
            if self.chunks[prev.index()].free {
                self.bucket_remove(prev);
                self.absorb_next(prev);
                merged = prev;
            }
        }
        self.bucket_insert(merged);
    }

    // ── Multi-segment chunks ─────────────────────────────────────────────────

    fn allocate_spanning(&mut self, size: u64) -> MemoryResult<ChunkId> {
        let segment_size = self.segment_size as u64;
        let count = size.div_ceil(segment_size) as usize;
        let start = self.acquire_empty_segments(count)?;
        let last = start + count - 1;

        let mut tail = size % segment_size;
        let mut size = size;
        if tail != 0 && segment_size - tail < MIN_SPLIT {
            size += segment_size - tail;
            tail = 0;
        }
        let mut segment_sizes = vec![segment_size as u32; count];
        if tail != 0 {
            segment_sizes[count - 1] = tail as u32;
        }

        let id = self.new_chunk(Chunk {
            offset: self.segment_base(start),
            size,
            start_segment: start,
            segment_sizes,
            ..Chunk::default()
        });
        self.segments[start].first_chunk = Some(id);
        for index in start + 1..=last {
            self.segments[index].spanned_by = Some(id);
        }
        if tail != 0 {
            let rest = self.new_chunk(Chunk {
                offset: self.segment_base(last) + tail,
                size: segment_size - tail,
                free: true,
                start_segment: last,
                ..Chunk::default()
            });
            self.segments[last].first_chunk = Some(rest);
            self.bucket_insert(rest);
        }
        tracing::debug!(target: "sprig.memory", start, count, size, "multi-segment chunk allocated");
        Ok(id)
    }

    /// Return a multi-segment chunk's segments to the unclaimed state. A
    /// partially covered last segment keeps a free head chunk.
    fn dissolve_spanning(&mut self, id: ChunkId) {
        let chunk = std::mem::take(&mut self.chunks[id.index()]);
        let segment_size = self.segment_size as u32;
        let last = chunk.start_segment + chunk.segment_sizes.len() - 1;
        self.segments[chunk.start_segment].first_chunk = None;
        for index in chunk.start_segment + 1..=last {
            self.segments[index].spanned_by = None;
        }
        self.release_chunk(id);

        let covered = chunk.segment_sizes.last().copied().unwrap_or(segment_size);
        if covered < segment_size {
            let next = self.segments[last].first_chunk;
            let head = self.new_chunk(Chunk {
                offset: self.segment_base(last),
                size: u64::from(covered),
                free: true,
                next,
                start_segment: last,
                ..Chunk::default()
            });
            if let Some(next) = next {
                self.chunks[next.index()].prev = Some(head);
                if self.chunks[next.index()].free {
                    self.bucket_remove(next);
                    self.absorb_next(head);
                }
            }
            self.segments[last].first_chunk = Some(head);
            self.bucket_insert(head);
        }
    }
}
