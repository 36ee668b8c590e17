//! Byte streams and the decoding primitives built on them.

use sprig_memory::{Offset, SegmentedMemory};

use crate::opcode::{Opcode, PREFIX_FC};
use crate::{DecodeError, DecodeResult};

/// A forward cursor over encoded bytes.
///
/// Implementors provide single-byte access and positioning; the LEB128,
/// float and opcode decoders are shared.
pub trait ByteStream {
    fn read_u8(&mut self) -> DecodeResult<u8>;

    /// Current cursor position.
    fn position(&self) -> usize;

    /// Move the cursor to `position`, which must lie inside the stream.
    fn seek(&mut self, position: usize) -> DecodeResult<()>;

    fn remaining(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        if buf.len() > self.remaining() {
            return Err(DecodeError::Underrun(self.position() + self.remaining()));
        }
        for b in buf.iter_mut() {
            *b = self.read_u8()?;
        }
        Ok(())
    }

    /// One opcode. `0xFC`-prefixed opcodes come back as `0xFC00 | sub`.
    fn read_opcode(&mut self) -> DecodeResult<Opcode> {
        let byte = self.read_u8()?;
        if byte != PREFIX_FC {
            return Ok(Opcode::from(byte));
        }
        let position = self.position();
        let sub = self.read_leb_unsigned(32)?;
        if sub > 0xFF {
            return Err(DecodeError::Malformed {
                position,
                reason: "prefixed opcode out of range",
            });
        }
        Ok((Opcode::from(PREFIX_FC) << 8) | sub as Opcode)
    }

    /// Unsigned LEB128 limited to `max_bits`.
    fn read_leb_unsigned(&mut self, max_bits: u32) -> DecodeResult<u64> {
        let start = self.position();
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            if shift >= max_bits {
                return Err(DecodeError::LebOverflow { position: start, max_bits });
            }
        }
    }

    /// Signed LEB128 limited to `max_bits`, sign-extended to 64 bits.
    fn read_leb_signed(&mut self, max_bits: u32) -> DecodeResult<i64> {
        let start = self.position();
        let mut value = 0i64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= i64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if byte & 0x40 != 0 && shift < 64 {
                    value |= !0i64 << shift;
                }
                return Ok(value);
            }
            if shift >= max_bits {
                return Err(DecodeError::LebOverflow { position: start, max_bits });
            }
        }
    }

    fn read_u32_leb(&mut self) -> DecodeResult<u32> {
        Ok(self.read_leb_unsigned(32)? as u32)
    }

    fn read_i32_leb(&mut self) -> DecodeResult<i32> {
        Ok(self.read_leb_signed(32)? as i32)
    }

    fn read_i64_leb(&mut self) -> DecodeResult<i64> {
        self.read_leb_signed(64)
    }

    fn read_f32(&mut self) -> DecodeResult<f32> {
        let mut bytes = [0u8; 4];
        self.read_bytes(&mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_f64(&mut self) -> DecodeResult<f64> {
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes)?;
        Ok(f64::from_le_bytes(bytes))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// SliceReader
// ══════════════════════════════════════════════════════════════════════════════

/// Reader over `bytes[start..end]`. Positions are absolute indices into
/// `bytes`, so a body reader reports module byte offsets.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    start: usize,
    end: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            start: 0,
            end: bytes.len(),
        }
    }

    /// Reader confined to `start..end` of `bytes`.
    pub fn with_range(bytes: &'a [u8], start: usize, end: usize) -> DecodeResult<Self> {
        if start > end || end > bytes.len() {
            return Err(DecodeError::Malformed {
                position: start,
                reason: "byte range outside buffer",
            });
        }
        Ok(Self {
            bytes,
            pos: start,
            start,
            end,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Bytes not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..self.end]
    }
}

impl ByteStream for SliceReader<'_> {
    fn read_u8(&mut self) -> DecodeResult<u8> {
        if self.pos >= self.end {
            return Err(DecodeError::Underrun(self.pos));
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, position: usize) -> DecodeResult<()> {
        if position < self.start || position > self.end {
            return Err(DecodeError::Malformed {
                position,
                reason: "seek outside stream",
            });
        }
        self.pos = position;
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        let n = buf.len();
        if n > self.remaining() {
            return Err(DecodeError::Underrun(self.end));
        }
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// MemoryReader
// ══════════════════════════════════════════════════════════════════════════════

/// Reader over an offset range of a [`SegmentedMemory`]. Positions are
/// offsets in that memory.
#[derive(Debug)]
pub struct MemoryReader<'m> {
    memory: &'m mut SegmentedMemory,
    pos: u32,
    start: u32,
    end: u32,
}

impl<'m> MemoryReader<'m> {
    pub fn new(memory: &'m mut SegmentedMemory, start: Offset, len: u32) -> DecodeResult<Self> {
        let end = start.add(len)?;
        if !memory.is_valid_access(start, len as usize) {
            return Err(DecodeError::Malformed {
                position: start.get() as usize,
                reason: "byte range outside memory",
            });
        }
        Ok(Self {
            memory,
            pos: start.get(),
            start: start.get(),
            end: end.get(),
        })
    }
}

impl ByteStream for MemoryReader<'_> {
    fn read_u8(&mut self) -> DecodeResult<u8> {
        if self.pos >= self.end {
            return Err(DecodeError::Underrun(self.pos as usize));
        }
        let [byte] = self.memory.read_array::<1>(Offset::new(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn position(&self) -> usize {
        self.pos as usize
    }

    fn seek(&mut self, position: usize) -> DecodeResult<()> {
        if position < self.start as usize || position > self.end as usize {
            return Err(DecodeError::Malformed {
                position,
                reason: "seek outside stream",
            });
        }
        self.pos = position as u32;
        Ok(())
    }

    fn remaining(&self) -> usize {
        (self.end - self.pos) as usize
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        if buf.len() > self.remaining() {
            return Err(DecodeError::Underrun(self.end as usize));
        }
        self.memory.read(Offset::new(self.pos), buf)?;
        self.pos += buf.len() as u32;
        Ok(())
    }
}
