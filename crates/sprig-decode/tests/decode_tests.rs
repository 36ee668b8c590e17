//! Byte-stream tests over flat buffers and segmented memory.
//!
//! Covers: the three decode error kinds, LEB128 boundaries, prefixed
//! opcodes, and memory-backed streams that straddle segment boundaries.

use pretty_assertions::assert_eq;
use sprig_decode::opcode::{self, is_prefixed};
use sprig_decode::{ByteStream, DecodeError, MemoryReader, SliceReader};
use sprig_memory::{MemoryConfig, Offset, SegmentedMemory};

// ─────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────

fn leb_u(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn leb_s(mut value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn small_memory() -> SegmentedMemory {
    SegmentedMemory::new(MemoryConfig {
        segment_size: 64,
        initial_size: 256,
        max_size: 256,
    })
    .unwrap()
}

// ─────────────────────────────────────────────────────────────────────
// LEB128
// ─────────────────────────────────────────────────────────────────────

#[test]
fn unsigned_leb_boundaries() {
    for value in [0u64, 127, 128, 16_383, 16_384, u64::from(u32::MAX)] {
        let bytes = leb_u(value);
        let mut r = SliceReader::new(&bytes);
        assert_eq!(r.read_leb_unsigned(32).unwrap(), value, "value {value}");
        assert!(r.is_empty());
    }
}

#[test]
fn signed_leb_boundaries() {
    for value in [0i64, -1, 63, -64, 64, -65, i64::from(i32::MIN), i64::from(i32::MAX)] {
        let bytes = leb_s(value);
        let mut r = SliceReader::new(&bytes);
        assert_eq!(r.read_leb_signed(32).unwrap(), value, "value {value}");
    }
    let bytes = leb_s(i64::MIN);
    assert_eq!(SliceReader::new(&bytes).read_i64_leb().unwrap(), i64::MIN);
}

#[test]
fn too_long_encoding_overflows() {
    let bytes = leb_u(1 << 35);
    let mut r = SliceReader::new(&bytes);
    assert!(matches!(r.read_leb_unsigned(32), Err(DecodeError::LebOverflow { max_bits: 32, .. })));
}

#[test]
fn truncated_stream_underruns() {
    let mut r = SliceReader::new(&[0x41]);
    assert_eq!(r.read_opcode().unwrap(), opcode::I32_CONST);
    assert_eq!(r.read_i32_leb(), Err(DecodeError::Underrun(1)));
}

#[test]
fn oversized_prefix_is_malformed() {
    let mut bytes = vec![0xFC];
    bytes.extend(leb_u(0x1_00));
    let mut r = SliceReader::new(&bytes);
    assert!(matches!(r.read_opcode(), Err(DecodeError::Malformed { position: 1, .. })));
}

#[test]
fn prefixed_opcodes_are_tagged() {
    assert!(is_prefixed(opcode::MEMORY_FILL));
    assert!(!is_prefixed(opcode::END));
}

// ─────────────────────────────────────────────────────────────────────
// Memory-backed streams
// ─────────────────────────────────────────────────────────────────────

#[test]
fn memory_reader_crosses_segments() {
    let mut mem = small_memory();
    let mut body = vec![0x41];
    body.extend(leb_s(-123_456));
    body.push(0x44);
    body.extend(3.25f64.to_le_bytes());
    body.push(0x0B);
    let at = Offset::new(60);
    mem.write(at, &body).unwrap();

    let mut r = MemoryReader::new(&mut mem, at, body.len() as u32).unwrap();
    assert_eq!(r.read_opcode().unwrap(), opcode::I32_CONST);
    assert_eq!(r.read_i32_leb().unwrap(), -123_456);
    assert_eq!(r.read_opcode().unwrap(), opcode::F64_CONST);
    assert_eq!(r.read_f64().unwrap(), 3.25);
    assert_eq!(r.read_opcode().unwrap(), opcode::END);
    assert!(r.is_empty());
    assert_eq!(r.read_u8(), Err(DecodeError::Underrun(60 + body.len())));
}

#[test]
fn memory_reader_rejects_range_outside_memory() {
    let mut mem = small_memory();
    assert!(MemoryReader::new(&mut mem, Offset::new(250), 10).is_err());
}
