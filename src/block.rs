//! Block layout and the low-level block read/write protocol.
//!
//! A container is nothing but blocks laid end to end from offset 0:
//!
//! ```text
//! [ L: u16 LE ][ L bytes: index record ][ payload-length bytes: payload ]
//! ```
//!
//! The index record is `[ payload length: LEB128 varint ][ name: UTF-8 ]`.
//! It is never compressed.
//! There is no magic, no checksum and no trailer; a container is only
//! understood by walking it from the start.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

use crate::error::{ArchiveError, Result};
use crate::index::IndexEntry;

/// Size of the length prefix in front of every index record.
pub const BLOCK_HEADER_LEN: u64 = 2;
/// Longest encodable index record; bounded by the u16 prefix.
pub const MAX_INDEX_RECORD_LEN: usize = u16::MAX as usize;

// ── RawIndex ─────────────────────────────────────────────────────────────────

/// The (name, payload length) descriptor stored ahead of each payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIndex {
    pub name:   String,
    pub length: u64,
}

impl RawIndex {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self { name: name.into(), length }
    }
}

pub fn encode_raw_index(raw: &RawIndex) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + raw.name.len());
    write_varint(&mut out, raw.length);
    out.extend_from_slice(raw.name.as_bytes());
    out
}

pub fn decode_raw_index(bytes: &[u8]) -> Result<RawIndex> {
    let (length, used) = read_varint(bytes)
        .ok_or_else(|| ArchiveError::decode("index record: bad payload length"))?;
    let name = std::str::from_utf8(&bytes[used..])
        .map_err(|e| ArchiveError::decode(format!("index record: name is not UTF-8: {e}")))?;
    Ok(RawIndex { name: name.to_owned(), length })
}

fn write_varint(buf: &mut Vec<u8>, value: u64) {
    let mut v = value;
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut pos = 0;

    loop {
        let byte = *data.get(pos)?;
        pos += 1;

        let bits = (byte & 0x7F) as u64;
        if shift == 63 && bits > 1 {
            return None; // overflow
        }
        result |= bits << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }

    Some((result, pos))
}

// ── Write ────────────────────────────────────────────────────────────────────

/// Append one block at the end of `dest` and return its index entry.
///
/// `payload` is written verbatim and must be exactly `raw.length` bytes.
/// The entry is returned only after the payload write succeeded, so the
/// caller never indexes a half-written block.
pub fn write_block<W: Write + Seek>(dest: &mut W, raw: &RawIndex, payload: &[u8]) -> Result<IndexEntry> {
    if payload.len() as u64 != raw.length {
        return Err(ArchiveError::Precondition(format!(
            "payload for {} is {} bytes, index record says {}",
            raw.name, payload.len(), raw.length
        )));
    }

    let index_bytes = encode_raw_index(raw);
    if index_bytes.len() > MAX_INDEX_RECORD_LEN {
        return Err(ArchiveError::Precondition(format!(
            "index record for {} is {} bytes (max {MAX_INDEX_RECORD_LEN})",
            raw.name, index_bytes.len()
        )));
    }
    let index_len = index_bytes.len() as u16;

    let header_start = dest.seek(SeekFrom::End(0))?;
    dest.write_u16::<LittleEndian>(index_len)?;
    dest.write_all(&index_bytes)?;
    let data_start = dest.stream_position()?;
    dest.write_all(payload)?;

    debug!(name = %raw.name, header_start, data_start, length = raw.length, "block written");

    Ok(IndexEntry {
        name:         raw.name.clone(),
        data_start,
        length:       raw.length,
        header_start,
        header_len:   index_len,
    })
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Read the length prefix and index record at the current position.
/// Returns the decoded record and the record's encoded length.
pub fn read_block_header<R: Read>(src: &mut R) -> Result<(RawIndex, u16)> {
    let index_len = src.read_u16::<LittleEndian>().map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ArchiveError::decode("truncated block header"),
        _ => ArchiveError::Io(e),
    })?;
    if index_len == 0 {
        return Err(ArchiveError::decode("zero-length index record"));
    }
    let bytes = read_buffer(src, index_len as usize)?;
    Ok((decode_raw_index(&bytes)?, index_len))
}

/// Read exactly `len` bytes, looping over short reads.
/// Running out of input first is a [`ArchiveError::Decode`].
pub fn read_buffer<R: Read>(src: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match src.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ArchiveError::decode(format!(
                    "unexpected end of stream: wanted {len} bytes, got {filled}"
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Hands out at most `chunk` bytes per read call.
    struct Trickle<'a> {
        data:  &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn index_record_is_compact() {
        let bytes = encode_raw_index(&RawIndex::new("a", 100));
        assert_eq!(bytes, vec![100, b'a']);
        let bytes = encode_raw_index(&RawIndex::new("a", 300));
        assert_eq!(bytes.len(), 3);
    }

    #[test]
    fn max_length_roundtrips() {
        let raw = RawIndex::new("big", u64::MAX);
        assert_eq!(decode_raw_index(&encode_raw_index(&raw)).unwrap(), raw);
    }

    #[test]
    fn unterminated_varint_is_decode_error() {
        assert!(decode_raw_index(&[0x80, 0x80]).unwrap_err().is_decode());
        assert!(decode_raw_index(&[]).unwrap_err().is_decode());
    }

    #[test]
    fn invalid_utf8_name_is_decode_error() {
        assert!(decode_raw_index(&[5, 0xff, 0xfe]).unwrap_err().is_decode());
    }

    #[test]
    fn read_buffer_loops_over_short_reads() {
        let data: Vec<u8> = (0..=255).collect();
        let mut src = Trickle { data: &data, chunk: 7 };
        assert_eq!(read_buffer(&mut src, 256).unwrap(), data);
    }

    #[test]
    fn read_buffer_reports_truncation() {
        let mut src = Cursor::new(vec![1u8; 10]);
        assert!(read_buffer(&mut src, 11).unwrap_err().is_decode());
    }

    #[test]
    fn write_then_read_header() {
        let mut store = Cursor::new(Vec::new());
        let raw = RawIndex::new("dir/file.txt", 5);
        let entry = write_block(&mut store, &raw, b"12345").unwrap();

        assert_eq!(entry.header_start, 0);
        assert_eq!(entry.data_start, BLOCK_HEADER_LEN + entry.header_len as u64);
        assert_eq!(store.get_ref().len() as u64, entry.data_start + 5);

        store.set_position(0);
        let (back, len) = read_block_header(&mut store).unwrap();
        assert_eq!(back, raw);
        assert_eq!(len, entry.header_len);
        assert_eq!(store.position(), entry.data_start);
    }

    #[test]
    fn write_appends_after_existing_blocks() {
        let mut store = Cursor::new(Vec::new());
        let first = write_block(&mut store, &RawIndex::new("a", 3), b"aaa").unwrap();
        store.set_position(0); // writer must seek to the end itself
        let second = write_block(&mut store, &RawIndex::new("b", 2), b"bb").unwrap();
        assert_eq!(second.header_start, first.data_start + 3);
    }

    #[test]
    fn oversized_name_is_rejected() {
        let mut store = Cursor::new(Vec::new());
        let raw = RawIndex::new("n".repeat(MAX_INDEX_RECORD_LEN), 1);
        let err = write_block(&mut store, &raw, b"x").unwrap_err();
        assert!(matches!(err, ArchiveError::Precondition(_)));
        assert!(store.get_ref().is_empty());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut store = Cursor::new(Vec::new());
        let err = write_block(&mut store, &RawIndex::new("a", 4), b"abc").unwrap_err();
        assert!(matches!(err, ArchiveError::Precondition(_)));
    }

    proptest! {
        #[test]
        fn raw_index_roundtrips(name in "[^\\x00]{0,64}", length in any::<u64>()) {
            let raw = RawIndex::new(name, length);
            prop_assert_eq!(decode_raw_index(&encode_raw_index(&raw)).unwrap(), raw);
        }
    }
}
