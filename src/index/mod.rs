//! In-memory catalog of the blocks in a container.
//!
//! The index is never stored as such: it is rebuilt on open by walking
//! every block header ([`ContainerIndex::scan`]) and extended in place as
//! the writer appends blocks ([`ContainerIndex::append`]).  Entry order is
//! always physical order.

pub mod tree;

use std::io::{Read, Seek, SeekFrom};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::block::{read_block_header, read_buffer, BLOCK_HEADER_LEN};
use crate::error::{ArchiveError, Result};
use crate::record::StoredFileRecord;

pub use tree::{build_directory_tree, DirectoryNode, DirectoryTree};

// ── IndexEntry ───────────────────────────────────────────────────────────────

/// Location of one stored file.
///
/// `data_start == header_start + 2 + header_len` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    /// Lookup key, as written by the record's `Display`.
    pub name:         String,
    /// Absolute offset of the first payload byte.
    pub data_start:   u64,
    /// Encoded payload size in bytes.
    pub length:       u64,
    /// Absolute offset of the block's u16 length prefix.
    pub header_start: u64,
    /// Encoded index record size (the value of the length prefix).
    pub header_len:   u16,
}

impl IndexEntry {
    /// Offset one past the last payload byte: where the next block starts.
    pub fn block_end(&self) -> u64 {
        self.data_start + self.length
    }

    /// Directory component of the entry name (`""` if there is none).
    pub fn directory(&self) -> &str {
        directory_of(&self.name)
    }

    /// Read the encoded payload without decoding it.
    pub fn read_payload<R: Read + Seek>(&self, src: &mut R) -> Result<Vec<u8>> {
        let len = usize::try_from(self.length).map_err(|_| {
            ArchiveError::decode(format!("{}: payload of {} bytes cannot be addressed", self.name, self.length))
        })?;
        src.seek(SeekFrom::Start(self.data_start))?;
        read_buffer(src, len)
    }

    /// Read and decode the stored file.
    pub fn extract<R: Read + Seek>(&self, src: &mut R) -> Result<StoredFileRecord> {
        let payload = self.read_payload(src)?;
        StoredFileRecord::from_encoded_block(&payload)
    }
}

/// Directory part of a stored name.  Both `/` and `\` separate.
pub fn directory_of(name: &str) -> &str {
    match name.rfind(|c| c == '/' || c == '\\') {
        Some(i) => &name[..i],
        None    => "",
    }
}

pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a.chars().flat_map(char::to_lowercase).eq(b.chars().flat_map(char::to_lowercase))
}

// ── ContainerIndex ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerIndex {
    entries: Vec<IndexEntry>,
}

impl ContainerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index by walking every block from offset 0.
    ///
    /// Only the length prefix and index record of each block are read; the
    /// payload is skipped with a seek.  An empty source yields an empty
    /// index.  Any malformed or truncated block fails the whole scan.
    pub fn scan<R: Read + Seek>(src: &mut R) -> Result<Self> {
        let end = src.seek(SeekFrom::End(0))?;
        let mut pos = src.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::new();

        while pos < end {
            let header_start = pos;
            let (raw, header_len) = read_block_header(src)?;
            let data_start = header_start + BLOCK_HEADER_LEN + header_len as u64;

            let block_end = data_start
                .checked_add(raw.length)
                .filter(|&e| e <= end)
                .ok_or_else(|| ArchiveError::decode(format!(
                    "block {} at offset {header_start}: payload of {} bytes runs past end of container ({end})",
                    raw.name, raw.length
                )))?;

            debug!(name = %raw.name, header_start, data_start, length = raw.length, "block scanned");
            entries.push(IndexEntry {
                name: raw.name,
                data_start,
                length: raw.length,
                header_start,
                header_len,
            });

            pos = src.seek(SeekFrom::Start(block_end))?;
        }

        info!(blocks = entries.len(), bytes = end, "container scanned");
        Ok(Self { entries })
    }

    /// Record a block the writer has just appended.
    pub fn append(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// First entry (in physical order) whose name matches, ignoring case.
    pub fn lookup(&self, name: &str) -> Result<&IndexEntry> {
        self.entries
            .iter()
            .find(|e| names_match(&e.name, name))
            .ok_or_else(|| ArchiveError::NotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// All entries in physical order.
    pub fn all(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, i: usize) -> Option<&IndexEntry> {
        self.entries.get(i)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Entries whose directory component equals `path`, ignoring case.
    pub fn by_directory<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        self.entries.iter().filter(move |e| names_match(e.directory(), path))
    }

    /// Unique directory components, in first-seen order.
    pub fn directories(&self) -> Vec<&str> {
        let mut dirs: Vec<&str> = Vec::new();
        for entry in &self.entries {
            let dir = entry.directory();
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// Entries whose name matches the regular expression `pattern`.
    pub fn search(&self, pattern: &str) -> Result<Vec<&IndexEntry>> {
        let re = Regex::new(pattern)?;
        Ok(self.entries.iter().filter(|e| re.is_match(&e.name)).collect())
    }

    pub fn search_regex<'a>(&'a self, re: &'a Regex) -> impl Iterator<Item = &'a IndexEntry> + 'a {
        self.entries.iter().filter(move |e| re.is_match(&e.name))
    }

    pub fn directory_tree(&self) -> DirectoryTree {
        build_directory_tree(self.names())
    }
}

impl<'a> IntoIterator for &'a ContainerIndex {
    type Item = &'a IndexEntry;
    type IntoIter = std::slice::Iter<'a, IndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{write_block, RawIndex};
    use std::io::{self, Cursor};

    fn store_with(blocks: &[(&str, &str)]) -> (Cursor<Vec<u8>>, ContainerIndex) {
        let mut store = Cursor::new(Vec::new());
        let mut index = ContainerIndex::new();
        for (name, payload) in blocks {
            let raw = RawIndex::new(*name, payload.len() as u64);
            index.append(write_block(&mut store, &raw, payload.as_bytes()).unwrap());
        }
        (store, index)
    }

    /// Counts the bytes handed out by `read`.
    struct CountingReader<R> {
        inner:      R,
        bytes_read: u64,
        reads:      usize,
    }

    impl<R: Read> Read for CountingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read += n as u64;
            self.reads += 1;
            Ok(n)
        }
    }

    impl<R: Seek> Seek for CountingReader<R> {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn scan_matches_incremental_index() {
        let (mut store, live) = store_with(&[
            ("a\\one.txt", "first"),
            ("a\\two.txt", "second payload"),
            ("b\\three.txt", ""),
        ]);
        let scanned = ContainerIndex::scan(&mut store).unwrap();
        assert_eq!(scanned, live);
        for e in scanned.iter() {
            assert_eq!(e.data_start, e.header_start + BLOCK_HEADER_LEN + e.header_len as u64);
        }
    }

    #[test]
    fn scan_of_empty_source_is_empty() {
        let index = ContainerIndex::scan(&mut Cursor::new(Vec::new())).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn scan_never_reads_payload_bytes() {
        let blocks: Vec<(String, String)> = (0..5)
            .map(|i| (format!("f{i}"), "p".repeat(1000 * (i + 1))))
            .collect();
        let refs: Vec<(&str, &str)> = blocks.iter().map(|(n, p)| (n.as_str(), p.as_str())).collect();
        let (store, _) = store_with(&refs);

        let mut counting = CountingReader { inner: store, bytes_read: 0, reads: 0 };
        let index = ContainerIndex::scan(&mut counting).unwrap();

        let header_bytes: u64 = index.iter().map(|e| BLOCK_HEADER_LEN + e.header_len as u64).sum();
        assert_eq!(index.len(), 5);
        assert_eq!(counting.bytes_read, header_bytes);
        assert!(counting.reads >= 2 * index.len());
    }

    #[test]
    fn truncated_payload_fails_scan() {
        let (store, _) = store_with(&[("a", "aaaa"), ("b", "bbbbbbbb")]);
        let mut bytes = store.into_inner();
        bytes.truncate(bytes.len() - 3);
        let err = ContainerIndex::scan(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn truncated_header_fails_scan() {
        let (store, _) = store_with(&[("a", "aaaa")]);
        let mut bytes = store.into_inner();
        bytes.push(0x09); // half a length prefix
        let err = ContainerIndex::scan(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn lookup_ignores_case_and_returns_first_match() {
        let (_, index) = store_with(&[("Dir\\Same.txt", "one"), ("dir\\same.TXT", "two")]);
        let hit = index.lookup("DIR\\SAME.TXT").unwrap();
        assert_eq!(hit.data_start, index.all()[0].data_start);
        assert!(index.lookup("dir\\other.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn directory_queries() {
        let (_, index) = store_with(&[
            ("root/a.txt", "1"),
            ("root/sub/b.txt", "2"),
            ("ROOT/c.txt", "3"),
            ("top.txt", "4"),
        ]);
        let in_root: Vec<&str> = index.by_directory("root").map(|e| e.name.as_str()).collect();
        assert_eq!(in_root, vec!["root/a.txt", "ROOT/c.txt"]);
        assert_eq!(index.directories(), vec!["root", "root/sub", "ROOT", ""]);
    }

    #[test]
    fn search_by_regex() {
        let (_, index) = store_with(&[("x/a.log", "1"), ("x/b.txt", "2"), ("y/c.log", "3")]);
        let logs: Vec<&str> = index.search(r"\.log$").unwrap().into_iter().map(|e| e.name.as_str()).collect();
        assert_eq!(logs, vec!["x/a.log", "y/c.log"]);

        let under_x = Regex::new("^x/").unwrap();
        assert_eq!(index.search_regex(&under_x).count(), 2);
        assert!(matches!(index.search("(").unwrap_err(), ArchiveError::Pattern(_)));
    }

    #[test]
    fn entry_reads_raw_payload() {
        let (mut store, index) = store_with(&[("a", "alpha"), ("b", "beta")]);
        let b = index.lookup("b").unwrap();
        assert_eq!(b.read_payload(&mut store).unwrap(), b"beta");
    }
}
