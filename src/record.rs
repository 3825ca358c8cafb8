//! [`StoredFileRecord`]: one archived file, held fully in memory.
//!
//! A record is the unit the codec encodes into a block payload.  It carries
//! the origin metadata of the source file alongside the raw bytes; the
//! container never interprets either.

use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFileRecord {
    /// Folder the file lives in, as recorded at add-time.
    pub directory:       String,
    /// File name without the folder.
    pub name:            String,
    /// Full path the file was read from.  Informational only.
    pub original_path:   String,
    pub created:         DateTime<Utc>,
    pub modified:        DateTime<Utc>,
    /// When the record was captured for archiving.
    pub archived:        DateTime<Utc>,
    pub original_length: u64,
    pub data:            Vec<u8>,
}

impl StoredFileRecord {
    /// Build a record from bytes already in memory.  All timestamps are now.
    pub fn new(directory: impl Into<String>, name: impl Into<String>, data: Vec<u8>) -> Self {
        let directory = directory.into();
        let name = name.into();
        let now = Utc::now();
        Self {
            original_path:   join_key(&directory, &name),
            directory,
            name,
            created:         now,
            modified:        now,
            archived:        now,
            original_length: data.len() as u64,
            data,
        }
    }

    /// Snapshot an existing file: metadata plus its full contents.
    pub fn from_source_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound(path.display().to_string()),
            _ => ArchiveError::Io(e),
        })?;
        if !meta.is_file() {
            return Err(ArchiveError::Precondition(format!(
                "{} is not a regular file", path.display()
            )));
        }

        let name = path.file_name()
            .ok_or_else(|| ArchiveError::Precondition(format!(
                "{} has no file name", path.display()
            )))?
            .to_string_lossy()
            .into_owned();
        let directory = path.parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let modified: DateTime<Utc> = meta.modified()?.into();
        // Not every filesystem records a birth time.
        let created: DateTime<Utc> = meta.created().map(DateTime::<Utc>::from).unwrap_or(modified);
        let data = fs::read(path)?;

        Ok(Self {
            directory,
            name,
            original_path:   path.display().to_string(),
            created,
            modified,
            archived:        Utc::now(),
            original_length: data.len() as u64,
            data,
        })
    }

    /// The lookup key for this record: `directory` + separator + `name`.
    pub fn key(&self) -> String {
        join_key(&self.directory, &self.name)
    }

    // ── Codec ────────────────────────────────────────────────────────────────

    /// Encode with the default codec (Zstd).  If `data` is already
    /// compressed the result can be slightly larger than the input.
    pub fn to_encoded_block(&self) -> Result<Vec<u8>> {
        self.encode_with(CodecId::Zstd, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn encode_with(&self, codec: CodecId, level: i32) -> Result<Vec<u8>> {
        Ok(codec::serialize(self, codec, level)?)
    }

    pub fn from_encoded_block(bytes: &[u8]) -> Result<Self> {
        codec::deserialize(bytes)
            .map_err(|e| ArchiveError::decode(format!("file record: {e}")))
    }

    // ── Payload access ───────────────────────────────────────────────────────

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    pub fn open_as_stream(&self) -> Cursor<&[u8]> {
        Cursor::new(self.data.as_slice())
    }

    /// Path of this record's file inside `dest`.
    ///
    /// The stored name must be a single plain file name.  Names that are
    /// empty, absolute, or carry `..` or a separator are rejected.
    pub fn output_path<P: AsRef<Path>>(&self, dest: P) -> Result<PathBuf> {
        let mut parts = Path::new(&self.name).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(file)), None) if file == self.name.as_str() => {
                Ok(dest.as_ref().join(file))
            }
            _ => Err(ArchiveError::Precondition(format!(
                "stored name {:?} is not a plain file name", self.name
            ))),
        }
    }
}

impl fmt::Display for StoredFileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Identity is the (directory, name) pair.
impl PartialEq for StoredFileRecord {
    fn eq(&self, other: &Self) -> bool {
        platform_eq(&self.directory, &other.directory) && platform_eq(&self.name, &other.name)
    }
}

impl Eq for StoredFileRecord {}

impl PartialEq<str> for StoredFileRecord {
    fn eq(&self, key: &str) -> bool {
        platform_eq(&self.key(), key)
    }
}

impl PartialEq<&str> for StoredFileRecord {
    fn eq(&self, key: &&str) -> bool {
        platform_eq(&self.key(), key)
    }
}

pub(crate) fn join_key(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_owned()
    } else {
        format!("{directory}{MAIN_SEPARATOR}{name}")
    }
}

/// Path comparison following the host convention: case-insensitive on
/// Windows, exact elsewhere.
fn platform_eq(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::{Read, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn encode_decode_preserves_all_fields() {
        let rec = StoredFileRecord::new("docs", "a.txt", b"hello record".to_vec());
        let bytes = rec.to_encoded_block().unwrap();
        let back = StoredFileRecord::from_encoded_block(&bytes).unwrap();

        assert_eq!(back.directory, rec.directory);
        assert_eq!(back.name, rec.name);
        assert_eq!(back.original_path, rec.original_path);
        assert_eq!(back.created, rec.created);
        assert_eq!(back.modified, rec.modified);
        assert_eq!(back.archived, rec.archived);
        assert_eq!(back.original_length, 12);
        assert_eq!(back.data, rec.data);
    }

    #[test]
    fn truncated_block_is_a_decode_error() {
        let rec = StoredFileRecord::new("docs", "a.txt", vec![7u8; 4096]);
        let bytes = rec.to_encoded_block().unwrap();
        let err = StoredFileRecord::from_encoded_block(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn from_source_file_snapshots_contents() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"source bytes").unwrap();
        tmp.flush().unwrap();

        let rec = StoredFileRecord::from_source_file(tmp.path()).unwrap();
        assert_eq!(rec.data, b"source bytes");
        assert_eq!(rec.original_length, 12);
        assert_eq!(rec.name, tmp.path().file_name().unwrap().to_string_lossy());
        assert_eq!(rec.directory, tmp.path().parent().unwrap().to_string_lossy());
        assert_eq!(rec.key(), tmp.path().display().to_string());
    }

    #[test]
    fn missing_source_is_not_found() {
        let err = StoredFileRecord::from_source_file("/definitely/not/here.bin").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn equality_is_by_directory_and_name() {
        let a = StoredFileRecord::new("dir", "x.bin", vec![1]);
        let b = StoredFileRecord::new("dir", "x.bin", vec![2, 3]);
        let c = StoredFileRecord::new("dir", "y.bin", vec![1]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let key = format!("dir{MAIN_SEPARATOR}x.bin");
        assert!(a == *key.as_str());
        assert_eq!(a.to_string(), key);
    }

    #[test]
    fn stream_and_save_expose_payload() {
        let rec = StoredFileRecord::new("", "p.bin", b"payload".to_vec());
        let mut out = Vec::new();
        rec.open_as_stream().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        let dest = NamedTempFile::new().unwrap();
        rec.save_to(dest.path()).unwrap();
        assert_eq!(fs::read(dest.path()).unwrap(), b"payload");
    }

    #[test]
    fn output_path_stays_inside_dest() {
        let dest = Path::new("out");
        let ok = StoredFileRecord::new("d", "a.txt", vec![]);
        assert_eq!(ok.output_path(dest).unwrap(), dest.join("a.txt"));

        for bad in ["../escaped.txt", "/etc/passwd", "sub/a.txt", "..", ".", "", "a.txt/"] {
            let rec = StoredFileRecord::new("d", bad, vec![]);
            let err = rec.output_path(dest).unwrap_err();
            assert!(matches!(err, ArchiveError::Precondition(_)), "{bad:?}");
        }
    }

    proptest! {
        #[test]
        fn any_record_roundtrips(
            dir in "[a-zA-Z0-9_/]{0,24}",
            name in "[a-zA-Z0-9_.-]{1,24}",
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            lz4 in any::<bool>(),
        ) {
            let rec = StoredFileRecord::new(dir, name, data);
            let codec = if lz4 { CodecId::Lz4 } else { CodecId::Zstd };
            let back = StoredFileRecord::from_encoded_block(&rec.encode_with(codec, 1).unwrap()).unwrap();
            prop_assert_eq!(&back, &rec);
            prop_assert_eq!(back.data, rec.data);
            prop_assert_eq!(back.archived, rec.archived);
        }
    }
}
