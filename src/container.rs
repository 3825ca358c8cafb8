//! High-level [`ContainerFile`] API, the primary embedding surface.
//!
//! ```no_run
//! use sarc::{ContainerFile, StoredFileRecord};
//!
//! // Append
//! let mut c = ContainerFile::open("out.sarc")?;
//! c.add_file(&StoredFileRecord::new("docs", "readme.txt", b"Hello!".to_vec()))?;
//!
//! // Reopen, list, extract
//! let c = ContainerFile::open("out.sarc")?;
//! for name in c.list_names() {
//!     println!("{name}");
//! }
//! let rec = c.get_file(&format!("docs{}readme.txt", std::path::MAIN_SEPARATOR))?;
//! assert_eq!(rec.data, b"Hello!");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Concurrency
//! One writer, one process.  Every operation opens its own handle on the
//! backing file and closes it before returning.  Nothing guards against a
//! second writer; two writers appending at once will corrupt the container.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::block::{write_block, RawIndex};
use crate::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{ArchiveError, Result};
use crate::index::{ContainerIndex, IndexEntry};
use crate::record::StoredFileRecord;

// ── ContainerOptions ─────────────────────────────────────────────────────────

/// Configuration for [`ContainerFile::open_with_options`].
#[derive(Debug, Clone)]
pub struct ContainerOptions {
    pub codec:    CodecId,
    pub level:    i32,
    /// When false, payloads are stored with [`CodecId::None`].
    pub compress: bool,
    /// Where the replacement container is staged during removal.
    /// Defaults to the container's own directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            codec:    CodecId::Zstd,
            level:    DEFAULT_COMPRESSION_LEVEL,
            compress: true,
            temp_dir: None,
        }
    }
}

impl ContainerOptions {
    pub fn payload_codec(&self) -> CodecId {
        if self.compress { self.codec } else { CodecId::None }
    }
}

// ── ContainerFile ────────────────────────────────────────────────────────────

pub struct ContainerFile {
    path:    PathBuf,
    index:   ContainerIndex,
    options: ContainerOptions,
}

impl ContainerFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open an existing container, or prepare a new one if `path` does not
    /// exist yet.  Nothing is created on disk until the first append.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ContainerOptions::default())
    }

    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ContainerOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let index = if path.exists() {
            if !path.is_file() {
                return Err(ArchiveError::Precondition(format!(
                    "{} is not a regular file", path.display()
                )));
            }
            ContainerIndex::scan(&mut File::open(&path)?)?
        } else {
            ContainerIndex::new()
        };

        info!(path = %path.display(), entries = index.len(), "container opened");
        Ok(Self { path, index, options })
    }

    /// Create a fresh container holding `records`, replacing any file
    /// already at `path`.
    pub fn create<P: AsRef<Path>>(path: P, records: &[StoredFileRecord], options: ContainerOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let mut index = ContainerIndex::new();

        let mut writer = BufWriter::new(File::create(&path)?);
        append_records(&mut writer, records, &mut index, &options)?;
        writer.into_inner().map_err(|e| e.into_error())?;

        info!(path = %path.display(), entries = index.len(), "container created");
        Ok(Self { path, index, options })
    }

    // ── Write ────────────────────────────────────────────────────────────────

    pub fn add_file(&mut self, record: &StoredFileRecord) -> Result<IndexEntry> {
        self.append_with(|dest, index, options| {
            let entry = append_record(dest, record, options)?;
            index.append(entry.clone());
            Ok(entry)
        })
    }

    /// Append every record, in order.  Returns how many were written.
    ///
    /// If a write fails, blocks already written by this call stay indexed
    /// and any partially written block is cut off the end of the file.
    pub fn add_files(&mut self, records: &[StoredFileRecord]) -> Result<usize> {
        self.append_with(|dest, index, options| append_records(dest, records, index, options))
    }

    /// Snapshot the file at `source` and append it.
    pub fn add_source_file<P: AsRef<Path>>(&mut self, source: P) -> Result<IndexEntry> {
        let record = StoredFileRecord::from_source_file(source)?;
        self.add_file(&record)
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Extract the first stored file named `name` (case-insensitive).
    pub fn get_file(&self, name: &str) -> Result<StoredFileRecord> {
        let entry = self.index.lookup(name)?;
        self.get_file_by_entry(entry)
    }

    pub fn get_file_by_entry(&self, entry: &IndexEntry) -> Result<StoredFileRecord> {
        let mut file = File::open(&self.path)?;
        entry.extract(&mut file)
    }

    /// Extract every stored file into `dest` under its base name.
    /// Later entries with the same base name overwrite earlier ones.
    ///
    /// A stored name that is not a plain file name fails with
    /// [`ArchiveError::Precondition`] before anything is written for it.
    pub fn extract_all<P: AsRef<Path>>(&self, dest: P) -> Result<Vec<PathBuf>> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        let mut written = Vec::with_capacity(self.index.len());
        for entry in &self.index {
            let record = entry.extract(&mut file)?;
            let out = record.output_path(dest)?;
            record.save_to(&out)?;
            written.push(out);
        }
        Ok(written)
    }

    pub fn list_names(&self) -> Vec<&str> {
        self.index.names().collect()
    }

    // ── Remove ───────────────────────────────────────────────────────────────

    /// Rewrite the container without `to_remove`, then swap it into place.
    ///
    /// Survivors keep their order and their encoded payload bytes.  If
    /// anything fails before the swap the original file is untouched.  The
    /// swap itself is a rename; a crash between staging and rename leaves
    /// the staged copy next to the original.
    pub fn remove_files(&mut self, to_remove: &[IndexEntry]) -> Result<usize> {
        let removed = self.index.iter().filter(|e| to_remove.contains(e)).count();
        if removed == 0 {
            return Ok(0);
        }

        let temp_path = self.temp_path();
        if let Err(e) = self.stage_without(&temp_path, to_remove) {
            discard_temp(&temp_path);
            return Err(e);
        }

        if let Err(e) = replace_file(&temp_path, &self.path) {
            discard_temp(&temp_path);
            return Err(e);
        }

        self.index = ContainerIndex::scan(&mut File::open(&self.path)?)?;
        info!(path = %self.path.display(), removed, remaining = self.index.len(), "container rebuilt");
        Ok(removed)
    }

    /// Resolve each name (first match) and remove those entries.
    pub fn remove_names<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize> {
        let entries = names
            .iter()
            .map(|n| self.index.lookup(n.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        self.remove_files(&entries)
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }

    pub fn index(&self) -> &ContainerIndex { &self.index }

    pub fn options(&self) -> &ContainerOptions { &self.options }

    /// Total size of the backing file (0 if it does not exist yet).
    pub fn size_on_disk(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Run `write` against a buffered append handle.  On failure the file is
    /// cut back to the end of the last indexed block.
    fn append_with<T, F>(&mut self, write: F) -> Result<T>
    where
        F: FnOnce(&mut BufWriter<File>, &mut ContainerIndex, &ContainerOptions) -> Result<T>,
    {
        let mut writer = BufWriter::new(self.open_store_for_append()?);

        match write(&mut writer, &mut self.index, &self.options) {
            Ok(value) => {
                writer.into_inner().map_err(|e| e.into_error())?;
                Ok(value)
            }
            Err(e) => {
                drop(writer);
                self.truncate_to_index();
                Err(e)
            }
        }
    }

    fn open_store_for_append(&self) -> Result<File> {
        if let Ok(meta) = fs::metadata(&self.path) {
            if !meta.is_file() {
                return Err(ArchiveError::Precondition(format!(
                    "{} is not a regular file", self.path.display()
                )));
            }
            if meta.permissions().readonly() {
                return Err(ArchiveError::Precondition(format!(
                    "{} is read-only", self.path.display()
                )));
            }
        }
        Ok(OpenOptions::new().read(true).write(true).create(true).open(&self.path)?)
    }

    /// Cut the backing file back to the end of the last indexed block.
    fn truncate_to_index(&self) {
        let end = self.index.all().last().map_or(0, IndexEntry::block_end);
        let res = OpenOptions::new().write(true).open(&self.path).and_then(|f| f.set_len(end));
        if let Err(e) = res {
            warn!(path = %self.path.display(), end, error = %e, "could not drop partial block");
        }
    }

    fn stage_without(&self, temp_path: &Path, to_remove: &[IndexEntry]) -> Result<()> {
        let mut source = File::open(&self.path)?;
        let temp = OpenOptions::new().read(true).write(true).create_new(true).open(temp_path)?;
        let mut dest = BufWriter::new(temp);

        let staged = rebuild(&mut source, self.index.all(), |e| !to_remove.contains(e), &mut dest)?;

        let temp = dest.into_inner().map_err(|e| e.into_error())?;
        temp.sync_all()?;
        debug!(temp = %temp_path.display(), entries = staged.len(), "replacement staged");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        match &self.options.temp_dir {
            Some(dir) => staging_path(dir, &self.path),
            None => staging_path(&parent_dir(&self.path), &self.path),
        }
    }
}

// ── Free functions ───────────────────────────────────────────────────────────

/// Encode one record and append it as a block to `dest`.
///
/// The block is flushed before the entry is returned, so an entry always
/// describes bytes that have reached `dest`.
pub fn append_record<W: Write + Seek>(
    dest:    &mut W,
    record:  &StoredFileRecord,
    options: &ContainerOptions,
) -> Result<IndexEntry> {
    let payload = record.encode_with(options.payload_codec(), options.level)?;
    let raw = RawIndex::new(record.key(), payload.len() as u64);
    let entry = write_block(dest, &raw, &payload)?;
    dest.flush()?;
    Ok(entry)
}

/// Append each record as a block to `dest`, extending `index` as each
/// block lands.
pub fn append_records<W: Write + Seek>(
    dest:    &mut W,
    records: &[StoredFileRecord],
    index:   &mut ContainerIndex,
    options: &ContainerOptions,
) -> Result<usize> {
    for record in records {
        index.append(append_record(dest, record, options)?);
    }
    Ok(records.len())
}

/// Copy the blocks of `entries` accepted by `keep` from `source` into
/// `dest`, in order, and return the index of `dest`.
///
/// Payloads are copied as stored; they are never decoded or re-encoded.
pub fn rebuild<R, W, F>(source: &mut R, entries: &[IndexEntry], mut keep: F, dest: &mut W) -> Result<ContainerIndex>
where
    R: Read + Seek,
    W: Write + Seek,
    F: FnMut(&IndexEntry) -> bool,
{
    let mut index = ContainerIndex::new();
    for entry in entries {
        if !keep(entry) {
            continue;
        }
        let payload = entry.read_payload(source)?;
        let raw = RawIndex::new(entry.name.clone(), entry.length);
        index.append(write_block(dest, &raw, &payload)?);
    }
    dest.flush()?;
    Ok(index)
}

/// Move `staged` over `target`.  `target` is only ever replaced by a
/// rename, so it holds either the old or the new container.
fn replace_file(staged: &Path, target: &Path) -> Result<()> {
    match fs::rename(staged, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_over(staged, target),
        Err(e) => Err(e.into()),
    }
}

/// Cross-filesystem swap: copy `staged` next to `target`, sync it, then
/// rename the copy into place.
fn copy_over(staged: &Path, target: &Path) -> Result<()> {
    let sibling = staging_path(&parent_dir(target), target);
    debug!(from = %staged.display(), via = %sibling.display(), "staging directory is on another filesystem");

    let res = fs::copy(staged, &sibling)
        .and_then(|_| OpenOptions::new().write(true).open(&sibling)?.sync_all())
        .and_then(|_| fs::rename(&sibling, target));
    if let Err(e) = res {
        discard_temp(&sibling);
        return Err(e.into());
    }

    discard_temp(staged);
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
        _ => PathBuf::from("."),
    }
}

/// Unique hidden name for a staged copy of `target` inside `dir`.
fn staging_path(dir: &Path, target: &Path) -> PathBuf {
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "container".into());
    dir.join(format!(".{stem}.{}.tmp", Uuid::new_v4().simple()))
}

fn discard_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(temp = %path.display(), error = %e, "could not remove staged container"),
    }
}
