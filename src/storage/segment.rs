//! Segment
//!
//! One append-only record log plus the in-memory index derived from it.
//!
//! The index, mode and write offset live in [`Segment`] and are only touched
//! under the store's sequence lock. The file itself lives in a shared
//! [`SegmentFile`] behind its own mutex, so reads and appends never hold the
//! sequence lock while doing I/O.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DriftError, Result};
use crate::storage::layout::{SegmentFileKind, SegmentId};
use crate::storage::record::{Record, TERMINATOR};

/// Byte range of one encoded record line inside a segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePointer {
    /// Offset of the first byte of the line
    pub offset: u64,
    /// Line length, terminator included
    pub length: u64,
}

/// Whether a segment still accepts appends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMode {
    /// The single mutable segment; unnumbered until sealed
    Active,
    /// Immutable, carrying its permanent sequence id
    Sealed(SegmentId),
}

/// State of a segment's OS file handle
#[derive(Debug)]
pub enum FileHandle {
    Closed,
    Append(File),
    Read(File),
}

/// Outcome of scanning a segment file at startup
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Records indexed
    pub records: u64,
    /// Malformed lines skipped
    pub corrupted: u64,
    /// Bytes of a partial trailing line removed from the active segment
    pub truncated_bytes: u64,
}

impl RebuildReport {
    /// Add another segment's counts to this one
    pub fn absorb(&mut self, other: &RebuildReport) {
        self.records += other.records;
        self.corrupted += other.corrupted;
        self.truncated_bytes += other.truncated_bytes;
    }
}

// =============================================================================
// SegmentFile
// =============================================================================

/// The on-disk half of a segment: its path and handle
#[derive(Debug)]
pub struct SegmentFile {
    path: PathBuf,
    handle: FileHandle,

    /// Set once compaction has retired this file
    removed: bool,
}

impl SegmentFile {
    /// Wrap an already opened handle
    pub fn with_handle(path: PathBuf, handle: FileHandle) -> Self {
        Self {
            path,
            handle,
            removed: false,
        }
    }

    /// A closed handle to an existing sealed file
    pub fn closed(path: PathBuf) -> Self {
        Self::with_handle(path, FileHandle::Closed)
    }

    /// Open (creating if needed) a file for appending
    pub fn open_append(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Ok(Self::with_handle(path, FileHandle::Append(file)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// Whether compaction has retired this file
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Append one encoded record at the end of the file, returning where it
    /// landed
    ///
    /// The offset is taken from the file length, not from the caller, so an
    /// earlier failure can never shift later pointers. A failed write is cut
    /// back to the previous length so no partial line survives.
    pub fn append(&mut self, record: &Record) -> Result<ValuePointer> {
        let file = match &mut self.handle {
            FileHandle::Append(file) => file,
            _ => {
                return Err(DriftError::Io(std::io::Error::new(
                    ErrorKind::Other,
                    format!("segment {} is not open for append", self.path.display()),
                )))
            }
        };

        let at = file.metadata()?.len();
        let bytes = record.encode();
        if let Err(e) = file.write_all(&bytes) {
            if let Err(truncate) = file.set_len(at) {
                tracing::error!(
                    path = %self.path.display(),
                    offset = at,
                    error = %truncate,
                    "Could not cut back partial record"
                );
                return Err(truncate.into());
            }
            return Err(e.into());
        }

        Ok(ValuePointer {
            offset: at,
            length: bytes.len() as u64,
        })
    }

    /// Drop everything past `len` (used to undo an append that could not be
    /// made durable)
    pub fn rollback_to(&mut self, len: u64) -> Result<()> {
        match &self.handle {
            FileHandle::Append(file) => Ok(file.set_len(len)?),
            _ => Err(DriftError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("segment {} is not open for append", self.path.display()),
            ))),
        }
    }

    /// Flush appended data to disk (no-op unless open for append)
    pub fn sync(&mut self) -> Result<()> {
        if let FileHandle::Append(file) = &mut self.handle {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Read the record at `ptr`
    ///
    /// A closed handle is opened read-only for the duration of the read and
    /// closed again afterwards, bounding the number of open descriptors.
    pub fn read_at(&mut self, ptr: ValuePointer) -> Result<Record> {
        let opened_lazily = matches!(self.handle, FileHandle::Closed);
        if opened_lazily {
            self.handle = FileHandle::Read(File::open(&self.path)?);
        }

        let result = match &mut self.handle {
            FileHandle::Append(file) | FileHandle::Read(file) => {
                read_record(file, &self.path, ptr)
            }
            FileHandle::Closed => Err(DriftError::Io(std::io::Error::new(
                ErrorKind::Other,
                format!("segment {} is closed", self.path.display()),
            ))),
        };

        if opened_lazily {
            self.handle = FileHandle::Closed;
        }

        result
    }

    /// Sync, close and rename to the sealed path
    ///
    /// The path is updated in the same critical section as the close, so a
    /// reader that locks this file afterwards opens the renamed file.
    pub fn seal(&mut self, sealed_path: PathBuf) -> Result<()> {
        self.sync()?;
        fs::rename(&self.path, &sealed_path)?;
        self.path = sealed_path;
        self.handle = FileHandle::Closed;
        Ok(())
    }

    /// Close and delete the file
    ///
    /// The file counts as retired even if the delete fails; readers that
    /// still hold a pointer into it retry against the new sequence.
    pub fn remove(&mut self) -> Result<()> {
        self.handle = FileHandle::Closed;
        self.removed = true;
        fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Release the OS handle without touching the file
    pub fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.handle = FileHandle::Closed;
        Ok(())
    }
}

/// Read exactly `ptr.length` bytes at `ptr.offset` and decode them
pub(crate) fn read_record(file: &mut File, path: &Path, ptr: ValuePointer) -> Result<Record> {
    file.seek(SeekFrom::Start(ptr.offset))?;

    let mut line = vec![0u8; ptr.length as usize];
    if let Err(e) = file.read_exact(&mut line) {
        return Err(match e.kind() {
            ErrorKind::UnexpectedEof => {
                DriftError::corrupt(display_name(path), ptr.offset, "short read")
            }
            _ => DriftError::Io(e),
        });
    }

    Record::decode(&line).map_err(|reason| DriftError::corrupt(display_name(path), ptr.offset, reason))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// =============================================================================
// Segment
// =============================================================================

/// A segment: mode, write offset and index, plus a shared file handle
#[derive(Debug)]
pub struct Segment {
    mode: SegmentMode,

    /// Bytes in the file. Only grows while Active.
    write_offset: u64,

    /// key → latest record within this segment
    index: HashMap<String, ValuePointer>,

    file: Arc<Mutex<SegmentFile>>,
}

impl Segment {
    /// Create an empty active segment in `dir`
    pub fn create_active(dir: &Path) -> Result<Self> {
        let path = SegmentFileKind::Active.path_in(dir);
        let file = SegmentFile::open_append(path)?;

        Ok(Self {
            mode: SegmentMode::Active,
            write_offset: 0,
            index: HashMap::new(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Reopen an existing active segment, rebuilding its index
    ///
    /// A partial trailing line left by a crash mid-append is truncated so the
    /// next append starts on a line boundary.
    pub fn open_active(path: PathBuf) -> Result<(Self, RebuildReport)> {
        let (index, mut report, valid_len, file_len) = rebuild_index(&path)?;

        let file = SegmentFile::open_append(path)?;
        if valid_len < file_len {
            if let FileHandle::Append(f) = file.handle() {
                f.set_len(valid_len)?;
            }
            report.truncated_bytes = file_len - valid_len;
            tracing::warn!(
                path = %file.path().display(),
                truncated_bytes = report.truncated_bytes,
                "Truncated partial record at end of active segment"
            );
        }

        Ok((
            Self {
                mode: SegmentMode::Active,
                write_offset: valid_len,
                index,
                file: Arc::new(Mutex::new(file)),
            },
            report,
        ))
    }

    /// Load a sealed segment, rebuilding its index
    pub fn open_sealed(id: SegmentId, path: PathBuf) -> Result<(Self, RebuildReport)> {
        let (index, mut report, valid_len, file_len) = rebuild_index(&path)?;
        if valid_len < file_len {
            // a sealed file is never appended to again; just skip the tail
            report.corrupted += 1;
            tracing::warn!(
                path = %path.display(),
                bytes = file_len - valid_len,
                "Sealed segment ends with a partial record"
            );
        }

        Ok((
            Self::sealed(id, index, file_len, SegmentFile::closed(path)),
            report,
        ))
    }

    /// Assemble a sealed segment whose index is already known
    pub fn sealed(
        id: SegmentId,
        index: HashMap<String, ValuePointer>,
        size: u64,
        file: SegmentFile,
    ) -> Self {
        Self {
            mode: SegmentMode::Sealed(id),
            write_offset: size,
            index,
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn mode(&self) -> SegmentMode {
        self.mode
    }

    /// Sequence id, `None` while active
    pub fn id(&self) -> Option<SegmentId> {
        match self.mode {
            SegmentMode::Active => None,
            SegmentMode::Sealed(id) => Some(id),
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode == SegmentMode::Active
    }

    /// Current file size in bytes
    pub fn size(&self) -> u64 {
        self.write_offset
    }

    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    pub fn lookup(&self, key: &str) -> Option<ValuePointer> {
        self.index.get(key).copied()
    }

    pub fn index(&self) -> &HashMap<String, ValuePointer> {
        &self.index
    }

    pub fn file(&self) -> &Arc<Mutex<SegmentFile>> {
        &self.file
    }

    /// Install a record that was just appended at `ptr`
    ///
    /// Any older pointer for the same key is replaced; its bytes stay in the
    /// file until compaction. The write offset follows the record's end.
    pub(crate) fn install(&mut self, key: String, ptr: ValuePointer) {
        self.index.insert(key, ptr);
        self.write_offset = ptr.offset + ptr.length;
    }

    /// Mark this segment sealed under `id`
    pub(crate) fn mark_sealed(&mut self, id: SegmentId) {
        self.mode = SegmentMode::Sealed(id);
    }
}

/// Scan a segment file from offset 0, returning
/// (index, report, bytes up to the last complete line, file length)
fn rebuild_index(path: &Path) -> Result<(HashMap<String, ValuePointer>, RebuildReport, u64, u64)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut index = HashMap::new();
    let mut report = RebuildReport::default();
    let mut offset = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(TERMINATOR, &mut line)? as u64;
        if n == 0 {
            break;
        }

        if line.last() != Some(&TERMINATOR) {
            // partial trailing line: stop here and let the caller decide
            break;
        }

        match Record::decode(&line) {
            Ok(record) => {
                index.insert(record.key, ValuePointer { offset, length: n });
                report.records += 1;
            }
            Err(reason) => {
                report.corrupted += 1;
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    reason,
                    "Skipping corrupt record"
                );
            }
        }

        offset += n;
    }

    tracing::debug!(
        path = %path.display(),
        records = report.records,
        keys = index.len(),
        corrupted = report.corrupted,
        "Rebuilt segment index"
    );

    Ok((index, report, offset, file_len))
}
