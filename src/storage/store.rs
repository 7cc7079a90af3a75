//! Segment Store
//!
//! Owns the ordered sequence of segments and routes every operation.
//!
//! ## Responsibilities
//! - Discover segment files on startup and rebuild their indexes
//! - Route inserts to the single active segment, rotating it when full
//! - Search segments newest → oldest for reads
//! - Own the background compactor's lifecycle

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::compaction::{self, CompactionStats, Compactor};
use crate::config::{Config, SyncStrategy};
use crate::error::{DriftError, Result};
use crate::storage::layout::{SegmentFileKind, SegmentId};
use crate::storage::record::Record;
use crate::storage::segment::{RebuildReport, Segment, SegmentFile, SegmentMode, ValuePointer};

/// An embeddable log-structured key-value store
///
/// ## Concurrency:
/// - `segments`: one RwLock over the sequence and every segment's index.
///   It is never held across file I/O.
/// - `writer`: serializes appends and rotations (single append path)
/// - Each segment file sits behind its own mutex. Readers take it after
///   releasing the sequence lock; a file retired by compaction is flagged
///   and the lookup is retried against the new sequence.
/// - All methods use `&self`; the store can be shared through an `Arc`.
pub struct SegmentStore {
    inner: Arc<StoreInner>,

    /// Background compaction task, if enabled
    compactor: Option<Compactor>,
}

/// State shared between the store and its compactor
pub(crate) struct StoreInner {
    pub(crate) config: Config,

    /// Segments ordered oldest → newest; the last one is active
    pub(crate) segments: RwLock<Vec<Segment>>,

    /// Serializes appends and rotations
    pub(crate) writer: Mutex<WriterState>,

    /// Next sequence id to hand out (sealing and compaction output)
    pub(crate) next_id: AtomicU64,

    /// Serializes compaction passes
    pub(crate) compaction_lock: Mutex<()>,

    /// What the startup scan found, summed over every segment
    recovery: RebuildReport,
}

/// Bookkeeping owned by whoever holds the writer lock
#[derive(Debug, Default)]
pub(crate) struct WriterState {
    /// Appends since the last fsync
    unsynced: usize,
}

/// Point-in-time description of one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub mode: SegmentMode,
    pub file_name: String,
    pub size: u64,
    pub keys: usize,
}

/// Point-in-time description of the whole store, oldest segment first
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub segments: Vec<SegmentInfo>,
}

impl StoreStats {
    pub fn sealed_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s.mode, SegmentMode::Sealed(_)))
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.segments.len() - self.sealed_count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }
}

impl SegmentStore {
    /// Open or create a store
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Delete leftover temporary compaction files
    /// 3. Rebuild the index of every sealed segment, oldest first
    /// 4. Reopen `current` for append (or create it)
    /// 5. Start the compactor
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir = config.data_dir.clone();

        let mut sealed_ids: Vec<SegmentId> = Vec::new();
        let mut has_active = false;

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let kind = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(SegmentFileKind::parse);

            match kind {
                Some(SegmentFileKind::Active) => has_active = true,
                Some(SegmentFileKind::Sealed(id)) => sealed_ids.push(id),
                Some(SegmentFileKind::Temp(_)) => {
                    // interrupted compaction: nothing was committed from it
                    tracing::warn!(path = %path.display(), "Discarding leftover compaction file");
                    fs::remove_file(&path)?;
                }
                None => {
                    tracing::warn!(path = %path.display(), "Ignoring unrecognized file in store directory");
                }
            }
        }

        sealed_ids.sort();

        let mut recovery = RebuildReport::default();
        let mut segments = Vec::with_capacity(sealed_ids.len() + 1);
        for id in &sealed_ids {
            let path = SegmentFileKind::Sealed(*id).path_in(&dir);
            let (segment, report) = Segment::open_sealed(*id, path)?;
            recovery.absorb(&report);
            segments.push(segment);
        }

        let active = if has_active {
            let (segment, report) = Segment::open_active(SegmentFileKind::Active.path_in(&dir))?;
            recovery.absorb(&report);
            segment
        } else {
            Segment::create_active(&dir)?
        };
        segments.push(active);

        // Next ID = max + 1, or 1 if nothing is sealed yet
        let next_id = sealed_ids.last().map(|id| id.as_u64() + 1).unwrap_or(1);

        tracing::info!(
            dir = %dir.display(),
            segments = segments.len(),
            next_id,
            records = recovery.records,
            corrupted = recovery.corrupted,
            truncated_bytes = recovery.truncated_bytes,
            "Opened segment store"
        );

        let inner = Arc::new(StoreInner {
            config,
            segments: RwLock::new(segments),
            writer: Mutex::new(WriterState::default()),
            next_id: AtomicU64::new(next_id),
            compaction_lock: Mutex::new(()),
            recovery,
        });

        let compactor = match inner.config.compaction_interval {
            Some(interval) => Some(Compactor::start(Arc::clone(&inner), interval)?),
            None => None,
        };

        Ok(Self { inner, compactor })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Insert or overwrite a key
    ///
    /// Steps:
    /// 1. Validate the record
    /// 2. Acquire the writer lock
    /// 3. Rotate if the active segment is past the threshold
    /// 4. Append to the active file (and fsync per strategy)
    /// 5. Install the new pointer in the active index
    ///
    /// If the fsync fails the record is cut back out of the file and the
    /// index is left untouched.
    pub fn insert(&self, key: &str, value: &str) -> Result<()> {
        let record = Record::new(key, value)?;

        let mut writer = self.inner.writer.lock();

        let (size, mut file) = {
            let segments = self.inner.segments.read();
            let active = active_segment(&segments)?;
            (active.size(), Arc::clone(active.file()))
        };

        if size > self.inner.config.segment_size_threshold {
            file = self.inner.rotate(&mut writer, &file)?;
        }

        // Index is only touched once the bytes are in the file
        let ptr = {
            let mut file = file.lock();
            let ptr = file.append(&record)?;
            writer.unsynced += 1;
            if self.inner.should_sync(writer.unsynced) {
                if let Err(e) = file.sync() {
                    if let Err(rollback) = file.rollback_to(ptr.offset) {
                        tracing::error!(
                            path = %file.path().display(),
                            offset = ptr.offset,
                            error = %rollback,
                            "Could not roll back unsynced record"
                        );
                    }
                    return Err(e);
                }
                writer.unsynced = 0;
            }
            ptr
        };

        let mut segments = self.inner.segments.write();
        let active = segments
            .last_mut()
            .ok_or_else(|| DriftError::Io(missing_active()))?;
        active.install(record.key, ptr);

        Ok(())
    }

    /// Get the current value of a key
    ///
    /// Returns:
    /// - `Ok(Some(value))`: found in the newest segment holding the key
    /// - `Ok(None)`: no segment holds the key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        loop {
            let hit = {
                let segments = self.inner.segments.read();
                segments.iter().rev().find_map(|segment| {
                    segment
                        .lookup(key)
                        .map(|ptr| (Arc::clone(segment.file()), ptr))
                })
            };

            let Some((file, ptr)) = hit else {
                return Ok(None);
            };

            let mut file = file.lock();
            if file.is_removed() {
                // compacted away since the lookup; the new sequence has it
                continue;
            }

            return read_checked(&mut file, key, ptr).map(Some);
        }
    }

    /// Run one compaction pass now
    ///
    /// Waits for an in-flight background pass to finish first.
    pub fn compact(&self) -> Result<CompactionStats> {
        compaction::run_pass(&self.inner)
    }

    /// Force the active segment to disk
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        let file = {
            let segments = self.inner.segments.read();
            Arc::clone(active_segment(&segments)?.file())
        };
        file.lock().sync()?;
        writer.unsynced = 0;
        Ok(())
    }

    /// Close the store gracefully
    ///
    /// Stops the compactor (letting an in-flight pass finish), syncs the
    /// active segment and releases every file handle.
    pub fn close(mut self) -> Result<()> {
        if let Some(compactor) = self.compactor.take() {
            compactor.shutdown();
        }

        let _writer = self.inner.writer.lock();
        let segments = self.inner.segments.read();
        for segment in segments.iter() {
            segment.file().lock().close()?;
        }

        tracing::info!(dir = %self.inner.config.data_dir.display(), "Closed segment store");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Describe every segment, oldest first
    pub fn stats(&self) -> StoreStats {
        let segments = self.inner.segments.read();
        StoreStats {
            segments: segments
                .iter()
                .map(|segment| SegmentInfo {
                    mode: segment.mode(),
                    file_name: match segment.mode() {
                        SegmentMode::Active => SegmentFileKind::Active.file_name(),
                        SegmentMode::Sealed(id) => SegmentFileKind::Sealed(id).file_name(),
                    },
                    size: segment.size(),
                    keys: segment.key_count(),
                })
                .collect(),
        }
    }

    /// Get the number of segments, active included
    pub fn segment_count(&self) -> usize {
        self.inner.segments.read().len()
    }

    /// Get the store directory
    pub fn dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Totals from the index rebuild done when the store was opened
    pub fn recovery_report(&self) -> &RebuildReport {
        &self.inner.recovery
    }

    /// Get the id the next sealed segment will receive
    pub fn next_segment_id(&self) -> u64 {
        self.inner.next_id.load(Ordering::SeqCst)
    }
}

impl Drop for SegmentStore {
    fn drop(&mut self) {
        if let Some(compactor) = self.compactor.take() {
            compactor.shutdown();
        }
    }
}

impl StoreInner {
    pub(crate) fn dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Seal the active segment and start a new one (writer lock held)
    ///
    /// Returns the new active segment's file.
    fn rotate(
        &self,
        writer: &mut WriterState,
        active_file: &Arc<Mutex<SegmentFile>>,
    ) -> Result<Arc<Mutex<SegmentFile>>> {
        let id = SegmentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let sealed_path: PathBuf = SegmentFileKind::Sealed(id).path_in(self.dir());

        active_file.lock().seal(sealed_path)?;
        writer.unsynced = 0;

        let fresh = Segment::create_active(self.dir())?;
        let fresh_file = Arc::clone(fresh.file());

        let mut segments = self.segments.write();
        let sealed = segments
            .last_mut()
            .ok_or_else(|| DriftError::Io(missing_active()))?;
        sealed.mark_sealed(id);
        let size = sealed.size();
        segments.push(fresh);
        drop(segments);

        tracing::info!(segment = %id, size, "Sealed active segment");
        Ok(fresh_file)
    }

    fn should_sync(&self, unsynced: usize) -> bool {
        match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => unsynced >= count,
        }
    }
}

/// Read the record at `ptr` and check it belongs to `key`
fn read_checked(file: &mut SegmentFile, key: &str, ptr: ValuePointer) -> Result<String> {
    let record = file.read_at(ptr)?;
    if record.key != key {
        return Err(DriftError::corrupt(
            file.path().display().to_string(),
            ptr.offset,
            format!("expected key {:?}, found {:?}", key, record.key),
        ));
    }
    Ok(record.value)
}

fn active_segment(segments: &[Segment]) -> Result<&Segment> {
    segments
        .last()
        .filter(|segment| segment.is_active())
        .ok_or_else(|| DriftError::Io(missing_active()))
}

fn missing_active() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, "store has no active segment")
}
