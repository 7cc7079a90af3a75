//! Compaction pass
//!
//! Merges every sealed segment into the fewest segments holding one record
//! per key, the latest one. The active segment is never read or rewritten.
//!
//! ## Pass
//! 1. Snapshot the sealed segments and reserve a block of fresh sequence
//!    ids, with appends paused so no rotation is half-done
//! 2. Resolve each key to its newest location among the snapshot
//! 3. Copy live records, in first-appearance order, into `tmp*` outputs
//! 4. fsync the outputs and rename them to their permanent names
//! 5. Swap the outputs in for the inputs in the segment sequence
//! 6. Delete the input files
//!
//! A sealed set that is already compacted (no dead records, no key held
//! twice, nothing to pack tighter) is left alone.
//!
//! Outputs carry ids newer than every input and older than anything sealed
//! after the snapshot. A crash before step 4 leaves only `tmp*` files, which
//! the next open discards. A crash after it leaves outputs that shadow
//! their inputs with identical values.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::error::{DriftError, Result};
use crate::storage::layout::{SegmentFileKind, SegmentId};
use crate::storage::record::Record;
use crate::storage::segment::{read_record, Segment, SegmentFile, ValuePointer};
use crate::storage::StoreInner;

/// Outcome of one compaction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Sealed segments consumed
    pub input_segments: usize,
    /// Segments written
    pub output_segments: usize,
    /// Live records copied
    pub records_written: u64,
    /// Total size of the inputs
    pub bytes_before: u64,
    /// Total size of the outputs
    pub bytes_after: u64,
    /// Wall time of the pass
    pub elapsed: Duration,
}

impl CompactionStats {
    /// Whether the pass did anything
    pub fn is_noop(&self) -> bool {
        self.input_segments == 0
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// A sealed segment as seen at snapshot time
struct SourceSegment {
    id: SegmentId,
    path: PathBuf,
    size: u64,
    index: HashMap<String, ValuePointer>,
}

/// Run one compaction pass over `store`
pub(crate) fn run_pass(store: &StoreInner) -> Result<CompactionStats> {
    let _pass = store.compaction_lock.lock();
    let started = Instant::now();
    let threshold = store.config.segment_size_threshold;

    // Step 1: snapshot + id reservation
    let (sources, mut ids) = {
        let _writer = store.writer.lock();
        let segments = store.segments.read();

        if segments.len() <= 1 {
            tracing::debug!("Compaction skipped: no sealed segments");
            return Ok(CompactionStats::default());
        }

        let sources: Vec<SourceSegment> = segments[..segments.len() - 1]
            .iter()
            .filter_map(|segment| {
                segment.id().map(|id| SourceSegment {
                    id,
                    path: SegmentFileKind::Sealed(id).path_in(store.dir()),
                    size: segment.size(),
                    index: segment.index().clone(),
                })
            })
            .collect();

        if already_compacted(&sources, threshold) {
            tracing::debug!(
                segments = sources.len(),
                "Compaction skipped: sealed segments hold no dead records"
            );
            return Ok(CompactionStats::default());
        }

        let reserved = reservation_size(&sources, threshold);
        let first = store.next_id.fetch_add(reserved, Ordering::SeqCst);
        (sources, first..first + reserved)
    };

    let mut writer = OutputWriter::new(store.dir(), threshold);

    // Steps 2-3: copy live records into temporary outputs
    let outputs = match copy_live_records(&sources, &mut writer, &mut ids)
        .and_then(|()| writer.finish())
    {
        Ok(outputs) => outputs,
        Err(e) => {
            writer.discard();
            return Err(e);
        }
    };

    // Step 4: commit outputs to permanent names
    let compacted = commit_outputs(store.dir(), outputs)?;

    let stats = CompactionStats {
        input_segments: sources.len(),
        output_segments: compacted.len(),
        records_written: compacted.iter().map(|s| s.key_count() as u64).sum(),
        bytes_before: sources.iter().map(|s| s.size).sum(),
        bytes_after: compacted.iter().map(|s| s.size()).sum(),
        elapsed: Duration::ZERO,
    };

    // Step 5: swap
    let consumed: HashSet<SegmentId> = sources.iter().map(|s| s.id).collect();
    let retired = {
        let mut segments = store.segments.write();
        let current = std::mem::take(&mut *segments);
        let (retired, kept): (Vec<Segment>, Vec<Segment>) = current
            .into_iter()
            .partition(|s| s.id().map_or(false, |id| consumed.contains(&id)));

        let mut next = compacted;
        next.extend(kept);
        *segments = next;
        retired
    };

    // Step 6: delete inputs. Readers that found them before the swap still
    // hold their file lock, so this waits for them.
    for segment in retired {
        let mut file = segment.file().lock();
        if let Err(e) = file.remove() {
            tracing::warn!(
                path = %file.path().display(),
                error = %e,
                "Could not delete compacted segment; newer output shadows it"
            );
        }
    }

    let stats = CompactionStats {
        elapsed: started.elapsed(),
        ..stats
    };

    tracing::info!(
        inputs = stats.input_segments,
        outputs = stats.output_segments,
        records = stats.records_written,
        bytes_reclaimed = stats.bytes_reclaimed(),
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "Compaction finished"
    );

    Ok(stats)
}

/// Whether a pass would only rewrite the same records into the same number
/// of segments
///
/// True when every line of every source is live, no key is held by two
/// sources, and every source but the newest is already past the threshold.
/// The output of a pass always satisfies this, so an idle store stops
/// rewriting itself after one pass.
fn already_compacted(sources: &[SourceSegment], threshold: u64) -> bool {
    let newest = sources.len().saturating_sub(1);
    let mut seen: HashSet<&str> = HashSet::new();

    sources.iter().enumerate().all(|(i, source)| {
        let live: u64 = source.index.values().map(|ptr| ptr.length).sum();
        live == source.size
            && (i == newest || source.size > threshold)
            && source.index.keys().all(|key| seen.insert(key.as_str()))
    })
}

/// Upper bound on the number of outputs a pass can produce
///
/// Every output but the last is larger than `threshold`, and outputs hold
/// at most the input bytes; each output also holds at least one key.
fn reservation_size(sources: &[SourceSegment], threshold: u64) -> u64 {
    let keys: u64 = sources.iter().map(|s| s.index.len() as u64).sum();
    let bytes: u64 = sources.iter().map(|s| s.size).sum();

    let by_size = if threshold == 0 {
        keys
    } else {
        bytes / threshold + 1
    };

    by_size.min(keys).max(1)
}

/// Copy the newest record of every key, oldest segment first and in file
/// order within a segment
fn copy_live_records(
    sources: &[SourceSegment],
    writer: &mut OutputWriter,
    ids: &mut std::ops::Range<u64>,
) -> Result<()> {
    // later segments overwrite earlier ones
    let mut latest: HashMap<&str, (usize, ValuePointer)> = HashMap::new();
    for (i, source) in sources.iter().enumerate() {
        for (key, ptr) in &source.index {
            latest.insert(key.as_str(), (i, *ptr));
        }
    }

    let mut files = sources
        .iter()
        .map(|s| File::open(&s.path))
        .collect::<std::io::Result<Vec<File>>>()?;

    let mut emitted: HashSet<&str> = HashSet::with_capacity(latest.len());

    for source in sources {
        let mut keys: Vec<(&String, &ValuePointer)> = source.index.iter().collect();
        keys.sort_by_key(|(_, ptr)| ptr.offset);

        for (key, _) in keys {
            if !emitted.insert(key.as_str()) {
                continue;
            }

            let Some(&(i, ptr)) = latest.get(key.as_str()) else {
                continue;
            };
            let record = read_record(&mut files[i], &sources[i].path, ptr)?;
            writer.append(&record, ids)?;
        }
    }

    Ok(())
}

/// Rename finished outputs into place, rolling back on failure
fn commit_outputs(dir: &Path, outputs: Vec<FinishedOutput>) -> Result<Vec<Segment>> {
    let mut renamed: Vec<PathBuf> = Vec::with_capacity(outputs.len());

    for output in &outputs {
        let final_path = SegmentFileKind::Sealed(output.id).path_in(dir);
        if let Err(e) = fs::rename(&output.temp_path, &final_path) {
            for path in renamed.iter().chain(outputs.iter().map(|o| &o.temp_path)) {
                let _ = fs::remove_file(path);
            }
            return Err(e.into());
        }
        renamed.push(final_path);
    }

    Ok(outputs
        .into_iter()
        .zip(renamed)
        .map(|(output, path)| {
            Segment::sealed(output.id, output.index, output.size, SegmentFile::closed(path))
        })
        .collect())
}

// =============================================================================
// Output Writer
// =============================================================================

/// A temporary output segment being written
struct OpenOutput {
    id: SegmentId,
    temp_path: PathBuf,
    writer: BufWriter<File>,
    index: HashMap<String, ValuePointer>,
    size: u64,
}

/// A temporary output segment, synced and closed
struct FinishedOutput {
    id: SegmentId,
    temp_path: PathBuf,
    index: HashMap<String, ValuePointer>,
    size: u64,
}

/// Writes compacted records into size-bounded `tmp*` files
struct OutputWriter {
    dir: PathBuf,
    threshold: u64,
    current: Option<OpenOutput>,
    finished: Vec<FinishedOutput>,
    /// Every temp file created, for cleanup on failure
    created: Vec<PathBuf>,
}

impl OutputWriter {
    fn new(dir: &Path, threshold: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            threshold,
            current: None,
            finished: Vec::new(),
            created: Vec::new(),
        }
    }

    /// Append a record, rotating to a new output past the threshold
    fn append(&mut self, record: &Record, ids: &mut std::ops::Range<u64>) -> Result<()> {
        if self
            .current
            .as_ref()
            .map_or(false, |out| out.size > self.threshold)
        {
            self.close_current()?;
        }

        if self.current.is_none() {
            let id = ids.next().map(SegmentId).ok_or_else(|| {
                DriftError::Compaction("reserved segment id range exhausted".to_string())
            })?;
            let temp_path = SegmentFileKind::Temp(id).path_in(&self.dir);
            self.created.push(temp_path.clone());

            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;

            self.current = Some(OpenOutput {
                id,
                temp_path,
                writer: BufWriter::new(file),
                index: HashMap::new(),
                size: 0,
            });
        }

        if let Some(out) = self.current.as_mut() {
            let bytes = record.encode();
            out.writer.write_all(&bytes)?;
            out.index.insert(
                record.key.clone(),
                ValuePointer {
                    offset: out.size,
                    length: bytes.len() as u64,
                },
            );
            out.size += bytes.len() as u64;
        }

        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(out) = self.current.take() {
            let file = out.writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            self.finished.push(FinishedOutput {
                id: out.id,
                temp_path: out.temp_path,
                index: out.index,
                size: out.size,
            });
        }
        Ok(())
    }

    /// Close the last output and hand back everything written
    fn finish(&mut self) -> Result<Vec<FinishedOutput>> {
        self.close_current()?;
        Ok(std::mem::take(&mut self.finished))
    }

    /// Best-effort removal of every temp file this writer created
    fn discard(&mut self) {
        self.current = None;
        for path in self.created.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove compaction output");
            }
        }
    }
}
