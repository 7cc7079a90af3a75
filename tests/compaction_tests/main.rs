//! Compaction tests
//!
//! Manual passes, background passes, and on-disk state after commit.


use std::collections::HashSet;
use std::fs;
use std::path::Path;

use driftkv::config::{Config, SyncStrategy};
use driftkv::storage::SegmentFileKind;
use driftkv::SegmentStore;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub const THRESHOLD: u64 = 64;

pub fn manual_config(path: &Path) -> Config {
    Config::builder()
        .data_dir(path)
        .segment_size_threshold(THRESHOLD)
        .sync_strategy(SyncStrategy::EveryWrite)
        .disable_background_compaction()
        .build()
}

pub fn setup_manual_store() -> (TempDir, SegmentStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = SegmentStore::open(manual_config(temp_dir.path())).unwrap();
    (temp_dir, store)
}

/// Insert `rounds` overwrites of keys k0..k{keys}; "k0,round0-0\n" is 12 bytes
pub fn insert_rounds(store: &SegmentStore, keys: usize, rounds: std::ops::Range<usize>) {
    for round in rounds {
        for i in 0..keys {
            store
                .insert(&format!("k{}", i), &format!("round{}-{}", round, i))
                .unwrap();
        }
    }
}

/// Keys of every record in every sealed file, duplicates included
pub fn sealed_keys_on_disk(dir: &Path) -> Vec<String> {
    let mut keys = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if let Some(SegmentFileKind::Sealed(_)) = SegmentFileKind::parse(&name) {
            let contents = fs::read_to_string(&path).unwrap();
            for line in contents.lines() {
                let (key, _) = line.split_once(',').unwrap();
                keys.push(key.to_string());
            }
        }
    }
    keys
}

pub fn assert_no_duplicate_sealed_keys(dir: &Path) {
    let keys = sealed_keys_on_disk(dir);
    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(keys.len(), unique.len(), "a key appears in more than one sealed record");
}
