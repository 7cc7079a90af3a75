//! Tests for SegmentStore
//!
//! These tests verify:
//! - Opening/creating store directories
//! - Insert/get round trips and last-write-wins
//! - Rotation of the active segment
//! - Persistence across close/reopen
//! - Boundary validation

use std::fs::OpenOptions;
use std::io::Write;

use driftkv::storage::SegmentMode;
use driftkv::{DriftError, SegmentStore};
use tempfile::TempDir;

use super::{file_names, setup_small_store, setup_temp_store, small_config, SMALL_THRESHOLD};

// =============================================================================
// Open/Create Tests
// =============================================================================

#[test]
fn test_open_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("new_store");

    assert!(!path.exists());

    let store = SegmentStore::open(small_config(&path)).unwrap();

    assert!(path.is_dir());
    assert!(path.join("current").exists());
    assert_eq!(store.dir(), path.as_path());
}

#[test]
fn test_open_empty_directory() {
    let (_temp, store) = setup_temp_store();

    let stats = store.stats();

    assert_eq!(store.segment_count(), 1);
    assert_eq!(stats.active_count(), 1);
    assert_eq!(stats.sealed_count(), 0);
    assert_eq!(store.next_segment_id(), 1);
}

#[test]
fn test_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let store = SegmentStore::open_path(temp_dir.path()).unwrap();

    assert_eq!(store.config().segment_size_threshold, 8 * 1024);
    store.close().unwrap();
}

#[test]
fn test_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = driftkv::Config::builder()
        .data_dir(temp_dir.path())
        .compaction_interval(std::time::Duration::ZERO)
        .build();

    let result = SegmentStore::open(config);

    assert!(matches!(result, Err(DriftError::Config(_))));
}

// =============================================================================
// Insert/Get Tests
// =============================================================================

#[test]
fn test_insert_get() {
    let (_temp, store) = setup_temp_store();

    store.insert("hello", "world").unwrap();

    assert_eq!(store.get("hello").unwrap(), Some("world".to_string()));
}

#[test]
fn test_get_nonexistent_key() {
    let (_temp, store) = setup_temp_store();

    assert_eq!(store.get("nonexistent").unwrap(), None);
}

#[test]
fn test_insert_overwrite() {
    let (_temp, store) = setup_temp_store();

    store.insert("key", "value1").unwrap();
    store.insert("key", "value2").unwrap();

    assert_eq!(store.get("key").unwrap(), Some("value2".to_string()));

    // both records stay in the file until compaction
    let stats = store.stats();
    assert_eq!(stats.segments[0].keys, 1);
    assert_eq!(stats.segments[0].size, 22);
}

#[test]
fn test_basic_scenario() {
    let (_temp, store) = setup_temp_store();

    store.insert("1", "test1").unwrap();
    store.insert("2", "test2").unwrap();
    store.insert("1", "test1-updated").unwrap();

    assert_eq!(store.get("1").unwrap(), Some("test1-updated".to_string()));
    assert_eq!(store.get("2").unwrap(), Some("test2".to_string()));
    assert_eq!(store.get("3").unwrap(), None);
}

#[test]
fn test_value_with_separator() {
    let (_temp, store) = setup_temp_store();

    store.insert("csv", "a,b,c").unwrap();

    assert_eq!(store.get("csv").unwrap(), Some("a,b,c".to_string()));
}

#[test]
fn test_empty_value() {
    let (_temp, store) = setup_temp_store();

    store.insert("empty", "").unwrap();

    assert_eq!(store.get("empty").unwrap(), Some(String::new()));
}

#[test]
fn test_invalid_key_rejected_without_write() {
    let (_temp, store) = setup_temp_store();

    let result = store.insert("bad,key", "value");

    assert!(matches!(result, Err(DriftError::InvalidKey(_))));
    assert_eq!(store.stats().total_bytes(), 0);
    assert_eq!(store.get("bad,key").unwrap(), None);
}

#[test]
fn test_invalid_value_rejected() {
    let (_temp, store) = setup_temp_store();

    let result = store.insert("key", "two\nlines");

    assert!(matches!(result, Err(DriftError::InvalidValue(_))));
    assert_eq!(store.get("key").unwrap(), None);
}

#[test]
fn test_unindexed_bytes_do_not_shift_later_pointers() {
    let (temp, store) = setup_temp_store();

    store.insert("a", "1").unwrap();

    // a record that reached the file but never made it into the index,
    // as left behind by an insert whose fsync failed
    let mut current = OpenOptions::new()
        .append(true)
        .open(temp.path().join("current"))
        .unwrap();
    current.write_all(b"lost,x\n").unwrap();
    drop(current);

    store.insert("b", "2").unwrap();
    store.insert("c", "3").unwrap();

    assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
    assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    assert_eq!(store.get("c").unwrap(), Some("3".to_string()));
    assert_eq!(store.get("lost").unwrap(), None);
    assert_eq!(store.stats().segments[0].size, 4 + 7 + 4 + 4);
}

#[test]
fn test_failed_insert_leaves_index_untouched() {
    let (temp, store) = setup_temp_store();
    store.insert("a", "1").unwrap();

    let result = store.insert("bad\nkey", "v");

    assert!(result.is_err());
    assert_eq!(store.stats().segments[0].size, 4);
    assert_eq!(
        std::fs::read_to_string(temp.path().join("current")).unwrap(),
        "a,1\n"
    );

    store.insert("b", "2").unwrap();
    assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
}

// =============================================================================
// Rotation Tests
// =============================================================================

/// "key00,value-00\n" is 15 bytes
fn insert_numbered(store: &SegmentStore, range: std::ops::Range<usize>) {
    for i in range {
        store
            .insert(&format!("key{:02}", i), &format!("value-{:02}", i))
            .unwrap();
    }
}

#[test]
fn test_rotation_creates_sealed_segments() {
    let (_temp, store) = setup_small_store();

    insert_numbered(&store, 0..20);

    let stats = store.stats();
    assert_eq!(stats.sealed_count(), 3);
    assert_eq!(stats.active_count(), 1);
    assert_eq!(store.next_segment_id(), 4);

    for i in 0..20 {
        assert_eq!(
            store.get(&format!("key{:02}", i)).unwrap(),
            Some(format!("value-{:02}", i))
        );
    }
}

#[test]
fn test_rotation_bound() {
    let (_temp, store) = setup_small_store();
    let max_record = 15;

    insert_numbered(&store, 0..50);

    let stats = store.stats();
    let last = stats.segments.len() - 1;
    for (i, segment) in stats.segments.iter().enumerate() {
        if i == last {
            assert_eq!(segment.mode, SegmentMode::Active);
        } else {
            assert!(matches!(segment.mode, SegmentMode::Sealed(_)));
            assert!(segment.size <= SMALL_THRESHOLD + max_record);
        }
    }
}

#[test]
fn test_sealed_ids_increase() {
    let (_temp, store) = setup_small_store();

    insert_numbered(&store, 0..30);

    let ids: Vec<u64> = store
        .stats()
        .segments
        .iter()
        .filter_map(|s| match s.mode {
            SegmentMode::Sealed(id) => Some(id.as_u64()),
            SegmentMode::Active => None,
        })
        .collect();

    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_rotation_files_on_disk() {
    let (temp, store) = setup_small_store();

    insert_numbered(&store, 0..12);

    assert_eq!(
        file_names(temp.path()),
        vec!["0000000001", "0000000002", "current"]
    );
}

#[test]
fn test_overwrite_across_rotation() {
    let (_temp, store) = setup_small_store();

    store.insert("shared", "old").unwrap();
    insert_numbered(&store, 0..10);
    assert!(store.stats().sealed_count() >= 1);

    store.insert("shared", "new").unwrap();

    assert_eq!(store.get("shared").unwrap(), Some("new".to_string()));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_preserves_data() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
        insert_numbered(&store, 0..20);
        store.insert("key03", "rewritten").unwrap();
        store.close().unwrap();
    }

    {
        let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();

        // 20 records fill three sealed segments; the rewrite rotated a fourth
        assert_eq!(store.stats().sealed_count(), 4);
        assert_eq!(store.next_segment_id(), 5); // continues from max + 1
        assert_eq!(store.get("key03").unwrap(), Some("rewritten".to_string()));
        assert_eq!(store.get("key19").unwrap(), Some("value-19".to_string()));
    }
}

#[test]
fn test_reopen_continues_appending() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
        store.insert("a", "1").unwrap();
        store.close().unwrap();
    }

    {
        let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
        store.insert("b", "2").unwrap();
        store.insert("a", "3").unwrap();
        store.close().unwrap();
    }

    let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
    assert_eq!(store.get("a").unwrap(), Some("3".to_string()));
    assert_eq!(store.get("b").unwrap(), Some("2".to_string()));
    assert_eq!(store.stats().segments[0].size, 12);
}

#[test]
fn test_drop_without_close() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
        store.insert("k", "v").unwrap();
    }

    let store = SegmentStore::open(small_config(temp_dir.path())).unwrap();
    assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
}

#[test]
fn test_sync() {
    let (_temp, store) = setup_temp_store();

    store.insert("k", "v").unwrap();
    store.sync().unwrap();

    assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
}
