//! Tests for segment file naming

use std::path::Path;

use driftkv::storage::layout::{SegmentFileKind, SegmentId, ACTIVE_FILE_NAME, ID_WIDTH};

#[test]
fn test_segment_id_is_zero_padded() {
    assert_eq!(SegmentId(42).to_string(), "0000000042");
    assert_eq!(SegmentId(1).to_string().len(), ID_WIDTH);
}

#[test]
fn test_file_names() {
    assert_eq!(SegmentFileKind::Active.file_name(), ACTIVE_FILE_NAME);
    assert_eq!(SegmentFileKind::Sealed(SegmentId(7)).file_name(), "0000000007");
    assert_eq!(SegmentFileKind::Temp(SegmentId(7)).file_name(), "tmp0000000007");
}

#[test]
fn test_parse_known_names() {
    assert_eq!(SegmentFileKind::parse("current"), Some(SegmentFileKind::Active));
    assert_eq!(
        SegmentFileKind::parse("0000000042"),
        Some(SegmentFileKind::Sealed(SegmentId(42)))
    );
    assert_eq!(
        SegmentFileKind::parse("tmp0000000042"),
        Some(SegmentFileKind::Temp(SegmentId(42)))
    );
}

#[test]
fn test_parse_rejects_unknown_names() {
    assert_eq!(SegmentFileKind::parse("notes.txt"), None);
    assert_eq!(SegmentFileKind::parse("42"), None);
    assert_eq!(SegmentFileKind::parse("tmp"), None);
    assert_eq!(SegmentFileKind::parse("tmpabc"), None);
    assert_eq!(SegmentFileKind::parse("000000004x"), None);
}

#[test]
fn test_name_order_matches_id_order() {
    let ids = [1u64, 9, 10, 99, 100, 12345, 9_999_999_999];

    let mut names: Vec<String> = ids.iter().map(|&id| SegmentId(id).to_string()).collect();
    names.sort();

    let parsed: Vec<u64> = names
        .iter()
        .map(|n| match SegmentFileKind::parse(n) {
            Some(SegmentFileKind::Sealed(id)) => id.as_u64(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();

    assert_eq!(parsed, ids.to_vec());
}

#[test]
fn test_path_in_directory() {
    let path = SegmentFileKind::Sealed(SegmentId(3)).path_in(Path::new("/data"));

    assert_eq!(path, Path::new("/data/0000000003"));
}
