//! Directory layout
//!
//! Every file in a store directory is one of:
//! - `current`: the active segment
//! - `0000000042`: a sealed segment, named by its sequence id
//! - `tmp0000000042`: an uncommitted compaction output, discarded on open
//!
//! Ordering comes from the parsed [`SegmentId`], never from the file name
//! string. The fixed-width encoding keeps directory listings readable in
//! the same order.

use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the active segment file
pub const ACTIVE_FILE_NAME: &str = "current";

/// Prefix marking an uncommitted compaction output
pub const TEMP_PREFIX: &str = "tmp";

/// Digits in an encoded sequence id
pub const ID_WIDTH: usize = 10;

/// Sequence number of a sealed segment
///
/// Ids are handed out from a single increasing counter, so a larger id
/// always holds newer data than a smaller one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = ID_WIDTH)
    }
}

/// What a file in the store directory is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFileKind {
    Active,
    Sealed(SegmentId),
    Temp(SegmentId),
}

impl SegmentFileKind {
    /// Classify a directory entry by name
    /// "current" → Active, "0000000042" → Sealed(42), "tmp0000000042" → Temp(42)
    pub fn parse(name: &str) -> Option<Self> {
        if name == ACTIVE_FILE_NAME {
            return Some(Self::Active);
        }

        if let Some(digits) = name.strip_prefix(TEMP_PREFIX) {
            return parse_id(digits).map(Self::Temp);
        }

        parse_id(name).map(Self::Sealed)
    }

    /// File name for this kind
    pub fn file_name(&self) -> String {
        match self {
            Self::Active => ACTIVE_FILE_NAME.to_string(),
            Self::Sealed(id) => id.to_string(),
            Self::Temp(id) => format!("{}{}", TEMP_PREFIX, id),
        }
    }

    /// Full path of this file inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

fn parse_id(digits: &str) -> Option<SegmentId> {
    if digits.len() < ID_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(SegmentId)
}
