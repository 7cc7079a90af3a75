//! Compaction Module
//!
//! Reclaims space held by overwritten records.
//!
//! ## Responsibilities
//! - Merge sealed segments, keeping only the latest value per key
//! - Commit the merged result atomically (temp names + rename)
//! - Run periodically on a background thread

mod compactor;
mod merge;

pub use compactor::Compactor;
pub use merge::CompactionStats;

pub(crate) use merge::run_pass;
