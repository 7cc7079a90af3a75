//! # DriftKV
//!
//! An embeddable, log-structured key-value store with:
//! - Append-only segment files, one line per record
//! - An in-memory key → offset index per segment
//! - Size-bounded rotation of the active segment
//! - Background compaction with crash-safe commit
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SegmentStore                          │
//! │          insert → active segment, get → newest first        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Active    │          │   Sealed    │ ◄──── Compactor
//!   │  (append)   │          │ (read-only) │     (background)
//!   └─────────────┘          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use driftkv::{Config, SegmentStore};
//!
//! let config = Config::builder().data_dir("/tmp/driftkv").build();
//! let store = SegmentStore::open(config)?;
//!
//! store.insert("1", "test1")?;
//! assert_eq!(store.get("1")?, Some("test1".to_string()));
//!
//! store.close()?;
//! # Ok::<(), driftkv::DriftError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod compaction;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use compaction::CompactionStats;
pub use config::{Config, SyncStrategy};
pub use error::{DriftError, Result};
pub use storage::{SegmentStore, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
