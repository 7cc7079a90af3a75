//! Storage Module
//!
//! Log-structured segment storage.
//!
//! ## Responsibilities
//! - Append records to the active segment
//! - Rotate the active segment once it passes the size threshold
//! - Keep a key → offset index per segment
//! - Rebuild indexes from the files on startup
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ key,value\n                            │
//! │ key,value\n                            │
//! │ ... one line per insert, append-only   │
//! └────────────────────────────────────────┘
//! ```
//! No header, length prefix or checksum: the index records each line's
//! offset and length, and a rebuild re-derives both by scanning lines.

pub mod layout;
pub mod record;
pub mod segment;
mod store;

pub use layout::{SegmentFileKind, SegmentId};
pub use record::Record;
pub use segment::{FileHandle, RebuildReport, Segment, SegmentFile, SegmentMode, ValuePointer};
pub use store::{SegmentInfo, SegmentStore, StoreStats};

pub(crate) use store::StoreInner;
