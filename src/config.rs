//! Configuration for DriftKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DriftError, Result};

/// Main configuration for a DriftKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every segment file of the store
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── current          (active segment)
    ///     ├── 0000000001       (sealed segments)
    ///     └── tmp0000000007    (in-flight compaction output)
    pub data_dir: PathBuf,

    /// Seal the active segment once it grows past this many bytes
    pub segment_size_threshold: u64,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Period of the background compactor. `None` disables the task.
    pub compaction_interval: Option<Duration>,
}

/// Sync strategy for appends to the active segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appends, and always on rotation and close
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./driftkv_data"),
            segment_size_threshold: 8 * 1024, // 8 KB
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            compaction_interval: Some(Duration::from_secs(3)),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject parameters the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if let Some(interval) = self.compaction_interval {
            if interval.is_zero() {
                return Err(DriftError::Config(
                    "compaction interval must be non-zero".to_string(),
                ));
            }
        }

        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(DriftError::Config(
                "sync strategy entry count must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size_threshold(mut self, bytes: u64) -> Self {
        self.config.segment_size_threshold = bytes;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the background compaction period
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.config.compaction_interval = Some(interval);
        self
    }

    /// Run without the background compactor
    pub fn disable_background_compaction(mut self) -> Self {
        self.config.compaction_interval = None;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
