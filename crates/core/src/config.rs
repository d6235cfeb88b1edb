//! Store configuration
//!
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! artifact_mode = "replay"
//! compress_snapshots = true
//! compression_level = 3
//! max_span_entries = 1000
//! compact_on_snapshot = true
//!
//! [durability]
//! mode = "batched"
//! batch_size = 64
//! ```

use crate::error::{Error, Result};
use crate::mode::ArtifactMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default zstd level for snapshot compression
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// When committed batches are fsynced by a file-backed host store.
///
/// | Mode | fsync | Data loss window |
/// |------|-------|------------------|
/// | None | never | everything since the OS last flushed |
/// | Strict | every commit | none |
/// | Batched | every `batch_size` commits | up to `batch_size - 1` cranks |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Never fsync
    None,
    /// fsync after every commit
    Strict,
    /// fsync after every `batch_size` commits
    Batched {
        /// Commits between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Whether the commit with the given sequence number must be synced
    pub fn should_sync(&self, commit_seq: u64) -> bool {
        match self {
            DurabilityMode::None => false,
            DurabilityMode::Strict => true,
            DurabilityMode::Batched { batch_size } => {
                let n = (*batch_size).max(1) as u64;
                commit_seq % n == 0
            }
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Strict
    }
}

/// Configuration shared by the artifact stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Retention mode: what compaction and pruning must keep
    pub artifact_mode: ArtifactMode,
    /// Store snapshot heaps zstd-compressed
    pub compress_snapshots: bool,
    /// zstd level used when `compress_snapshots` is set
    pub compression_level: i32,
    /// Roll the current span over once it holds this many entries
    pub max_span_entries: Option<u64>,
    /// Compact a vat's transcript right after each snapshot
    pub compact_on_snapshot: bool,
    /// fsync policy of file-backed stores
    pub durability: DurabilityMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            artifact_mode: ArtifactMode::Operational,
            compress_snapshots: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_span_entries: None,
            compact_on_snapshot: false,
            durability: DurabilityMode::Strict,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_span_entries == Some(0) {
            return Err(Error::Config("max_span_entries must be at least 1".into()));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level {} outside 1..=22",
                self.compression_level
            )));
        }
        if let DurabilityMode::Batched { batch_size: 0 } = self.durability {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
