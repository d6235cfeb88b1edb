//! Artifact modes
//!
//! An artifact mode names a consumer of the store and thereby the set of
//! artifacts that consumer needs. The same enumeration serves two roles:
//! the retention mode a store is configured with (what compaction and
//! pruning must keep) and the mode of an export (what is shipped).
//!
//! | Mode | Needs |
//! |------|-------|
//! | `operational` | enough to restart every vat |
//! | `replay` | enough to replay from the oldest retained snapshot |
//! | `archival` | complete history |
//! | `debug` | complete history plus diagnostics |
//!
//! The artifact sets are nested in that order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retention / export class of artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactMode {
    /// Current state needed for restart
    #[default]
    Operational,
    /// Spans back to the oldest retained snapshot
    Replay,
    /// Every span, snapshot and bundle ever produced
    Archival,
    /// Archival plus diagnostic-only artifacts
    Debug,
}

impl ArtifactMode {
    /// All modes, smallest artifact set first
    pub const ALL: [ArtifactMode; 4] = [
        ArtifactMode::Operational,
        ArtifactMode::Replay,
        ArtifactMode::Archival,
        ArtifactMode::Debug,
    ];

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactMode::Operational => "operational",
            ArtifactMode::Replay => "replay",
            ArtifactMode::Archival => "archival",
            ArtifactMode::Debug => "debug",
        }
    }

    /// Validate and parse a mode name
    ///
    /// Callers that accept a mode from outside should go through here
    /// before touching any store.
    pub fn parse(value: &str) -> Result<Self> {
        value.parse()
    }

    /// Whether this mode keeps every artifact ever produced
    pub fn keeps_history(&self) -> bool {
        matches!(self, ArtifactMode::Archival | ArtifactMode::Debug)
    }

    /// Whether every artifact included by `other` is included by `self`
    pub fn covers(&self, other: ArtifactMode) -> bool {
        self.rank() >= other.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            ArtifactMode::Operational => 0,
            ArtifactMode::Replay => 1,
            ArtifactMode::Archival => 2,
            ArtifactMode::Debug => 3,
        }
    }
}

impl fmt::Display for ArtifactMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "operational" => Ok(ArtifactMode::Operational),
            "replay" => Ok(ArtifactMode::Replay),
            "archival" => Ok(ArtifactMode::Archival),
            "debug" => Ok(ArtifactMode::Debug),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}
