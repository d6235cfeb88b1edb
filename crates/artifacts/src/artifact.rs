//! Artifact identifiers
//!
//! Every exportable unit has a stable, human-readable name that doubles as
//! its file name inside an export archive:
//!
//! | Kind | Name |
//! |------|------|
//! | transcript span | `transcript.<vat>.<start>.<end>` |
//! | snapshot | `snapshot.<vat>.<position>` |
//! | diagnostic | `diagnostic.<vat>.<name>` |
//! | bundle | `bundle.<bundleID>` |
//!
//! `ArtifactName` orders the way exports list artifacts: vats ascending,
//! within a vat by position with a snapshot before a span that starts at
//! the same position, diagnostics after everything positional, and bundles
//! last in ID order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use vatstore_core::{BundleId, DiagnosticName, Error, Result, VatId};

/// Kind tag of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A transcript span
    Transcript,
    /// A heap snapshot
    Snapshot,
    /// A debug-only diagnostic blob
    Diagnostic,
    /// A code bundle
    Bundle,
}

impl ArtifactKind {
    /// Name prefix of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::Snapshot => "snapshot",
            ArtifactKind::Diagnostic => "diagnostic",
            ArtifactKind::Bundle => "bundle",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArtifactName {
    /// Transcript span `[start_pos, end_pos)` of a vat
    Span {
        /// Owning vat
        vat_id: VatId,
        /// First position
        start_pos: u64,
        /// One past the last position
        end_pos: u64,
    },
    /// Snapshot of a vat at a position
    Snapshot {
        /// Owning vat
        vat_id: VatId,
        /// Transcript position
        position: u64,
    },
    /// Diagnostic blob of a vat
    Diagnostic {
        /// Owning vat
        vat_id: VatId,
        /// Diagnostic name
        name: DiagnosticName,
    },
    /// Installed bundle
    Bundle(BundleId),
}

impl ArtifactName {
    /// Kind of the named artifact
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactName::Span { .. } => ArtifactKind::Transcript,
            ArtifactName::Snapshot { .. } => ArtifactKind::Snapshot,
            ArtifactName::Diagnostic { .. } => ArtifactKind::Diagnostic,
            ArtifactName::Bundle(_) => ArtifactKind::Bundle,
        }
    }

    /// Owning vat, if the artifact belongs to one
    pub fn vat_id(&self) -> Option<&VatId> {
        match self {
            ArtifactName::Span { vat_id, .. }
            | ArtifactName::Snapshot { vat_id, .. }
            | ArtifactName::Diagnostic { vat_id, .. } => Some(vat_id),
            ArtifactName::Bundle(_) => None,
        }
    }

    fn sort_key(&self) -> (u8, &str, u64, u8, u64, String) {
        match self {
            ArtifactName::Snapshot { vat_id, position } => {
                (0, vat_id.as_str(), *position, 0, 0, String::new())
            }
            ArtifactName::Span {
                vat_id,
                start_pos,
                end_pos,
            } => (0, vat_id.as_str(), *start_pos, 1, *end_pos, String::new()),
            ArtifactName::Diagnostic { vat_id, name } => {
                (0, vat_id.as_str(), u64::MAX, 2, 0, name.to_string())
            }
            ArtifactName::Bundle(id) => (1, "", 0, 0, 0, id.to_string()),
        }
    }
}

impl Ord for ArtifactName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ArtifactName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactName::Span {
                vat_id,
                start_pos,
                end_pos,
            } => write!(f, "transcript.{}.{}.{}", vat_id, start_pos, end_pos),
            ArtifactName::Snapshot { vat_id, position } => {
                write!(f, "snapshot.{}.{}", vat_id, position)
            }
            ArtifactName::Diagnostic { vat_id, name } => {
                write!(f, "diagnostic.{}.{}", vat_id, name)
            }
            ArtifactName::Bundle(id) => write!(f, "bundle.{}", id),
        }
    }
}

fn parse_position(name: &str, field: &str) -> Result<u64> {
    field
        .parse()
        .map_err(|_| Error::invalid_identifier(name, "malformed position"))
}

impl FromStr for ArtifactName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["transcript", vat, start, end] => {
                let start_pos = parse_position(s, start)?;
                let end_pos = parse_position(s, end)?;
                if end_pos < start_pos {
                    return Err(Error::invalid_identifier(s, "span ends before it starts"));
                }
                Ok(ArtifactName::Span {
                    vat_id: VatId::new(*vat)?,
                    start_pos,
                    end_pos,
                })
            }
            ["snapshot", vat, position] => Ok(ArtifactName::Snapshot {
                vat_id: VatId::new(*vat)?,
                position: parse_position(s, position)?,
            }),
            ["diagnostic", vat, name] => Ok(ArtifactName::Diagnostic {
                vat_id: VatId::new(*vat)?,
                name: DiagnosticName::new(*name)?,
            }),
            ["bundle", id] => Ok(ArtifactName::Bundle(id.parse()?)),
            _ => Err(Error::invalid_identifier(s, "unrecognized artifact name")),
        }
    }
}

impl TryFrom<String> for ArtifactName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ArtifactName> for String {
    fn from(name: ArtifactName) -> Self {
        name.to_string()
    }
}
