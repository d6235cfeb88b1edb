//! Core identifier types
//!
//! This module defines the identifiers used throughout the store:
//! - [`VatId`]: Identifier of an isolated unit of execution
//! - [`BundleId`]: Content-derived identifier of an installed code bundle
//! - [`DiagnosticName`]: Name of a debug-only diagnostic artifact
//!
//! Identifiers are embedded in storage keys and artifact names, where `.`
//! acts as a separator. They are therefore restricted to ASCII
//! alphanumerics, `-` and `_`.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a vat identifier or diagnostic name
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Prefix of every bundle identifier (format version 1, SHA-256 content hash)
pub const BUNDLE_ID_PREFIX: &str = "b1-";

fn validate_identifier(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_identifier(value, "must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::invalid_identifier(
            value,
            format!("longer than {} bytes", MAX_IDENTIFIER_LEN),
        ));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(Error::invalid_identifier(
            value,
            "only ASCII alphanumerics, '-' and '_' are allowed",
        ));
    }
    Ok(())
}

/// Identifier of a vat
///
/// Vats are ordered by plain byte-wise comparison of their identifiers.
/// Every node sorts the same way, which is all export ordering needs.
///
/// # Examples
///
/// ```
/// use vatstore_core::types::VatId;
///
/// let v7 = VatId::new("v7").unwrap();
/// assert_eq!(v7.as_str(), "v7");
/// assert!(VatId::new("v7.bad").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VatId(String);

impl VatId {
    /// Create a vat identifier, validating its characters
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(VatId(id))
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VatId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VatId::new(s)
    }
}

impl TryFrom<String> for VatId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        VatId::new(value)
    }
}

impl From<VatId> for String {
    fn from(id: VatId) -> Self {
        id.0
    }
}

/// Identifier of an installed bundle
///
/// A bundle ID is a pure function of the bundle bytes: `b1-` followed by
/// the lowercase hex SHA-256 of the bytes. Two bundles with the same ID
/// have identical content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleId(ContentHash);

impl BundleId {
    /// Derive the bundle ID of the given bytes
    pub fn for_bytes(bytes: &[u8]) -> Self {
        BundleId(ContentHash::of(bytes))
    }

    /// Wrap an already computed content hash
    pub fn from_hash(hash: ContentHash) -> Self {
        BundleId(hash)
    }

    /// Content hash the identifier is derived from
    pub fn content_hash(&self) -> ContentHash {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", BUNDLE_ID_PREFIX, self.0)
    }
}

impl FromStr for BundleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix(BUNDLE_ID_PREFIX)
            .ok_or_else(|| Error::invalid_identifier(s, "bundle IDs start with 'b1-'"))?;
        let hash = hex
            .parse::<ContentHash>()
            .map_err(|_| Error::invalid_identifier(s, "malformed bundle hash"))?;
        Ok(BundleId(hash))
    }
}

impl TryFrom<String> for BundleId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BundleId> for String {
    fn from(id: BundleId) -> Self {
        id.to_string()
    }
}

/// Name of a diagnostic artifact recorded for a vat
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiagnosticName(String);

impl DiagnosticName {
    /// Create a diagnostic name, validating its characters
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(DiagnosticName(name))
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagnosticName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DiagnosticName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        DiagnosticName::new(value)
    }
}

impl From<DiagnosticName> for String {
    fn from(name: DiagnosticName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vat_id_accepts_simple_names() {
        for id in ["v1", "v7", "vat-zoe", "bootstrap_0"] {
            assert_eq!(VatId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_vat_id_rejects_separators_and_empty() {
        assert!(VatId::new("").is_err());
        assert!(VatId::new("v1.2").is_err());
        assert!(VatId::new("v 1").is_err());
        assert!(VatId::new("x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_vat_id_ordering_is_bytewise() {
        let mut ids: Vec<VatId> = ["v7", "v10", "v1"]
            .into_iter()
            .map(|s| VatId::new(s).unwrap())
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|v| v.as_str()).collect();
        assert_eq!(sorted, vec!["v1", "v10", "v7"]);
    }

    #[test]
    fn test_vat_id_serde_validates() {
        let ok: VatId = serde_json::from_str("\"v3\"").unwrap();
        assert_eq!(ok.as_str(), "v3");
        assert!(serde_json::from_str::<VatId>("\"v.3\"").is_err());
    }

    #[test]
    fn test_bundle_id_display_and_parse() {
        let id = BundleId::for_bytes(b"export default 42;");
        let text = id.to_string();
        assert!(text.starts_with("b1-"));
        assert_eq!(text.len(), 3 + 64);
        assert_eq!(text.parse::<BundleId>().unwrap(), id);
    }

    #[test]
    fn test_bundle_id_is_pure_function_of_bytes() {
        assert_eq!(BundleId::for_bytes(b"abc"), BundleId::for_bytes(b"abc"));
        assert_ne!(BundleId::for_bytes(b"abc"), BundleId::for_bytes(b"abd"));
    }

    #[test]
    fn test_bundle_id_rejects_malformed() {
        assert!("b2-00".parse::<BundleId>().is_err());
        assert!("b1-zz".parse::<BundleId>().is_err());
        assert!("b1-".parse::<BundleId>().is_err());
    }
}
