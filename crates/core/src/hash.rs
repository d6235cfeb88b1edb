//! Content hashing
//!
//! Every artifact identity in the store is derived from SHA-256:
//!
//! - bundles and snapshots: `SHA256(bytes)`
//! - transcript spans: a rolling hash over the span's items
//!
//! ```text
//! h0     = SHA256("")
//! h(i+1) = SHA256(h(i) || 0x0A || item(i))
//! ```
//!
//! where `h(i)` is the raw 32-byte digest and `item(i)` is the canonical
//! encoding of the i-th transcript entry. The rolling form lets the open
//! span carry an up-to-date hash without re-reading its entries.
//!
//! Hashes render as 64 lowercase hex characters, which is also their
//! serialized form.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A SHA-256 content hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a byte string
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentHash(digest.into())
    }

    /// Construct from a raw digest
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ContentHash(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash of a span with no items
    pub fn empty_span() -> Self {
        ContentHash::of(b"")
    }

    /// Extend a span hash by one item
    pub fn chain(&self, item: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(b"\n");
        hasher.update(item);
        ContentHash(hasher.finalize().into())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Only the lowercase form Display produces is accepted
        if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::invalid_identifier(s, "expected 64 lowercase hex characters"));
        }
        let mut out = [0u8; 32];
        for (byte, pair) in out.iter_mut().zip(s.as_bytes().chunks(2)) {
            *byte = (nibble(pair[0]) << 4) | nibble(pair[1]);
        }
        Ok(ContentHash(out))
    }
}

fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        _ => digit - b'a' + 10,
    }
}

impl TryFrom<String> for ContentHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

/// Incremental hasher for transcript spans
///
/// Mirrors the rolling hash stored on span records; used when a span is
/// rebuilt from its exported bytes.
#[derive(Debug, Clone, Copy)]
pub struct SpanHasher {
    current: ContentHash,
    items: u64,
}

impl SpanHasher {
    /// Start hashing an empty span
    pub fn new() -> Self {
        SpanHasher {
            current: ContentHash::empty_span(),
            items: 0,
        }
    }

    /// Add one item
    pub fn push(&mut self, item: &[u8]) {
        self.current = self.current.chain(item);
        self.items += 1;
    }

    /// Number of items hashed so far
    pub fn items(&self) -> u64 {
        self.items
    }

    /// Hash of the items pushed so far
    pub fn finish(&self) -> ContentHash {
        self.current
    }
}

impl Default for SpanHasher {
    fn default() -> Self {
        Self::new()
    }
}
