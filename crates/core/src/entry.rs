//! Transcript entry types
//!
//! A transcript entry records one delivery to a vat together with the
//! syscalls the vat made while handling it. The store treats the delivery,
//! syscall and result payloads as opaque JSON produced by the kernel.
//!
//! Entries are hashed and exported in their canonical encoding: compact
//! JSON with struct fields in declaration order and object keys sorted.
//! Compact JSON never contains a raw newline, which is what lets a span's
//! byte form use `\n` as the item separator.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One syscall made during a delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyscallRecord {
    /// Syscall as issued by the vat
    pub request: Value,
    /// Kernel's response, if the syscall returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl SyscallRecord {
    /// Syscall with a response
    pub fn new(request: Value, response: Value) -> Self {
        SyscallRecord {
            request,
            response: Some(response),
        }
    }

    /// Syscall without a response (e.g. a send)
    pub fn without_response(request: Value) -> Self {
        SyscallRecord {
            request,
            response: None,
        }
    }
}

/// A delivery and the syscalls it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Kernel-assigned delivery number
    pub delivery_num: u64,
    /// Description of the delivery
    pub delivery: Value,
    /// Syscalls in the order they were made
    #[serde(default)]
    pub syscalls: Vec<SyscallRecord>,
    /// Delivery result, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl TranscriptEntry {
    /// Entry for a delivery with no syscalls yet
    pub fn new(delivery_num: u64, delivery: Value) -> Self {
        TranscriptEntry {
            delivery_num,
            delivery,
            syscalls: Vec::new(),
            result: None,
        }
    }

    /// Append a syscall
    pub fn with_syscall(mut self, syscall: SyscallRecord) -> Self {
        self.syscalls.push(syscall);
        self
    }

    /// Set the delivery result
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Canonical encoding used for hashing, storage and export
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// Decode a canonical item
    pub fn decode(item: &[u8]) -> Result<Self> {
        serde_json::from_slice(item).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TranscriptEntry {
        TranscriptEntry::new(4, json!({"type": "message", "target": "o+0"}))
            .with_syscall(SyscallRecord::new(
                json!(["vatstoreGet", "key"]),
                json!(["ok", "value\nwith newline"]),
            ))
            .with_syscall(SyscallRecord::without_response(json!(["send", "ko12"])))
            .with_result(json!(["ok", null]))
    }

    #[test]
    fn test_encode_decode() {
        let entry = sample();
        let bytes = entry.encode().unwrap();
        assert_eq!(TranscriptEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_encoding_has_no_raw_newline() {
        let bytes = sample().encode().unwrap();
        assert!(!bytes.contains(&b'\n'));
    }

    #[test]
    fn test_encoding_is_canonical_for_object_keys() {
        let a = TranscriptEntry::new(1, json!({"b": 1, "a": 2}));
        let b = TranscriptEntry::new(1, serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap());
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TranscriptEntry::decode(b"not json").is_err());
    }
}
