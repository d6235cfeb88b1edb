//! On-disk byte format of the commit log.
//!
//! The log is a header followed by one frame per committed batch:
//!
//! ```text
//! header: magic "VSLG" | format version (u32 LE)
//! frame:  payload length (u32 LE) | CRC32 of payload (u32 LE) | payload
//! payload: bincode(CommitRecord)
//! ```
//!
//! A frame whose bytes end before its declared length is a torn write
//! from a crash mid-commit; the reader stops there and reports the offset
//! so the log can be truncated. A complete frame whose CRC disagrees is
//! corruption.

use crate::batch::{Mutation, WriteBatch};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes at the start of every commit log
pub const LOG_MAGIC: &[u8; 4] = b"VSLG";

/// Current commit log format version
pub const LOG_FORMAT_VERSION: u32 = 1;

/// Size of the log header
pub const LOG_HEADER_SIZE: usize = 8;

/// Size of a frame header (length + CRC)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Errors decoding the commit log
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Header missing or wrong magic
    #[error("invalid commit log header")]
    BadHeader,

    /// Header names a format this build cannot read
    #[error("unsupported commit log format version {0}")]
    UnsupportedVersion(u32),

    /// Frame checksum does not match its payload
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the frame
        offset: usize,
        /// CRC stored in the frame
        expected: u32,
        /// CRC of the payload read
        actual: u32,
    },

    /// Payload too large for the 32-bit length field
    #[error("commit of {0} bytes exceeds the frame size limit")]
    Oversized(usize),

    /// Payload could not be decoded
    #[error("undecodable frame at offset {offset}: {message}")]
    Decode {
        /// Offset of the frame
        offset: usize,
        /// Decoder message
        message: String,
    },
}

/// One committed batch as stored in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit version produced by this batch
    pub version: u64,
    /// Mutations in key order
    pub mutations: Vec<(String, Mutation)>,
}

impl CommitRecord {
    /// Record for a batch about to be committed
    pub fn from_batch(batch: &WriteBatch, version: u64) -> Self {
        CommitRecord {
            version,
            mutations: batch
                .iter()
                .map(|(k, m)| (k.clone(), m.clone()))
                .collect(),
        }
    }
}

/// Encode the log header
pub fn encode_header() -> [u8; LOG_HEADER_SIZE] {
    let mut header = [0u8; LOG_HEADER_SIZE];
    header[..4].copy_from_slice(LOG_MAGIC);
    LittleEndian::write_u32(&mut header[4..], LOG_FORMAT_VERSION);
    header
}

/// Validate the log header
pub fn decode_header(bytes: &[u8]) -> Result<(), FrameError> {
    if bytes.len() < LOG_HEADER_SIZE || &bytes[..4] != LOG_MAGIC {
        return Err(FrameError::BadHeader);
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != LOG_FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encode one commit record as a frame
pub fn encode_frame(record: &CommitRecord) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(record).map_err(|e| FrameError::Decode {
        offset: 0,
        message: e.to_string(),
    })?;
    let mut frame = vec![0u8; FRAME_HEADER_SIZE];
    LittleEndian::write_u32(&mut frame[0..4], frame_len(payload.len())?);
    LittleEndian::write_u32(&mut frame[4..8], crc32fast::hash(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Payload length as stored in a frame header
fn frame_len(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::Oversized(len))
}

/// Result of scanning a log body
#[derive(Debug, Default)]
pub struct DecodedLog {
    /// Complete, verified records in log order
    pub records: Vec<CommitRecord>,
    /// Offset just past the last complete frame
    pub valid_len: usize,
    /// Whether trailing bytes formed an incomplete frame
    pub torn_tail: bool,
}

/// Decode every frame after the header
///
/// `bytes` is the whole file including the header.
pub fn decode_frames(bytes: &[u8]) -> Result<DecodedLog, FrameError> {
    decode_header(bytes)?;
    let mut offset = LOG_HEADER_SIZE;
    let mut log = DecodedLog {
        valid_len: offset,
        ..DecodedLog::default()
    };

    while offset < bytes.len() {
        if bytes.len() - offset < FRAME_HEADER_SIZE {
            log.torn_tail = true;
            break;
        }
        let len = LittleEndian::read_u32(&bytes[offset..offset + 4]) as usize;
        let expected = LittleEndian::read_u32(&bytes[offset + 4..offset + 8]);
        let start = offset + FRAME_HEADER_SIZE;
        if bytes.len() - start < len {
            log.torn_tail = true;
            break;
        }
        let payload = &bytes[start..start + len];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }
        let record: CommitRecord =
            bincode::deserialize(payload).map_err(|e| FrameError::Decode {
                offset,
                message: e.to_string(),
            })?;
        log.records.push(record);
        offset = start + len;
        log.valid_len = offset;
    }

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u64) -> CommitRecord {
        let mut batch = WriteBatch::new();
        batch.put(format!("k{}", version), vec![version as u8; 3]);
        batch.delete("gone");
        CommitRecord::from_batch(&batch, version)
    }

    fn log_with(records: &[CommitRecord]) -> Vec<u8> {
        let mut bytes = encode_header().to_vec();
        for r in records {
            bytes.extend(encode_frame(r).unwrap());
        }
        bytes
    }

    #[test]
    fn test_frame_length_limit() {
        assert_eq!(frame_len(12), Ok(12));
        assert_eq!(frame_len(u32::MAX as usize), Ok(u32::MAX));
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            frame_len(u32::MAX as usize + 1),
            Err(FrameError::Oversized(u32::MAX as usize + 1))
        );
    }

    #[test]
    fn test_decode_complete_log() {
        let records = vec![record(1), record(2)];
        let bytes = log_with(&records);
        let log = decode_frames(&bytes).unwrap();
        assert_eq!(log.records, records);
        assert_eq!(log.valid_len, bytes.len());
        assert!(!log.torn_tail);
    }

    #[test]
    fn test_torn_tail_is_reported_not_fatal() {
        let mut bytes = log_with(&[record(1)]);
        let good_len = bytes.len();
        let frame = encode_frame(&record(2)).unwrap();
        bytes.extend_from_slice(&frame[..frame.len() - 2]);

        let log = decode_frames(&bytes).unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.valid_len, good_len);
        assert!(log.torn_tail);
    }

    #[test]
    fn test_flipped_byte_is_corruption() {
        let mut bytes = log_with(&[record(1)]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            decode_frames(&bytes),
            Err(FrameError::ChecksumMismatch { offset: LOG_HEADER_SIZE, .. })
        ));
    }

    #[test]
    fn test_header_checks() {
        assert_eq!(decode_header(b"NOPE\x01\0\0\0"), Err(FrameError::BadHeader));
        let mut header = encode_header();
        header[4] = 9;
        assert_eq!(decode_header(&header), Err(FrameError::UnsupportedVersion(9)));
    }
}
