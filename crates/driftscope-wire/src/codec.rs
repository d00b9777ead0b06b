// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Frame codec for the query surface: JSON for debuggability, a compact
//! CRC-verified binary envelope for volume.
//!
//! Binary frame layout (20-byte header + payload):
//! - Bytes 0-3:   Magic "DSWR"
//! - Bytes 4-7:   Format version (u32 little-endian)
//! - Bytes 8-11:  CRC32 checksum of payload (u32 little-endian)
//! - Bytes 12-19: Payload length (u64 little-endian)
//! - Bytes 20+:   Payload (MessagePack-serialized value)
//!
//! Decoding verifies magic, version, declared length, and checksum before
//! touching the payload, so bit flips and partial writes surface as typed
//! errors instead of garbage values.

use crate::errors::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes identifying a DriftScope wire frame.
const FRAME_MAGIC: &[u8; 4] = b"DSWR";

/// Current format version for binary frames.
/// Increment when changing the header structure or payload serialization.
pub const FRAME_FORMAT_VERSION: u32 = 1;

/// Header size: magic(4) + version(4) + crc32(4) + length(8) = 20 bytes
const FRAME_HEADER_SIZE: usize = 20;

/// The encodings the query surface speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Human-readable JSON.
    Json,
    /// CRC-framed MessagePack.
    Binary,
}

/// Encode a value as JSON bytes.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a value from JSON bytes.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a value into a framed binary payload.
pub fn encode_binary<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(value)?;
    let checksum = crc32fast::hash(&payload);
    let length = payload.len() as u64;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(FRAME_MAGIC);
    frame.extend_from_slice(&FRAME_FORMAT_VERSION.to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Verify and decode a framed binary payload.
// SAFETY: try_into().unwrap() is safe - the length check above guarantees
// the slices [0..4], [4..8], [8..12], [12..20] exist.
#[allow(clippy::unwrap_used)]
pub fn decode_binary<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(Error::FrameTooSmall {
            size: frame.len(),
            minimum: FRAME_HEADER_SIZE,
        });
    }

    let magic: [u8; 4] = frame[0..4].try_into().unwrap();
    if &magic != FRAME_MAGIC {
        return Err(Error::InvalidMagic {
            expected: *FRAME_MAGIC,
            found: magic,
        });
    }

    let version = u32::from_le_bytes(frame[4..8].try_into().unwrap());
    if version > FRAME_FORMAT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: version,
            supported: FRAME_FORMAT_VERSION,
        });
    }

    let stored_checksum = u32::from_le_bytes(frame[8..12].try_into().unwrap());
    let declared_length = u64::from_le_bytes(frame[12..20].try_into().unwrap());
    let payload = &frame[FRAME_HEADER_SIZE..];

    let actual_length = payload.len() as u64;
    if declared_length != actual_length {
        return Err(Error::LengthMismatch {
            declared: declared_length,
            actual: actual_length,
        });
    }

    let computed_checksum = crc32fast::hash(payload);
    if stored_checksum != computed_checksum {
        return Err(Error::ChecksumMismatch {
            expected: stored_checksum,
            computed: computed_checksum,
        });
    }

    Ok(rmp_serde::from_slice(payload)?)
}

/// Encode with the requested format.
pub fn encode<T: Serialize>(value: &T, format: WireFormat) -> Result<Vec<u8>> {
    match format {
        WireFormat::Json => encode_json(value),
        WireFormat::Binary => encode_binary(value),
    }
}

/// Decode with the requested format.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: WireFormat) -> Result<T> {
    match format {
        WireFormat::Json => decode_json(bytes),
        WireFormat::Binary => decode_binary(bytes),
    }
}
