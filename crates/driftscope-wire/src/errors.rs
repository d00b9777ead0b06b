// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

use thiserror::Error;

/// Error types for DriftScope wire encoding operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Binary payload serialization error
    #[error("Binary encoding error: {0}")]
    BinaryEncode(#[from] rmp_serde::encode::Error),

    /// Binary payload deserialization error
    #[error("Binary decoding error: {0}")]
    BinaryDecode(#[from] rmp_serde::decode::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is too small to contain a valid header
    #[error("Frame too small: {size} bytes (minimum {minimum} bytes)")]
    FrameTooSmall {
        /// The actual frame size in bytes.
        size: usize,
        /// The minimum required size in bytes.
        minimum: usize,
    },

    /// Magic bytes don't match expected value
    #[error("Invalid frame magic bytes: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// The expected magic bytes.
        expected: [u8; 4],
        /// The actual magic bytes found.
        found: [u8; 4],
    },

    /// Format version is not supported
    #[error("Unsupported frame format version: found {found}, supported up to {supported}")]
    UnsupportedVersion {
        /// The version found in the frame.
        found: u32,
        /// The maximum supported version.
        supported: u32,
    },

    /// Declared payload length doesn't match actual payload
    #[error("Frame length mismatch: declared {declared} bytes, actual {actual} bytes")]
    LengthMismatch {
        /// The length declared in the header.
        declared: u64,
        /// The actual length of the payload.
        actual: u64,
    },

    /// CRC32 checksum mismatch (data corruption detected)
    #[error("Frame checksum mismatch (data corruption): expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// The checksum stored in the frame.
        expected: u32,
        /// The checksum computed from the payload.
        computed: u32,
    },
}

/// Result type for DriftScope wire encoding operations
pub type Result<T> = std::result::Result<T, Error>;
