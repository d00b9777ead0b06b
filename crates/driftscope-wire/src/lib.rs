// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// DriftScope Wire - Query-Surface Encodings

//! # DriftScope Wire
//!
//! Wire encodings for the DriftScope query surface. The RPC layer ships
//! every query response in one of two formats:
//!
//! - **JSON** for debuggability and browser clients
//! - **Binary**: a compact CRC32-verified frame around a MessagePack
//!   payload, for high-volume consumers
//!
//! Both formats carry the same serde data model from the `driftscope`
//! crate, so a value round-trips unchanged through either.
//!
//! ## Example
//!
//! ```rust
//! use driftscope_wire::{decode, encode, WireFormat};
//! use driftscope::TimeWindow;
//!
//! let window = TimeWindow::new(0, 1_000);
//! let bytes = encode(&window, WireFormat::Binary).unwrap();
//! let decoded: TimeWindow = decode(&bytes, WireFormat::Binary).unwrap();
//! assert_eq!(decoded, window);
//! ```

pub mod codec;
pub mod errors;

pub use codec::{
    decode, decode_binary, decode_json, encode, encode_binary, encode_json, WireFormat,
    FRAME_FORMAT_VERSION,
};
pub use errors::{Error, Result};
