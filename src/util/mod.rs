//! # Utility Modules
//!
//! Hex encoding and decoding used for frame dumps in logs and for test corpora.

pub mod hex;

pub use hex::{decode_hex, format_hex_compact, HexError};
