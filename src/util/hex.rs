//! # Hex Helpers
//!
//! Frame dumps in the debug log and captured telegrams in tests and
//! benchmarks are written as hex.
//!
//! ```rust
//! use mbus_master::util::hex::{decode_hex, format_hex_compact};
//!
//! let frame = decode_hex("10 40 05 45 16").unwrap();
//! assert_eq!(format_hex_compact(&frame), "10 40 05 45 16");
//! ```

use thiserror::Error;

/// Reasons a hex capture cannot be read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Invalid hex character: {0}")]
    InvalidCharacter(char),

    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Empty hex string")]
    EmptyString,
}

/// Reads a hex capture such as `"68 03 03 68 ..."` into bytes.
///
/// Whitespace between digits is ignored; either case is accepted.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(HexError::EmptyString);
    }
    if let Some(bad) = cleaned.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(HexError::InvalidCharacter(bad));
    }
    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|_| HexError::OddLength(cleaned.len()))
}

/// Space separated uppercase bytes, the form frame dumps are logged in.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_with_whitespace() {
        let hex = "68 31 31 68\n08";
        assert_eq!(decode_hex(hex).unwrap(), vec![0x68, 0x31, 0x31, 0x68, 0x08]);
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_hex_compact(&[0x68, 0x0a, 0xE5]), "68 0A E5");
        assert_eq!(format_hex_compact(&[]), "");
    }

    #[test]
    fn test_errors() {
        assert_eq!(decode_hex(""), Err(HexError::EmptyString));
        assert_eq!(decode_hex("1"), Err(HexError::OddLength(1)));
        assert_eq!(decode_hex("GG"), Err(HexError::InvalidCharacter('G')));
    }
}
