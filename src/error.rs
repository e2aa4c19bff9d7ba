//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur in the mbus-master crate.
//!
//! Every failure is scoped to a single frame, telegram or transaction; none of
//! them leaves the engine unusable for the next request.

use thiserror::Error;

/// Represents the different error types that can occur in the M-Bus crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MBusError {
    /// The leading byte matches none of the frame start delimiters.
    #[error("Framing error: unexpected start byte 0x{0:02X}")]
    FramingError(u8),

    /// Fewer bytes are available than the frame declares. Not a protocol
    /// violation: the caller supplies more bytes and decodes again.
    #[error("Incomplete frame: {needed} more byte(s) required")]
    IncompleteFrame { needed: usize },

    /// Length bytes disagree, or the frame is not terminated by the stop byte.
    #[error("Length mismatch: {0}")]
    LengthMismatch(String),

    /// Indicates a checksum mismatch.
    #[error("Invalid checksum: expected 0x{expected:02X}, calculated 0x{calculated:02X}")]
    ChecksumError { expected: u8, calculated: u8 },

    /// An outbound frame cannot be represented on the wire.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The telegram header cannot be read in full.
    #[error("Truncated telegram: {needed} byte(s) needed, {available} available")]
    TruncatedTelegram { needed: usize, available: usize },

    /// A data record runs past the end of the payload or is structurally invalid.
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: usize, reason: String },

    /// The control information field is not one this crate can parse.
    #[error("Unsupported control information 0x{0:02X}")]
    UnsupportedControlInformation(u8),

    /// A response came from a different device than the one addressed.
    #[error("Address mismatch: expected {expected}, received {received}")]
    AddressMismatch { expected: String, received: String },

    /// A primary address outside the range accepted for the operation.
    #[error("Invalid primary address {0}")]
    InvalidAddress(u8),

    /// Indicates an invalid secondary address string or mask.
    #[error("Invalid secondary address: {0}")]
    InvalidSecondaryAddress(String),

    /// No response arrived within the configured timeout.
    #[error("Timeout waiting for response")]
    Timeout,

    /// Every attempt of a transaction failed; `last` is the failure of the final attempt.
    #[error("Retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<MBusError> },

    /// A well-formed frame arrived that does not answer the request.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// More than one slave answered a secondary address selection.
    #[error("Collision during secondary address selection")]
    SelectionCollision,

    /// No slave answered a secondary address selection.
    #[error("No device matched the secondary address selection")]
    NoDeviceSelected,

    /// The bus is held by another exchange.
    #[error("Bus busy")]
    BusBusy,

    /// Indicates an error raised by the underlying byte channel.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Invalid engine or registry configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The device registry has no entry for the key.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device registry could not be loaded or updated.
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Indicates an invalid hexadecimal string was provided.
    #[error("Invalid hexadecimal string: {0}")]
    HexError(String),

    /// Indicates an invalid manufacturer code.
    #[error("Invalid manufacturer: {0}")]
    InvalidManufacturer(String),
}

impl MBusError {
    /// True for failures of a single attempt that a retry of the same request may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MBusError::Timeout
                | MBusError::ChecksumError { .. }
                | MBusError::LengthMismatch(_)
                | MBusError::FramingError(_)
        )
    }
}

impl From<std::io::Error> for MBusError {
    fn from(err: std::io::Error) -> Self {
        MBusError::ChannelError(err.to_string())
    }
}

impl From<serde_json::Error> for MBusError {
    fn from(err: serde_json::Error) -> Self {
        MBusError::RegistryError(err.to_string())
    }
}

impl From<crate::util::hex::HexError> for MBusError {
    fn from(err: crate::util::hex::HexError) -> Self {
        MBusError::HexError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MBusError::Timeout.is_retryable());
        assert!(MBusError::ChecksumError { expected: 1, calculated: 2 }.is_retryable());
        assert!(!MBusError::AddressMismatch {
            expected: "1".into(),
            received: "2".into()
        }
        .is_retryable());
        assert!(!MBusError::ChannelError("closed".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = MBusError::RetriesExhausted {
            attempts: 4,
            last: Box::new(MBusError::Timeout),
        };
        assert_eq!(
            err.to_string(),
            "Retries exhausted after 4 attempt(s): Timeout waiting for response"
        );
        let err = MBusError::ChecksumError { expected: 0x82, calculated: 0x83 };
        assert_eq!(err.to_string(), "Invalid checksum: expected 0x82, calculated 0x83");
    }
}
