//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding or validating wire structures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Status payload does not have the fixed length
    #[error("Status payload length {actual} (expected {expected})")]
    PayloadLength { expected: usize, actual: usize },

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Stop-bit code outside {0, 1, 2}
    #[error("Invalid stop bit code: {0}")]
    InvalidStopBits(u8),

    /// Parity code outside {0..4}
    #[error("Invalid parity code: {0}")]
    InvalidParity(u8),

    /// Data bit count other than 5, 6, 7 or 8
    #[error("Unsupported data bit count: {0}")]
    InvalidDataBits(u8),

    /// Baud rate of zero in a structure that is sent to the device
    #[error("Baud rate must be non-zero")]
    ZeroBaudRate,

    /// Quirk name that does not match any known flag
    #[error("Unknown quirk: {0}")]
    UnknownQuirk(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
