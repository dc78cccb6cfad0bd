//! Driver error types

use common::TransportError;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the serial port control plane
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The device is gone; every further operation fails this way
    #[error("Device disconnected")]
    Disconnected,

    #[error("Device busy")]
    Busy,

    #[error("Device is listed as ignored")]
    Ignored,

    #[error("Timed out waiting for a status change")]
    Timeout,

    #[error("Invalid port configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, DriverError>;
