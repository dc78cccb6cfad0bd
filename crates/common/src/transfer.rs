//! Transfer primitives shared by the pools and the USB backends
//!
//! A [`TransferRequest`] is owned by exactly one party at a time: the pool
//! slot that allocated it while idle, the [`TransferBackend`] while armed,
//! and the [`CompletionHandler`] once the transfer has finished.

use std::fmt;
use thiserror::Error;

/// Endpoint class a request is armed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Inbound data (read pool)
    BulkIn,
    /// Outbound data (write pool)
    BulkOut,
    /// Recurring status report
    InterruptIn,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::BulkIn => "bulk-in",
            TransferKind::BulkOut => "bulk-out",
            TransferKind::InterruptIn => "interrupt-in",
        };
        f.write_str(name)
    }
}

/// Completion status reported by the transfer subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Device not found or disconnected")]
    NoDevice,

    #[error("Endpoint stalled")]
    Stall,

    #[error("Transfer timed out")]
    Timeout,

    #[error("Buffer overflow")]
    Overflow,

    #[error("Resource busy")]
    Busy,

    #[error("Invalid parameter")]
    InvalidParam,

    #[error("Access denied")]
    Access,

    #[error("I/O error")]
    Io,

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// The device is gone and no further transfer can succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::NoDevice)
    }

    /// The request was withdrawn rather than failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// One asynchronous transfer and its buffer
///
/// `len` is the number of meaningful bytes: the payload size for an
/// outbound request, the received size once an inbound request completes.
pub struct TransferRequest {
    kind: TransferKind,
    slot: usize,
    buffer: Box<[u8]>,
    len: usize,
}

impl TransferRequest {
    /// Allocate a request with a zeroed buffer of `capacity` bytes
    pub fn new(kind: TransferKind, slot: usize, capacity: usize) -> Self {
        Self::with_buffer(kind, slot, vec![0u8; capacity].into_boxed_slice())
    }

    /// Wrap an existing buffer, typically one returned by [`Self::into_buffer`]
    pub fn with_buffer(kind: TransferKind, slot: usize, buffer: Box<[u8]>) -> Self {
        Self {
            kind,
            slot,
            buffer,
            len: 0,
        }
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Index of the pool slot that owns this request
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the meaningful length, clamped to the buffer capacity
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.buffer.len());
    }

    /// Meaningful bytes
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Append as much of `bytes` as fits, returning the count copied
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let room = self.buffer.len() - self.len;
        let count = room.min(bytes.len());
        self.buffer[self.len..self.len + count].copy_from_slice(&bytes[..count]);
        self.len += count;
        count
    }

    /// Whole backing buffer, regardless of `len`
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> Box<[u8]> {
        self.buffer
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("len", &self.len)
            .field("capacity", &self.buffer.len())
            .finish()
    }
}

/// A finished transfer handed back to its owner
#[derive(Debug)]
pub struct TransferCompletion {
    pub request: TransferRequest,
    /// Bytes transferred, or the failure status
    pub result: Result<usize, TransportError>,
}

impl TransferCompletion {
    pub fn new(request: TransferRequest, result: Result<usize, TransportError>) -> Self {
        Self { request, result }
    }

    pub fn kind(&self) -> TransferKind {
        self.request.kind()
    }
}

/// Submission refused; the request is handed back to the caller
#[derive(Debug, Error)]
#[error("Submit of {} slot {} failed: {error}", .request.kind(), .request.slot())]
pub struct SubmitError {
    pub error: TransportError,
    pub request: TransferRequest,
}

impl SubmitError {
    pub fn new(error: TransportError, request: TransferRequest) -> Self {
        Self { error, request }
    }
}

/// Asynchronous transfer subsystem
///
/// Implementations must never call the completion handler from inside
/// [`submit`](TransferBackend::submit); pools rely on this to arm requests
/// while holding their own lock.
pub trait TransferBackend: Send + Sync {
    /// Arm a request with the device
    fn submit(&self, request: TransferRequest) -> Result<(), SubmitError>;

    /// Withdraw every armed request of `kind` that has not started yet
    ///
    /// Returned requests will not be reported through the completion handler.
    /// A request already executing on the device completes normally (usually
    /// as [`TransportError::Cancelled`]).
    fn cancel(&self, kind: TransferKind) -> Vec<TransferRequest>;
}

/// Receiver of finished transfers
///
/// Called from the transfer subsystem's completion context: implementations
/// must not block.
pub trait CompletionHandler: Send + Sync {
    fn on_transfer_complete(&self, completion: TransferCompletion);
}
