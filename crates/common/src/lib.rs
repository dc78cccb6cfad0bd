//! Common infrastructure for the USB serial bridge
//!
//! This crate provides the pieces shared by the driver core and its
//! backends: transfer primitives, the collaborator traits at the driver's
//! boundary, the deferred-wake channel, error handling and logging setup.

pub mod channel;
pub mod device;
pub mod error;
pub mod logging;
pub mod terminal;
pub mod test_utils;
pub mod transfer;

pub use channel::{WakeReceiver, WakeRequest, WakeSender, create_wake_queue};
pub use device::DeviceControl;
pub use error::{Error, Result};
pub use logging::{setup_logging, setup_test_logging};
pub use terminal::TerminalSink;
pub use transfer::{
    CompletionHandler, SubmitError, TransferBackend, TransferCompletion, TransferKind,
    TransferRequest, TransportError,
};
