//! Blocking transfer execution
//!
//! Runs one request against the device with rusb's synchronous API. Inbound
//! transfers poll with a short timeout so a cancel is noticed between polls.

use super::Endpoints;
use common::{TransferKind, TransferRequest, TransportError};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{trace, warn};

/// Timeouts used by the transfer workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTimeouts {
    /// Upper bound for one bulk-out transfer
    pub write: Duration,
    /// Poll interval of inbound transfers
    pub poll: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            write: Duration::from_secs(5),
            poll: Duration::from_millis(100),
        }
    }
}

/// Run `request` to completion
///
/// `cancelled` is consulted after every inbound poll that timed out; once it
/// returns true the transfer ends with [`TransportError::Cancelled`].
pub fn execute_transfer<F>(
    handle: &DeviceHandle<Context>,
    endpoints: &Endpoints,
    timeouts: &TransferTimeouts,
    request: &mut TransferRequest,
    cancelled: F,
) -> Result<usize, TransportError>
where
    F: Fn() -> bool,
{
    match request.kind() {
        TransferKind::BulkOut => {
            let written = handle
                .write_bulk(endpoints.bulk_out, request.data(), timeouts.write)
                .map_err(map_rusb_error)?;
            if written < request.len() {
                warn!(
                    "Short bulk write on {:#04x}: {} of {} bytes",
                    endpoints.bulk_out,
                    written,
                    request.len()
                );
            }
            Ok(written)
        }
        TransferKind::BulkIn => poll_in(request, cancelled, |buf| {
            handle.read_bulk(endpoints.bulk_in, buf, timeouts.poll)
        }),
        TransferKind::InterruptIn => poll_in(request, cancelled, |buf| {
            handle.read_interrupt(endpoints.interrupt_in, buf, timeouts.poll)
        }),
    }
}

fn poll_in<F, R>(
    request: &mut TransferRequest,
    cancelled: F,
    mut read: R,
) -> Result<usize, TransportError>
where
    F: Fn() -> bool,
    R: FnMut(&mut [u8]) -> rusb::Result<usize>,
{
    loop {
        match read(request.buffer_mut()) {
            Ok(len) => {
                request.set_len(len);
                trace!("{} transfer returned {} bytes", request.kind(), len);
                return Ok(len);
            }
            Err(rusb::Error::Timeout) => {
                // No data yet
                if cancelled() {
                    return Err(TransportError::Cancelled);
                }
            }
            Err(e) => return Err(map_rusb_error(e)),
        }
    }
}

/// Map rusb::Error to a transport error
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Stall,
        rusb::Error::NoDevice => TransportError::NoDevice,
        rusb::Error::Busy => TransportError::Busy,
        rusb::Error::Overflow => TransportError::Overflow,
        rusb::Error::Io => TransportError::Io,
        rusb::Error::InvalidParam => TransportError::InvalidParam,
        rusb::Error::Access => TransportError::Access,
        rusb::Error::Interrupted => TransportError::Cancelled,
        _ => TransportError::Other(err.to_string()),
    }
}
