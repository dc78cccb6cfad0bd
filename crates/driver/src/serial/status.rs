//! Status channel
//!
//! One recurring interrupt-in request carrying the 4-byte status report.
//! Payloads of any other length are discarded without touching state.

use super::lifecycle::Gate;
use crate::error::DriverError;
use common::{
    SubmitError, TransferBackend, TransferKind, TransferRequest, TransportError, WakeRequest,
    WakeSender,
};
use parking_lot::Mutex;
use protocol::StatusPayload;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

struct StatusSlot {
    /// The request while it is not armed
    idle: Option<TransferRequest>,
}

pub struct StatusChannel {
    backend: Arc<dyn TransferBackend>,
    gate: Arc<Gate>,
    wake: WakeSender,
    slot: Mutex<StatusSlot>,
}

impl StatusChannel {
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        gate: Arc<Gate>,
        wake: WakeSender,
        buffer_size: usize,
    ) -> Self {
        Self {
            backend,
            gate,
            wake,
            slot: Mutex::new(StatusSlot {
                idle: Some(TransferRequest::new(TransferKind::InterruptIn, 0, buffer_size)),
            }),
        }
    }

    /// Arm the request; returns whether it was newly armed
    pub fn arm(&self) -> Result<bool, DriverError> {
        if self.gate.is_disconnected() {
            return Err(DriverError::Disconnected);
        }
        if !self.gate.is_running() {
            return Ok(false);
        }

        let mut slot = self.slot.lock();
        self.arm_locked(&mut slot)
    }

    fn arm_locked(&self, slot: &mut StatusSlot) -> Result<bool, DriverError> {
        let Some(mut request) = slot.idle.take() else {
            return Ok(false);
        };
        request.set_len(0);

        match self.backend.submit(request) {
            Ok(()) => {
                trace!("Status channel armed");
                Ok(true)
            }
            Err(SubmitError { error, request }) => {
                slot.idle = Some(request);
                Err(error.into())
            }
        }
    }

    /// Handle a finished status transfer
    ///
    /// A well-formed report is passed to `apply` before the request is
    /// re-armed.
    pub fn on_complete<F>(
        &self,
        mut request: TransferRequest,
        result: Result<usize, TransportError>,
        apply: F,
    ) where
        F: FnOnce(StatusPayload),
    {
        let mut fatal = false;

        match result {
            Ok(n) => {
                request.set_len(n);
                match StatusPayload::parse(request.data()) {
                    Ok(payload) if !self.gate.is_disconnected() => apply(payload),
                    Ok(_) => {}
                    Err(e) => debug!("Discarding status report: {}", e),
                }
            }
            Err(e) if e.is_cancellation() => {
                debug!("Status channel cancelled");
            }
            Err(e) if e.is_fatal() => {
                warn!("Status channel failed, device gone: {}", e);
                fatal = true;
                self.wake.notify(WakeRequest::DeviceLost);
            }
            Err(e) => {
                debug!("Status channel error, re-arming: {}", e);
            }
        }

        let mut slot = self.slot.lock();
        slot.idle = Some(request);
        if fatal || !self.gate.is_running() {
            return;
        }

        match self.arm_locked(&mut slot) {
            Ok(_) => {}
            Err(DriverError::Transport(e)) if e.is_fatal() => {
                self.wake.notify(WakeRequest::DeviceLost);
            }
            Err(e) => error!("Failed to re-arm status channel: {}", e),
        }
    }

    /// Withdraw the armed request; returns whether one was reclaimed
    pub fn cancel(&self) -> bool {
        drop(self.slot.lock());

        let mut cancelled = self.backend.cancel(TransferKind::InterruptIn);
        let reclaimed = cancelled.pop();

        let mut slot = self.slot.lock();
        match reclaimed {
            Some(request) => {
                slot.idle = Some(request);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().idle.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::lifecycle::Lifecycle;
    use common::test_utils::{MockBackend, build_status_report};
    use common::{CompletionHandler, TransferCompletion, create_wake_queue};
    use protocol::ModemStatus;

    struct Handler {
        channel: StatusChannel,
        reports: Mutex<Vec<StatusPayload>>,
    }

    impl CompletionHandler for Handler {
        fn on_transfer_complete(&self, completion: TransferCompletion) {
            self.channel
                .on_complete(completion.request, completion.result, |payload| {
                    self.reports.lock().push(payload)
                });
        }
    }

    fn running() -> (Arc<MockBackend>, Arc<Gate>, Handler) {
        let backend = Arc::new(MockBackend::new());
        let gate = Arc::new(Gate::new());
        let (tx, _rx) = create_wake_queue(8);
        let channel = StatusChannel::new(backend.clone(), gate.clone(), tx, 8);
        let mut lifecycle = Lifecycle::default();
        lifecycle.open().unwrap();
        gate.publish(&lifecycle);
        let handler = Handler {
            channel,
            reports: Mutex::new(Vec::new()),
        };
        (backend, gate, handler)
    }

    #[test]
    fn test_report_applied_and_rearmed() {
        let (backend, _gate, handler) = running();
        assert!(handler.channel.arm().unwrap());
        assert!(!handler.channel.arm().unwrap());

        let report = build_status_report(ModemStatus::CTS, 0, false);
        assert!(backend.complete_status(&handler, &report));

        let reports = handler.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].modem_status(), ModemStatus::CTS);
        assert!(handler.channel.is_armed());
        assert_eq!(backend.submissions(TransferKind::InterruptIn), 2);
    }

    #[test]
    fn test_wrong_length_discarded() {
        let (backend, _gate, handler) = running();
        handler.channel.arm().unwrap();

        assert!(backend.complete_status(&handler, &[0x08, 0x00, 0xf7]));
        assert!(backend.complete_status(&handler, &[0x08, 0x00, 0xf7, 0x00, 0x00]));

        assert!(handler.reports.lock().is_empty());
        assert!(handler.channel.is_armed());
    }

    #[test]
    fn test_cancel_reclaims_request() {
        let (backend, gate, handler) = running();
        handler.channel.arm().unwrap();

        let mut lifecycle = Lifecycle::default();
        lifecycle.open().unwrap();
        lifecycle.suspend().unwrap();
        gate.publish(&lifecycle);

        assert!(handler.channel.cancel());
        assert!(!handler.channel.is_armed());
        assert!(!handler.channel.cancel());
        assert_eq!(backend.in_flight(TransferKind::InterruptIn), 0);
        assert!(!handler.channel.arm().unwrap());
    }
}
