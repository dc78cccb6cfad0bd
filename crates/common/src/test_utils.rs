//! Test utilities for the USB serial bridge
//!
//! Provides mock collaborators and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockBackend, build_status_report};
//! use common::{TransferBackend, TransferKind, TransferRequest};
//! use protocol::ModemStatus;
//!
//! let backend = MockBackend::new();
//! backend
//!     .submit(TransferRequest::new(TransferKind::BulkIn, 0, 64))
//!     .unwrap();
//! assert_eq!(backend.in_flight(TransferKind::BulkIn), 1);
//!
//! let report = build_status_report(ModemStatus::DCD, 0, false);
//! assert_eq!(report, [0x00, 0x00, 0xf7, 0x00]);
//! ```

use crate::device::DeviceControl;
use crate::terminal::TerminalSink;
use crate::transfer::{
    CompletionHandler, SubmitError, TransferBackend, TransferCompletion, TransferKind,
    TransferRequest, TransportError,
};
use parking_lot::{Condvar, Mutex};
use protocol::status::MULTI_STATUS;
use protocol::{LineCoding, MODEM_STATUS_MASK, ModemStatus};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Encode a status report the way the adapter sends it
///
/// `modem` is given in logical levels and inverted into byte 2; `line_class`
/// goes to byte 0 unchanged.
pub fn build_status_report(modem: ModemStatus, line_class: u8, coalesced: bool) -> [u8; 4] {
    let multi = if coalesced { MULTI_STATUS } else { 0 };
    [
        line_class,
        multi,
        (!modem.bits() & MODEM_STATUS_MASK) | 0xf0,
        0x00,
    ]
}

// ============================================================================
// Transfer backend
// ============================================================================

#[derive(Default)]
struct MockBackendState {
    armed: HashMap<TransferKind, VecDeque<TransferRequest>>,
    submissions: HashMap<TransferKind, usize>,
    cancels: HashMap<TransferKind, usize>,
    submit_failures: HashMap<TransferKind, VecDeque<TransportError>>,
    written: Vec<u8>,
}

/// In-memory transfer subsystem
///
/// Armed requests sit in per-kind FIFO queues until the test completes them
/// explicitly. Completions are delivered outside the mock's own lock so that
/// the handler may submit again.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockBackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests of `kind` currently armed
    pub fn in_flight(&self, kind: TransferKind) -> usize {
        self.state.lock().armed.get(&kind).map_or(0, VecDeque::len)
    }

    /// Slot indices of the armed requests of `kind`, oldest first
    pub fn armed_slots(&self, kind: TransferKind) -> Vec<usize> {
        self.state
            .lock()
            .armed
            .get(&kind)
            .map(|queue| queue.iter().map(TransferRequest::slot).collect())
            .unwrap_or_default()
    }

    /// Payloads of the armed outbound requests, oldest first
    pub fn armed_payloads(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .armed
            .get(&TransferKind::BulkOut)
            .map(|queue| queue.iter().map(|r| r.data().to_vec()).collect())
            .unwrap_or_default()
    }

    /// Total accepted submissions of `kind`
    pub fn submissions(&self, kind: TransferKind) -> usize {
        self.state.lock().submissions.get(&kind).copied().unwrap_or(0)
    }

    /// Number of `cancel` calls for `kind`
    pub fn cancels(&self, kind: TransferKind) -> usize {
        self.state.lock().cancels.get(&kind).copied().unwrap_or(0)
    }

    /// Bytes of every outbound request completed so far, in completion order
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Make the next submission of `kind` fail with `error`
    pub fn fail_next_submit(&self, kind: TransferKind, error: TransportError) {
        self.state
            .lock()
            .submit_failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Remove the oldest armed request of `kind` without completing it
    pub fn take(&self, kind: TransferKind) -> Option<TransferRequest> {
        self.state.lock().armed.get_mut(&kind)?.pop_front()
    }

    /// Complete the oldest outbound request successfully
    ///
    /// Returns its payload.
    pub fn complete_write(&self, handler: &dyn CompletionHandler) -> Option<Vec<u8>> {
        let request = {
            let mut state = self.state.lock();
            let request = state.armed.get_mut(&TransferKind::BulkOut)?.pop_front()?;
            state.written.extend_from_slice(request.data());
            request
        };
        let payload = request.data().to_vec();
        let len = request.len();
        handler.on_transfer_complete(TransferCompletion::new(request, Ok(len)));
        Some(payload)
    }

    /// Complete the oldest inbound data request with `data`
    pub fn complete_read(&self, handler: &dyn CompletionHandler, data: &[u8]) -> bool {
        self.complete_with_data(TransferKind::BulkIn, handler, data)
    }

    /// Complete the armed status request with `payload`
    pub fn complete_status(&self, handler: &dyn CompletionHandler, payload: &[u8]) -> bool {
        self.complete_with_data(TransferKind::InterruptIn, handler, payload)
    }

    /// Complete the oldest request of `kind` with an error
    pub fn fail_next(
        &self,
        kind: TransferKind,
        handler: &dyn CompletionHandler,
        error: TransportError,
    ) -> bool {
        let Some(request) = self.take(kind) else {
            return false;
        };
        handler.on_transfer_complete(TransferCompletion::new(request, Err(error)));
        true
    }

    fn complete_with_data(
        &self,
        kind: TransferKind,
        handler: &dyn CompletionHandler,
        data: &[u8],
    ) -> bool {
        let Some(mut request) = self.take(kind) else {
            return false;
        };
        let count = data.len().min(request.capacity());
        request.buffer_mut()[..count].copy_from_slice(&data[..count]);
        request.set_len(count);
        handler.on_transfer_complete(TransferCompletion::new(request, Ok(count)));
        true
    }
}

impl TransferBackend for MockBackend {
    fn submit(&self, request: TransferRequest) -> Result<(), SubmitError> {
        let mut state = self.state.lock();
        let kind = request.kind();

        if let Some(error) = state
            .submit_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return Err(SubmitError::new(error, request));
        }

        *state.submissions.entry(kind).or_default() += 1;
        state.armed.entry(kind).or_default().push_back(request);
        Ok(())
    }

    fn cancel(&self, kind: TransferKind) -> Vec<TransferRequest> {
        let mut state = self.state.lock();
        *state.cancels.entry(kind).or_default() += 1;
        state
            .armed
            .get_mut(&kind)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Device control
// ============================================================================

/// A request recorded by [`MockControl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    ReadRegister(u16),
    WriteRegister(u16, u8),
    SetLineCoding(LineCoding),
    SetControlLines { dtr: bool, rts: bool },
    ClearHalt(u8),
}

#[derive(Default)]
struct MockControlState {
    calls: Vec<ControlCall>,
    registers: HashMap<u16, u8>,
    failure: Option<TransportError>,
}

/// Recording device-control collaborator
///
/// Clones share state, so a test can keep one handle while the port owns
/// another.
#[derive(Clone, Default)]
pub struct MockControl {
    state: Arc<Mutex<MockControlState>>,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request made so far, in order
    pub fn calls(&self) -> Vec<ControlCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make every following request fail with `error` (`None` to recover)
    pub fn fail_with(&self, error: Option<TransportError>) {
        self.state.lock().failure = error;
    }

    pub fn set_register(&self, addr: u16, value: u8) {
        self.state.lock().registers.insert(addr, value);
    }

    /// Register value as last written (0 if never set)
    pub fn register(&self, addr: u16) -> u8 {
        self.state.lock().registers.get(&addr).copied().unwrap_or(0)
    }

    /// Most recent DTR/RTS levels sent, if any
    pub fn last_control_lines(&self) -> Option<(bool, bool)> {
        self.state.lock().calls.iter().rev().find_map(|call| match call {
            ControlCall::SetControlLines { dtr, rts } => Some((*dtr, *rts)),
            _ => None,
        })
    }

    /// Most recent line coding sent, if any
    pub fn last_line_coding(&self) -> Option<LineCoding> {
        self.state.lock().calls.iter().rev().find_map(|call| match call {
            ControlCall::SetLineCoding(coding) => Some(*coding),
            _ => None,
        })
    }

    fn record(&self, call: ControlCall) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl DeviceControl for MockControl {
    fn read_register(&mut self, addr: u16) -> Result<u8, TransportError> {
        self.record(ControlCall::ReadRegister(addr))?;
        Ok(self.register(addr))
    }

    fn write_register(&mut self, addr: u16, value: u8) -> Result<(), TransportError> {
        self.record(ControlCall::WriteRegister(addr, value))?;
        self.set_register(addr, value);
        Ok(())
    }

    fn set_line_coding(&mut self, coding: &LineCoding) -> Result<(), TransportError> {
        self.record(ControlCall::SetLineCoding(*coding))
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        self.record(ControlCall::SetControlLines { dtr, rts })
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.record(ControlCall::ClearHalt(endpoint))
    }
}

// ============================================================================
// Terminal consumer
// ============================================================================

struct MockTerminalState {
    received: Vec<u8>,
    capacity: usize,
    pending: VecDeque<u8>,
    space_notifications: usize,
    hangups: usize,
}

/// In-memory terminal consumer
///
/// `capacity` models the free room of a flip buffer: delivered bytes use it
/// up until the test calls [`MockTerminal::set_capacity`] again.
pub struct MockTerminal {
    state: Mutex<MockTerminalState>,
    changed: Condvar,
}

impl MockTerminal {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MockTerminalState {
                received: Vec::new(),
                capacity,
                pending: VecDeque::new(),
                space_notifications: 0,
                hangups: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Bytes delivered so far
    pub fn received(&self) -> Vec<u8> {
        self.state.lock().received.clone()
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity;
    }

    /// Queue output for the port to pull
    pub fn queue_output(&self, bytes: &[u8]) {
        self.state.lock().pending.extend(bytes.iter().copied());
    }

    /// Output still waiting to be pulled
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn space_notifications(&self) -> usize {
        self.state.lock().space_notifications
    }

    pub fn hangups(&self) -> usize {
        self.state.lock().hangups
    }

    /// Block until `predicate` holds for the received bytes or `timeout` elapses
    pub fn wait_for_received<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !predicate(&state.received) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state.received);
            }
        }
        true
    }

    /// Block until at least `count` hangups were seen or `timeout` elapses
    pub fn wait_for_hangups(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.hangups < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.hangups >= count;
            }
        }
        true
    }
}

impl TerminalSink for MockTerminal {
    fn sink_capacity(&self) -> usize {
        self.state.lock().capacity
    }

    fn deliver(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.received.extend_from_slice(bytes);
        state.capacity = state.capacity.saturating_sub(bytes.len());
        self.changed.notify_all();
    }

    fn pull_pending(&self, max: usize) -> Vec<u8> {
        let mut state = self.state.lock();
        let count = max.min(state.pending.len());
        state.pending.drain(..count).collect()
    }

    fn notify_space_available(&self) {
        let mut state = self.state.lock();
        state.space_notifications += 1;
        self.changed.notify_all();
    }

    fn hangup(&self) {
        let mut state = self.state.lock();
        state.hangups += 1;
        self.changed.notify_all();
    }
}

// ============================================================================
// Timing helpers
// ============================================================================

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Run an async test with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # async fn example() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::StatusPayload;

    struct Recorder(Mutex<Vec<TransferCompletion>>);

    impl CompletionHandler for Recorder {
        fn on_transfer_complete(&self, completion: TransferCompletion) {
            self.0.lock().push(completion);
        }
    }

    #[test]
    fn test_status_report_round_trips_through_payload() {
        let report = build_status_report(ModemStatus::CTS | ModemStatus::RI, 0x08, true);
        let payload = StatusPayload::parse(&report).unwrap();
        assert_eq!(payload.modem_status(), ModemStatus::CTS | ModemStatus::RI);
        assert!(payload.is_coalesced());
        assert!(payload.has_modem_marker());
    }

    #[test]
    fn test_mock_backend_fifo_and_cancel() {
        let backend = MockBackend::new();
        for slot in 0..3 {
            let mut request = TransferRequest::new(TransferKind::BulkOut, slot, 4);
            request.fill(&[slot as u8]);
            backend.submit(request).unwrap();
        }
        assert_eq!(backend.armed_slots(TransferKind::BulkOut), vec![0, 1, 2]);

        let recorder = Recorder(Mutex::new(Vec::new()));
        assert_eq!(backend.complete_write(&recorder), Some(vec![0]));
        assert_eq!(backend.written(), vec![0]);

        let cancelled = backend.cancel(TransferKind::BulkOut);
        assert_eq!(cancelled.len(), 2);
        assert_eq!(backend.in_flight(TransferKind::BulkOut), 0);
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_mock_backend_submit_failure_returns_request() {
        let backend = MockBackend::new();
        backend.fail_next_submit(TransferKind::BulkIn, TransportError::NoDevice);

        let err = backend
            .submit(TransferRequest::new(TransferKind::BulkIn, 7, 8))
            .unwrap_err();
        assert_eq!(err.error, TransportError::NoDevice);
        assert_eq!(err.request.slot(), 7);

        backend
            .submit(TransferRequest::new(TransferKind::BulkIn, 7, 8))
            .unwrap();
        assert_eq!(backend.submissions(TransferKind::BulkIn), 1);
    }

    #[test]
    fn test_mock_control_records_and_fails() {
        let mut control = MockControl::new();
        let observer = control.clone();

        control.set_control_lines(true, false).unwrap();
        control.write_register(0x18, 0xc3).unwrap();
        assert_eq!(control.read_register(0x18).unwrap(), 0xc3);
        assert_eq!(observer.last_control_lines(), Some((true, false)));

        observer.fail_with(Some(TransportError::Stall));
        assert_eq!(control.clear_halt(0x82), Err(TransportError::Stall));
        assert_eq!(observer.calls().len(), 4);
    }

    #[test]
    fn test_mock_terminal_capacity_is_consumed() {
        let terminal = MockTerminal::new(4);
        terminal.deliver(b"abc");
        assert_eq!(terminal.sink_capacity(), 1);
        assert!(terminal.wait_for_received(Duration::from_millis(10), |r| r == b"abc"));

        terminal.queue_output(b"hello");
        assert_eq!(terminal.pull_pending(2), b"he".to_vec());
        assert_eq!(terminal.pending_len(), 3);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
        assert!(result.is_err());
    }
}
