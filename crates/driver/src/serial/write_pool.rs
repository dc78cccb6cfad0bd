//! Write pool
//!
//! A fixed ring of write slots. Bytes are copied into free slots in ring
//! order and the filled slots are queued; the queue is transmitted strictly
//! FIFO with at most one request on the wire at a time. While the port is
//! suspended the queue is held and flushed on resume.

use super::lifecycle::{Gate, SuspendKind};
use crate::error::DriverError;
use common::{
    SubmitError, TransferBackend, TransferKind, TransferRequest, TransportError, WakeRequest,
    WakeSender,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

struct WriteState {
    /// Idle requests, indexed by slot; `None` while queued or in flight
    idle: Vec<Option<TransferRequest>>,
    /// Bit per slot that is queued or in flight
    in_use: u32,
    /// Filled slots waiting for the wire, oldest first
    queued: VecDeque<TransferRequest>,
    transmitting: Option<usize>,
    /// Next slot to hand out
    cursor: usize,
}

impl WriteState {
    fn slot_mask(&self) -> usize {
        self.idle.len() - 1
    }

    fn used(&self) -> usize {
        self.in_use.count_ones() as usize
    }

    fn alloc(&mut self) -> Option<TransferRequest> {
        let mask = self.slot_mask();
        for step in 0..self.idle.len() {
            let slot = (self.cursor + step) & mask;
            if self.in_use & (1 << slot) != 0 {
                continue;
            }
            let mut request = self.idle[slot].take()?;
            request.set_len(0);
            self.in_use |= 1 << slot;
            self.cursor = (slot + 1) & mask;
            return Some(request);
        }
        None
    }

    fn release(&mut self, request: TransferRequest) {
        let slot = request.slot();
        if self.transmitting == Some(slot) {
            self.transmitting = None;
        }
        self.in_use &= !(1 << slot);
        self.idle[slot] = Some(request);
    }
}

/// Outbound half of the data path
pub struct WritePool {
    backend: Arc<dyn TransferBackend>,
    gate: Arc<Gate>,
    wake: WakeSender,
    slot_size: usize,
    state: Mutex<WriteState>,
}

impl WritePool {
    /// Create a pool of `slots` requests of `slot_size` bytes
    ///
    /// `slots` must be a power of two no larger than 32.
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        gate: Arc<Gate>,
        wake: WakeSender,
        slots: usize,
        slot_size: usize,
    ) -> Self {
        debug_assert!(slots.is_power_of_two() && slots <= 32);

        let idle = (0..slots)
            .map(|slot| Some(TransferRequest::new(TransferKind::BulkOut, slot, slot_size)))
            .collect();

        Self {
            backend,
            gate,
            wake,
            slot_size,
            state: Mutex::new(WriteState {
                idle,
                in_use: 0,
                queued: VecDeque::with_capacity(slots),
                transmitting: None,
                cursor: 0,
            }),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Accept as many of `bytes` as free slots can hold
    ///
    /// Never blocks. Returns 0 when the port is closed or the device is gone.
    pub fn submit(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() || !self.gate.accepts_writes() {
            return 0;
        }

        let mut state = self.state.lock();
        let mut accepted = 0;
        while accepted < bytes.len() {
            let Some(mut request) = state.alloc() else {
                break;
            };
            accepted += request.fill(&bytes[accepted..]);
            trace!(slot = request.slot(), len = request.len(), "Queued write");
            state.queued.push_back(request);
        }

        if accepted < bytes.len() {
            trace!("Write pool full, accepted {}/{} bytes", accepted, bytes.len());
        }

        self.start_next(&mut state);
        accepted
    }

    /// Return a finished request to the pool and start the next one
    ///
    /// Returns the number of bytes the device took.
    pub fn on_complete(
        &self,
        request: TransferRequest,
        result: Result<usize, TransportError>,
    ) -> usize {
        let slot = request.slot();
        let mut fatal = false;

        let written = match result {
            Ok(n) => {
                if n < request.len() {
                    warn!(slot, "Short write: {}/{} bytes", n, request.len());
                }
                trace!(slot, bytes = n, "Write complete");
                n
            }
            Err(e) if e.is_cancellation() => {
                debug!(slot, "Write cancelled");
                0
            }
            Err(e) => {
                // At-most-once: the payload is not retried
                warn!(slot, "Write of {} bytes failed: {}", request.len(), e);
                if e.is_fatal() {
                    fatal = true;
                    self.wake.notify(WakeRequest::DeviceLost);
                }
                0
            }
        };

        let mut state = self.state.lock();
        state.release(request);
        if !fatal {
            self.start_next(&mut state);
        }
        written
    }

    /// Transmit held slots after a resume
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if !state.queued.is_empty() {
            debug!("Flushing {} held writes", state.queued.len());
        }
        self.start_next(&mut state);
    }

    fn start_next(&self, state: &mut WriteState) {
        while state.transmitting.is_none() && self.gate.is_running() {
            let Some(request) = state.queued.pop_front() else {
                break;
            };
            let slot = request.slot();

            match self.backend.submit(request) {
                Ok(()) => {
                    trace!(slot, "Write armed");
                    state.transmitting = Some(slot);
                }
                Err(SubmitError { error, request }) => {
                    error!(
                        slot,
                        "Failed to submit write, dropping {} bytes: {}",
                        request.len(),
                        error
                    );
                    state.release(request);
                    if error.is_fatal() {
                        self.wake.notify(WakeRequest::DeviceLost);
                        break;
                    }
                }
            }
        }
    }

    /// Flip the lifecycle into suspend under the pool lock
    ///
    /// An auto suspend is refused with [`DriverError::Busy`] while a write is
    /// on the wire. `apply` runs with the lock held so no new write can start
    /// between the check and the transition.
    pub fn enter_suspend<F, T>(&self, kind: SuspendKind, apply: F) -> Result<T, DriverError>
    where
        F: FnOnce() -> Result<T, DriverError>,
    {
        let state = self.state.lock();
        if kind == SuspendKind::Auto && state.transmitting.is_some() {
            debug!("Auto suspend refused while transmitting");
            return Err(DriverError::Busy);
        }
        apply()
    }

    /// Withdraw the armed request; returns how many were reclaimed
    pub fn cancel_all(&self) -> usize {
        // Barrier: a completion that saw the old phase has finished arming
        drop(self.state.lock());

        let cancelled = self.backend.cancel(TransferKind::BulkOut);
        let count = cancelled.len();

        let mut state = self.state.lock();
        for request in cancelled {
            state.release(request);
        }
        count
    }

    /// Drop queued but unsent slots; returns how many were dropped
    pub fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let pending: Vec<_> = state.queued.drain(..).collect();
        let count = pending.len();
        for request in pending {
            state.release(request);
        }
        if count > 0 {
            debug!("Discarded {} pending writes", count);
        }
        count
    }

    /// Room for new bytes across free slots
    pub fn space_available(&self) -> usize {
        let state = self.state.lock();
        (state.idle.len() - state.used()) * self.slot_size
    }

    /// Bytes queued or in flight, counted per slot
    pub fn chars_in_buffer(&self) -> usize {
        if self.gate.is_disconnected() {
            return 0;
        }
        self.state.lock().used() * self.slot_size
    }

    pub fn is_transmitting(&self) -> bool {
        self.state.lock().transmitting.is_some()
    }

    pub fn used_slots(&self) -> usize {
        self.state.lock().used()
    }

    pub fn queued_slots(&self) -> usize {
        self.state.lock().queued.len()
    }
}
