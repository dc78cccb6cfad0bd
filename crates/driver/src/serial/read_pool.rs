//! Read pool
//!
//! Keeps every free read slot armed with the device while the port runs.
//! Each completion delivers its bytes and re-arms straight away, so the pool
//! never runs dry. Under [`Quirks::SINGLE_RX_URB`](protocol::Quirks) only
//! one slot is armed at a time.

use super::lifecycle::Gate;
use crate::error::DriverError;
use common::{
    SubmitError, TransferBackend, TransferKind, TransferRequest, TransportError, WakeRequest,
    WakeSender,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

struct ReadState {
    /// Idle requests, indexed by slot; `None` while armed
    idle: Vec<Option<TransferRequest>>,
    /// Bit per armed slot
    armed: u32,
}

impl ReadState {
    fn armed_count(&self) -> usize {
        self.armed.count_ones() as usize
    }

    fn release(&mut self, request: TransferRequest) {
        let slot = request.slot();
        self.armed &= !(1 << slot);
        self.idle[slot] = Some(request);
    }
}

/// Inbound half of the data path
pub struct ReadPool {
    backend: Arc<dyn TransferBackend>,
    gate: Arc<Gate>,
    wake: WakeSender,
    /// Maximum number of armed slots
    limit: usize,
    state: Mutex<ReadState>,
}

impl ReadPool {
    /// Create a pool of `slots` buffers of `buffer_size` bytes
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        gate: Arc<Gate>,
        wake: WakeSender,
        slots: usize,
        buffer_size: usize,
        single_slot: bool,
    ) -> Self {
        debug_assert!(slots.is_power_of_two() && slots <= 32);

        let idle = (0..slots)
            .map(|slot| Some(TransferRequest::new(TransferKind::BulkIn, slot, buffer_size)))
            .collect();

        Self {
            backend,
            gate,
            wake,
            limit: if single_slot { 1 } else { slots },
            state: Mutex::new(ReadState { idle, armed: 0 }),
        }
    }

    /// Slots that may be armed at once
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Arm every free slot, up to the limit
    ///
    /// Returns the number of newly armed slots; 0 while the port is closed or
    /// suspended.
    pub fn arm_all(&self) -> Result<usize, DriverError> {
        if self.gate.is_disconnected() {
            return Err(DriverError::Disconnected);
        }
        if !self.gate.is_running() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        let armed = self.arm_locked(&mut state)?;
        if armed > 0 {
            debug!("Armed {} read slots", armed);
        }
        Ok(armed)
    }

    fn arm_locked(&self, state: &mut ReadState) -> Result<usize, DriverError> {
        let mut armed = 0;
        for slot in 0..state.idle.len() {
            if state.armed_count() >= self.limit {
                break;
            }
            let Some(mut request) = state.idle[slot].take() else {
                continue;
            };
            request.set_len(0);

            match self.backend.submit(request) {
                Ok(()) => {
                    state.armed |= 1 << slot;
                    armed += 1;
                }
                Err(SubmitError { error, request }) => {
                    state.idle[slot] = Some(request);
                    return Err(error.into());
                }
            }
        }
        Ok(armed)
    }

    /// Handle a finished read
    ///
    /// Received bytes go to `deliver`, then the slot is re-armed unless the
    /// device is gone or the port stopped running.
    pub fn on_complete<F>(
        &self,
        mut request: TransferRequest,
        result: Result<usize, TransportError>,
        deliver: F,
    ) where
        F: FnOnce(&[u8]),
    {
        let slot = request.slot();
        let mut fatal = false;

        match result {
            Ok(n) => {
                request.set_len(n);
                trace!(slot, bytes = n, "Read complete");
                // Short reads are still useful to a byte stream
                if n > 0 && !self.gate.is_disconnected() {
                    deliver(request.data());
                }
            }
            Err(e) if e.is_cancellation() => {
                debug!(slot, "Read cancelled");
            }
            Err(e) if e.is_fatal() => {
                warn!(slot, "Read failed, device gone: {}", e);
                fatal = true;
                self.wake.notify(WakeRequest::DeviceLost);
            }
            Err(e) => {
                debug!(slot, "Read failed, re-arming: {}", e);
            }
        }

        let mut state = self.state.lock();
        state.release(request);
        if fatal || !self.gate.is_running() {
            return;
        }

        match self.arm_locked(&mut state) {
            Ok(_) => {}
            Err(DriverError::Transport(e)) if e.is_fatal() => {
                warn!("Re-arm failed, device gone");
                self.wake.notify(WakeRequest::DeviceLost);
            }
            Err(e) => error!(slot, "Failed to re-arm read: {}", e),
        }
    }

    /// Withdraw every armed slot; returns how many were reclaimed
    pub fn cancel_all(&self) -> usize {
        // Barrier: a completion that saw the old phase has finished arming
        drop(self.state.lock());

        let cancelled = self.backend.cancel(TransferKind::BulkIn);
        let count = cancelled.len();

        let mut state = self.state.lock();
        for request in cancelled {
            state.release(request);
        }
        if count > 0 {
            debug!("Cancelled {} read slots", count);
        }
        count
    }

    /// Slots currently armed with the device
    pub fn armed_count(&self) -> usize {
        self.state.lock().armed_count()
    }
}
