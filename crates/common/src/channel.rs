//! Deferred-wake channel between the completion context and the wake worker
//!
//! Completion handlers may not block or call into the terminal consumer, so
//! they enqueue a [`WakeRequest`] instead. A single worker (thread or tokio
//! task) drains the queue and does the work in process context.

use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

/// Work the completion context hands to the wake worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeRequest {
    /// Write slots were freed; pull more output from the consumer
    WriteSpace,

    /// Carrier was lost; hang up the consumer
    Hangup,

    /// A completion reported the device gone; run the disconnect cascade
    DeviceLost,

    /// Stop the worker
    Shutdown,
}

/// Enqueue side, held by the completion context
#[derive(Clone)]
pub struct WakeSender {
    tx: Sender<WakeRequest>,
    write_space_pending: Arc<AtomicBool>,
}

impl WakeSender {
    /// Queue a request without blocking
    ///
    /// `WriteSpace` requests coalesce: while one is queued and not yet picked
    /// up, further ones are dropped. Returns whether a request was queued.
    pub fn notify(&self, request: WakeRequest) -> bool {
        if request == WakeRequest::WriteSpace
            && self.write_space_pending.swap(true, Ordering::AcqRel)
        {
            trace!("Write space wake already pending");
            return false;
        }

        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                warn!("Wake queue full, dropping {:?}", request);
                self.clear_pending(request);
                false
            }
            Err(TrySendError::Closed(request)) => {
                trace!("Wake queue closed, dropping {:?}", request);
                self.clear_pending(request);
                false
            }
        }
    }

    fn clear_pending(&self, request: WakeRequest) {
        if request == WakeRequest::WriteSpace {
            self.write_space_pending.store(false, Ordering::Release);
        }
    }
}

/// Dequeue side, held by the wake worker
pub struct WakeReceiver {
    rx: Receiver<WakeRequest>,
    write_space_pending: Arc<AtomicBool>,
}

impl WakeReceiver {
    /// Wait for the next request (blocking)
    pub fn recv_blocking(&self) -> crate::Result<WakeRequest> {
        let request = self
            .rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        Ok(self.taken(request))
    }

    /// Wait for the next request
    pub async fn recv(&self) -> crate::Result<WakeRequest> {
        let request = self
            .rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        Ok(self.taken(request))
    }

    /// Take a request if one is queued
    pub fn try_recv(&self) -> Option<WakeRequest> {
        self.rx.try_recv().ok().map(|request| self.taken(request))
    }

    /// Number of requests waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn taken(&self, request: WakeRequest) -> WakeRequest {
        if request == WakeRequest::WriteSpace {
            self.write_space_pending.store(false, Ordering::Release);
        }
        request
    }
}

/// Create the wake queue
///
/// Returns (WakeSender for the completion context, WakeReceiver for the worker)
pub fn create_wake_queue(depth: usize) -> (WakeSender, WakeReceiver) {
    let (tx, rx) = bounded(depth.max(1));
    let write_space_pending = Arc::new(AtomicBool::new(false));

    (
        WakeSender {
            tx,
            write_space_pending: write_space_pending.clone(),
        },
        WakeReceiver {
            rx,
            write_space_pending,
        },
    )
}
