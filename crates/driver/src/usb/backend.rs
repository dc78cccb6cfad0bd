//! rusb transfer backend
//!
//! One worker thread per transfer kind. Each worker takes armed requests off
//! its lane in FIFO order, runs them with the blocking rusb API and reports
//! the result to the bound completion handler from its own thread.

use super::Endpoints;
use super::transfers::{TransferTimeouts, execute_transfer};
use common::{
    CompletionHandler, SubmitError, TransferBackend, TransferCompletion, TransferKind,
    TransferRequest, TransportError,
};
use parking_lot::{Condvar, Mutex};
use rusb::{Context, DeviceHandle};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const KINDS: [TransferKind; 3] = [
    TransferKind::BulkIn,
    TransferKind::BulkOut,
    TransferKind::InterruptIn,
];

#[derive(Default)]
struct LaneState {
    queue: VecDeque<TransferRequest>,
    shutdown: bool,
}

#[derive(Default)]
struct Lane {
    state: Mutex<LaneState>,
    ready: Condvar,
    /// Bumped by every cancel; an executing request compares against it
    generation: AtomicU64,
}

struct Shared {
    handle: Arc<DeviceHandle<Context>>,
    endpoints: Endpoints,
    timeouts: TransferTimeouts,
    lanes: [Lane; 3],
    handler: Mutex<Option<Weak<dyn CompletionHandler>>>,
}

impl Shared {
    fn lane(&self, kind: TransferKind) -> &Lane {
        match kind {
            TransferKind::BulkIn => &self.lanes[0],
            TransferKind::BulkOut => &self.lanes[1],
            TransferKind::InterruptIn => &self.lanes[2],
        }
    }

    fn handler(&self) -> Option<Arc<dyn CompletionHandler>> {
        self.handler.lock().as_ref().and_then(Weak::upgrade)
    }
}

/// Transfer backend over a shared rusb device handle
pub struct RusbBackend {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RusbBackend {
    /// Start the transfer workers
    pub fn start(
        handle: Arc<DeviceHandle<Context>>,
        endpoints: Endpoints,
        timeouts: TransferTimeouts,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            handle,
            endpoints,
            timeouts,
            lanes: Default::default(),
            handler: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(KINDS.len());
        for kind in KINDS {
            let shared = shared.clone();
            let worker = std::thread::Builder::new()
                .name(format!("usb-{}", kind))
                .spawn(move || run_lane(shared, kind))?;
            workers.push(worker);
        }

        info!(?endpoints, "USB transfer workers started");
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Route completions to `handler`
    ///
    /// Held weakly; completions arriving after the handler is dropped are
    /// discarded.
    pub fn bind(&self, handler: Weak<dyn CompletionHandler>) {
        *self.shared.handler.lock() = Some(handler);
    }

    /// Stop the workers and wait for them
    ///
    /// Requests still queued are dropped without completion.
    pub fn shutdown(&self) {
        for lane in &self.shared.lanes {
            lane.state.lock().shutdown = true;
            lane.generation.fetch_add(1, Ordering::AcqRel);
            lane.ready.notify_all();
        }

        let current = std::thread::current().id();
        for worker in self.workers.lock().drain(..) {
            // A worker may drop the last port reference and land here
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("USB transfer worker panicked");
            }
        }
    }
}

impl Drop for RusbBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TransferBackend for RusbBackend {
    fn submit(&self, request: TransferRequest) -> Result<(), SubmitError> {
        let lane = self.shared.lane(request.kind());
        let mut state = lane.state.lock();
        if state.shutdown {
            return Err(SubmitError::new(TransportError::NoDevice, request));
        }

        trace!("Queued {} slot {}", request.kind(), request.slot());
        state.queue.push_back(request);
        lane.ready.notify_one();
        Ok(())
    }

    fn cancel(&self, kind: TransferKind) -> Vec<TransferRequest> {
        let lane = self.shared.lane(kind);
        let mut state = lane.state.lock();
        lane.generation.fetch_add(1, Ordering::AcqRel);
        let cancelled: Vec<_> = state.queue.drain(..).collect();
        if !cancelled.is_empty() {
            debug!("Cancelled {} queued {} requests", cancelled.len(), kind);
        }
        cancelled
    }
}

fn run_lane(shared: Arc<Shared>, kind: TransferKind) {
    let lane = shared.lane(kind);
    debug!("{} worker started", kind);

    loop {
        let (mut request, generation) = {
            let mut state = lane.state.lock();
            loop {
                if state.shutdown {
                    debug!("{} worker stopped", kind);
                    return;
                }
                if let Some(request) = state.queue.pop_front() {
                    break (request, lane.generation.load(Ordering::Acquire));
                }
                lane.ready.wait(&mut state);
            }
        };

        let result = execute_transfer(
            &shared.handle,
            &shared.endpoints,
            &shared.timeouts,
            &mut request,
            || lane.generation.load(Ordering::Acquire) != generation,
        );

        if let Err(e) = &result {
            if !e.is_cancellation() {
                warn!("{} transfer failed: {}", kind, e);
            }
        }

        match shared.handler() {
            Some(handler) => handler.on_transfer_complete(TransferCompletion::new(request, result)),
            None => warn!("No completion handler bound, dropping {} completion", kind),
        }
    }
}
