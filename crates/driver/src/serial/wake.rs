//! Deferred-wake worker
//!
//! Drains the wake queue outside the completion context. One worker per
//! port; it holds only a weak reference so it never keeps a dropped port
//! alive.

use super::port::SerialPort;
use common::{WakeReceiver, WakeRequest};
use std::ops::ControlFlow;
use std::sync::Weak;
use tracing::{debug, info, warn};

pub struct WakeWorker {
    port: Weak<SerialPort>,
    rx: WakeReceiver,
}

impl WakeWorker {
    pub(crate) fn new(port: Weak<SerialPort>, rx: WakeReceiver) -> Self {
        Self { port, rx }
    }

    /// Run the worker on a dedicated thread
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("serial-wake".to_string())
            .spawn(move || self.run_blocking())
    }

    /// Run the worker as a task on a tokio runtime
    pub fn spawn_on(self, runtime: &tokio::runtime::Handle) -> tokio::task::JoinHandle<()> {
        runtime.spawn(self.run_async())
    }

    /// Serve requests until shutdown (blocking)
    pub fn run_blocking(self) {
        info!("Wake worker started");
        while let Ok(request) = self.rx.recv_blocking() {
            if self.handle(request).is_break() {
                break;
            }
        }
        info!("Wake worker stopped");
    }

    /// Serve requests until shutdown
    pub async fn run_async(self) {
        info!("Wake worker started");
        while let Ok(request) = self.rx.recv().await {
            if self.handle(request).is_break() {
                break;
            }
        }
        info!("Wake worker stopped");
    }

    /// Serve whatever is queued right now
    ///
    /// Returns false once the worker should stop.
    pub fn run_pending(&self) -> bool {
        while let Some(request) = self.rx.try_recv() {
            if self.handle(request).is_break() {
                return false;
            }
        }
        true
    }

    fn handle(&self, request: WakeRequest) -> ControlFlow<()> {
        debug!("Wake request: {:?}", request);

        if request == WakeRequest::Shutdown {
            return ControlFlow::Break(());
        }

        let Some(port) = self.port.upgrade() else {
            warn!("Port dropped, stopping wake worker");
            return ControlFlow::Break(());
        };

        match request {
            WakeRequest::WriteSpace => {
                port.service_output();
            }
            WakeRequest::Hangup => port.hangup_terminal(),
            WakeRequest::DeviceLost => port.disconnect(),
            WakeRequest::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}
