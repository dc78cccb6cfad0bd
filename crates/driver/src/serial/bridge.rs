//! Stream bridge between the pools and the terminal consumer

use super::write_pool::WritePool;
use common::TerminalSink;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace, warn};

/// Byte counters of the data path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Received bytes the consumer had no room for
    pub rx_dropped: u64,
}

pub struct StreamBridge {
    terminal: Arc<dyn TerminalSink>,
    write_pool: Arc<WritePool>,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
}

impl StreamBridge {
    pub fn new(terminal: Arc<dyn TerminalSink>, write_pool: Arc<WritePool>) -> Self {
        Self {
            terminal,
            write_pool,
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            rx_dropped: AtomicU64::new(0),
        }
    }

    /// Feed outbound bytes to the write pool; returns the accepted count
    pub fn push(&self, bytes: &[u8]) -> usize {
        self.write_pool.submit(bytes)
    }

    /// Hand received bytes to the consumer
    ///
    /// Whatever exceeds the consumer's capacity is dropped and counted.
    pub fn deliver(&self, bytes: &[u8]) {
        let room = self.terminal.sink_capacity();
        let count = room.min(bytes.len());

        if count > 0 {
            self.terminal.deliver(&bytes[..count]);
            self.rx_bytes.fetch_add(count as u64, Ordering::Relaxed);
        }

        let dropped = bytes.len() - count;
        if dropped > 0 {
            self.rx_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            error!("Terminal full, dropped {} received bytes", dropped);
        }
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Refill the write pool from the consumer's pending output
    ///
    /// Runs on the wake worker, never in completion context. Returns the
    /// number of bytes moved.
    pub fn service_output(&self) -> usize {
        self.terminal.notify_space_available();

        let mut moved = 0;
        loop {
            let room = self.write_pool.space_available();
            if room == 0 {
                break;
            }
            let pending = self.terminal.pull_pending(room);
            if pending.is_empty() {
                break;
            }

            let accepted = self.write_pool.submit(&pending);
            moved += accepted;
            if accepted < pending.len() {
                // Room shrank under a concurrent writer, or the port closed
                warn!(
                    "Write pool refused {} pulled bytes",
                    pending.len() - accepted
                );
                break;
            }
        }

        if moved > 0 {
            trace!("Moved {} pending bytes into the write pool", moved);
        }
        moved
    }

    pub fn hangup(&self) {
        self.terminal.hangup();
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
        }
    }
}
