//! Modem line state and event counters
//!
//! The status channel reports levels; this module turns them into edges by
//! diffing each report against the previous one and counting every change.
//! Process-context callers block on a condition variable until the counters
//! move away from a snapshot they took earlier.

use crate::error::DriverError;
use parking_lot::{Condvar, Mutex};
use protocol::{LineErrors, ModemStatus, StatusPayload};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Monotonic event counters (TIOCGICOUNT style)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounters {
    pub cts: u64,
    pub dsr: u64,
    pub rng: u64,
    pub dcd: u64,
    pub frame: u64,
    pub overrun: u64,
    pub parity: u64,
}

impl EventCounters {
    /// Modem lines whose counter moved since `earlier`
    pub fn changed_lines(&self, earlier: &EventCounters) -> ModemStatus {
        let mut lines = ModemStatus::empty();
        lines.set(ModemStatus::CTS, self.cts != earlier.cts);
        lines.set(ModemStatus::DSR, self.dsr != earlier.dsr);
        lines.set(ModemStatus::RI, self.rng != earlier.rng);
        lines.set(ModemStatus::DCD, self.dcd != earlier.dcd);
        lines
    }

    /// Per-counter increase since `earlier`
    pub fn delta(&self, earlier: &EventCounters) -> EventCounters {
        EventCounters {
            cts: self.cts.saturating_sub(earlier.cts),
            dsr: self.dsr.saturating_sub(earlier.dsr),
            rng: self.rng.saturating_sub(earlier.rng),
            dcd: self.dcd.saturating_sub(earlier.dcd),
            frame: self.frame.saturating_sub(earlier.frame),
            overrun: self.overrun.saturating_sub(earlier.overrun),
            parity: self.parity.saturating_sub(earlier.parity),
        }
    }

    fn record_lines(&mut self, changed: ModemStatus) {
        if changed.contains(ModemStatus::CTS) {
            self.cts += 1;
        }
        if changed.contains(ModemStatus::DSR) {
            self.dsr += 1;
        }
        if changed.contains(ModemStatus::RI) {
            self.rng += 1;
        }
        if changed.contains(ModemStatus::DCD) {
            self.dcd += 1;
        }
    }

    fn record_errors(&mut self, errors: LineErrors) {
        if errors.contains(LineErrors::FRAMING) {
            self.frame += 1;
        }
        if errors.contains(LineErrors::OVERRUN) {
            self.overrun += 1;
        }
        if errors.contains(LineErrors::PARITY) {
            self.parity += 1;
        }
    }
}

/// Outcome of applying one status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Levels after the report
    pub status: ModemStatus,
    /// Lines counted as changed
    pub changed: ModemStatus,
    pub errors: LineErrors,
    /// DCD went from asserted to deasserted
    pub carrier_lost: bool,
}

struct ModemInner {
    /// Last reported levels; `None` until the first report
    status: Option<ModemStatus>,
    counters: EventCounters,
    /// Counters before the last report
    previous: EventCounters,
    gone: bool,
}

/// Shared modem state
pub struct ModemState {
    inner: Mutex<ModemInner>,
    changed: Condvar,
}

impl Default for ModemState {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ModemInner {
                status: None,
                counters: EventCounters::default(),
                previous: EventCounters::default(),
                gone: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Fold a status report into the state and wake waiters on any change
    ///
    /// The first report after attach has nothing to diff against, so every
    /// modem line counts as changed.
    pub fn apply(&self, payload: &StatusPayload) -> StatusUpdate {
        let status = payload.modem_status();
        let errors = payload.line_errors();

        let mut inner = self.inner.lock();
        let changed = match inner.status {
            Some(previous) => previous ^ status,
            None => ModemStatus::all(),
        };
        let carrier_lost = inner
            .status
            .is_some_and(|previous| previous.contains(ModemStatus::DCD))
            && !status.contains(ModemStatus::DCD);

        inner.previous = inner.counters;
        inner.status = Some(status);
        inner.counters.record_lines(changed);
        inner.counters.record_errors(errors);
        let moved = inner.counters != inner.previous;
        drop(inner);

        if payload.is_coalesced() {
            trace!("Status report covers several events");
        }
        if !errors.is_empty() {
            warn!("Line errors reported: {:?}", errors);
        }
        if moved {
            debug!(?status, ?changed, "Modem status changed");
            self.changed.notify_all();
        }

        StatusUpdate {
            status,
            changed,
            errors,
            carrier_lost,
        }
    }

    /// Current levels; empty until the first report
    pub fn status(&self) -> ModemStatus {
        self.inner.lock().status.unwrap_or_else(ModemStatus::empty)
    }

    pub fn counters(&self) -> EventCounters {
        self.inner.lock().counters
    }

    /// Counter increase caused by the most recent report
    pub fn last_delta(&self) -> EventCounters {
        let inner = self.inner.lock();
        inner.counters.delta(&inner.previous)
    }

    /// Wake every waiter with [`DriverError::Disconnected`]
    pub fn mark_disconnected(&self) {
        self.inner.lock().gone = true;
        self.changed.notify_all();
    }

    /// Block until any counter differs from `snapshot`
    ///
    /// `None` waits without a deadline.
    pub fn wait_for_change(
        &self,
        snapshot: &EventCounters,
        timeout: Option<Duration>,
    ) -> Result<EventCounters, DriverError> {
        self.wait_until(timeout, |counters| counters != snapshot)
    }

    /// Block until a line in `mask` changed since `snapshot`
    ///
    /// Returns the lines (within `mask`) that changed.
    pub fn wait_for_lines(
        &self,
        snapshot: &EventCounters,
        mask: ModemStatus,
        timeout: Option<Duration>,
    ) -> Result<ModemStatus, DriverError> {
        let counters = self.wait_until(timeout, |counters| {
            counters.changed_lines(snapshot).intersects(mask)
        })?;
        Ok(counters.changed_lines(snapshot) & mask)
    }

    fn wait_until<F>(
        &self,
        timeout: Option<Duration>,
        mut done: F,
    ) -> Result<EventCounters, DriverError>
    where
        F: FnMut(&EventCounters) -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        let mut timed_out = false;

        loop {
            if inner.gone {
                return Err(DriverError::Disconnected);
            }
            if done(&inner.counters) {
                return Ok(inner.counters);
            }
            if timed_out {
                return Err(DriverError::Timeout);
            }
            timed_out = match deadline {
                Some(deadline) => self.changed.wait_until(&mut inner, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut inner);
                    false
                }
            };
        }
    }
}
