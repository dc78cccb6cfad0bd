//! Port lifecycle
//!
//! [`Lifecycle`] is owned by the control plane and only changes under its
//! lock. Every change is published to the [`Gate`], an atomic copy the
//! completion context reads to decide whether a request may be armed.

use crate::error::DriverError;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;

/// Tagged view of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bound to a device, port not open
    Attached,
    /// Open and moving data
    Active,
    /// Power-managed; `depth` nested suspends are outstanding
    Suspended { depth: u32 },
    /// Device gone (terminal)
    Disconnected,
}

/// Who asked for the suspend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    /// Idle-driven; refused while a write is transmitting
    Auto,
    /// Host-driven; always proceeds
    System,
}

/// Lifecycle fields
#[derive(Debug, Default)]
pub struct Lifecycle {
    opened: bool,
    suspend_depth: u32,
    disconnected: bool,
}

impl Lifecycle {
    pub fn phase(&self) -> Phase {
        if self.disconnected {
            Phase::Disconnected
        } else if self.suspend_depth > 0 {
            Phase::Suspended {
                depth: self.suspend_depth,
            }
        } else if self.opened {
            Phase::Active
        } else {
            Phase::Attached
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn suspend_depth(&self) -> u32 {
        self.suspend_depth
    }

    pub fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.disconnected {
            Err(DriverError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Returns whether the port was newly opened
    pub fn open(&mut self) -> Result<bool, DriverError> {
        self.ensure_connected()?;
        let newly = !self.opened;
        self.opened = true;
        Ok(newly)
    }

    /// Returns whether the port was open
    pub fn close(&mut self) -> bool {
        std::mem::replace(&mut self.opened, false)
    }

    /// Returns true on the outermost (0 -> 1) suspend
    pub fn suspend(&mut self) -> Result<bool, DriverError> {
        self.ensure_connected()?;
        self.suspend_depth += 1;
        Ok(self.suspend_depth == 1)
    }

    /// Returns true on the matching (1 -> 0) resume
    pub fn resume(&mut self) -> Result<bool, DriverError> {
        self.ensure_connected()?;
        if self.suspend_depth == 0 {
            warn!("Resume without matching suspend ignored");
            return Ok(false);
        }
        self.suspend_depth -= 1;
        Ok(self.suspend_depth == 0)
    }

    /// Returns true the first time
    pub fn disconnect(&mut self) -> bool {
        !std::mem::replace(&mut self.disconnected, true)
    }

    fn gate_bits(&self) -> u8 {
        let mut bits = 0;
        if self.opened {
            bits |= Gate::OPEN;
        }
        if self.suspend_depth > 0 {
            bits |= Gate::SUSPENDED;
        }
        if self.disconnected {
            bits |= Gate::DISCONNECTED;
        }
        bits
    }
}

/// Lock-free snapshot of the lifecycle for the completion context
#[derive(Debug, Default)]
pub struct Gate {
    bits: AtomicU8,
}

impl Gate {
    const OPEN: u8 = 1 << 0;
    const SUSPENDED: u8 = 1 << 1;
    const DISCONNECTED: u8 = 1 << 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the lifecycle
    pub fn publish(&self, lifecycle: &Lifecycle) {
        self.bits.store(lifecycle.gate_bits(), Ordering::Release);
    }

    fn load(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn is_disconnected(&self) -> bool {
        self.load() & Self::DISCONNECTED != 0
    }

    /// Open and still connected; writes may be queued
    pub fn accepts_writes(&self) -> bool {
        self.load() & (Self::OPEN | Self::DISCONNECTED) == Self::OPEN
    }

    /// Open, not suspended and connected; requests may be armed
    pub fn is_running(&self) -> bool {
        self.load() == Self::OPEN
    }
}
