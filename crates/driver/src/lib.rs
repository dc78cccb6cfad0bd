//! USB-to-serial driver core
//!
//! Moves bytes between a USB serial adapter and a terminal consumer:
//!
//! - a write pool of fixed slots for outbound data, transmitted in order;
//! - a read pool that keeps inbound requests armed while the port is active;
//! - a status channel decoding modem-line and line-error reports;
//! - a lifecycle (open, nested suspend, one-way disconnect) that every
//!   completion consults before re-arming.
//!
//! Completions never block; anything that may (refilling output from the
//! consumer, hanging it up, tearing down after device loss) is queued to a
//! [`WakeWorker`].
//!
//! # Example
//!
//! ```no_run
//! use driver::config::DriverConfig;
//! use driver::usb::UsbSerialDevice;
//! # use std::sync::Arc;
//! # fn run(terminal: Arc<dyn common::TerminalSink>) -> anyhow::Result<()> {
//! let config = DriverConfig::load_or_default();
//! let context = rusb::Context::new()?;
//! let device = UsbSerialDevice::open(&context, 0x1a86, 0x7523)?;
//! let (port, worker, _backend) = device.attach(&config, terminal)?;
//! worker.spawn()?;
//!
//! port.open()?;
//! port.write(b"AT\r\n");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod serial;
pub mod usb;

pub use config::{DriverConfig, PortConfig};
pub use error::{DriverError, Result};
pub use serial::{EventCounters, Phase, SerialPort, SerialSettings, SuspendKind, WakeWorker};
