//! Wire formats for the USB serial bridge
//!
//! This crate defines the byte-level structures exchanged with the adapter:
//! the 4-byte status report, the packed line coding, the register addresses
//! used for break control, and the per-model quirk table. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{LineCoding, ModemStatus, StatusPayload};
//!
//! let report = StatusPayload::parse(&[0x08, 0x00, 0xf7, 0x00]).unwrap();
//! assert_eq!(report.modem_status(), ModemStatus::DCD);
//!
//! let wire = LineCoding::default().encode();
//! assert_eq!(LineCoding::decode(&wire).unwrap().baud_rate, 9600);
//! ```

pub mod error;
pub mod line_coding;
pub mod quirks;
pub mod registers;
pub mod signals;
pub mod status;

pub use error::{ProtocolError, Result};
pub use line_coding::{DEFAULT_BAUD_RATE, LINE_CODING_LEN, LineCoding, Parity, StopBits};
pub use quirks::{DeviceQuirk, KNOWN_DEVICES, Quirks, lookup};
pub use signals::{ControlLines, LineErrors, MODEM_STATUS_MASK, ModemStatus, SignalState};
pub use status::{MULTI_STATUS, STATUS_PAYLOAD_LEN, StatusPayload};
