//! Device control collaborator
//!
//! Vendor-specific request encoding lives behind this trait. The driver only
//! speaks in abstract parameters: register addresses, line codings and
//! control-line levels.

use crate::transfer::TransportError;
use protocol::LineCoding;

/// Synchronous control requests to the adapter
///
/// Only called from process context, under the port's control-plane lock.
pub trait DeviceControl: Send {
    fn read_register(&mut self, addr: u16) -> Result<u8, TransportError>;

    fn write_register(&mut self, addr: u16, value: u8) -> Result<(), TransportError>;

    fn set_line_coding(&mut self, coding: &LineCoding) -> Result<(), TransportError>;

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError>;

    /// Clear a halt condition on `endpoint`
    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError>;
}
