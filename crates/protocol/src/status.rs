//! Status channel payload
//!
//! The adapter reports line and modem status through a recurring interrupt
//! transfer carrying a fixed 4-byte payload:
//!
//! ```text
//! byte 0   line status class   bit1 overrun, bit2 parity,
//!                              bit2|bit6 framing, bit3 modem marker
//! byte 1   coalescing flag     bit2 set: several changes since last report
//! byte 2   modem lines         inverted; bit0 CTS, bit1 DSR, bit2 RI, bit3 DCD
//! byte 3   reserved
//! ```
//!
//! Decoding here is pure: edge detection against previous levels happens in
//! the driver's modem state.

use crate::error::{ProtocolError, Result};
use crate::signals::{LineErrors, MODEM_STATUS_MASK, ModemStatus};

/// Fixed length of a status report
pub const STATUS_PAYLOAD_LEN: usize = 4;

/// Byte 1: more than one status change happened since the last report
pub const MULTI_STATUS: u8 = 0x04;

/// Byte 0: report carries modem line changes
pub const TYPE_MODEM: u8 = 1 << 3;
/// Byte 0: framing error (both bits set)
pub const TYPE_FRAMING: u8 = (1 << 2) | (1 << 6);
/// Byte 0: parity error
pub const TYPE_PARITY: u8 = 1 << 2;
/// Byte 0: receive overrun
pub const TYPE_OVERRUN: u8 = 1 << 1;

/// A validated status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
    raw: [u8; STATUS_PAYLOAD_LEN],
}

impl StatusPayload {
    /// Validate the length of a received payload
    ///
    /// Anything other than exactly [`STATUS_PAYLOAD_LEN`] bytes is rejected
    /// so that the caller can discard it without touching state.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let raw: [u8; STATUS_PAYLOAD_LEN] =
            data.try_into()
                .map_err(|_| ProtocolError::PayloadLength {
                    expected: STATUS_PAYLOAD_LEN,
                    actual: data.len(),
                })?;
        Ok(Self { raw })
    }

    pub fn raw(&self) -> [u8; STATUS_PAYLOAD_LEN] {
        self.raw
    }

    /// Several status events were folded into this report
    pub fn is_coalesced(&self) -> bool {
        self.raw[1] & MULTI_STATUS != 0
    }

    /// Current modem line levels (byte 2, inverted)
    pub fn modem_status(&self) -> ModemStatus {
        ModemStatus::from_bits_truncate(!self.raw[2] & MODEM_STATUS_MASK)
    }

    /// Whether byte 0 marks this as a modem-class report
    pub fn has_modem_marker(&self) -> bool {
        self.raw[0] & TYPE_MODEM != 0
    }

    /// Line error classes present in byte 0
    ///
    /// Classes are reported as an unordered set: a byte matching the framing
    /// pattern also matches the parity bit, and both are returned.
    ///
    /// Drivers that switch on the exact class value count `0x44` as a
    /// framing error only; here it also bumps the parity counter.
    pub fn line_errors(&self) -> LineErrors {
        let class = self.raw[0];
        let mut errors = LineErrors::empty();
        if class & TYPE_OVERRUN != 0 {
            errors |= LineErrors::OVERRUN;
        }
        if class & TYPE_PARITY != 0 {
            errors |= LineErrors::PARITY;
        }
        if class & TYPE_FRAMING == TYPE_FRAMING {
            errors |= LineErrors::FRAMING;
        }
        errors
    }
}
