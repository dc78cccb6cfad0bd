//! Modem, control-line and line-error bit sets
//!
//! These are the logical (already de-inverted) views used by the driver.
//! Wire encodings are handled in [`crate::status`] and by the device-control
//! backend.

use bitflags::bitflags;

bitflags! {
    /// Modem input lines as reported by the status channel
    ///
    /// Bit positions match the (inverted) third byte of the status payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModemStatus: u8 {
        /// Clear To Send
        const CTS = 0x01;
        /// Data Set Ready
        const DSR = 0x02;
        /// Ring Indicator
        const RI = 0x04;
        /// Data Carrier Detect
        const DCD = 0x08;
    }
}

/// Mask of the modem bits inside the status byte
pub const MODEM_STATUS_MASK: u8 = 0x0f;

bitflags! {
    /// Output control lines driven by the host
    ///
    /// Bit positions match the CDC SET_CONTROL_LINE_STATE wValue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlLines: u8 {
        /// Data Terminal Ready
        const DTR = 0x01;
        /// Request To Send
        const RTS = 0x02;
    }
}

impl ControlLines {
    /// Build from individual line levels
    pub fn from_levels(dtr: bool, rts: bool) -> Self {
        let mut lines = Self::empty();
        lines.set(Self::DTR, dtr);
        lines.set(Self::RTS, rts);
        lines
    }

    pub fn dtr(self) -> bool {
        self.contains(Self::DTR)
    }

    pub fn rts(self) -> bool {
        self.contains(Self::RTS)
    }
}

bitflags! {
    /// Input line errors carried by a status report
    ///
    /// The classes are not mutually exclusive: a single report may carry any
    /// combination of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LineErrors: u8 {
        const OVERRUN = 0x01;
        const PARITY = 0x02;
        const FRAMING = 0x04;
    }
}

bitflags! {
    /// Combined view of input and output lines (TIOCMGET style)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SignalState: u16 {
        const DTR = 0x0001;
        const RTS = 0x0002;
        const CTS = 0x0004;
        const DSR = 0x0008;
        const RI = 0x0010;
        const DCD = 0x0020;
    }
}

impl SignalState {
    /// Merge the host-driven outputs with the device-reported inputs
    pub fn from_lines(output: ControlLines, input: ModemStatus) -> Self {
        let mut state = Self::empty();
        state.set(Self::DTR, output.contains(ControlLines::DTR));
        state.set(Self::RTS, output.contains(ControlLines::RTS));
        state.set(Self::CTS, input.contains(ModemStatus::CTS));
        state.set(Self::DSR, input.contains(ModemStatus::DSR));
        state.set(Self::RI, input.contains(ModemStatus::RI));
        state.set(Self::DCD, input.contains(ModemStatus::DCD));
        state
    }

    /// The output lines contained in this state
    pub fn control_lines(self) -> ControlLines {
        ControlLines::from_levels(self.contains(Self::DTR), self.contains(Self::RTS))
    }

    /// The modem input lines contained in this state
    pub fn modem_status(self) -> ModemStatus {
        let mut status = ModemStatus::empty();
        status.set(ModemStatus::CTS, self.contains(Self::CTS));
        status.set(ModemStatus::DSR, self.contains(Self::DSR));
        status.set(ModemStatus::RI, self.contains(Self::RI));
        status.set(ModemStatus::DCD, self.contains(Self::DCD));
        status
    }
}
