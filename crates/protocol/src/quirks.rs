//! Per-model quirk flags and the built-in device table

use crate::error::{ProtocolError, Result};
use bitflags::bitflags;

bitflags! {
    /// Static behavioural overrides for a device model
    ///
    /// Fixed at attach time. Bit positions are stable because they are also
    /// accepted by name from configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Quirks: u32 {
        /// Device lacks a union functional descriptor
        const NO_UNION_NORMAL = 1 << 0;
        /// Only one bulk-in transfer may be outstanding at a time
        const SINGLE_RX_URB = 1 << 1;
        /// Device does not answer capability queries
        const NO_CAP_LINE = 1 << 2;
        /// Data endpoints live on the control interface
        const NO_DATA_INTERFACE = 1 << 4;
        /// Refuse to bind to this device
        const IGNORE_DEVICE = 1 << 5;
        /// Control line state must be re-sent after every resume
        const FORCE_CONTROL_LINE_STATE = 1 << 6;
        /// Clear halt on both bulk endpoints before the first transfer
        const CLEAR_HALT_ON_INIT = 1 << 7;
    }
}

impl Quirks {
    /// Parse a list of flag names such as `"single_rx_urb"` or
    /// `"CLEAR-HALT-ON-INIT"`
    pub fn parse_names<'a, I>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().try_fold(Quirks::empty(), |acc, name| {
            let normalized = name.trim().to_ascii_uppercase().replace('-', "_");
            Quirks::from_name(&normalized)
                .map(|flag| acc | flag)
                .ok_or_else(|| ProtocolError::UnknownQuirk(name.to_string()))
        })
    }
}

/// A known device model and its quirks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQuirk {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
    pub quirks: Quirks,
}

/// Models this driver binds to out of the box
pub const KNOWN_DEVICES: &[DeviceQuirk] = &[
    DeviceQuirk {
        vendor_id: 0x1a86,
        product_id: 0x7523,
        name: "CH340",
        quirks: Quirks::CLEAR_HALT_ON_INIT,
    },
    DeviceQuirk {
        vendor_id: 0x1a86,
        product_id: 0x7522,
        name: "CH340K",
        quirks: Quirks::CLEAR_HALT_ON_INIT,
    },
    DeviceQuirk {
        vendor_id: 0x1a86,
        product_id: 0x5523,
        name: "CH341",
        quirks: Quirks::CLEAR_HALT_ON_INIT,
    },
    DeviceQuirk {
        vendor_id: 0x1a86,
        product_id: 0xe523,
        name: "CH330",
        quirks: Quirks::CLEAR_HALT_ON_INIT,
    },
    DeviceQuirk {
        vendor_id: 0x4348,
        product_id: 0x5523,
        name: "CH340 (custom)",
        quirks: Quirks::CLEAR_HALT_ON_INIT,
    },
];

/// Look up a model in the built-in table
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static DeviceQuirk> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}
