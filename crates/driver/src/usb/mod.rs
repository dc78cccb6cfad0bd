//! rusb-backed transport
//!
//! Binds [`SerialPort`](crate::SerialPort) to real hardware: blocking
//! transfer workers implement the transfer-subsystem trait and control
//! transfers implement device control.

pub mod backend;
pub mod control;
pub mod device;
pub mod transfers;

pub use backend::RusbBackend;
pub use control::RusbControl;
pub use device::{EndpointInfo, UsbSerialDevice, find_endpoints, read_buffer_size};
pub use transfers::{TransferTimeouts, map_rusb_error};

/// Data-path endpoint addresses of one adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    /// Interface receiving class requests
    pub interface: u8,
    /// Interface holding the bulk endpoints
    pub data_interface: u8,
    pub bulk_in: u8,
    pub bulk_out: u8,
    pub interrupt_in: u8,
    /// wMaxPacketSize of the bulk-in endpoint
    pub bulk_in_max_packet: u16,
}
