//! Device control over USB control transfers

use super::transfers::map_rusb_error;
use common::{DeviceControl, TransportError};
use protocol::{ControlLines, LineCoding};
use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// CDC class request: set line coding
pub const CDC_SET_LINE_CODING: u8 = 0x20;
/// CDC class request: set control line state
pub const CDC_SET_CONTROL_LINE_STATE: u8 = 0x22;
/// Vendor request: read register
pub const VENDOR_READ: u8 = 0x95;
/// Vendor request: write register
pub const VENDOR_WRITE: u8 = 0x9a;

const REQUEST_CLEAR_FEATURE: u8 = 0x01;
const FEATURE_ENDPOINT_HALT: u16 = 0x00;

/// [`DeviceControl`] on a claimed rusb handle
pub struct RusbControl {
    handle: Arc<DeviceHandle<Context>>,
    interface: u8,
    timeout: Duration,
}

impl RusbControl {
    pub fn new(handle: Arc<DeviceHandle<Context>>, interface: u8, timeout: Duration) -> Self {
        Self {
            handle,
            interface,
            timeout,
        }
    }

    fn class_out(&self, request: u8, value: u16, data: &[u8]) -> Result<(), TransportError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(
                request_type,
                request,
                value,
                self.interface as u16,
                data,
                self.timeout,
            )
            .map(|_| ())
            .map_err(map_rusb_error)
    }
}

impl DeviceControl for RusbControl {
    fn read_register(&mut self, addr: u16) -> Result<u8, TransportError> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let mut buf = [0u8; 2];
        let len = self
            .handle
            .read_control(request_type, VENDOR_READ, addr, 0, &mut buf, self.timeout)
            .map_err(map_rusb_error)?;
        if len == 0 {
            return Err(TransportError::Other(format!(
                "Empty read of register {:#06x}",
                addr
            )));
        }
        trace!("Register {:#06x} = {:#04x}", addr, buf[0]);
        Ok(buf[0])
    }

    fn write_register(&mut self, addr: u16, value: u8) -> Result<(), TransportError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(
                request_type,
                VENDOR_WRITE,
                addr,
                value as u16,
                &[],
                self.timeout,
            )
            .map_err(map_rusb_error)?;
        trace!("Register {:#06x} <- {:#04x}", addr, value);
        Ok(())
    }

    fn set_line_coding(&mut self, coding: &LineCoding) -> Result<(), TransportError> {
        debug!("SET_LINE_CODING {}", coding);
        self.class_out(CDC_SET_LINE_CODING, 0, &coding.encode())
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        let lines = ControlLines::from_levels(dtr, rts);
        debug!(dtr, rts, "SET_CONTROL_LINE_STATE");
        self.class_out(CDC_SET_CONTROL_LINE_STATE, lines.bits() as u16, &[])
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Standard, Recipient::Endpoint);
        self.handle
            .write_control(
                request_type,
                REQUEST_CLEAR_FEATURE,
                FEATURE_ENDPOINT_HALT,
                endpoint as u16,
                &[],
                self.timeout,
            )
            .map_err(map_rusb_error)?;
        debug!("Cleared halt on endpoint {:#04x}", endpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_types() {
        assert_eq!(
            rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device),
            0xc0
        );
        assert_eq!(
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            0x40
        );
        assert_eq!(
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface),
            0x21
        );
    }

    #[test]
    fn test_control_line_state_value() {
        assert_eq!(ControlLines::from_levels(true, true).bits(), 0x03);
        assert_eq!(ControlLines::from_levels(false, true).bits(), 0x02);
    }
}
