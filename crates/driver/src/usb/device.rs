//! USB serial device discovery and setup
//!
//! Opens the adapter, detaches any kernel driver, claims the interfaces that
//! carry the three data-path endpoints and wires a [`SerialPort`] to the
//! rusb backend.

use super::backend::RusbBackend;
use super::control::RusbControl;
use super::transfers::{TransferTimeouts, map_rusb_error};
use super::Endpoints;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::serial::{SerialPort, WakeWorker};
use common::{CompletionHandler, TerminalSink, TransportError};
use rusb::{Context, DeviceHandle, TransferType, UsbContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One endpoint as listed by the configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub interface: u8,
    pub address: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

/// Pick the data-path endpoints out of a descriptor listing
///
/// Matching is by direction and type, so bulk endpoints listed out before
/// in (or the reverse) are both accepted. The interface holding the
/// interrupt endpoint receives class requests.
pub fn find_endpoints<I>(endpoints: I) -> Result<Endpoints>
where
    I: IntoIterator<Item = EndpointInfo>,
{
    let mut bulk_in = None;
    let mut bulk_out = None;
    let mut interrupt_in = None;

    for ep in endpoints {
        let is_in = ep.address & 0x80 != 0;
        let target = match (ep.transfer_type, is_in) {
            (TransferType::Bulk, true) => &mut bulk_in,
            (TransferType::Bulk, false) => &mut bulk_out,
            (TransferType::Interrupt, true) => &mut interrupt_in,
            _ => continue,
        };
        if target.is_none() {
            *target = Some(ep);
        }
    }

    match (bulk_in, bulk_out, interrupt_in) {
        (Some(bulk_in), Some(bulk_out), Some(interrupt_in)) => Ok(Endpoints {
            interface: interrupt_in.interface,
            data_interface: bulk_in.interface,
            bulk_in: bulk_in.address,
            bulk_out: bulk_out.address,
            interrupt_in: interrupt_in.address,
            bulk_in_max_packet: bulk_in.max_packet_size,
        }),
        _ => Err(DriverError::InvalidConfig(
            "device lacks a bulk-in, bulk-out or interrupt-in endpoint".to_string(),
        )),
    }
}

/// Read buffer size for a bulk-in endpoint
///
/// One buffer per max packet: a bulk read that times out after a partial
/// packet reports no data, so a larger buffer can strand a short burst.
/// `configured` is used when the descriptor reports no packet size.
pub fn read_buffer_size(endpoints: &Endpoints, configured: usize) -> usize {
    match endpoints.bulk_in_max_packet {
        0 => configured,
        n => usize::from(n),
    }
}

/// An opened and claimed adapter
pub struct UsbSerialDevice {
    handle: Arc<DeviceHandle<Context>>,
    endpoints: Endpoints,
    vendor_id: u16,
    product_id: u16,
}

impl UsbSerialDevice {
    /// Open the first device matching `vendor_id:product_id`
    pub fn open(context: &Context, vendor_id: u16, product_id: u16) -> Result<Self> {
        let devices = context.devices().map_err(map_rusb_error)?;
        let device = devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .is_ok_and(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            })
            .ok_or(DriverError::Transport(TransportError::NoDevice))?;

        let handle = device.open().map_err(|e| {
            warn!("Failed to open device {:04x}:{:04x}: {}", vendor_id, product_id, e);
            map_rusb_error(e)
        })?;

        let config = device.active_config_descriptor().map_err(map_rusb_error)?;
        let mut listing = Vec::new();
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                for ep in descriptor.endpoint_descriptors() {
                    listing.push(EndpointInfo {
                        interface: descriptor.interface_number(),
                        address: ep.address(),
                        transfer_type: ep.transfer_type(),
                        max_packet_size: ep.max_packet_size(),
                    });
                }
            }
        }
        let endpoints = find_endpoints(listing)?;

        let mut interfaces = vec![endpoints.interface];
        if endpoints.data_interface != endpoints.interface {
            interfaces.push(endpoints.data_interface);
        }

        for interface in interfaces {
            match handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", interface);
                    if let Err(e) = handle.detach_kernel_driver(interface) {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        );
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }

            handle.claim_interface(interface).map_err(|e| {
                warn!("Failed to claim interface {}: {}", interface, e);
                map_rusb_error(e)
            })?;
            debug!("Claimed interface {}", interface);
        }

        info!(
            "Opened {:04x}:{:04x} on bus {} address {}",
            vendor_id,
            product_id,
            device.bus_number(),
            device.address()
        );

        Ok(Self {
            handle: Arc::new(handle),
            endpoints,
            vendor_id,
            product_id,
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    /// Attach a serial port to this device
    ///
    /// The returned backend must outlive the port's use; dropping it stops
    /// the transfer workers.
    pub fn attach(
        &self,
        config: &DriverConfig,
        terminal: Arc<dyn TerminalSink>,
    ) -> Result<(Arc<SerialPort>, WakeWorker, Arc<RusbBackend>)> {
        let quirks = config
            .quirks_for(self.vendor_id, self.product_id)
            .ok_or_else(|| {
                DriverError::InvalidConfig(format!(
                    "device {:04x}:{:04x} is not supported",
                    self.vendor_id, self.product_id
                ))
            })?;

        let mut port_config = config.port_config(quirks);
        port_config.bulk_in_endpoint = self.endpoints.bulk_in;
        port_config.bulk_out_endpoint = self.endpoints.bulk_out;
        port_config.read_buffer_size =
            read_buffer_size(&self.endpoints, port_config.read_buffer_size);
        debug!("Read buffers of {} bytes", port_config.read_buffer_size);

        let timeouts = TransferTimeouts {
            write: config.usb.write_timeout(),
            poll: config.usb.read_poll(),
        };
        let backend = Arc::new(
            RusbBackend::start(self.handle.clone(), self.endpoints, timeouts)
                .map_err(|e| DriverError::Transport(TransportError::Other(e.to_string())))?,
        );
        let control = RusbControl::new(
            self.handle.clone(),
            self.endpoints.interface,
            config.usb.control_timeout(),
        );

        let (port, worker) =
            SerialPort::attach(port_config, backend.clone(), Box::new(control), terminal)?;
        let handler: Arc<dyn CompletionHandler> = port.clone();
        backend.bind(Arc::downgrade(&handler));

        Ok((port, worker, backend))
    }
}
