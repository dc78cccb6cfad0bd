//! Driver configuration management
//!
//! [`DriverConfig`] is the file format (TOML, every section optional);
//! [`PortConfig`] is the validated runtime view handed to
//! [`SerialPort::attach`](crate::SerialPort::attach).

use crate::error::DriverError;
use anyhow::{Context, Result, anyhow};
use protocol::{DEFAULT_BAUD_RATE, LineCoding, Quirks};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of write slots in the write pool
pub const WRITE_SLOTS: usize = 16;
/// Number of read slots in the read pool
pub const READ_SLOTS: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub port: PortSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Buffer sizing and line defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    /// Bytes per write slot (power of two)
    #[serde(default = "PortSettings::default_write_slot_size")]
    pub write_slot_size: usize,
    /// Bytes per read buffer; hardware ports use the bulk-in max packet
    /// size instead when the descriptor reports one
    #[serde(default = "PortSettings::default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Bytes reserved for the status report
    #[serde(default = "PortSettings::default_status_buffer_size")]
    pub status_buffer_size: usize,
    #[serde(default = "PortSettings::default_baud")]
    pub default_baud: u32,
    /// Ignore carrier loss
    #[serde(default)]
    pub clocal: bool,
    /// Capacity of the deferred-wake queue
    #[serde(default = "PortSettings::default_wake_queue_depth")]
    pub wake_queue_depth: usize,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            write_slot_size: Self::default_write_slot_size(),
            read_buffer_size: Self::default_read_buffer_size(),
            status_buffer_size: Self::default_status_buffer_size(),
            default_baud: Self::default_baud(),
            clocal: false,
            wake_queue_depth: Self::default_wake_queue_depth(),
        }
    }
}

impl PortSettings {
    fn default_write_slot_size() -> usize {
        512
    }

    fn default_read_buffer_size() -> usize {
        64
    }

    fn default_status_buffer_size() -> usize {
        8
    }

    fn default_baud() -> u32 {
        DEFAULT_BAUD_RATE
    }

    fn default_wake_queue_depth() -> usize {
        32
    }
}

/// USB transport tuning and extra device entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    #[serde(default = "UsbSettings::default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    #[serde(default = "UsbSettings::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Poll interval of the blocking read workers
    #[serde(default = "UsbSettings::default_read_poll_ms")]
    pub read_poll_ms: u64,
    /// Devices to bind in addition to the built-in table
    #[serde(default)]
    pub extra_devices: Vec<DeviceEntry>,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            control_timeout_ms: Self::default_control_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            read_poll_ms: Self::default_read_poll_ms(),
            extra_devices: Vec::new(),
        }
    }
}

impl UsbSettings {
    fn default_control_timeout_ms() -> u64 {
        2000
    }

    fn default_write_timeout_ms() -> u64 {
        5000
    }

    fn default_read_poll_ms() -> u64 {
        100
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

/// Extra device entry
///
/// ```toml
/// [[usb.extra_devices]]
/// vendor_id = "0x1a86"
/// product_id = "0x55d4"
/// quirks = ["single_rx_urb", "clear_halt_on_init"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub vendor_id: String,
    pub product_id: String,
    #[serde(default)]
    pub quirks: Vec<String>,
}

impl DeviceEntry {
    fn ids(&self) -> Result<(u16, u16)> {
        Ok((
            parse_hex_id(&self.vendor_id, "vendor_id")?,
            parse_hex_id(&self.product_id, "product_id")?,
        ))
    }

    fn quirks(&self) -> Result<Quirks> {
        Quirks::parse_names(self.quirks.iter().map(String::as_str))
            .map_err(|e| anyhow!("Device {}:{}: {}", self.vendor_id, self.product_id, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl DriverConfig {
    /// Load configuration from a file (`~` is expanded)
    pub fn load(path: &str) -> Result<Self> {
        let config_path = PathBuf::from(shellexpand::tilde(path).as_ref());

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default path, falling back to defaults
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path.to_string_lossy()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial-bridge").join("driver.toml")
        } else {
            PathBuf::from(".config/usb-serial-bridge/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.usb.control_timeout_ms == 0
            || self.usb.write_timeout_ms == 0
            || self.usb.read_poll_ms == 0
        {
            return Err(anyhow!("USB timeouts must be non-zero"));
        }

        for entry in &self.usb.extra_devices {
            entry.ids()?;
            entry.quirks()?;
        }

        self.port_config(Quirks::empty())
            .validate()
            .map_err(|e| anyhow!("{}", e))
    }

    /// Quirks for a device, or `None` if the device is not supported
    ///
    /// Configured entries take precedence over the built-in table.
    pub fn quirks_for(&self, vendor_id: u16, product_id: u16) -> Option<Quirks> {
        let configured = self.usb.extra_devices.iter().find_map(|entry| {
            match (entry.ids(), entry.quirks()) {
                (Ok(ids), Ok(quirks)) if ids == (vendor_id, product_id) => Some(quirks),
                _ => None,
            }
        });

        configured.or_else(|| protocol::lookup(vendor_id, product_id).map(|d| d.quirks))
    }

    /// Runtime port configuration for a device with `quirks`
    pub fn port_config(&self, quirks: Quirks) -> PortConfig {
        PortConfig {
            write_slots: WRITE_SLOTS,
            write_slot_size: self.port.write_slot_size,
            read_slots: READ_SLOTS,
            read_buffer_size: self.port.read_buffer_size,
            status_buffer_size: self.port.status_buffer_size,
            line_coding: LineCoding {
                baud_rate: self.port.default_baud,
                ..LineCoding::default()
            },
            clocal: self.port.clocal,
            wake_queue_depth: self.port.wake_queue_depth,
            quirks,
            ..PortConfig::default()
        }
    }
}

/// Parse a `0x`-prefixed 16-bit hex id
fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Invalid {} '{}', must start with '0x'", name, id))?;

    if hex.is_empty() || hex.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Runtime configuration of one serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Write pool slots (power of two, at most 32)
    pub write_slots: usize,
    /// Bytes per write slot (power of two)
    pub write_slot_size: usize,
    /// Read pool slots (power of two, at most 32)
    pub read_slots: usize,
    pub read_buffer_size: usize,
    pub status_buffer_size: usize,
    /// Line coding applied at open
    pub line_coding: LineCoding,
    pub clocal: bool,
    pub wake_queue_depth: usize,
    pub quirks: Quirks,
    /// Bulk-in endpoint address, for halt clearing
    pub bulk_in_endpoint: u8,
    /// Bulk-out endpoint address, for halt clearing
    pub bulk_out_endpoint: u8,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            write_slots: WRITE_SLOTS,
            write_slot_size: PortSettings::default_write_slot_size(),
            read_slots: READ_SLOTS,
            read_buffer_size: PortSettings::default_read_buffer_size(),
            status_buffer_size: PortSettings::default_status_buffer_size(),
            line_coding: LineCoding::default(),
            clocal: false,
            wake_queue_depth: PortSettings::default_wake_queue_depth(),
            quirks: Quirks::empty(),
            bulk_in_endpoint: 0x82,
            bulk_out_endpoint: 0x02,
        }
    }
}

impl PortConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        for (name, slots) in [("write", self.write_slots), ("read", self.read_slots)] {
            if !slots.is_power_of_two() || slots > 32 {
                return Err(DriverError::InvalidConfig(format!(
                    "{} slots must be a power of two no larger than 32, got {}",
                    name, slots
                )));
            }
        }

        if !self.write_slot_size.is_power_of_two() {
            return Err(DriverError::InvalidConfig(format!(
                "write slot size must be a power of two, got {}",
                self.write_slot_size
            )));
        }

        if self.read_buffer_size == 0 {
            return Err(DriverError::InvalidConfig(
                "read buffer size must be non-zero".to_string(),
            ));
        }

        if self.status_buffer_size < protocol::STATUS_PAYLOAD_LEN {
            return Err(DriverError::InvalidConfig(format!(
                "status buffer must hold at least {} bytes",
                protocol::STATUS_PAYLOAD_LEN
            )));
        }

        if self.wake_queue_depth == 0 {
            return Err(DriverError::InvalidConfig(
                "wake queue depth must be non-zero".to_string(),
            ));
        }

        self.line_coding.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.port.write_slot_size, 512);
        assert_eq!(config.port.default_baud, 9600);
        assert_eq!(config.usb.control_timeout_ms, 2000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0x1a86", "vendor_id").unwrap(), 0x1a86);
        assert_eq!(parse_hex_id("0X7523", "product_id").unwrap(), 0x7523);
        assert!(parse_hex_id("1a86", "vendor_id").is_err());
        assert!(parse_hex_id("0x", "vendor_id").is_err());
        assert!(parse_hex_id("0x12345", "vendor_id").is_err());
        assert!(parse_hex_id("0xzz", "vendor_id").is_err());
    }

    #[test]
    fn test_quirks_for_builtin_and_extra() {
        let mut config = DriverConfig::default();
        assert_eq!(
            config.quirks_for(0x1a86, 0x7523),
            Some(Quirks::CLEAR_HALT_ON_INIT)
        );
        assert_eq!(config.quirks_for(0x1234, 0x5678), None);

        config.usb.extra_devices.push(DeviceEntry {
            vendor_id: "0x1234".to_string(),
            product_id: "0x5678".to_string(),
            quirks: vec!["single_rx_urb".to_string()],
        });
        assert_eq!(
            config.quirks_for(0x1234, 0x5678),
            Some(Quirks::SINGLE_RX_URB)
        );
    }

    #[test]
    fn test_port_config_validation() {
        let mut port = PortConfig::default();
        assert!(port.validate().is_ok());

        port.write_slots = 12;
        assert!(matches!(port.validate(), Err(DriverError::InvalidConfig(_))));

        port = PortConfig {
            write_slot_size: 100,
            ..PortConfig::default()
        };
        assert!(port.validate().is_err());

        port = PortConfig {
            status_buffer_size: 3,
            ..PortConfig::default()
        };
        assert!(port.validate().is_err());

        port = PortConfig::default();
        port.line_coding.baud_rate = 0;
        assert!(matches!(port.validate(), Err(DriverError::Protocol(_))));
    }
}
