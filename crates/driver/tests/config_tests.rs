//! Integration tests for configuration parsing
//!
//! Tests driver configuration files, including:
//! - Minimal and full files
//! - Extra device entries and quirk names
//! - Invalid configuration handling
//! - Save/load through the filesystem

use driver::config::{DeviceEntry, DriverConfig};
use protocol::{Quirks, StopBits};
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[port]
write_slot_size = 256
read_buffer_size = 128
status_buffer_size = 16
default_baud = 115200
clocal = true
wake_queue_depth = 8

[usb]
control_timeout_ms = 1000
write_timeout_ms = 3000
read_poll_ms = 50

[[usb.extra_devices]]
vendor_id = "0x1a86"
product_id = "0x55d4"
quirks = ["single_rx_urb", "clear_halt_on_init"]

[logging]
level = "debug"
"#;

mod parsing {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DriverConfig::parse("").unwrap();
        assert_eq!(config.port.write_slot_size, 512);
        assert_eq!(config.port.read_buffer_size, 64);
        assert_eq!(config.port.default_baud, 9600);
        assert!(!config.port.clocal);
        assert_eq!(config.usb.read_poll(), Duration::from_millis(100));
        assert!(config.usb.extra_devices.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = DriverConfig::parse(FULL_CONFIG).unwrap();
        assert_eq!(config.port.write_slot_size, 256);
        assert_eq!(config.port.wake_queue_depth, 8);
        assert_eq!(config.usb.control_timeout(), Duration::from_secs(1));
        assert_eq!(config.usb.write_timeout(), Duration::from_secs(3));
        assert_eq!(config.logging.level, "debug");

        assert_eq!(
            config.quirks_for(0x1a86, 0x55d4),
            Some(Quirks::SINGLE_RX_URB | Quirks::CLEAR_HALT_ON_INIT)
        );
    }

    #[test]
    fn test_port_config_from_file() {
        let config = DriverConfig::parse(FULL_CONFIG).unwrap();
        let port = config.port_config(Quirks::NO_CAP_LINE);

        assert_eq!(port.write_slots, 16);
        assert_eq!(port.write_slot_size, 256);
        assert_eq!(port.read_buffer_size, 128);
        assert_eq!(port.line_coding.baud_rate, 115_200);
        assert_eq!(port.line_coding.data_bits, 8);
        assert_eq!(port.line_coding.stop_bits, StopBits::One);
        assert!(port.clocal);
        assert_eq!(port.quirks, Quirks::NO_CAP_LINE);
        assert!(port.validate().is_ok());
    }

    #[test]
    fn test_extra_entry_overrides_builtin() {
        let mut config = DriverConfig::default();
        config.usb.extra_devices.push(DeviceEntry {
            vendor_id: "0x1a86".to_string(),
            product_id: "0x7523".to_string(),
            quirks: vec![],
        });
        assert_eq!(config.quirks_for(0x1a86, 0x7523), Some(Quirks::empty()));
    }
}

mod invalid {
    use super::*;

    #[test]
    fn test_unknown_quirk_rejected() {
        let result = DriverConfig::parse(
            r#"
[[usb.extra_devices]]
vendor_id = "0x1234"
product_id = "0x0001"
quirks = ["no_such_quirk"]
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_hex_id_rejected() {
        let result = DriverConfig::parse(
            r#"
[[usb.extra_devices]]
vendor_id = "1234"
product_id = "0x0001"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(DriverConfig::parse("[port]\nwrite_slot_size = 300\n").is_err());
        assert!(DriverConfig::parse("[port]\nread_buffer_size = 0\n").is_err());
        assert!(DriverConfig::parse("[port]\nwake_queue_depth = 0\n").is_err());
        assert!(DriverConfig::parse("[port]\ndefault_baud = 0\n").is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(DriverConfig::parse("[usb]\nread_poll_ms = 0\n").is_err());
        assert!(DriverConfig::parse("[usb]\nwrite_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = DriverConfig::parse("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(DriverConfig::parse("[port\nwrite_slot_size = ").is_err());
    }
}

mod files {
    use super::*;
    use std::fs;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("driver.toml");

        let mut config = DriverConfig::parse(FULL_CONFIG).unwrap();
        config.port.default_baud = 57_600;
        config.save(&path).unwrap();

        let loaded = DriverConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.port.default_baud, 57_600);
        assert_eq!(loaded.usb.extra_devices.len(), 1);
        assert_eq!(loaded.usb.extra_devices[0].quirks.len(), 2);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        fs::write(&path, "[logging]\nlevel = \"verbose\"\n").unwrap();

        let err = DriverConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("driver.toml"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(DriverConfig::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_default_path_is_driver_toml() {
        let path = DriverConfig::default_path();
        assert!(path.ends_with("usb-serial-bridge/driver.toml"));
    }
}
