//! Integration tests for the status channel and modem state
//!
//! Run with: `cargo test -p driver --test status_modem_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockBackend, MockControl, MockTerminal, build_status_report,
};
use common::{TransferKind, TransportError};
use driver::{DriverError, PortConfig, SerialPort, SerialSettings, WakeWorker};
use protocol::{ModemStatus, SignalState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn open_port(clocal: bool) -> (Arc<SerialPort>, WakeWorker, Arc<MockBackend>, Arc<MockTerminal>) {
    common::setup_test_logging();
    let backend = Arc::new(MockBackend::new());
    let terminal = Arc::new(MockTerminal::new(64));
    let config = PortConfig {
        clocal,
        ..PortConfig::default()
    };
    let (port, worker) = SerialPort::attach(
        config,
        backend.clone(),
        Box::new(MockControl::new()),
        terminal.clone(),
    )
    .unwrap();
    port.open().unwrap();
    (port, worker, backend, terminal)
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_first_coalesced_report_counts_each_line_once() {
    let (port, _worker, backend, _terminal) = open_port(false);

    assert!(backend.complete_status(&*port, &[0x00, 0x04, 0x0f, 0x00]));

    let counters = port.counters();
    assert_eq!(counters.cts, 1);
    assert_eq!(counters.dsr, 1);
    assert_eq!(counters.rng, 1);
    assert_eq!(counters.dcd, 1);
    assert_eq!(port.modem_status(), ModemStatus::empty());
    assert_eq!(port.counter_delta(), counters);

    // Status request re-armed
    assert_eq!(backend.in_flight(TransferKind::InterruptIn), 1);
}

#[test]
fn test_tiocmget_merges_lines() {
    let (port, _worker, backend, _terminal) = open_port(false);
    let report = build_status_report(ModemStatus::CTS | ModemStatus::DCD, 0, false);
    backend.complete_status(&*port, &report);

    let signals = port.tiocmget().unwrap();
    assert_eq!(
        signals,
        SignalState::DTR | SignalState::RTS | SignalState::CTS | SignalState::DCD
    );
}

#[test]
fn test_malformed_report_changes_nothing() {
    let (port, _worker, backend, _terminal) = open_port(false);
    backend.complete_status(&*port, &build_status_report(ModemStatus::DSR, 0, false));
    let before = port.counters();

    backend.complete_status(&*port, &[0x00, 0x00]);
    backend.complete_status(&*port, &[0x00; 8]);

    assert_eq!(port.counters(), before);
    assert_eq!(port.modem_status(), ModemStatus::DSR);
    assert_eq!(backend.in_flight(TransferKind::InterruptIn), 1);
}

#[test]
fn test_line_errors_counted() {
    let (port, _worker, backend, _terminal) = open_port(false);
    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0, false));
    let base = port.counters();

    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0x44, false));
    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0x02, false));

    let delta = port.counters().delta(&base);
    assert_eq!(delta.frame, 1);
    assert_eq!(delta.parity, 1);
    assert_eq!(delta.overrun, 1);
    assert_eq!(delta.cts + delta.dsr + delta.rng + delta.dcd, 0);
}

#[test]
fn test_status_error_rearms() {
    let (port, _worker, backend, _terminal) = open_port(false);
    assert!(backend.fail_next(TransferKind::InterruptIn, &*port, TransportError::Overflow));
    assert_eq!(backend.in_flight(TransferKind::InterruptIn), 1);
}

// ============================================================================
// Waiting
// ============================================================================

#[test]
fn test_wait_for_event_wakes_on_report() {
    let (port, _worker, backend, _terminal) = open_port(false);
    let snapshot = port.counters();

    let waiter = {
        let port = port.clone();
        thread::spawn(move || port.wait_for_event(&snapshot, Some(DEFAULT_TEST_TIMEOUT)))
    };

    thread::sleep(Duration::from_millis(20));
    backend.complete_status(&*port, &build_status_report(ModemStatus::RI, 0, false));

    let counters = waiter.join().unwrap().unwrap();
    assert_ne!(counters, snapshot);
    assert!(counters.rng > snapshot.rng);
}

#[test]
fn test_wait_serial_change_times_out() {
    let (port, _worker, _backend, _terminal) = open_port(false);
    assert_eq!(
        port.wait_serial_change(ModemStatus::DCD, Some(Duration::from_millis(20))),
        Err(DriverError::Timeout)
    );
}

#[test]
fn test_disconnect_wakes_waiter() {
    let (port, _worker, _backend, _terminal) = open_port(false);
    let snapshot = port.counters();

    let waiter = {
        let port = port.clone();
        thread::spawn(move || port.wait_for_event(&snapshot, None))
    };

    thread::sleep(Duration::from_millis(20));
    port.disconnect();

    assert_eq!(waiter.join().unwrap(), Err(DriverError::Disconnected));
}

// ============================================================================
// Carrier loss
// ============================================================================

#[test]
fn test_carrier_loss_hangs_up() {
    let (port, worker, backend, terminal) = open_port(false);
    let handle = worker.spawn().unwrap();

    backend.complete_status(&*port, &build_status_report(ModemStatus::DCD, 0, false));
    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0, false));

    assert!(terminal.wait_for_hangups(1, DEFAULT_TEST_TIMEOUT));

    port.disconnect();
    handle.join().unwrap();
}

#[test]
fn test_carrier_loss_ignored_with_clocal() {
    let (port, worker, backend, terminal) = open_port(true);

    backend.complete_status(&*port, &build_status_report(ModemStatus::DCD, 0, false));
    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0, false));
    assert!(worker.run_pending());
    assert_eq!(terminal.hangups(), 0);
}

#[test]
fn test_clocal_follows_termios() {
    let (port, worker, backend, terminal) = open_port(true);
    port.set_termios(SerialSettings {
        clocal: false,
        ..port.settings()
    })
    .unwrap();

    backend.complete_status(&*port, &build_status_report(ModemStatus::DCD, 0, false));
    backend.complete_status(&*port, &build_status_report(ModemStatus::empty(), 0, false));
    assert!(worker.run_pending());
    assert_eq!(terminal.hangups(), 1);
}

// ============================================================================
// Inbound data
// ============================================================================

#[test]
fn test_received_bytes_reach_terminal() {
    let (port, _worker, backend, terminal) = open_port(false);

    backend.complete_read(&*port, b"hello ");
    backend.complete_read(&*port, b"world");
    backend.complete_read(&*port, b"");

    assert_eq!(terminal.received(), b"hello world".to_vec());
    assert_eq!(backend.in_flight(TransferKind::BulkIn), 16);
    assert_eq!(port.stats().rx_bytes, 11);
}

#[test]
fn test_overflowing_terminal_drops_excess() {
    let (port, _worker, backend, terminal) = open_port(false);
    let data = [0xaa; 64];

    backend.complete_read(&*port, &data);
    backend.complete_read(&*port, &data[..10]);

    assert_eq!(terminal.received().len(), 64);
    let stats = port.stats();
    assert_eq!(stats.rx_bytes, 64);
    assert_eq!(stats.rx_dropped, 10);
}
