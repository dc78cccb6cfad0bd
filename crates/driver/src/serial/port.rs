//! Serial port device context
//!
//! `SerialPort` owns the pools, the status channel and the modem state of
//! one adapter. Two locking domains meet here:
//!
//! - completion context ([`CompletionHandler::on_transfer_complete`]) only
//!   takes the per-pool locks and never blocks;
//! - control-plane operations serialize on the control-plane lock, which is
//!   never taken from completion context and never acquired while a pool
//!   lock is held.
//!
//! Lifecycle changes are published to the gate first and then every pool is
//! cancelled; each cancel takes its pool lock once as a barrier, so a
//! completion that saw the old phase cannot leave a request armed behind it.

use super::bridge::{StreamBridge, TransferStats};
use super::lifecycle::{Gate, Lifecycle, Phase, SuspendKind};
use super::modem::{EventCounters, ModemState};
use super::read_pool::ReadPool;
use super::status::StatusChannel;
use super::wake::WakeWorker;
use super::write_pool::WritePool;
use crate::config::PortConfig;
use crate::error::{DriverError, Result};
use common::{
    CompletionHandler, DeviceControl, TerminalSink, TransferBackend, TransferCompletion,
    TransferKind, WakeRequest, WakeSender, create_wake_queue,
};
use parking_lot::Mutex;
use protocol::registers::{REG_BREAK, REG_LCR, break_registers};
use protocol::{ControlLines, LineCoding, ModemStatus, Quirks, SignalState, StatusPayload};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Control-plane view of the line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerialSettings {
    /// A baud rate of 0 requests hangup: DTR drops, the previous rate stays
    pub coding: LineCoding,
    /// RTS/CTS flow control; keeps RTS asserted
    pub hardware_flow: bool,
    /// Ignore carrier loss
    pub clocal: bool,
}

struct ControlPlane {
    device: Box<dyn DeviceControl>,
    lifecycle: Lifecycle,
    settings: SerialSettings,
    lines: ControlLines,
    /// Baud 0 is in effect
    hung_up: bool,
}

impl ControlPlane {
    fn send_lines(&mut self, lines: ControlLines) -> Result<()> {
        self.device.set_control_lines(lines.dtr(), lines.rts())?;
        self.lines = lines;
        Ok(())
    }

    fn with_flow(&self, mut lines: ControlLines) -> ControlLines {
        if self.settings.hardware_flow {
            lines |= ControlLines::RTS;
        }
        lines
    }
}

/// One USB serial adapter bound to a terminal consumer
pub struct SerialPort {
    quirks: Quirks,
    gate: Arc<Gate>,
    write_pool: Arc<WritePool>,
    read_pool: ReadPool,
    status: StatusChannel,
    modem: ModemState,
    bridge: StreamBridge,
    control: Mutex<ControlPlane>,
    clocal: AtomicBool,
    wake: WakeSender,
}

impl SerialPort {
    /// Bind to a device
    ///
    /// Nothing is armed until [`open`](Self::open). The returned worker must
    /// be run (see [`WakeWorker::spawn`]) for output refill, hangups and
    /// device-loss handling to happen.
    pub fn attach(
        config: PortConfig,
        backend: Arc<dyn TransferBackend>,
        mut device: Box<dyn DeviceControl>,
        terminal: Arc<dyn TerminalSink>,
    ) -> Result<(Arc<SerialPort>, WakeWorker)> {
        config.validate()?;

        if config.quirks.contains(Quirks::IGNORE_DEVICE) {
            info!("Device is marked as ignored, not binding");
            return Err(DriverError::Ignored);
        }

        if config.quirks.contains(Quirks::CLEAR_HALT_ON_INIT) {
            for endpoint in [config.bulk_in_endpoint, config.bulk_out_endpoint] {
                if let Err(e) = device.clear_halt(endpoint) {
                    warn!("Failed to clear halt on endpoint {:#04x}: {}", endpoint, e);
                }
            }
        }

        let gate = Arc::new(Gate::new());
        let (wake, wake_rx) = create_wake_queue(config.wake_queue_depth);

        let write_pool = Arc::new(WritePool::new(
            backend.clone(),
            gate.clone(),
            wake.clone(),
            config.write_slots,
            config.write_slot_size,
        ));
        let read_pool = ReadPool::new(
            backend.clone(),
            gate.clone(),
            wake.clone(),
            config.read_slots,
            config.read_buffer_size,
            config.quirks.contains(Quirks::SINGLE_RX_URB),
        );
        let status = StatusChannel::new(backend, gate.clone(), wake.clone(), config.status_buffer_size);
        let bridge = StreamBridge::new(terminal, write_pool.clone());

        let settings = SerialSettings {
            coding: config.line_coding,
            hardware_flow: false,
            clocal: config.clocal,
        };

        let port = Arc::new(SerialPort {
            quirks: config.quirks,
            gate,
            write_pool,
            read_pool,
            status,
            modem: ModemState::new(),
            bridge,
            control: Mutex::new(ControlPlane {
                device,
                lifecycle: Lifecycle::default(),
                settings,
                lines: ControlLines::empty(),
                hung_up: false,
            }),
            clocal: AtomicBool::new(config.clocal),
            wake,
        });

        info!(quirks = ?config.quirks, "Serial port attached");
        let worker = WakeWorker::new(Arc::downgrade(&port), wake_rx);
        Ok((port, worker))
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn phase(&self) -> Phase {
        self.control.lock().lifecycle.phase()
    }

    /// Open the port: configure the line, raise DTR/RTS and start reading
    pub fn open(&self) -> Result<()> {
        let mut cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;
        if cp.lifecycle.is_open() {
            return Ok(());
        }

        if !self.quirks.contains(Quirks::NO_CAP_LINE) {
            // Capability query
            let lcr = cp.device.read_register(REG_LCR)?;
            debug!("Line control register: {:#04x}", lcr);
        }

        let coding = cp.settings.coding;
        cp.device.set_line_coding(&coding)?;
        cp.hung_up = false;
        let lines = cp.with_flow(ControlLines::DTR | ControlLines::RTS);
        cp.send_lines(lines)?;

        cp.lifecycle.open()?;
        self.gate.publish(&cp.lifecycle);

        if let Err(e) = self.start_io() {
            error!("Failed to start I/O: {}", e);
            cp.lifecycle.close();
            self.gate.publish(&cp.lifecycle);
            self.cancel_io();
            return Err(e);
        }

        info!("Port opened at {}", coding);
        Ok(())
    }

    /// Close the port: drop DTR/RTS, cancel every transfer and discard
    /// unsent output
    pub fn close(&self) -> Result<()> {
        let mut cp = self.control.lock();
        if cp.lifecycle.is_disconnected() || !cp.lifecycle.close() {
            return Ok(());
        }
        self.gate.publish(&cp.lifecycle);

        let lines = cp.with_flow(ControlLines::empty());
        if let Err(e) = cp.send_lines(lines) {
            warn!("Failed to drop DTR/RTS on close: {}", e);
        }

        self.cancel_io();
        self.write_pool.discard_pending();
        info!("Port closed");
        Ok(())
    }

    fn start_io(&self) -> Result<()> {
        self.status.arm()?;
        self.read_pool.arm_all()?;
        self.write_pool.flush();
        Ok(())
    }

    fn cancel_io(&self) {
        self.status.cancel();
        self.read_pool.cancel_all();
        self.write_pool.cancel_all();
    }

    /// Queue bytes for transmission; returns how many were accepted
    pub fn write(&self, bytes: &[u8]) -> usize {
        self.bridge.push(bytes)
    }

    /// Bytes a `write` would accept right now
    pub fn write_room(&self) -> usize {
        if !self.gate.accepts_writes() {
            return 0;
        }
        self.write_pool.space_available()
    }

    pub fn chars_in_buffer(&self) -> usize {
        self.write_pool.chars_in_buffer()
    }

    /// Apply new line settings
    pub fn set_termios(&self, settings: SerialSettings) -> Result<()> {
        let mut cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;
        let previous = cp.settings;

        let mut coding = settings.coding;
        let mut lines = cp.lines;
        let hang_up = coding.baud_rate == 0;
        if hang_up {
            coding.baud_rate = previous.coding.baud_rate;
            lines.remove(ControlLines::DTR);
        } else if cp.hung_up {
            lines.insert(ControlLines::DTR);
        }
        coding.validate()?;

        cp.settings = SerialSettings { coding, ..settings };
        cp.hung_up = hang_up;
        self.clocal.store(settings.clocal, Ordering::Release);

        if !cp.lifecycle.is_open() {
            return Ok(());
        }

        if coding != previous.coding {
            cp.device.set_line_coding(&coding)?;
            info!("Line coding set to {}", coding);
        }

        let lines = cp.with_flow(lines);
        if lines != cp.lines {
            cp.send_lines(lines)?;
        }
        Ok(())
    }

    pub fn settings(&self) -> SerialSettings {
        self.control.lock().settings
    }

    pub fn line_coding(&self) -> LineCoding {
        self.control.lock().settings.coding
    }

    /// Output lines as driven and input lines as last reported
    pub fn tiocmget(&self) -> Result<SignalState> {
        let cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;
        Ok(SignalState::from_lines(cp.lines, self.modem.status()))
    }

    /// Raise `set` and drop `clear`; RTS stays up under hardware flow control
    pub fn tiocmset(&self, set: ControlLines, clear: ControlLines) -> Result<()> {
        let mut cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;

        let lines = cp.with_flow((cp.lines | set) & !clear);
        if lines != cp.lines {
            cp.send_lines(lines)?;
        }
        Ok(())
    }

    /// Start or stop sending a break
    pub fn set_break(&self, on: bool) -> Result<()> {
        let mut cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;

        let break_reg = cp.device.read_register(REG_BREAK)?;
        let lcr = cp.device.read_register(REG_LCR)?;
        let (break_reg, lcr) = break_registers(break_reg, lcr, on);
        cp.device.write_register(REG_BREAK, break_reg)?;
        cp.device.write_register(REG_LCR, lcr)?;

        debug!(on, "Break state changed");
        Ok(())
    }

    pub fn counters(&self) -> EventCounters {
        self.modem.counters()
    }

    /// Counter increase caused by the most recent status report
    pub fn counter_delta(&self) -> EventCounters {
        self.modem.last_delta()
    }

    pub fn modem_status(&self) -> ModemStatus {
        self.modem.status()
    }

    pub fn stats(&self) -> TransferStats {
        self.bridge.stats()
    }

    /// Block until one of the `mask` lines changes (TIOCMIWAIT)
    ///
    /// Returns the lines that changed.
    pub fn wait_serial_change(
        &self,
        mask: ModemStatus,
        timeout: Option<Duration>,
    ) -> Result<ModemStatus> {
        if self.gate.is_disconnected() {
            return Err(DriverError::Disconnected);
        }
        let snapshot = self.modem.counters();
        self.modem.wait_for_lines(&snapshot, mask, timeout)
    }

    /// Block until any counter differs from `snapshot`
    pub fn wait_for_event(
        &self,
        snapshot: &EventCounters,
        timeout: Option<Duration>,
    ) -> Result<EventCounters> {
        self.modem.wait_for_change(snapshot, timeout)
    }

    /// Enter (or nest) a suspend
    ///
    /// Only the outermost suspend cancels the read pool and status channel.
    /// Queued writes are held, an in-flight write runs to completion.
    pub fn suspend(&self, kind: SuspendKind) -> Result<()> {
        let mut cp = self.control.lock();
        cp.lifecycle.ensure_connected()?;

        let gate = &self.gate;
        let lifecycle = &mut cp.lifecycle;
        let outermost = self.write_pool.enter_suspend(kind, || {
            let outermost = lifecycle.suspend()?;
            gate.publish(lifecycle);
            Ok(outermost)
        })?;

        if outermost {
            self.status.cancel();
            let cancelled = self.read_pool.cancel_all();
            debug!(?kind, "Suspended, cancelled {} reads", cancelled);
        }
        Ok(())
    }

    /// Leave one level of suspend; the last one restarts I/O
    pub fn resume(&self) -> Result<()> {
        let mut cp = self.control.lock();
        if !cp.lifecycle.resume()? {
            return Ok(());
        }
        self.gate.publish(&cp.lifecycle);

        if !cp.lifecycle.is_open() {
            debug!("Resumed while closed");
            return Ok(());
        }

        // Held writes go out even if re-arming the inputs fails below
        self.write_pool.flush();

        if self.quirks.contains(Quirks::FORCE_CONTROL_LINE_STATE) {
            let lines = cp.lines;
            if let Err(e) = cp.send_lines(lines) {
                warn!("Failed to restore DTR/RTS after resume: {}", e);
            }
        }

        let armed = self.arm_inputs()?;
        debug!("Resumed, re-armed {} reads", armed);
        Ok(())
    }

    /// Arm the status channel and the read pool
    ///
    /// Both are attempted even when the first fails, so one bad submit does
    /// not leave a running port with nothing armed. The first error wins.
    fn arm_inputs(&self) -> Result<usize> {
        let status = self.status.arm();
        let reads = self.read_pool.arm_all();
        let result = status.and(reads);

        if let Err(DriverError::Transport(e)) = &result {
            if e.is_fatal() {
                warn!("Re-arm after resume failed, device gone: {}", e);
                self.wake.notify(WakeRequest::DeviceLost);
            } else {
                warn!("Re-arm after resume failed: {}", e);
            }
        }
        result
    }

    /// Resume after the device lost its state; hangs up an open port first
    pub fn reset_resume(&self) -> Result<()> {
        let open = {
            let cp = self.control.lock();
            cp.lifecycle.ensure_connected()?;
            cp.lifecycle.is_open()
        };
        if open {
            self.bridge.hangup();
        }
        self.resume()
    }

    /// Tear down after device removal
    ///
    /// One-way: cancels everything, wakes status waiters, hangs up the
    /// consumer and stops the wake worker. Repeated calls do nothing.
    pub fn disconnect(&self) {
        let was_open = {
            let mut cp = self.control.lock();
            if !cp.lifecycle.disconnect() {
                return;
            }
            self.gate.publish(&cp.lifecycle);
            cp.lifecycle.is_open()
        };

        self.modem.mark_disconnected();
        self.cancel_io();
        self.write_pool.discard_pending();

        if was_open {
            self.bridge.hangup();
        }
        self.wake.notify(WakeRequest::Shutdown);
        info!("Serial port disconnected");
    }

    pub(crate) fn service_output(&self) -> usize {
        if !self.gate.accepts_writes() {
            return 0;
        }
        self.bridge.service_output()
    }

    pub(crate) fn hangup_terminal(&self) {
        if self.gate.accepts_writes() {
            self.bridge.hangup();
        }
    }

    fn handle_status(&self, payload: StatusPayload) {
        let update = self.modem.apply(&payload);
        if update.carrier_lost && !self.clocal.load(Ordering::Acquire) {
            debug!("Carrier lost, scheduling hangup");
            self.wake.notify(WakeRequest::Hangup);
        }
    }
}

impl CompletionHandler for SerialPort {
    fn on_transfer_complete(&self, completion: TransferCompletion) {
        let TransferCompletion { request, result } = completion;

        match request.kind() {
            TransferKind::BulkOut => {
                let written = self.write_pool.on_complete(request, result);
                self.bridge.record_tx(written);
                self.wake.notify(WakeRequest::WriteSpace);
            }
            TransferKind::BulkIn => {
                self.read_pool
                    .on_complete(request, result, |data| self.bridge.deliver(data));
            }
            TransferKind::InterruptIn => {
                self.status
                    .on_complete(request, result, |payload| self.handle_status(payload));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{ControlCall, MockBackend, MockControl, MockTerminal};

    fn attach(quirks: Quirks) -> (Arc<SerialPort>, WakeWorker, Arc<MockBackend>, MockControl) {
        let backend = Arc::new(MockBackend::new());
        let control = MockControl::new();
        let terminal = Arc::new(MockTerminal::new(4096));
        let config = PortConfig {
            quirks,
            ..PortConfig::default()
        };
        let (port, worker) =
            SerialPort::attach(config, backend.clone(), Box::new(control.clone()), terminal)
                .unwrap();
        (port, worker, backend, control)
    }

    #[test]
    fn test_open_configures_and_arms() {
        let (port, _worker, backend, control) = attach(Quirks::empty());
        port.open().unwrap();

        assert_eq!(
            control.calls(),
            vec![
                ControlCall::ReadRegister(REG_LCR),
                ControlCall::SetLineCoding(LineCoding::default()),
                ControlCall::SetControlLines {
                    dtr: true,
                    rts: true
                },
            ]
        );
        assert_eq!(port.phase(), Phase::Active);
        assert_eq!(backend.in_flight(TransferKind::InterruptIn), 1);
        assert_eq!(backend.in_flight(TransferKind::BulkIn), 16);
    }

    #[test]
    fn test_no_cap_line_skips_query() {
        let (port, _worker, _backend, control) = attach(Quirks::NO_CAP_LINE);
        port.open().unwrap();
        assert!(!control.calls().contains(&ControlCall::ReadRegister(REG_LCR)));
    }

    #[test]
    fn test_clear_halt_on_attach() {
        let (_port, _worker, _backend, control) = attach(Quirks::CLEAR_HALT_ON_INIT);
        assert_eq!(
            control.calls(),
            vec![ControlCall::ClearHalt(0x82), ControlCall::ClearHalt(0x02)]
        );
    }

    #[test]
    fn test_ignored_device_refused() {
        let backend = Arc::new(MockBackend::new());
        let config = PortConfig {
            quirks: Quirks::IGNORE_DEVICE,
            ..PortConfig::default()
        };
        let result = SerialPort::attach(
            config,
            backend,
            Box::new(MockControl::new()),
            Arc::new(MockTerminal::new(16)),
        );
        assert!(matches!(result, Err(DriverError::Ignored)));
    }

    #[test]
    fn test_open_failure_rolls_back() {
        let (port, _worker, backend, _control) = attach(Quirks::empty());
        backend.fail_next_submit(TransferKind::BulkIn, common::TransportError::Io);

        assert_eq!(
            port.open(),
            Err(DriverError::Transport(common::TransportError::Io))
        );
        assert_eq!(port.phase(), Phase::Attached);
        assert_eq!(backend.in_flight(TransferKind::InterruptIn), 0);
        assert_eq!(backend.in_flight(TransferKind::BulkIn), 0);
    }

    #[test]
    fn test_baud_zero_drops_dtr_and_keeps_rate() {
        let (port, _worker, _backend, control) = attach(Quirks::empty());
        port.open().unwrap();
        control.clear_calls();

        let mut settings = port.settings();
        settings.coding.baud_rate = 0;
        port.set_termios(settings).unwrap();
        assert_eq!(port.line_coding().baud_rate, 9600);
        assert_eq!(control.last_control_lines(), Some((false, true)));
        assert!(control.last_line_coding().is_none());

        settings.coding.baud_rate = 115_200;
        port.set_termios(settings).unwrap();
        assert_eq!(control.last_control_lines(), Some((true, true)));
        assert_eq!(control.last_line_coding().unwrap().baud_rate, 115_200);
    }

    #[test]
    fn test_hardware_flow_forces_rts() {
        let (port, _worker, _backend, control) = attach(Quirks::empty());
        port.open().unwrap();

        let settings = SerialSettings {
            hardware_flow: true,
            ..port.settings()
        };
        port.set_termios(settings).unwrap();

        port.tiocmset(ControlLines::empty(), ControlLines::RTS | ControlLines::DTR)
            .unwrap();
        assert_eq!(control.last_control_lines(), Some((false, true)));

        let signals = port.tiocmget().unwrap();
        assert!(signals.contains(SignalState::RTS));
        assert!(!signals.contains(SignalState::DTR));
    }

    #[test]
    fn test_set_break_read_modify_write() {
        let (port, _worker, _backend, control) = attach(Quirks::empty());
        control.set_register(REG_BREAK, 0xff);
        control.set_register(REG_LCR, 0xc3);

        port.set_break(true).unwrap();
        assert_eq!(control.register(REG_BREAK), 0xfe);
        assert_eq!(control.register(REG_LCR), 0x83);

        port.set_break(false).unwrap();
        assert_eq!(control.register(REG_BREAK), 0xff);
        assert_eq!(control.register(REG_LCR), 0xc3);
    }

    #[test]
    fn test_force_control_line_state_on_resume() {
        let (port, _worker, _backend, control) = attach(Quirks::FORCE_CONTROL_LINE_STATE);
        port.open().unwrap();
        port.suspend(SuspendKind::System).unwrap();
        control.clear_calls();

        port.resume().unwrap();
        assert_eq!(
            control.calls(),
            vec![ControlCall::SetControlLines {
                dtr: true,
                rts: true
            }]
        );
    }

    #[test]
    fn test_control_errors_surface() {
        let (port, _worker, _backend, control) = attach(Quirks::empty());
        control.fail_with(Some(common::TransportError::Timeout));

        assert_eq!(
            port.open(),
            Err(DriverError::Transport(common::TransportError::Timeout))
        );
        assert_eq!(port.phase(), Phase::Attached);
    }
}
