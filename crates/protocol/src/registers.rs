//! Register addresses used through the device-control collaborator

/// Break control register
pub const REG_BREAK: u16 = 0x05;
/// Line control register
pub const REG_LCR: u16 = 0x18;

/// REG_BREAK: cleared while a break is being sent
pub const NBREAK_BITS: u8 = 0x01;
/// REG_LCR: transmitter enabled
pub const LCR_ENABLE_TX: u8 = 0x40;
/// REG_LCR: receiver enabled
pub const LCR_ENABLE_RX: u8 = 0x80;

/// Compute new (break, lcr) register values for entering or leaving break
pub fn break_registers(break_reg: u8, lcr: u8, on: bool) -> (u8, u8) {
    if on {
        (break_reg & !NBREAK_BITS, lcr & !LCR_ENABLE_TX)
    } else {
        (break_reg | NBREAK_BITS, lcr | LCR_ENABLE_TX)
    }
}
