//! Wire format tests
//!
//! Exercises the byte layouts the adapter speaks: status reports, packed
//! line codings and the break register pair.

use proptest::prelude::*;
use protocol::registers::{LCR_ENABLE_RX, LCR_ENABLE_TX, NBREAK_BITS, break_registers};
use protocol::{
    LINE_CODING_LEN, LineCoding, LineErrors, ModemStatus, Parity, ProtocolError, Quirks,
    StatusPayload, StopBits,
};

// ============================================================================
// Status reports
// ============================================================================

#[test]
fn test_coalesced_all_clear_report() {
    let report = StatusPayload::parse(&[0x00, 0x04, 0x0f, 0x00]).unwrap();
    assert!(report.is_coalesced());
    assert_eq!(report.modem_status(), ModemStatus::empty());
    assert!(report.line_errors().is_empty());
    assert!(!report.has_modem_marker());
}

#[test]
fn test_modem_lines_are_inverted() {
    let report = StatusPayload::parse(&[0x08, 0x00, 0xf0, 0x00]).unwrap();
    assert_eq!(report.modem_status(), ModemStatus::all());
    assert!(report.has_modem_marker());

    let report = StatusPayload::parse(&[0x08, 0x00, 0xfa, 0x00]).unwrap();
    assert_eq!(report.modem_status(), ModemStatus::CTS | ModemStatus::RI);
}

#[test]
fn test_framing_pattern_also_reports_parity() {
    let report = StatusPayload::parse(&[0x44, 0x00, 0xff, 0x00]).unwrap();
    assert_eq!(report.line_errors(), LineErrors::FRAMING | LineErrors::PARITY);

    let report = StatusPayload::parse(&[0x06, 0x00, 0xff, 0x00]).unwrap();
    assert_eq!(report.line_errors(), LineErrors::PARITY | LineErrors::OVERRUN);
}

#[test]
fn test_status_length_is_exact() {
    assert_eq!(
        StatusPayload::parse(&[0x00; 5]),
        Err(ProtocolError::PayloadLength {
            expected: 4,
            actual: 5
        })
    );
    assert!(StatusPayload::parse(&[]).is_err());
}

proptest! {
    #[test]
    fn prop_modem_status_uses_low_nibble_only(raw in any::<[u8; 4]>()) {
        let report = StatusPayload::parse(&raw).unwrap();
        prop_assert_eq!(report.modem_status().bits(), !raw[2] & 0x0f);
        prop_assert_eq!(report.raw(), raw);
    }
}

// ============================================================================
// Line coding
// ============================================================================

#[test]
fn test_line_coding_layout() {
    let coding = LineCoding::new(115_200, 7, Parity::Even, StopBits::Two).unwrap();
    let wire = coding.encode();
    assert_eq!(wire.len(), LINE_CODING_LEN);
    assert_eq!(wire, [0x00, 0xc2, 0x01, 0x00, 0x02, 0x02, 0x07]);
    assert_eq!(LineCoding::decode(&wire).unwrap(), coding);
    assert_eq!(coding.to_string(), "115200 7E2");
}

#[test]
fn test_line_coding_rejects_bad_fields() {
    assert_eq!(
        LineCoding::decode(&[0x80, 0x25, 0x00, 0x00, 0x03, 0x00, 0x08]),
        Err(ProtocolError::InvalidStopBits(3))
    );
    assert_eq!(
        LineCoding::decode(&[0x80, 0x25, 0x00, 0x00, 0x00, 0x05, 0x08]),
        Err(ProtocolError::InvalidParity(5))
    );
    assert_eq!(
        LineCoding::decode(&[0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x09]),
        Err(ProtocolError::InvalidDataBits(9))
    );
    assert_eq!(
        LineCoding::decode(&[0x00; 7]),
        Err(ProtocolError::ZeroBaudRate)
    );
    assert!(matches!(
        LineCoding::decode(&[0x80, 0x25]),
        Err(ProtocolError::BufferTooSmall { needed: 7, .. })
    ));
}

// ============================================================================
// Registers and quirks
// ============================================================================

#[test]
fn test_break_leaves_other_bits_alone() {
    let lcr = LCR_ENABLE_RX | LCR_ENABLE_TX | 0x03;
    let (brk, new_lcr) = break_registers(0x10 | NBREAK_BITS, lcr, true);
    assert_eq!(brk, 0x10);
    assert_eq!(new_lcr, LCR_ENABLE_RX | 0x03);
}

#[test]
fn test_quirk_names() {
    let quirks = Quirks::parse_names(["single_rx_urb", "Clear-Halt-On-Init"]).unwrap();
    assert_eq!(quirks, Quirks::SINGLE_RX_URB | Quirks::CLEAR_HALT_ON_INIT);
    assert!(Quirks::parse_names(["turbo"]).is_err());
    assert_eq!(Quirks::parse_names(Vec::<&str>::new()).unwrap(), Quirks::empty());
}

#[test]
fn test_builtin_table() {
    let ch340 = protocol::lookup(0x1a86, 0x7523).unwrap();
    assert!(ch340.quirks.contains(Quirks::CLEAR_HALT_ON_INIT));
    assert!(protocol::lookup(0x0403, 0x6001).is_none());
    assert!(protocol::KNOWN_DEVICES.len() >= 5);
}
