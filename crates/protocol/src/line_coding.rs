//! Line coding structure
//!
//! Packed 7-byte layout, identical to the CDC SET_LINE_CODING payload:
//!
//! ```text
//! offset 0  u32 LE  baud rate
//! offset 4  u8      stop bits   0 = 1, 1 = 1.5, 2 = 2
//! offset 5  u8      parity      0 none, 1 odd, 2 even, 3 mark, 4 space
//! offset 6  u8      data bits   5..=8
//! ```

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded size of a line coding
pub const LINE_CODING_LEN: usize = 7;

/// Baud rate used when nothing else was configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    pub fn code(self) -> u8 {
        match self {
            StopBits::One => 0,
            StopBits::OnePointFive => 1,
            StopBits::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(StopBits::One),
            1 => Ok(StopBits::OnePointFive),
            2 => Ok(StopBits::Two),
            other => Err(ProtocolError::InvalidStopBits(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub fn code(self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        }
    }

    fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

impl TryFrom<u8> for Parity {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Parity::None),
            1 => Ok(Parity::Odd),
            2 => Ok(Parity::Even),
            3 => Ok(Parity::Mark),
            4 => Ok(Parity::Space),
            other => Err(ProtocolError::InvalidParity(other)),
        }
    }
}

/// Serial framing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineCoding {
    pub baud_rate: u32,
    #[serde(default)]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "LineCoding::default_data_bits")]
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    fn default_data_bits() -> u8 {
        8
    }

    /// Create a validated line coding
    pub fn new(baud_rate: u32, data_bits: u8, parity: Parity, stop_bits: StopBits) -> Result<Self> {
        let coding = Self {
            baud_rate,
            stop_bits,
            parity,
            data_bits,
        };
        coding.validate()?;
        Ok(coding)
    }

    /// Check the fields that the wire structure cannot express
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::ZeroBaudRate);
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ProtocolError::InvalidDataBits(self.data_bits));
        }
        Ok(())
    }

    /// Encode into the packed wire structure
    pub fn encode(&self) -> [u8; LINE_CODING_LEN] {
        let mut buf = [0u8; LINE_CODING_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.baud_rate);
        buf[4] = self.stop_bits.code();
        buf[5] = self.parity.code();
        buf[6] = self.data_bits;
        buf
    }

    /// Decode from the packed wire structure
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < LINE_CODING_LEN {
            return Err(ProtocolError::BufferTooSmall {
                needed: LINE_CODING_LEN,
                available: data.len(),
            });
        }

        let coding = Self {
            baud_rate: LittleEndian::read_u32(&data[0..4]),
            stop_bits: StopBits::try_from(data[4])?,
            parity: Parity::try_from(data[5])?,
            data_bits: data[6],
        };
        coding.validate()?;
        Ok(coding)
    }
}

impl fmt::Display for LineCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            stop
        )
    }
}
