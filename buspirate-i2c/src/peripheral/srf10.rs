//! Devantech SRF10 ultrasonic range finder.
//!
//! Writing a ranging command to register 0 fires a ping; the result is
//! readable once the echo window has closed (65 ms at the default range).
//! Reading from register 0 returns the software revision followed by the
//! range high and low bytes.
//!
//! Datasheet: <http://www.robot-electronics.co.uk/htm/srf10tech.htm>

use super::{require, DecodeError, Sensor};
use crate::bus_pirate::{I2cTransaction, TransactionResult};

/// Factory-default address byte for writes.
pub const DEFAULT_WRITE_ADDRESS: u8 = 0xE0;
/// Factory-default address byte for reads.
pub const DEFAULT_READ_ADDRESS: u8 = 0xE1;

/// Command register (write) / revision register (read).
const COMMAND_REGISTER: u8 = 0x00;

/// Time for a ping to go out and its echo to come back at full range.
const RANGING_MS: u32 = 65;

/// Revision byte plus a 16-bit big-endian range.
const READ_LEN: usize = 3;

/// Prefix of the address change sequence; the new address follows.
const ADDRESS_CHANGE_SEQUENCE: [u8; 3] = [0xA0, 0xAA, 0xA5];

/// Shortest and longest ranges the sensor reports, in centimetres.
pub const MIN_RANGE_CM: u16 = 3;
pub const MAX_RANGE_CM: u16 = 600;

/// Unit the sensor reports the range in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeUnit {
    Inches,
    #[default]
    Centimeters,
    Microseconds,
}

impl RangeUnit {
    /// Ranging command byte.
    pub fn command(self) -> u8 {
        match self {
            RangeUnit::Inches => 0x50,
            RangeUnit::Centimeters => 0x51,
            RangeUnit::Microseconds => 0x52,
        }
    }
}

/// SRF10 at a given address, ranging in a given unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Srf10 {
    pub write_address: u8,
    pub read_address: u8,
    pub unit: RangeUnit,
}

impl Default for Srf10 {
    fn default() -> Self {
        Self {
            write_address: DEFAULT_WRITE_ADDRESS,
            read_address: DEFAULT_READ_ADDRESS,
            unit: RangeUnit::Centimeters,
        }
    }
}

impl Srf10 {
    pub fn with_unit(unit: RangeUnit) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    /// Write-only transactions that move the sensor to `new_write_address`.
    ///
    /// Valid addresses are the even bytes 0xE0..=0xFE. Only one SRF10 may be
    /// on the bus while this runs.
    pub fn change_address(&self, new_write_address: u8) -> Vec<I2cTransaction> {
        ADDRESS_CHANGE_SEQUENCE
            .iter()
            .chain(std::iter::once(&new_write_address))
            .map(|&byte| {
                I2cTransaction::with_addresses(
                    self.write_address,
                    self.read_address,
                    COMMAND_REGISTER,
                )
                .payload([byte])
            })
            .collect()
    }

    /// Whether a centimetre reading falls within the sensor's range.
    pub fn is_plausible_cm(range: u16) -> bool {
        (MIN_RANGE_CM..=MAX_RANGE_CM).contains(&range)
    }
}

impl Sensor for Srf10 {
    /// Range in the configured unit.
    type Reading = u16;

    fn transaction(&self) -> I2cTransaction {
        I2cTransaction::with_addresses(self.write_address, self.read_address, COMMAND_REGISTER)
            .payload([self.unit.command()])
            .read(READ_LEN)
            .settle_ms(RANGING_MS)
    }

    fn decode(&self, result: &TransactionResult) -> Result<u16, DecodeError> {
        decode_range(&result.bytes)
    }
}

/// Range from `[revision, high, low]`; the revision byte is ignored.
pub fn decode_range(bytes: &[u8]) -> Result<u16, DecodeError> {
    require(bytes, READ_LEN)?;
    Ok(u16::from_be_bytes([bytes[1], bytes[2]]))
}
