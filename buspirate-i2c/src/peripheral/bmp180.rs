//! Bosch BMP180 pressure/temperature sensor.
//!
//! Writing `0x2E` to the control register `0xF4` starts a temperature
//! conversion, which completes within 4.5 ms.
//!
//! The decode here returns only the fourth byte read back, as an
//! uncompensated value. Neither the datasheet's 16-bit composition of
//! `0xF6`/`0xF7` nor the factory calibration is applied.
//! TODO: read the calibration EEPROM (0xAA..=0xBF) and compensate.
//!
//! Datasheet: <https://cdn-shop.adafruit.com/datasheets/BST-BMP180-DS000-09.pdf>

use super::{require, DecodeError, Sensor};
use crate::bus_pirate::{I2cTransaction, TransactionResult};

pub const WRITE_ADDRESS: u8 = 0xEE;
pub const READ_ADDRESS: u8 = 0xEF;

/// Measurement control register
const CTRL_MEAS: u8 = 0xF4;

/// Control value starting a temperature conversion
const START_TEMPERATURE: u8 = 0x2E;

const CONVERSION_MS: u32 = 5;

const READ_LEN: usize = 4;

/// BMP180 at its fixed address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bmp180;

impl Sensor for Bmp180 {
    /// Raw, uncompensated temperature byte.
    type Reading = u8;

    fn transaction(&self) -> I2cTransaction {
        I2cTransaction::with_addresses(WRITE_ADDRESS, READ_ADDRESS, CTRL_MEAS)
            .payload([START_TEMPERATURE])
            .read(READ_LEN)
            .settle_ms(CONVERSION_MS)
    }

    fn decode(&self, result: &TransactionResult) -> Result<u8, DecodeError> {
        decode_raw_temperature(&result.bytes)
    }
}

pub fn decode_raw_temperature(bytes: &[u8]) -> Result<u8, DecodeError> {
    require(bytes, READ_LEN)?;
    Ok(bytes[3])
}
