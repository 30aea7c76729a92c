//! I2C sensor drivers.
//!
//! A driver is a fixed [`I2cTransaction`] plus a pure decode of the bytes it
//! returns. Drivers hold no connection and do no I/O themselves;
//! [`read_sensor`] runs one through an [`I2cEngine`].

pub mod bmp180;
pub mod srf10;

pub use bmp180::Bmp180;
pub use srf10::{RangeUnit, Srf10};

use crate::bus_pirate::{Connection, I2cEngine, I2cError, I2cTransaction, TransactionResult};
use crate::transport::Transport;

/// Errors decoding a sensor's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected {expected} bytes from sensor, got {got}")]
    ShortRead { expected: usize, got: usize },
}

/// Errors reading a sensor end to end.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error(transparent)]
    I2c(#[from] I2cError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A sensor reachable through one write-delay-read transaction.
pub trait Sensor {
    /// Decoded reading.
    type Reading;

    /// Transaction that triggers and fetches one measurement.
    fn transaction(&self) -> I2cTransaction;

    /// Turn the transaction's bytes into a reading.
    fn decode(&self, result: &TransactionResult) -> Result<Self::Reading, DecodeError>;
}

/// A decoded reading together with the bus handshakes behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement<R> {
    pub value: R,
    /// False if any byte of the transaction was NAKed
    pub acked: bool,
}

/// Trigger and fetch one reading from `sensor`.
pub async fn read_sensor<T, S>(
    engine: &I2cEngine,
    conn: &mut Connection<T>,
    sensor: &S,
) -> Result<Measurement<S::Reading>, SensorError>
where
    T: Transport,
    S: Sensor,
{
    let result = engine.run(conn, &sensor.transaction()).await?;
    let value = sensor.decode(&result)?;
    Ok(Measurement {
        value,
        acked: result.is_acked(),
    })
}

/// Check that `bytes` holds at least `expected` bytes.
fn require(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        return Err(DecodeError::ShortRead {
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus_pirate::DeviceMode;
    use crate::transport::mock::MockTransport;

    fn connected(mock: MockTransport) -> Connection<MockTransport> {
        let mut conn = Connection::new(mock);
        conn.advance_mode(DeviceMode::I2c);
        conn
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_srf10_distance() {
        let mut conn = connected(MockTransport::i2c().with_device(0x70, &[0xFF, 0x01, 0x2C]));

        let reading = read_sensor(&I2cEngine::default(), &mut conn, &Srf10::default())
            .await
            .unwrap();

        assert_eq!(reading.value, 300);
        assert!(reading.acked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_sensor_reading_is_flagged() {
        let mut conn = connected(MockTransport::i2c());

        let reading = read_sensor(&I2cEngine::default(), &mut conn, &Srf10::default())
            .await
            .unwrap();

        assert!(!reading.acked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_bmp180_raw_temperature() {
        let mut conn = connected(MockTransport::i2c().with_device(0x77, &[0x6C, 0xFA, 0x00, 0x42]));

        let reading = read_sensor(&I2cEngine::default(), &mut conn, &Bmp180)
            .await
            .unwrap();

        assert_eq!(reading.value, 0x42);
        assert_eq!(conn.transport().device_writes(0x77), &[0xF4, 0x2E]);
    }

    #[test]
    fn test_require_reports_short_read() {
        assert_eq!(
            require(&[1, 2], 3),
            Err(DecodeError::ShortRead {
                expected: 3,
                got: 2
            })
        );
        assert!(require(&[1, 2, 3], 3).is_ok());
    }
}
