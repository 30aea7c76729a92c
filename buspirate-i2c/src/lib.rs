//! Drive a Bus Pirate in binary I2C mode and read sensors through it.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use buspirate_i2c::bus_pirate::{Connection, I2cEngine, ModeController};
//! use buspirate_i2c::peripheral::{read_sensor, Srf10};
//! use buspirate_i2c::transport::{SerialConfig, SerialTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! let port = SerialTransport::open("ttyUSB", &SerialConfig::default())?;
//! let mut conn = Connection::new(port);
//! ModeController::default()
//!     .enter_i2c_mode(&mut conn, &CancellationToken::new())
//!     .await?;
//! let range = read_sensor(&I2cEngine::default(), &mut conn, &Srf10::default()).await?;
//! println!("{} cm", range.value);
//! # Ok(())
//! # }
//! ```

pub mod bus_pirate;
pub mod config;
pub mod peripheral;
pub mod tracing;
pub mod transport;
