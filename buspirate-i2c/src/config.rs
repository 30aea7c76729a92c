//! Configuration.
//!
//! Built from defaults overridden by environment variables; the binary then
//! applies its command-line flags on top.

use std::str::FromStr;
use std::time::Duration;

use crate::bus_pirate::{EngineConfig, ModeConfig};
use crate::transport::SerialConfig;

/// Full connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port name or fragment of one, e.g. `ttyUSB` or `/dev/ttyUSB1`.
    pub port: String,
    pub serial: SerialConfig,
    pub mode: ModeConfig,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            serial: SerialConfig::default(),
            mode: ModeConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// Unset or unparseable variables keep their defaults; numeric values
    /// are clamped to sane ranges.
    ///
    /// # Environment Variables
    ///
    /// - `BUSPIRATE_PORT`: port identifier (default: `ttyUSB`, `COM` on Windows)
    /// - `BUSPIRATE_BAUD`: baud rate, 300-4000000 (default: 115200)
    /// - `BUSPIRATE_POLL_MS`: mode-entry poll interval, 10-1000 (default: 100)
    /// - `BUSPIRATE_MAX_POLLS`: polls before giving up, 1-10000 (default: 50)
    /// - `BUSPIRATE_KEEPALIVE_EVERY`: polls between keepalives, 1-100 (default: 10)
    /// - `BUSPIRATE_HANDSHAKE_MS`: per-byte read timeout, 10-5000 (default: 200)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("BUSPIRATE_PORT") {
            if !port.is_empty() {
                config.port = port;
            }
        }
        if let Some(baud) = env_parse::<u32>("BUSPIRATE_BAUD") {
            config.serial.baud_rate = baud.clamp(300, 4_000_000);
        }
        if let Some(ms) = env_parse::<u64>("BUSPIRATE_POLL_MS") {
            config.mode.poll_interval = Duration::from_millis(ms.clamp(10, 1000));
        }
        if let Some(polls) = env_parse::<u32>("BUSPIRATE_MAX_POLLS") {
            config.mode.max_polls = polls.clamp(1, 10_000);
        }
        if let Some(every) = env_parse::<u32>("BUSPIRATE_KEEPALIVE_EVERY") {
            config.mode.keepalive_every = every.clamp(1, 100);
        }
        if let Some(ms) = env_parse::<u64>("BUSPIRATE_HANDSHAKE_MS") {
            let timeout = Duration::from_millis(ms.clamp(10, 5000));
            config.engine.handshake_timeout = timeout;
            config.mode.probe_timeout = timeout;
        }

        config
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM"
    } else {
        "ttyUSB"
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
