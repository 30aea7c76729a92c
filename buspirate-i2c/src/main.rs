//! Read an I2C sensor through a Bus Pirate.
//!
//! Opens the adapter's serial port, puts it into binary I2C mode, powers the
//! bus and polls the chosen sensor until it returns a plausible reading.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use buspirate_i2c::{
    bus_pirate::{Connection, I2cEngine, ModeController},
    config::Config,
    peripheral::{read_sensor, Bmp180, Srf10},
    tracing::prelude::*,
    transport::{SerialTransport, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SensorKind {
    /// SRF10 ultrasonic range finder at 0xE0
    Srf10,
    /// BMP180 pressure/temperature sensor at 0xEE
    Bmp180,
}

/// Read I2C sensors through a Bus Pirate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port name or a fragment of it, e.g. ttyUSB or /dev/ttyUSB1
    /// [default: $BUSPIRATE_PORT, then ttyUSB or COM]
    #[arg(short, long)]
    port: Option<String>,

    /// Sensor to read
    #[arg(short, long, value_enum, default_value_t = SensorKind::Srf10)]
    sensor: SensorKind,

    /// Readings to attempt before giving up
    #[arg(short = 'n', long, default_value_t = 100)]
    attempts: u32,

    /// Polls to wait for each mode marker [default: $BUSPIRATE_MAX_POLLS, then 50]
    #[arg(long)]
    max_polls: Option<u32>,

    /// Leave the bus supply off
    #[arg(long)]
    no_power: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    buspirate_i2c::tracing::init_journald_or_stdout();
    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(polls) = args.max_polls {
        config.mode.max_polls = polls.max(1);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C.");
                cancel.cancel();
            }
        }
    });

    let transport = SerialTransport::open(&config.port, &config.serial)
        .with_context(|| format!("Failed to open serial port {}", config.port))?;
    let mut conn = Connection::new(transport);

    let result = run(&args, &config, &mut conn, &cancel).await;

    if let Err(e) = conn.close().await {
        warn!("Failed to close serial port: {e}");
    }
    result
}

async fn run<T: Transport>(
    args: &Args,
    config: &Config,
    conn: &mut Connection<T>,
    cancel: &CancellationToken,
) -> Result<()> {
    let controller = ModeController::new(config.mode.clone());
    let engine = I2cEngine::new(config.engine.clone());

    controller
        .enter_i2c_mode(conn, cancel)
        .await
        .context("Failed to enter I2C mode")?;

    if !args.no_power {
        engine
            .power_on(conn)
            .await
            .context("Failed to power the bus")?;
    }

    controller
        .verify(conn)
        .await
        .context("Adapter is not in I2C mode")?;

    for attempt in 1..=args.attempts {
        if cancel.is_cancelled() {
            bail!("Cancelled");
        }

        match args.sensor {
            SensorKind::Srf10 => {
                let range = read_sensor(&engine, conn, &Srf10::default()).await?;
                info!(attempt, cm = range.value, acked = range.acked, "SRF10 range");
                if range.acked && Srf10::is_plausible_cm(range.value) {
                    println!("{} cm", range.value);
                    return Ok(());
                }
            }
            SensorKind::Bmp180 => {
                let temp = read_sensor(&engine, conn, &Bmp180).await?;
                info!(attempt, raw = temp.value, acked = temp.acked, "BMP180 raw temperature");
                if temp.acked {
                    println!("raw temperature {:#04x}", temp.value);
                    return Ok(());
                }
            }
        }
    }

    bail!("No plausible reading after {} attempts", args.attempts)
}
