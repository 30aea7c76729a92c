//! Binary I2C transactions.
//!
//! [`I2cEngine::run`] performs the register access pattern most sensors use:
//!
//! ```text
//! START  [addr+W]  [register payload...]  (settle)  START  [addr+R]  read...  STOP
//! ```
//!
//! Every byte put on the bus is answered by a handshake byte from the
//! adapter, `0x00` for ACK and anything else for NAK. NAKs do not abort the
//! transaction; they are collected in [`TransactionResult::handshakes`] so the
//! caller can decide whether a reading is trustworthy.
//!
//! STOP and the host's ACK/NAK after a read are answered with a `0x01`
//! status byte, which is consumed before the next command goes out.

use std::time::Duration;

use super::{Connection, DeviceMode, FrameIo, I2cCommand, COMMAND_OK, MAX_BULK_WRITE};
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// I2C engine errors.
#[derive(Debug, thiserror::Error)]
pub enum I2cError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Transactions need a verified I2C mode
    #[error("adapter is in {0:?} mode, not I2C")]
    NotInI2cMode(DeviceMode),

    /// Register plus payload exceeds one bulk write
    #[error("payload of {len} bytes does not fit a bulk write (max 15)")]
    PayloadTooLong { len: usize },

    /// A bus byte was not acknowledged
    #[error("NAK at {stage:?}")]
    HandshakeNak { stage: HandshakeStage },

    /// The adapter refused a configuration command
    #[error("command {command:#04x} rejected with {response:#04x}")]
    CommandRejected { command: u8, response: u8 },
}

/// Outcome of one handshake byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ack,
    Nak,
}

impl Ack {
    /// `0x00` is ACK; every other value is NAK.
    pub fn from_handshake(byte: u8) -> Self {
        if byte == 0 {
            Ack::Ack
        } else {
            Ack::Nak
        }
    }
}

/// Where in a transaction a handshake was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    Start,
    WriteAddress,
    Register,
    /// Payload byte at this index
    Payload(usize),
    RepeatedStart,
    ReadAddress,
}

/// A handshake byte and where it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub stage: HandshakeStage,
    pub ack: Ack,
    /// Byte exactly as returned by the adapter
    pub raw: u8,
}

/// Register-level write-then-read transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cTransaction {
    /// Address byte with the write bit (`addr << 1`)
    pub write_address: u8,
    /// Address byte with the read bit (`addr << 1 | 1`)
    pub read_address: u8,
    /// Register or command byte written first
    pub register: u8,
    /// Bytes written after the register, at most 15
    pub payload: Vec<u8>,
    /// Bytes to read back; 0 makes the transaction write-only
    pub read_count: usize,
    /// Settle time between the write and read phases
    pub inter_delay_ms: u32,
}

impl I2cTransaction {
    /// Transaction to a 7-bit `address`, selecting `register`.
    pub fn new(address: u8, register: u8) -> Self {
        let address = (address & 0x7f) << 1;
        Self::with_addresses(address, address | 1, register)
    }

    /// Transaction with explicit pre-shifted address bytes.
    pub fn with_addresses(write_address: u8, read_address: u8, register: u8) -> Self {
        Self {
            write_address,
            read_address,
            register,
            payload: Vec::new(),
            read_count: 0,
            inter_delay_ms: 0,
        }
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn read(mut self, count: usize) -> Self {
        self.read_count = count;
        self
    }

    pub fn settle_ms(mut self, ms: u32) -> Self {
        self.inter_delay_ms = ms;
        self
    }

    /// Bytes in the bulk write: register plus payload.
    pub fn write_len(&self) -> usize {
        1 + self.payload.len()
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.inter_delay_ms.into())
    }

    /// Reject transactions the adapter cannot encode.
    pub fn validate(&self) -> Result<(), I2cError> {
        bulk_write_command(self.write_len()).map(|_| ())
    }
}

/// Bytes read back plus every handshake taken along the way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionResult {
    /// Exactly `read_count` bytes, in the order the peripheral sent them
    pub bytes: Vec<u8>,
    pub handshakes: Vec<Handshake>,
}

impl TransactionResult {
    pub fn naks(&self) -> impl Iterator<Item = &Handshake> {
        self.handshakes.iter().filter(|h| h.ack == Ack::Nak)
    }

    /// True when every handshake was an ACK.
    pub fn is_acked(&self) -> bool {
        self.naks().next().is_none()
    }

    /// Escalate the first NAK, if any, to an error.
    pub fn check_acked(&self) -> Result<&Self, I2cError> {
        match self.naks().next() {
            Some(nak) => Err(I2cError::HandshakeNak { stage: nak.stage }),
            None => Ok(self),
        }
    }
}

/// Bus clock presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cSpeed {
    Khz5,
    Khz50,
    Khz100,
    Khz400,
}

impl I2cSpeed {
    /// Speed command byte, `011000xx`.
    pub fn command(self) -> u8 {
        let bits = match self {
            I2cSpeed::Khz5 => 0b00,
            I2cSpeed::Khz50 => 0b01,
            I2cSpeed::Khz100 => 0b10,
            I2cSpeed::Khz400 => 0b11,
        };
        u8::from(I2cCommand::Speed) | bits
    }
}

/// Adapter peripheral switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Peripherals {
    /// 3.3 V / 5 V supply to the bus
    pub power: bool,
    pub pullups: bool,
    pub aux: bool,
    pub cs: bool,
}

impl Peripherals {
    /// Peripheral command byte, `0100wxyz`.
    pub fn command(self) -> u8 {
        u8::from(I2cCommand::Peripherals)
            | (u8::from(self.power) << 3)
            | (u8::from(self.pullups) << 2)
            | (u8::from(self.aux) << 1)
            | u8::from(self.cs)
    }
}

/// Bulk-write command for `len` bytes: `0x10 + (len - 1)`, `len` in 1..=16.
fn bulk_write_command(len: usize) -> Result<u8, I2cError> {
    if !(1..=MAX_BULK_WRITE).contains(&len) {
        return Err(I2cError::PayloadTooLong {
            len: len.saturating_sub(1),
        });
    }
    Ok(u8::from(I2cCommand::BulkWrite) + (len - 1) as u8)
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long to wait for each handshake or data byte.
    pub handshake_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_millis(200),
        }
    }
}

/// Executes I2C transactions on a connection in binary I2C mode.
#[derive(Debug, Clone, Default)]
pub struct I2cEngine {
    config: EngineConfig,
}

impl I2cEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run a write-then-read transaction.
    ///
    /// The transaction is validated before anything is sent. Transport
    /// failures abort immediately and are never retried here.
    pub async fn run<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        txn: &I2cTransaction,
    ) -> Result<TransactionResult, I2cError> {
        ensure_i2c(conn)?;
        let bulk = bulk_write_command(txn.write_len())?;

        let io = conn.io();
        let mut handshakes = Vec::with_capacity(txn.write_len() + 4);

        io.clear().await?;

        // Write phase
        handshakes.push(self.start(io, HandshakeStage::Start).await?);
        handshakes.push(
            self.write_single(io, txn.write_address, HandshakeStage::WriteAddress)
                .await?,
        );
        io.write_byte(bulk).await?;
        handshakes.push(
            self.write_data(io, txn.register, HandshakeStage::Register)
                .await?,
        );
        for (i, &byte) in txn.payload.iter().enumerate() {
            handshakes.push(self.write_data(io, byte, HandshakeStage::Payload(i)).await?);
        }

        if txn.read_count == 0 {
            self.command_io(io, I2cCommand::Stop.into()).await?;
            return Ok(finish(TransactionResult {
                bytes: Vec::new(),
                handshakes,
            }));
        }

        // The peripheral is measuring; reading early returns stale data.
        tokio::time::sleep(txn.settle_time()).await;
        io.clear().await?;

        // Read phase
        handshakes.push(self.start(io, HandshakeStage::RepeatedStart).await?);
        handshakes.push(
            self.write_single(io, txn.read_address, HandshakeStage::ReadAddress)
                .await?,
        );

        let mut bytes = Vec::with_capacity(txn.read_count);
        for i in 0..txn.read_count {
            let last = i + 1 == txn.read_count;
            bytes.push(self.read_data(io, last).await?);
        }

        self.command_io(io, I2cCommand::Stop.into()).await?;

        Ok(finish(TransactionResult { bytes, handshakes }))
    }

    /// Switch the adapter's supply, pull-ups, AUX and CS outputs.
    pub async fn configure_peripherals<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        peripherals: Peripherals,
    ) -> Result<(), I2cError> {
        debug!(?peripherals, "Configuring peripherals");
        self.command(conn, peripherals.command()).await
    }

    /// Set the bus clock.
    pub async fn set_speed<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        speed: I2cSpeed,
    ) -> Result<(), I2cError> {
        debug!(?speed, "Setting bus speed");
        self.command(conn, speed.command()).await
    }

    /// Power the bus and run it at 100 kHz.
    pub async fn power_on<T: Transport>(&self, conn: &mut Connection<T>) -> Result<(), I2cError> {
        self.configure_peripherals(
            conn,
            Peripherals {
                power: true,
                ..Peripherals::default()
            },
        )
        .await?;
        self.set_speed(conn, I2cSpeed::Khz100).await
    }

    async fn command<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        command: u8,
    ) -> Result<(), I2cError> {
        ensure_i2c(conn)?;
        self.command_io(conn.io(), command).await
    }

    /// Send a command answered by a single status byte.
    async fn command_io<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        command: u8,
    ) -> Result<(), I2cError> {
        io.write_byte(command).await?;
        let response = io.read_byte(self.config.handshake_timeout).await?;
        if response != COMMAND_OK {
            return Err(I2cError::CommandRejected { command, response });
        }
        Ok(())
    }

    async fn start<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        stage: HandshakeStage,
    ) -> Result<Handshake, TransportError> {
        io.write_byte(I2cCommand::Start.into()).await?;
        self.handshake(io, stage).await
    }

    /// One-byte bulk write, used for address bytes.
    async fn write_single<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        byte: u8,
        stage: HandshakeStage,
    ) -> Result<Handshake, TransportError> {
        io.write_byte(I2cCommand::BulkWrite.into()).await?;
        self.write_data(io, byte, stage).await
    }

    async fn write_data<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        byte: u8,
        stage: HandshakeStage,
    ) -> Result<Handshake, TransportError> {
        io.write_byte(byte).await?;
        self.handshake(io, stage).await
    }

    async fn handshake<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        stage: HandshakeStage,
    ) -> Result<Handshake, TransportError> {
        let raw = io.read_byte(self.config.handshake_timeout).await?;
        let ack = Ack::from_handshake(raw);
        trace!(?stage, ?ack, "I2C handshake");
        if ack == Ack::Nak {
            debug!(?stage, raw = %format!("{:#04x}", raw), "NAK");
        }
        Ok(Handshake { stage, ack, raw })
    }

    /// Clock in one byte, then ACK it or, for the final byte, NAK it.
    async fn read_data<T: Transport>(
        &self,
        io: &mut FrameIo<T>,
        last: bool,
    ) -> Result<u8, I2cError> {
        io.write_byte(I2cCommand::ReadByte.into()).await?;
        let data = io.read_byte(self.config.handshake_timeout).await?;
        let reply = if last { I2cCommand::Nak } else { I2cCommand::Ack };
        trace!(data = %format!("{:#04x}", data), ?reply, "I2C read");
        self.command_io(io, reply.into()).await?;
        Ok(data)
    }
}

fn ensure_i2c<T: Transport>(conn: &Connection<T>) -> Result<(), I2cError> {
    match conn.mode() {
        DeviceMode::I2c => Ok(()),
        other => Err(I2cError::NotInI2cMode(other)),
    }
}

fn finish(result: TransactionResult) -> TransactionResult {
    let naks = result.naks().count();
    if naks > 0 {
        warn!(naks, bytes = ?result.bytes, "I2C transaction completed with NAKs");
    } else {
        trace!(bytes = ?result.bytes, "I2C transaction complete");
    }
    result
}
