//! Bus Pirate binary-mode protocol.
//!
//! The adapter boots into a text terminal. Twenty or more `0x00` bytes drop
//! it into raw bitbang mode (acknowledged with `BBIO1`), from which `0x02`
//! selects the binary I2C sub-mode (acknowledged with `I2C1`). See
//! <http://dangerousprototypes.com/docs/Bitbang> and
//! <http://dangerousprototypes.com/docs/I2C_(binary)>.
//!
//! ## I2C command set
//!
//! ```text
//! 0x01        version check      -> "I2C1"
//! 0x02        START              -> handshake (0x00 = ACK)
//! 0x03        STOP               -> 0x01
//! 0x04        read one byte      -> data byte
//! 0x06 / 0x07 host ACK / NAK     -> 0x01
//! 0x1n        bulk write n+1 bytes, each -> handshake
//! 0100wxyz    peripherals (power, pull-ups, AUX, CS) -> 0x01
//! 011000xx    bus speed          -> 0x01
//! ```
//!
//! A [`Connection`] owns the transport together with the adapter's logical
//! [`DeviceMode`]. [`ModeController`] is the only thing that advances the
//! mode; [`I2cEngine`] refuses to run unless the mode is [`DeviceMode::I2c`].

pub mod frame_io;
pub mod i2c;
pub mod mode;

pub use frame_io::FrameIo;
pub use i2c::{
    Ack, EngineConfig, Handshake, HandshakeStage, I2cEngine, I2cError, I2cSpeed, I2cTransaction,
    Peripherals, TransactionResult,
};
pub use mode::{DeviceMode, ModeConfig, ModeController, ModeError};

use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Bitbang-mode command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BitbangCommand {
    /// Enter (or re-announce) bitbang mode
    Reset = 0x00,
    I2cMode = 0x02,
}

/// Binary I2C-mode command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum I2cCommand {
    VersionCheck = 0x01,
    Start = 0x02,
    Stop = 0x03,
    ReadByte = 0x04,
    Ack = 0x06,
    Nak = 0x07,
    /// Base of the bulk-write command; low nibble is the byte count minus one
    BulkWrite = 0x10,
    /// Base of the peripheral configuration command (`0100wxyz`)
    Peripherals = 0x40,
    /// Base of the bus speed command (`011000xx`)
    Speed = 0x60,
}

impl From<BitbangCommand> for u8 {
    fn from(cmd: BitbangCommand) -> u8 {
        cmd as u8
    }
}

impl From<I2cCommand> for u8 {
    fn from(cmd: I2cCommand) -> u8 {
        cmd as u8
    }
}

/// Reply to [`BitbangCommand::Reset`] once bitbang mode is active.
pub const BITBANG_MARKER: &[u8] = b"BBIO1";

/// Reply to [`BitbangCommand::I2cMode`] and [`I2cCommand::VersionCheck`].
pub const I2C_MARKER: &[u8] = b"I2C1";

/// Carriage return, used to back out of terminal menus.
pub const TERMINAL_RETURN: u8 = 13;

/// Terminal soft-reset command.
pub const TERMINAL_RESET: u8 = b'#';

/// Status byte the adapter returns for an accepted configuration command.
pub const COMMAND_OK: u8 = 0x01;

/// Maximum number of bytes in one bulk-write command.
pub const MAX_BULK_WRITE: usize = 16;

/// An open adapter connection.
///
/// Created in [`DeviceMode::Unknown`] on every connect; dropped (or
/// [`closed`](Connection::close)) with the transport.
pub struct Connection<T: Transport> {
    io: FrameIo<T>,
    mode: DeviceMode,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            io: FrameIo::new(transport),
            mode: DeviceMode::Unknown,
        }
    }

    /// Logical mode the adapter was last verified to be in.
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Advance the mode. Backward moves are ignored: only a hardware reset
    /// returns the adapter to its terminal.
    pub(crate) fn advance_mode(&mut self, next: DeviceMode) {
        if next < self.mode {
            warn!(from = ?self.mode, to = ?next, "Ignoring backward mode transition");
            return;
        }
        if next != self.mode {
            debug!(from = ?self.mode, to = ?next, "Mode transition");
            self.mode = next;
        }
    }

    pub(crate) fn io(&mut self) -> &mut FrameIo<T> {
        &mut self.io
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &T {
        self.io.transport()
    }

    /// Drain pending input and close the transport.
    pub async fn close(mut self) -> Result<T, TransportError> {
        self.io.clear().await?;
        let mut transport = self.io.into_inner();
        transport.close().await?;
        Ok(transport)
    }
}
