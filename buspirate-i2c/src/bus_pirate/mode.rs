//! Mode transitions: terminal -> bitbang -> binary I2C.
//!
//! The adapter can be in any state when we connect: idle at the terminal
//! prompt, several levels deep in a text menu, halfway through a command, or
//! already in binary I2C mode from a previous run. [`ModeController`] gets it
//! into a verified I2C mode from all of those.
//!
//! # Sequence
//!
//! 1. Probe: send the I2C version check and expect `I2C1`. If it answers,
//!    nothing else is sent.
//! 2. Ten carriage returns to climb out of any menu, then `#` to soft-reset.
//! 3. Twenty `0x00` bytes, then poll for `BBIO1`, re-sending `0x00` every
//!    `keepalive_every` polls.
//! 4. `0x02` to select I2C, then the version check, then poll for `I2C1`,
//!    re-sending the version check every `keepalive_every` polls.
//!
//! Both poll loops are bounded by [`ModeConfig::max_polls`] and observe a
//! [`CancellationToken`] between polls.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio_util::sync::CancellationToken;

use super::{
    BitbangCommand, Connection, I2cCommand, BITBANG_MARKER, I2C_MARKER, TERMINAL_RESET,
    TERMINAL_RETURN,
};
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Carriage returns sent to get back to the command line.
const RESYNC_RETURNS: usize = 10;

/// `0x00` bytes sent to enter bitbang mode.
const BITBANG_ENTRY_RESETS: usize = 20;

/// How much trailing input the marker search keeps.
const MARKER_WINDOW: usize = 64;

/// Logical mode of the adapter.
///
/// Ordered by how far along the entry sequence the adapter is; a connection
/// only ever moves forward through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMode {
    /// Nothing known yet (fresh connection)
    Unknown,
    /// At the text terminal's command line
    Terminal,
    /// Raw bitbang mode (`BBIO1`)
    Bitbang,
    /// Binary I2C sub-mode (`I2C1`)
    I2c,
}

/// Mode entry errors.
#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A poll loop ran out of attempts without seeing its marker
    #[error("no {marker:?} from adapter after {polls} polls")]
    Timeout { marker: String, polls: u32 },

    /// The version check did not answer `I2C1`
    #[error("adapter did not confirm I2C mode")]
    VerificationFailed,

    /// Entry was aborted through the cancellation token
    #[error("mode entry cancelled")]
    Cancelled,
}

/// Timing and bounds for mode entry.
#[derive(Debug, Clone)]
pub struct ModeConfig {
    /// Sleep between polls for a marker.
    pub poll_interval: Duration,

    /// Re-send the entry command every this many polls. Must be non-zero.
    pub keepalive_every: u32,

    /// Polls before a loop gives up with [`ModeError::Timeout`].
    pub max_polls: u32,

    /// How long the initial probe waits for the 4-byte `I2C1` reply.
    pub probe_timeout: Duration,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            keepalive_every: 10,
            max_polls: 50,
            probe_timeout: Duration::from_millis(200),
        }
    }
}

/// Drives a [`Connection`] into verified binary I2C mode.
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    config: ModeConfig,
}

impl ModeController {
    pub fn new(config: ModeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModeConfig {
        &self.config
    }

    /// Put the adapter into binary I2C mode.
    ///
    /// Returns immediately after the probe if the adapter already answers as
    /// I2C. On success the connection's mode is [`DeviceMode::I2c`].
    pub async fn enter_i2c_mode<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        cancel: &CancellationToken,
    ) -> Result<(), ModeError> {
        conn.io().clear().await?;

        if self.probe(conn).await? {
            debug!("Already in I2C mode");
            conn.advance_mode(DeviceMode::I2c);
            return Ok(());
        }

        debug!("Not in I2C mode, entering");
        self.enter_bitbang(conn, cancel).await?;
        self.enter_i2c_from_bitbang(conn, cancel).await?;
        debug!("In I2C mode");
        Ok(())
    }

    /// Confirm the adapter still answers the version check with `I2C1`.
    pub async fn verify<T: Transport>(&self, conn: &mut Connection<T>) -> Result<(), ModeError> {
        conn.io().clear().await?;
        if self.probe(conn).await? {
            conn.advance_mode(DeviceMode::I2c);
            Ok(())
        } else {
            Err(ModeError::VerificationFailed)
        }
    }

    /// Send the version check and compare the reply against `I2C1`.
    ///
    /// A device outside I2C mode usually says nothing, so a read timeout is
    /// a "no", not an error.
    async fn probe<T: Transport>(&self, conn: &mut Connection<T>) -> Result<bool, ModeError> {
        let io = conn.io();
        io.write_byte(I2cCommand::VersionCheck.into()).await?;

        match io.read_exact(I2C_MARKER.len(), self.config.probe_timeout).await {
            Ok(reply) => {
                trace!(reply = %String::from_utf8_lossy(&reply), "Probe reply");
                Ok(reply == I2C_MARKER)
            }
            Err(TransportError::ReadTimeout { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn enter_bitbang<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        cancel: &CancellationToken,
    ) -> Result<(), ModeError> {
        let io = conn.io();

        debug!("Returning to command line");
        io.write_repeated(TERMINAL_RETURN, RESYNC_RETURNS).await?;
        io.clear().await?;

        debug!("Soft reset");
        io.write_byte(TERMINAL_RESET).await?;
        io.clear().await?;
        conn.advance_mode(DeviceMode::Terminal);

        debug!("Entering bitbang mode");
        conn.io()
            .write_repeated(BitbangCommand::Reset.into(), BITBANG_ENTRY_RESETS)
            .await?;
        self.await_marker(conn, BITBANG_MARKER, BitbangCommand::Reset.into(), cancel)
            .await?;
        conn.advance_mode(DeviceMode::Bitbang);

        // Every extra 0x00 we sent is answered with another BBIO1.
        tokio::time::sleep(self.config.poll_interval).await;
        conn.io().clear().await?;
        Ok(())
    }

    async fn enter_i2c_from_bitbang<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        cancel: &CancellationToken,
    ) -> Result<(), ModeError> {
        let io = conn.io();

        debug!("Selecting I2C mode");
        io.write_byte(BitbangCommand::I2cMode.into()).await?;
        io.clear().await?;

        debug!("Checking I2C version");
        io.write_byte(I2cCommand::VersionCheck.into()).await?;
        self.await_marker(conn, I2C_MARKER, I2cCommand::VersionCheck.into(), cancel)
            .await?;
        conn.advance_mode(DeviceMode::I2c);
        Ok(())
    }

    /// Poll buffered input until `marker` shows up, re-sending `kick` every
    /// `keepalive_every` polls.
    async fn await_marker<T: Transport>(
        &self,
        conn: &mut Connection<T>,
        marker: &[u8],
        kick: u8,
        cancel: &CancellationToken,
    ) -> Result<(), ModeError> {
        let io = conn.io();
        let keepalive_every = self.config.keepalive_every.max(1);
        let mut seen = BytesMut::with_capacity(MARKER_WINDOW);

        for poll in 1..=self.config.max_polls {
            let data = io.read_available().await?;
            if !data.is_empty() {
                seen.extend_from_slice(&data);
                if contains(&seen, marker) {
                    trace!(poll, marker = %String::from_utf8_lossy(marker), "Marker seen");
                    return Ok(());
                }
                if seen.len() > MARKER_WINDOW {
                    seen.advance(seen.len() - MARKER_WINDOW);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(poll, "Mode entry cancelled");
                    io.clear().await?;
                    return Err(ModeError::Cancelled);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if poll % keepalive_every == 0 {
                trace!(poll, kick = %format!("{:#04x}", kick), "Keepalive");
                io.write_byte(kick).await?;
            }
        }

        io.clear().await?;
        Err(ModeError::Timeout {
            marker: String::from_utf8_lossy(marker).into_owned(),
            polls: self.config.max_polls,
        })
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn expected_entry_bytes() -> Vec<u8> {
        let mut bytes = vec![0x01];
        bytes.extend([13u8; 10]);
        bytes.push(b'#');
        bytes.extend([0x00u8; 20]);
        bytes.extend([0x02, 0x01]);
        bytes
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_from_terminal() {
        let mut conn = Connection::new(MockTransport::terminal());
        let controller = ModeController::default();

        controller
            .enter_i2c_mode(&mut conn, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conn.mode(), DeviceMode::I2c);
        assert_eq!(conn.transport().written(), expected_entry_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_in_i2c_only_probes() {
        let mut conn = Connection::new(MockTransport::i2c());
        let controller = ModeController::default();

        controller
            .enter_i2c_mode(&mut conn, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conn.mode(), DeviceMode::I2c);
        assert_eq!(conn.transport().written(), &[0x01]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_entry_is_idempotent() {
        let mut conn = Connection::new(MockTransport::terminal());
        let controller = ModeController::default();
        let cancel = CancellationToken::new();

        controller.enter_i2c_mode(&mut conn, &cancel).await.unwrap();
        let after_first = conn.transport().written().len();

        controller.enter_i2c_mode(&mut conn, &cancel).await.unwrap();
        assert_eq!(&conn.transport().written()[after_first..], &[0x01]);
        assert_eq!(conn.mode(), DeviceMode::I2c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_recovers_sluggish_adapter() {
        // Needs one more 0x00 than the initial burst, so only the first
        // keepalive gets it into bitbang mode.
        let mut conn = Connection::new(MockTransport::terminal().with_bitbang_threshold(21));
        let controller = ModeController::default();

        controller
            .enter_i2c_mode(&mut conn, &CancellationToken::new())
            .await
            .unwrap();

        let zeros = conn.transport().written().iter().filter(|&&b| b == 0x00).count();
        assert_eq!(zeros, 21);
        assert_eq!(conn.mode(), DeviceMode::I2c);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_adapter_times_out() {
        let mut conn = Connection::new(MockTransport::silent());
        let controller = ModeController::new(ModeConfig {
            max_polls: 25,
            ..ModeConfig::default()
        });

        let err = controller
            .enter_i2c_mode(&mut conn, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ModeError::Timeout { marker, polls } => {
                assert_eq!(marker, "BBIO1");
                assert_eq!(polls, 25);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }

        // Initial burst plus keepalives at polls 10 and 20
        let zeros = conn.transport().written().iter().filter(|&&b| b == 0x00).count();
        assert_eq!(zeros, 22);
        assert_eq!(conn.mode(), DeviceMode::Terminal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_without_i2c_times_out() {
        let mut conn = Connection::new(MockTransport::terminal().without_i2c());
        let controller = ModeController::new(ModeConfig {
            max_polls: 25,
            ..ModeConfig::default()
        });

        let err = controller
            .enter_i2c_mode(&mut conn, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ModeError::Timeout { marker, polls } => {
                assert_eq!(marker, "I2C1");
                assert_eq!(polls, 25);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }

        // I2C select, version check, then keepalives at polls 10 and 20
        assert!(conn
            .transport()
            .written()
            .ends_with(&[0x02, 0x01, 0x01, 0x01]));
        assert_eq!(conn.mode(), DeviceMode::Bitbang);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_polling() {
        let mut conn = Connection::new(MockTransport::silent());
        let controller = ModeController::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = controller.enter_i2c_mode(&mut conn, &cancel).await.unwrap_err();

        assert!(matches!(err, ModeError::Cancelled));
        assert_eq!(conn.mode(), DeviceMode::Terminal);
        assert_eq!(conn.transport().pending_input(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_fails_outside_i2c() {
        let mut conn = Connection::new(MockTransport::terminal());
        let controller = ModeController::default();

        let err = controller.verify(&mut conn).await.unwrap_err();
        assert!(matches!(err, ModeError::VerificationFailed));
        assert_eq!(conn.mode(), DeviceMode::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_never_moves_backward() {
        let mut conn = Connection::new(MockTransport::i2c());
        conn.advance_mode(DeviceMode::I2c);
        conn.advance_mode(DeviceMode::Terminal);
        assert_eq!(conn.mode(), DeviceMode::I2c);
    }

    #[test]
    fn test_contains_marker_inside_noise() {
        assert!(contains(b"\r\nHiZ>BBIO1", b"BBIO1"));
        assert!(contains(b"BBIO1BBIO1", b"BBIO1"));
        assert!(!contains(b"BBIO", b"BBIO1"));
    }
}
