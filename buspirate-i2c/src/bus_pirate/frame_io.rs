//! Single-byte framing helpers shared by mode entry and the I2C engine.

use std::time::Duration;

use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportError};

/// Rounds of draining done by [`FrameIo::clear`].
const CLEAR_ROUNDS: usize = 4;

/// Pause after each non-empty drain, letting the tail of a burst arrive.
const CLEAR_PAUSE: Duration = Duration::from_millis(20);

/// Byte-level read/write wrapper around a [`Transport`].
///
/// Every write is flushed before returning: the adapter answers each command
/// byte individually, so nothing may sit in an OS buffer while we wait for a
/// reply.
pub struct FrameIo<T: Transport> {
    transport: T,
}

impl<T: Transport> FrameIo<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Write one byte and flush.
    pub async fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        trace!(byte = %format!("{:#04x}", byte), "TX");
        self.transport.write(&[byte]).await?;
        self.transport.flush().await
    }

    /// Write `byte` `count` times, then flush once.
    pub async fn write_repeated(&mut self, byte: u8, count: usize) -> Result<(), TransportError> {
        trace!(byte = %format!("{:#04x}", byte), count, "TX repeated");
        self.transport.write(&vec![byte; count]).await?;
        self.transport.flush().await
    }

    /// Read exactly one byte, waiting at most `timeout`.
    pub async fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        let mut buf = [0u8; 1];
        self.transport.read_exact(&mut buf, timeout).await?;
        trace!(byte = %format!("{:#04x}", buf[0]), "RX");
        Ok(buf[0])
    }

    /// Read exactly `len` bytes, waiting at most `timeout` for all of them.
    pub async fn read_exact(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf, timeout).await?;
        trace!(bytes = ?buf, "RX");
        Ok(buf)
    }

    /// Take whatever input is buffered right now, without waiting.
    pub async fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let available = self.transport.bytes_available().await?;
        if available == 0 {
            return Ok(Vec::new());
        }
        let data = self.transport.read_available(available).await?;
        trace!(len = data.len(), text = %String::from_utf8_lossy(&data), "RX available");
        Ok(data)
    }

    /// Discard pending input. Returns the number of bytes thrown away.
    pub async fn clear(&mut self) -> Result<usize, TransportError> {
        let mut discarded = 0;
        for _ in 0..CLEAR_ROUNDS {
            let data = self.read_available().await?;
            if data.is_empty() {
                break;
            }
            discarded += data.len();
            trace!(len = data.len(), text = %String::from_utf8_lossy(&data), "Discarded input");
            tokio::time::sleep(CLEAR_PAUSE).await;
        }
        Ok(discarded)
    }
}
