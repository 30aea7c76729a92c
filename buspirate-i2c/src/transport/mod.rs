//! Byte-level transport to the adapter.
//!
//! The protocol layer never touches OS serial settings directly; it talks to
//! a [`Transport`], which offers exactly the primitives the Bus Pirate's
//! half-duplex request/response protocol needs: a "bytes available" query, a
//! non-blocking read of whatever is buffered, a timed read of an exact count,
//! and write/flush.

pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;

pub use serial::{SerialConfig, SerialTransport};

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error on the open channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the serial port layer (enumeration, open, settings)
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// No port matched the requested identifier
    #[error("serial port {0} not found")]
    PortNotFound(String),

    /// A timed read did not complete
    #[error("timed out after {timeout:?} waiting for {expected} byte(s)")]
    ReadTimeout { expected: usize, timeout: Duration },
}

/// Byte-oriented channel to the adapter.
#[async_trait]
pub trait Transport: Send {
    /// Number of received bytes waiting to be read.
    async fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Return up to `max_len` bytes that are already buffered, without waiting.
    async fn read_available(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Fill `buf` completely, waiting at most `timeout`.
    async fn read_exact(&mut self, buf: &mut [u8], timeout: Duration)
        -> Result<(), TransportError>;

    /// Queue `bytes` for transmission.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Push queued bytes onto the wire.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Release the channel.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
