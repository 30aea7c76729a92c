//! Serial port transport backed by `tokio-serial`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

use super::{Transport, TransportError};
use crate::tracing::prelude::*;

/// Line settings for the adapter's serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    /// 115200 8N1, no flow control: the Bus Pirate's binary-mode settings.
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

/// An open serial connection to the adapter.
pub struct SerialTransport {
    port: SerialStream,
    name: String,
}

impl SerialTransport {
    /// Open the first system port whose name contains `identifier`.
    ///
    /// A fragment such as `ttyUSB` or `COM` picks the first matching device;
    /// a full path like `/dev/ttyUSB1` selects exactly that one.
    pub fn open(identifier: &str, config: &SerialConfig) -> Result<Self, TransportError> {
        let ports = tokio_serial::available_ports()?;
        for info in &ports {
            debug!(port = %info.port_name, kind = ?info.port_type, "Found serial port");
        }

        let name = ports
            .into_iter()
            .map(|info| info.port_name)
            .find(|name| name.contains(identifier))
            .ok_or_else(|| TransportError::PortNotFound(identifier.to_string()))?;

        let port = tokio_serial::new(&name, config.baud_rate)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .parity(config.parity)
            .flow_control(config.flow_control)
            .open_native_async()?;

        info!(port = %name, baud = config.baud_rate, "Connected");
        Ok(Self { port, name })
    }

    /// System name of the open port.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    async fn read_available(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let len = self.bytes_available().await?.min(max_len);
        if len == 0 {
            return Ok(Vec::new());
        }

        // The driver already holds `len` bytes, so this read does not park.
        let mut buf = vec![0u8; len];
        let got = self.port.read(&mut buf).await?;
        buf.truncate(got);
        Ok(buf)
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(timeout, self.port.read_exact(buf)).await {
            Ok(result) => {
                result?;
                Ok(())
            }
            Err(_) => Err(TransportError::ReadTimeout {
                expected: buf.len(),
                timeout,
            }),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.port.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(port = %self.name, "Closing serial port");
        self.port.shutdown().await?;
        Ok(())
    }
}
