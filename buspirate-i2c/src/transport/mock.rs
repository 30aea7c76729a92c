//! Simulated Bus Pirate for tests.
//!
//! Reacts to written bytes the way the adapter does: the text terminal counts
//! `0x00` bytes until it drops into bitbang mode, bitbang mode answers `BBIO1`
//! and switches to I2C on `0x02`, and I2C mode runs the binary command set
//! against a set of simulated bus devices.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    Terminal,
    Bitbang,
    I2c,
    /// Never answers anything
    Silent,
}

#[derive(Debug)]
struct SimDevice {
    address: u8,
    response: Vec<u8>,
    received: Vec<u8>,
}

pub(crate) struct MockTransport {
    mode: SimMode,
    input: VecDeque<u8>,
    written: Vec<u8>,
    zeros: usize,
    bitbang_threshold: usize,
    command_status: u8,
    /// Whether bitbang mode answers the I2C select
    i2c_supported: bool,
    devices: Vec<SimDevice>,
    // Remaining data bytes in the current bulk write
    pending_data: usize,
    expect_address: bool,
    selected: Option<usize>,
    reading: bool,
    read_pos: usize,
}

impl MockTransport {
    fn with_mode(mode: SimMode) -> Self {
        Self {
            mode,
            input: VecDeque::new(),
            written: Vec::new(),
            zeros: 0,
            bitbang_threshold: 20,
            command_status: 0x01,
            i2c_supported: true,
            devices: Vec::new(),
            pending_data: 0,
            expect_address: false,
            selected: None,
            reading: false,
            read_pos: 0,
        }
    }

    /// Adapter sitting at the terminal prompt.
    pub fn terminal() -> Self {
        Self::with_mode(SimMode::Terminal)
    }

    /// Adapter already in binary I2C mode.
    pub fn i2c() -> Self {
        Self::with_mode(SimMode::I2c)
    }

    /// Port with nothing listening.
    pub fn silent() -> Self {
        Self::with_mode(SimMode::Silent)
    }

    /// Consecutive `0x00` bytes needed to leave the terminal.
    pub fn with_bitbang_threshold(mut self, zeros: usize) -> Self {
        self.bitbang_threshold = zeros;
        self
    }

    /// Attach a device at 7-bit `address` that returns `response` on reads.
    pub fn with_device(mut self, address: u8, response: &[u8]) -> Self {
        self.devices.push(SimDevice {
            address,
            response: response.to_vec(),
            received: Vec::new(),
        });
        self
    }

    /// Status byte returned for peripheral and speed commands.
    pub fn with_command_status(mut self, status: u8) -> Self {
        self.command_status = status;
        self
    }

    /// Bitbang mode ignores `0x02`, so `I2C1` never comes back.
    pub fn without_i2c(mut self) -> Self {
        self.i2c_supported = false;
        self
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Bytes written to the device at `address`, register byte included.
    pub fn device_writes(&self, address: u8) -> &[u8] {
        self.devices
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.received.as_slice())
            .unwrap_or(&[])
    }

    fn handle(&mut self, byte: u8) {
        match self.mode {
            SimMode::Silent => {}
            SimMode::Terminal => self.handle_terminal(byte),
            SimMode::Bitbang => self.handle_bitbang(byte),
            SimMode::I2c => self.handle_i2c(byte),
        }
    }

    fn handle_terminal(&mut self, byte: u8) {
        if byte == 0x00 {
            self.zeros += 1;
            if self.zeros >= self.bitbang_threshold {
                self.zeros = 0;
                self.mode = SimMode::Bitbang;
                self.push_input(b"BBIO1");
            }
            return;
        }

        self.zeros = 0;
        match byte {
            b'\r' => self.push_input(b"\r\nHiZ>"),
            b'#' => self.push_input(b"#\r\nRESET\r\n\r\nBus Pirate v3.b\r\nHiZ>"),
            _ => {}
        }
    }

    fn handle_bitbang(&mut self, byte: u8) {
        match byte {
            0x00 => self.push_input(b"BBIO1"),
            0x02 if self.i2c_supported => {
                self.mode = SimMode::I2c;
                self.push_input(b"I2C1");
            }
            _ => {}
        }
    }

    fn handle_i2c(&mut self, byte: u8) {
        if self.pending_data > 0 {
            self.pending_data -= 1;
            let ack = self.bus_write(byte);
            self.input.push_back(ack);
            return;
        }

        match byte {
            0x00 => {
                self.mode = SimMode::Bitbang;
                self.push_input(b"BBIO1");
            }
            0x01 => self.push_input(b"I2C1"),
            0x02 => {
                self.expect_address = true;
                self.input.push_back(0x00);
            }
            0x03 => {
                self.selected = None;
                self.input.push_back(0x01);
            }
            0x04 => {
                let data = self.bus_read();
                self.input.push_back(data);
            }
            0x06 | 0x07 => self.input.push_back(0x01),
            0x10..=0x1F => self.pending_data = usize::from(byte & 0x0F) + 1,
            0x40..=0x4F | 0x60..=0x63 => self.input.push_back(self.command_status),
            _ => {}
        }
    }

    /// Put a byte on the simulated bus; returns the handshake byte.
    fn bus_write(&mut self, byte: u8) -> u8 {
        if self.expect_address {
            self.expect_address = false;
            self.reading = byte & 1 == 1;
            self.read_pos = 0;
            self.selected = self.devices.iter().position(|d| d.address == byte >> 1);
            return if self.selected.is_some() { 0x00 } else { 0x01 };
        }

        match self.selected {
            Some(i) if !self.reading => {
                self.devices[i].received.push(byte);
                0x00
            }
            _ => 0x01,
        }
    }

    fn bus_read(&mut self) -> u8 {
        match self.selected {
            Some(i) if self.reading => {
                let data = self.devices[i]
                    .response
                    .get(self.read_pos)
                    .copied()
                    .unwrap_or(0xFF);
                self.read_pos += 1;
                data
            }
            // Nobody drives SDA, so the pull-ups read as all ones
            _ => 0xFF,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.input.len())
    }

    async fn read_available(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let len = max_len.min(self.input.len());
        Ok(self.input.drain(..len).collect())
    }

    async fn read_exact(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.input.len() < buf.len() {
            // Nothing else can feed input while we wait, so sit out the
            // timeout and report it.
            tokio::time::sleep(timeout).await;
            return Err(TransportError::ReadTimeout {
                expected: buf.len(),
                timeout,
            });
        }
        for slot in buf.iter_mut() {
            *slot = self.input.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        for &byte in bytes {
            self.written.push(byte);
            self.handle(byte);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
