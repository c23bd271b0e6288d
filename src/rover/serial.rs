//! Lazily opened serial link
//!
//! The port is opened on first use. Any I/O failure drops the handle so the
//! next transaction reopens it.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, info, warn};

use crate::errors::RoverError;

pub struct SerialLink {
    path: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
            port: None,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        if self.port.is_none() {
            let port = serialport::new(self.path.as_str(), self.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .timeout(self.timeout)
                .open()
                .map_err(|e| {
                    let error = RoverError::OpenFailed {
                        port: self.path.clone(),
                        reason: e.to_string(),
                    };
                    io::Error::new(io::ErrorKind::NotConnected, error.to_string())
                })?;
            info!("Opened serial port {} at {} baud", self.path, self.baud_rate);
            self.port = Some(port);
        }

        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }

    fn on_error(&mut self, error: &io::Error) {
        if self.port.take().is_some() {
            warn!("Closing serial port {} after error: {}", self.path, error);
        }
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.port().and_then(|port| port.read(buf));
        if let Err(e) = &result {
            self.on_error(e);
        }
        result
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.port().and_then(|port| {
            // Stale bytes from an earlier timed out reply would desync the framing
            if let Err(e) = port.clear(ClearBuffer::Input) {
                debug!("Could not clear serial input buffer: {}", e);
            }
            port.write(buf)
        });
        if let Err(e) = &result {
            self.on_error(e);
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = self.port().and_then(|port| port.flush());
        if let Err(e) = &result {
            self.on_error(e);
        }
        result
    }
}
