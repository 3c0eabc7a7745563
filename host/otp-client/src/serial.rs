// Licensed under the Apache-2.0 license

use crate::transport::{Transport, TransportError};
use core::time::Duration;
use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Instant;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial link settings. Framing is always 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Serial port transport. The port is closed when the transport is dropped.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open()
            .map_err(|e| TransportError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;
        debug!("Opened {} at {} baud", config.port, config.baud_rate);
        Ok(Self {
            port: Some(port),
            name: config.port,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let port = self.port()?;
        let mut buffer = vec![0u8; max_bytes];
        let received = read_until_deadline(port.as_mut(), &mut buffer, deadline, |port, left| {
            port.set_timeout(left).map_err(std::io::Error::from)
        })?;
        buffer.truncate(received);
        Ok(buffer)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fills `buffer` until it is full, the link times out, or `deadline` passes.
/// Each blocking read is limited to the time left before the deadline.
fn read_until_deadline<R: Read + ?Sized>(
    reader: &mut R,
    buffer: &mut [u8],
    deadline: Instant,
    mut set_timeout: impl FnMut(&mut R, Duration) -> std::io::Result<()>,
) -> std::io::Result<usize> {
    let mut received = 0;
    while received < buffer.len() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        set_timeout(reader, left)?;
        match reader.read(&mut buffer[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(received)
}
