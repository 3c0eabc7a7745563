// Licensed under the Apache-2.0 license

use core::time::Duration;
use thiserror::Error;

// The provisioning client talks to the device through a byte-oriented
// Transport. The serial port is the production implementation; tests plug in
// a scripted transport that replays canned responses.
//
//     ProvisioningClient
//            |
//        Transport  <- SerialTransport | MockTransport
//            |
//     boot loader on the device

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unable to open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("Transport is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Transport {
    /// Writes all of `data` to the device.
    ///
    /// # Returns
    ///
    /// * `Result<(), TransportError>` - Returns `Ok(())` once every byte is handed to the link.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Reads up to `max_bytes` from the device.
    ///
    /// # Arguments
    ///
    /// * `max_bytes` - Number of bytes wanted.
    /// * `timeout` - Maximum time to wait for them.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>, TransportError>` - The bytes received before the timeout expired,
    ///   which may be fewer than `max_bytes`.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Releases the underlying link. Further reads and writes fail with `Closed`.
    fn close(&mut self);
}
