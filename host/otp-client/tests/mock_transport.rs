// Licensed under the Apache-2.0 license

use core::time::Duration;
use image_format::{crc16_of, Crc16Variant};
use otp_client::{Transport, TransportError};
use provisioning_common::message::{Opcode, SOM_MAGIC};
use std::collections::VecDeque;

/// Scripted transport: records every written frame and replays queued
/// response bytes. A read returns whatever is queued, up to `max_bytes`.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub written: Vec<Vec<u8>>,
    /// Byte count requested by every read call.
    pub reads: Vec<usize>,
    pending: VecDeque<u8>,
    pub closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, bytes: &[u8]) -> &mut Self {
        self.pending.extend(bytes);
        self
    }

    /// Queues a response header followed by `trailing`.
    pub fn queue_response(&mut self, opcode: Opcode, status: u32, trailing: &[u8]) -> &mut Self {
        let header = response_header(opcode.value(), status, trailing.len() as u32);
        self.queue(&header).queue(trailing)
    }

    /// Queues a successful flash read response carrying `data` and a CRC16 suffix.
    pub fn queue_flash_data(&mut self, data: &[u8]) -> &mut Self {
        self.queue_response(Opcode::FlashRead, 0, &with_crc(data))
    }

    /// Queues a flash read response whose CRC suffix does not match `data`.
    pub fn queue_corrupt_flash_data(&mut self, data: &[u8]) -> &mut Self {
        let mut framed = with_crc(data);
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        self.queue_response(Opcode::FlashRead, 0, &framed)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.written.push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.reads.push(max_bytes);
        let count = max_bytes.min(self.pending.len());
        Ok(self.pending.drain(..count).collect())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub fn response_header(opcode: u32, status: u32, length: u32) -> Vec<u8> {
    [SOM_MAGIC, opcode, status, length]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

pub fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut framed = data.to_vec();
    framed.extend_from_slice(&crc16_of(Crc16Variant::Framing, data).to_le_bytes());
    framed
}

#[cfg(test)]
#[test]
fn test_mock_replays_queued_bytes() {
    let mut transport = MockTransport::new();
    transport.queue(&[1, 2, 3]);
    transport.write(&[9]).unwrap();
    assert_eq!(transport.read(2, Duration::ZERO).unwrap(), [1, 2]);
    assert_eq!(transport.read(5, Duration::ZERO).unwrap(), [3]);
    assert!(transport.read(1, Duration::ZERO).unwrap().is_empty());
    transport.close();
    assert!(matches!(transport.write(&[0]), Err(TransportError::Closed)));
    assert_eq!(transport.written, vec![vec![9]]);
    assert_eq!(transport.reads, [2, 5, 1]);
}
