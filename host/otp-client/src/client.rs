// Licensed under the Apache-2.0 license

use crate::transport::{Transport, TransportError};
use core::time::Duration;
use image_format::{KeySlot, OtpSegment};
use log::{debug, error, info, warn};
use provisioning_common::config_script::ConfigEntry;
use provisioning_common::message::{
    strip_crc_suffix, Opcode, Request, ResponseHeader, CRC_LEN, OTP_KEY_LEN, RESPONSE_HEADER_SIZE,
};
use provisioning_common::{CodecError, WireCodec};
use thiserror::Error;

pub const DEFAULT_BLOCK_SIZE: usize = 1024;
/// Attempts made for each flash read chunk before giving up.
pub const FLASH_READ_ATTEMPTS: u32 = 3;
/// Largest trailing data accepted after a response header, other than a
/// flash read block. Covers the whole OTP configuration script area.
pub const MAX_RESPONSE_LEN: usize = 4096;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Malformed response: {0}")]
    Codec(#[from] CodecError),
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: usize, received: usize },
    #[error("{opcode} failed with status 0x{status:x}")]
    Status { opcode: Opcode, status: u32 },
    #[error("Data corruption retries exceeded reading flash at 0x{address:08x} ({attempts} attempts)")]
    CorruptionRetriesExceeded { address: u32, attempts: u32 },
    #[error("{opcode} response declares {declared} trailing bytes, at most {max} accepted")]
    ResponseTooLong {
        opcode: Opcode,
        declared: u32,
        max: usize,
    },
    #[error("{opcode} response declares {declared} trailing bytes, expected {expected}")]
    ResponseLength {
        opcode: Opcode,
        declared: u32,
        expected: usize,
    },
    #[error("Block size must be between 1 and {max}, got {size}")]
    InvalidBlockSize { size: usize, max: usize },
}

/// Data returned by [`ProvisioningClient::flash_read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRead {
    pub data: Vec<u8>,
    /// Chunk reads repeated because of a CRC mismatch or error status.
    pub retries: u32,
}

/// Drives the boot loader's provisioning protocol over a [`Transport`].
///
/// Every operation is a sequence of request/response exchanges: the request
/// frame is written, a 16-byte response header is read and checked, then any
/// trailing data the header announces is read.
pub struct ProvisioningClient<T: Transport> {
    transport: T,
    timeout: Duration,
    block_size: usize,
    max_attempts: u32,
}

impl<T: Transport> ProvisioningClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            block_size: DEFAULT_BLOCK_SIZE,
            max_attempts: FLASH_READ_ATTEMPTS,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Result<Self, ProvisionError> {
        // a flash write chunk plus its CRC must fit the 32-bit length field
        let max = u32::MAX as usize - 2;
        if block_size == 0 || block_size > max {
            return Err(ProvisionError::InvalidBlockSize {
                size: block_size,
                max,
            });
        }
        self.block_size = block_size;
        Ok(self)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Closes the transport and hands it back.
    pub fn into_transport(mut self) -> T {
        self.transport.close();
        self.transport
    }

    pub fn read_key(
        &mut self,
        segment: OtpSegment,
        slot: KeySlot,
    ) -> Result<[u8; OTP_KEY_LEN], ProvisionError> {
        let header = self.send(&Request::OtpReadKey { segment, slot })?;
        check_status(Opcode::OtpReadKey, &header)?;
        let key = self.read_exact(OTP_KEY_LEN)?;
        let mut out = [0u8; OTP_KEY_LEN];
        out.copy_from_slice(&key);
        info!("Read key from {:?} slot {}", segment, slot);
        Ok(out)
    }

    /// Writes a 32-byte key. The word swap and CRC are applied by the request encoder.
    pub fn write_key(
        &mut self,
        segment: OtpSegment,
        slot: KeySlot,
        key: &[u8; OTP_KEY_LEN],
    ) -> Result<(), ProvisionError> {
        let header = self.send(&Request::OtpWriteKey { segment, slot, key })?;
        check_status(Opcode::OtpWriteKey, &header)?;
        info!("Wrote key to {:?} slot {}", segment, slot);
        Ok(())
    }

    /// Returns the raw bytes of the OTP configuration script area.
    pub fn read_config(&mut self) -> Result<Vec<u8>, ProvisionError> {
        let data = self.exchange(&Request::OtpReadConfig)?;
        info!("Read {} bytes of OTP configuration script", data.len());
        Ok(data)
    }

    pub fn append_config(&mut self, entry: &ConfigEntry) -> Result<(), ProvisionError> {
        let words = entry.words()?;
        self.exchange(&Request::OtpAppendValue { words: &words })?;
        info!("Appended {:?} to OTP configuration script", entry);
        Ok(())
    }

    pub fn init_config(&mut self) -> Result<(), ProvisionError> {
        self.exchange(&Request::OtpInit)?;
        info!("Initialized OTP configuration script");
        Ok(())
    }

    /// Reads `length` bytes of flash starting at `address`, one block per
    /// exchange. Each block is retried up to the attempt bound when its CRC
    /// does not match or the device reports an error.
    pub fn flash_read(&mut self, address: u32, length: usize) -> Result<FlashRead, ProvisionError> {
        let mut data = Vec::with_capacity(length);
        let mut retries = 0;
        let mut offset = address;
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(self.block_size);
            let (bytes, chunk_retries) = self.flash_read_chunk(offset, chunk)?;
            data.extend_from_slice(&bytes);
            retries += chunk_retries;
            remaining -= chunk;
            offset = offset.wrapping_add(chunk as u32);
        }
        info!(
            "Read {} bytes of flash at 0x{:08x} ({} retries)",
            length, address, retries
        );
        Ok(FlashRead { data, retries })
    }

    fn flash_read_chunk(&mut self, address: u32, length: usize) -> Result<(Vec<u8>, u32), ProvisionError> {
        let request = Request::FlashRead {
            address,
            length: length as u32,
        };
        let framed_len = length + CRC_LEN;
        for attempt in 1..=self.max_attempts {
            let header = self.send(&request)?;
            if header.status.get() != 0 {
                self.read_trailing(Opcode::FlashRead, &header, framed_len)?;
                warn!(
                    "Flash read at 0x{:08x} returned status 0x{:x} (attempt {}/{})",
                    address,
                    header.status.get(),
                    attempt,
                    self.max_attempts
                );
                continue;
            }
            let declared = header.length.get();
            if declared as usize != framed_len {
                return Err(ProvisionError::ResponseLength {
                    opcode: Opcode::FlashRead,
                    declared,
                    expected: framed_len,
                });
            }
            let trailing = self.read_exact(framed_len)?;
            match strip_crc_suffix(&trailing) {
                Ok(chunk) => return Ok((chunk.to_vec(), attempt - 1)),
                Err(CodecError::CrcMismatch { received, computed }) => warn!(
                    "Flash read at 0x{:08x}: CRC 0x{:04x} != 0x{:04x} (attempt {}/{})",
                    address, received, computed, attempt, self.max_attempts
                ),
                Err(e) => return Err(e.into()),
            }
        }
        error!("Giving up on flash read at 0x{:08x}", address);
        Err(ProvisionError::CorruptionRetriesExceeded {
            address,
            attempts: self.max_attempts,
        })
    }

    pub fn flash_write(&mut self, address: u32, data: &[u8]) -> Result<(), ProvisionError> {
        let mut offset = address;
        for chunk in data.chunks(self.block_size) {
            self.exchange(&Request::FlashWrite {
                address: offset,
                data: chunk,
            })?;
            offset = offset.wrapping_add(chunk.len() as u32);
        }
        info!("Wrote {} bytes of flash at 0x{:08x}", data.len(), address);
        Ok(())
    }

    pub fn flash_erase(&mut self, address: u32, length: u32) -> Result<(), ProvisionError> {
        self.exchange(&Request::FlashErase { address, length })?;
        info!("Erased {} bytes of flash at 0x{:08x}", length, address);
        Ok(())
    }

    /// Sends `request`, checks the status, and returns the trailing data.
    fn exchange(&mut self, request: &Request) -> Result<Vec<u8>, ProvisionError> {
        let header = self.send(request)?;
        check_status(request.opcode(), &header)?;
        self.read_trailing(request.opcode(), &header, MAX_RESPONSE_LEN)
    }

    /// Reads the trailing data announced by `header`, refusing lengths above `max`.
    fn read_trailing(
        &mut self,
        opcode: Opcode,
        header: &ResponseHeader,
        max: usize,
    ) -> Result<Vec<u8>, ProvisionError> {
        let declared = header.length.get();
        match usize::try_from(declared) {
            Ok(length) if length <= max => self.read_exact(length),
            _ => {
                error!("{} response declares {} trailing bytes", opcode, declared);
                Err(ProvisionError::ResponseTooLong {
                    opcode,
                    declared,
                    max,
                })
            }
        }
    }

    /// Writes the request frame and returns the validated response header.
    fn send(&mut self, request: &Request) -> Result<ResponseHeader, ProvisionError> {
        let frame = request.encode()?;
        debug!("{}: sending {} bytes", request.opcode(), frame.len());
        self.transport.write(&frame)?;

        let bytes = self.read_exact(RESPONSE_HEADER_SIZE)?;
        let header = ResponseHeader::decode(&bytes)?;
        header.validate(request.opcode())?;
        debug!(
            "{}: status 0x{:x}, {} trailing bytes",
            request.opcode(),
            header.status.get(),
            header.length.get()
        );
        Ok(header)
    }

    fn read_exact(&mut self, length: usize) -> Result<Vec<u8>, ProvisionError> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.transport.read(length, self.timeout)?;
        if bytes.len() != length {
            return Err(ProvisionError::IncompleteResponse {
                expected: length,
                received: bytes.len(),
            });
        }
        Ok(bytes)
    }
}

fn check_status(opcode: Opcode, header: &ResponseHeader) -> Result<(), ProvisionError> {
    match header.status.get() {
        0 => Ok(()),
        status => {
            error!("{} failed with status 0x{:x}", opcode, status);
            Err(ProvisionError::Status { opcode, status })
        }
    }
}
