// Licensed under the Apache-2.0 license

use crate::message::Opcode;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("output buffer holds {available} bytes, record needs {needed}")]
    OutputTooSmall { needed: usize, available: usize },
    #[error("bad start-of-message magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unexpected opcode {received} in response, expected {expected}")]
    UnexpectedOpcode { expected: Opcode, received: u32 },
    #[error("data CRC mismatch: received 0x{received:04x}, computed 0x{computed:04x}")]
    CrcMismatch { received: u16, computed: u16 },
    #[error("transfer of {0} bytes does not fit in a 32-bit length")]
    LengthOverflow(usize),
    #[error("{0} trim values do not fit in a single trim entry (at most 255)")]
    TooManyTrimValues(usize),
}

/// A trait for encoding and decoding fixed-layout provisioning records.
///
/// Implemented for every zerocopy record, so a command or response header is
/// written and parsed at its documented byte offsets instead of by position.
pub trait WireCodec: core::fmt::Debug + Sized {
    /// Encodes the record into the front of `buffer`, returning the number of bytes written.
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, CodecError>;

    /// Decodes a record from the front of `buffer`.
    fn decode(buffer: &[u8]) -> Result<Self, CodecError>;
}

impl<T> WireCodec for T
where
    T: core::fmt::Debug + Sized + FromBytes + IntoBytes + Immutable,
{
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, CodecError> {
        let needed = core::mem::size_of::<T>();
        self.write_to_prefix(buffer)
            .map_err(|_| CodecError::OutputTooSmall {
                needed,
                available: buffer.len(),
            })
            .map(|_| needed)
    }

    fn decode(buffer: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::read_from_prefix(buffer)
            .map_err(|_| CodecError::BufferTooShort)?
            .0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ResponseHeader, RESPONSE_HEADER_SIZE};

    #[test]
    fn test_short_input_and_short_output_are_distinct() {
        assert_eq!(
            ResponseHeader::decode(&[0u8; RESPONSE_HEADER_SIZE - 1]),
            Err(CodecError::BufferTooShort)
        );

        let header = ResponseHeader::decode(&[0u8; RESPONSE_HEADER_SIZE]).unwrap();
        let mut output = [0u8; 8];
        assert_eq!(
            header.encode(&mut output),
            Err(CodecError::OutputTooSmall {
                needed: RESPONSE_HEADER_SIZE,
                available: 8
            })
        );
        let mut output = [0u8; RESPONSE_HEADER_SIZE + 4];
        assert_eq!(header.encode(&mut output), Ok(RESPONSE_HEADER_SIZE));
    }
}
