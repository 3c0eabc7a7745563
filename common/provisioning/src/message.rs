// Licensed under the Apache-2.0 license

//! Provisioning wire records.
//!
//! Every request starts with a start-of-message magic and an opcode; every
//! response is a 16-byte header optionally followed by `length` bytes of
//! trailing data. All fields are little-endian 32-bit words.
//!
//! | Record           | Bytes | Layout                                  |
//! |------------------|-------|-----------------------------------------|
//! | `KeyCommand`     | 16    | som, opcode, segment, slot              |
//! | `FlashCommand`   | 16    | som, opcode, address, length            |
//! | `PayloadCommand` | 12    | som, opcode, length                     |
//! | `ResponseHeader` | 16    | som, opcode, status, length             |

use crate::codec::{CodecError, WireCodec};
use core::fmt;
use core::mem::size_of;
use image_format::{crc16_of, Crc16Variant, KeySlot, OtpSegment};
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const SOM_MAGIC: u32 = 0xAA55_AA55;
pub const RESPONSE_HEADER_SIZE: usize = size_of::<ResponseHeader>();
pub const OTP_KEY_LEN: usize = 32;
pub const CRC_LEN: usize = size_of::<u16>();

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    OtpReadKey = 0,
    OtpWriteKey = 1,
    FlashRead = 2,
    FlashWrite = 3,
    OtpReadConfig = 4,
    OtpAppendValue = 5,
    OtpInit = 6,
    FlashErase = 7,
}

impl Opcode {
    pub const fn value(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::OtpReadKey),
            1 => Ok(Opcode::OtpWriteKey),
            2 => Ok(Opcode::FlashRead),
            3 => Ok(Opcode::FlashWrite),
            4 => Ok(Opcode::OtpReadConfig),
            5 => Ok(Opcode::OtpAppendValue),
            6 => Ok(Opcode::OtpInit),
            7 => Ok(Opcode::FlashErase),
            other => Err(other),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::OtpReadKey => "OTP_READ_KEY",
            Opcode::OtpWriteKey => "OTP_WRITE_KEY",
            Opcode::FlashRead => "FLASH_READ",
            Opcode::FlashWrite => "FLASH_WRITE",
            Opcode::OtpReadConfig => "OTP_READ_CONFIG",
            Opcode::OtpAppendValue => "OTP_APPEND_VALUE",
            Opcode::OtpInit => "OTP_INIT",
            Opcode::FlashErase => "FLASH_ERASE",
        };
        f.write_str(name)
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct CommandHeader {
    pub som: U32,
    pub opcode: U32,
}

impl CommandHeader {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            som: SOM_MAGIC.into(),
            opcode: opcode.value().into(),
        }
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct KeyCommand {
    pub header: CommandHeader,
    pub segment: U32,
    pub slot: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct FlashCommand {
    pub header: CommandHeader,
    pub address: U32,
    pub length: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct PayloadCommand {
    pub header: CommandHeader,
    pub length: U32,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct ResponseHeader {
    pub som: U32,
    pub opcode: U32,
    pub status: U32,
    /// Number of trailing data bytes following the header.
    pub length: U32,
}

impl ResponseHeader {
    /// Checks the framing of a response to a request with `expected` opcode.
    /// The status code is left to the caller.
    pub fn validate(&self, expected: Opcode) -> Result<(), CodecError> {
        if self.som.get() != SOM_MAGIC {
            return Err(CodecError::BadMagic(self.som.get()));
        }
        if self.opcode.get() != expected.value() {
            return Err(CodecError::UnexpectedOpcode {
                expected,
                received: self.opcode.get(),
            });
        }
        Ok(())
    }
}

/// A single provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    OtpReadKey {
        segment: OtpSegment,
        slot: KeySlot,
    },
    OtpWriteKey {
        segment: OtpSegment,
        slot: KeySlot,
        key: &'a [u8; OTP_KEY_LEN],
    },
    FlashRead {
        address: u32,
        length: u32,
    },
    FlashWrite {
        address: u32,
        data: &'a [u8],
    },
    FlashErase {
        address: u32,
        length: u32,
    },
    OtpReadConfig,
    OtpAppendValue {
        words: &'a [u32],
    },
    OtpInit,
}

impl Request<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::OtpReadKey { .. } => Opcode::OtpReadKey,
            Request::OtpWriteKey { .. } => Opcode::OtpWriteKey,
            Request::FlashRead { .. } => Opcode::FlashRead,
            Request::FlashWrite { .. } => Opcode::FlashWrite,
            Request::FlashErase { .. } => Opcode::FlashErase,
            Request::OtpReadConfig => Opcode::OtpReadConfig,
            Request::OtpAppendValue { .. } => Opcode::OtpAppendValue,
            Request::OtpInit => Opcode::OtpInit,
        }
    }

    /// Encodes the complete request frame, including any data and its CRC16.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let header = CommandHeader::new(self.opcode());
        let mut frame = Vec::new();
        match *self {
            Request::OtpReadKey { segment, slot } => {
                push_record(&mut frame, &key_command(header, segment, slot))?;
            }
            Request::OtpWriteKey { segment, slot, key } => {
                push_record(&mut frame, &key_command(header, segment, slot))?;
                push_with_crc(&mut frame, &swap_key_words(key));
            }
            Request::FlashRead { address, length } | Request::FlashErase { address, length } => {
                let command = FlashCommand {
                    header,
                    address: address.into(),
                    length: length.into(),
                };
                push_record(&mut frame, &command)?;
            }
            Request::FlashWrite { address, data } => {
                let command = FlashCommand {
                    header,
                    address: address.into(),
                    length: framed_length(data.len())?.into(),
                };
                push_record(&mut frame, &command)?;
                push_with_crc(&mut frame, data);
            }
            Request::OtpReadConfig | Request::OtpInit => {
                // length is unused by the device
                let command = PayloadCommand {
                    header,
                    length: 0u32.into(),
                };
                push_record(&mut frame, &command)?;
            }
            Request::OtpAppendValue { words } => {
                let data = words_to_bytes(words);
                let command = PayloadCommand {
                    header,
                    length: framed_length(data.len())?.into(),
                };
                push_record(&mut frame, &command)?;
                push_with_crc(&mut frame, &data);
            }
        }
        Ok(frame)
    }
}

fn key_command(header: CommandHeader, segment: OtpSegment, slot: KeySlot) -> KeyCommand {
    KeyCommand {
        header,
        segment: segment.id().into(),
        slot: (slot.index() as u32).into(),
    }
}

fn push_record<T: WireCodec>(frame: &mut Vec<u8>, record: &T) -> Result<(), CodecError> {
    let start = frame.len();
    frame.resize(start + size_of::<T>(), 0);
    record.encode(&mut frame[start..])?;
    Ok(())
}

fn push_with_crc(frame: &mut Vec<u8>, data: &[u8]) {
    frame.extend_from_slice(data);
    frame.extend_from_slice(&crc16_of(Crc16Variant::Framing, data).to_le_bytes());
}

fn framed_length(data_len: usize) -> Result<u32, CodecError> {
    data_len
        .checked_add(CRC_LEN)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(CodecError::LengthOverflow(data_len))
}

/// Serializes configuration words as little-endian bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Byte-swaps each 32-bit word of an OTP key, the order the device stores keys in.
pub fn swap_key_words(key: &[u8; OTP_KEY_LEN]) -> [u8; OTP_KEY_LEN] {
    let mut swapped = *key;
    swapped.chunks_exact_mut(4).for_each(|word| word.reverse());
    swapped
}

/// Splits trailing data carrying a little-endian CRC16 suffix and checks the
/// CRC over the data portion.
pub fn strip_crc_suffix(trailing: &[u8]) -> Result<&[u8], CodecError> {
    if trailing.len() < CRC_LEN {
        return Err(CodecError::BufferTooShort);
    }
    let (data, crc) = trailing.split_at(trailing.len() - CRC_LEN);
    let received = u16::from_le_bytes([crc[0], crc[1]]);
    let computed = crc16_of(Crc16Variant::Framing, data);
    if received != computed {
        return Err(CodecError::CrcMismatch { received, computed });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(index: u8) -> KeySlot {
        KeySlot::new(index).unwrap()
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(size_of::<CommandHeader>(), 8);
        assert_eq!(size_of::<KeyCommand>(), 16);
        assert_eq!(size_of::<FlashCommand>(), 16);
        assert_eq!(size_of::<PayloadCommand>(), 12);
        assert_eq!(RESPONSE_HEADER_SIZE, 16);
    }

    #[test]
    fn test_read_key_frame() {
        let frame = Request::OtpReadKey {
            segment: OtpSegment::Qspi,
            slot: slot(5),
        }
        .encode()
        .unwrap();
        assert_eq!(
            frame,
            [0x55, 0xAA, 0x55, 0xAA, 0, 0, 0, 0, 2, 0, 0, 0, 5, 0, 0, 0]
        );
    }

    #[test]
    fn test_write_key_frame() {
        let key: [u8; OTP_KEY_LEN] = core::array::from_fn(|i| i as u8);
        let frame = Request::OtpWriteKey {
            segment: OtpSegment::Signature,
            slot: slot(1),
            key: &key,
        }
        .encode()
        .unwrap();
        assert_eq!(frame.len(), 16 + OTP_KEY_LEN + CRC_LEN);
        assert_eq!(&frame[4..8], &1u32.to_le_bytes());
        assert_eq!(&frame[16..24], &[3, 2, 1, 0, 7, 6, 5, 4]);
        let swapped = swap_key_words(&key);
        let crc = crc16_of(Crc16Variant::Framing, &swapped);
        assert_eq!(&frame[48..], &crc.to_le_bytes());
    }

    #[test]
    fn test_flash_write_frame_counts_crc_in_length() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let frame = Request::FlashWrite {
            address: 0x1000,
            data: &data,
        }
        .encode()
        .unwrap();
        let command = FlashCommand::decode(&frame).unwrap();
        assert_eq!(command.header.opcode.get(), Opcode::FlashWrite.value());
        assert_eq!(command.address.get(), 0x1000);
        assert_eq!(command.length.get(), 6);
        assert_eq!(&frame[16..20], &data);
        assert_eq!(strip_crc_suffix(&frame[16..]).unwrap(), &data);
    }

    #[test]
    fn test_append_value_frame() {
        let frame = Request::OtpAppendValue {
            words: &[0x5000_00CC, 0x1],
        }
        .encode()
        .unwrap();
        let command = PayloadCommand::decode(&frame).unwrap();
        assert_eq!(command.header.som.get(), SOM_MAGIC);
        assert_eq!(command.header.opcode.get(), 5);
        assert_eq!(command.length.get(), 10);
        assert_eq!(&frame[12..20], &[0xCC, 0, 0, 0x50, 1, 0, 0, 0]);
        assert_eq!(frame.len(), 22);
    }

    #[test]
    fn test_no_payload_frames() {
        let init = Request::OtpInit.encode().unwrap();
        assert_eq!(init, [0x55, 0xAA, 0x55, 0xAA, 6, 0, 0, 0, 0, 0, 0, 0]);
        let read = Request::OtpReadConfig.encode().unwrap();
        assert_eq!(&read[4..8], &4u32.to_le_bytes());
        let erase = Request::FlashErase {
            address: 0x2000,
            length: 0x1000,
        }
        .encode()
        .unwrap();
        assert_eq!(erase.len(), 16);
        assert_eq!(&erase[4..8], &7u32.to_le_bytes());
    }

    #[test]
    fn test_response_validation() {
        let response = ResponseHeader {
            som: SOM_MAGIC.into(),
            opcode: Opcode::FlashRead.value().into(),
            status: 0u32.into(),
            length: 10u32.into(),
        };
        let mut buffer = [0u8; RESPONSE_HEADER_SIZE];
        assert_eq!(response.encode(&mut buffer).unwrap(), RESPONSE_HEADER_SIZE);
        let decoded = ResponseHeader::decode(&buffer).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.validate(Opcode::FlashRead).is_ok());
        assert_eq!(
            decoded.validate(Opcode::FlashWrite),
            Err(CodecError::UnexpectedOpcode {
                expected: Opcode::FlashWrite,
                received: 2
            })
        );

        buffer[0] = 0;
        let decoded = ResponseHeader::decode(&buffer).unwrap();
        assert_eq!(
            decoded.validate(Opcode::FlashRead),
            Err(CodecError::BadMagic(0xAA55_AA00))
        );
        assert_eq!(
            ResponseHeader::decode(&buffer[..15]),
            Err(CodecError::BufferTooShort)
        );
    }

    #[test]
    fn test_strip_crc_suffix() {
        let mut trailing = b"flash contents".to_vec();
        let crc = crc16_of(Crc16Variant::Framing, &trailing);
        trailing.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(strip_crc_suffix(&trailing).unwrap(), b"flash contents");

        trailing[0] ^= 0xFF;
        assert!(matches!(
            strip_crc_suffix(&trailing),
            Err(CodecError::CrcMismatch { .. })
        ));
        assert_eq!(strip_crc_suffix(&[0x12]), Err(CodecError::BufferTooShort));
    }

    #[test]
    fn test_opcode_values() {
        for value in 0..8 {
            assert_eq!(Opcode::try_from(value).unwrap().value(), value);
        }
        assert_eq!(Opcode::try_from(8), Err(8));
        assert_eq!(Opcode::FlashErase.to_string(), "FLASH_ERASE");
    }
}
