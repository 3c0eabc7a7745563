// Licensed under the Apache-2.0 license

//! CRC16 (polynomial 0x1021, MSB first) and CRC32 (IEEE) routines.
//!
//! The boot ROM and the provisioning firmware do not agree on the CRC16
//! initial register value, so each call site names the variant it expects.

use crc::{Crc, CRC_16_IBM_3740, CRC_16_XMODEM};

static PRODUCT_HEADER_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
static FRAMING_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crc16Variant {
    /// Initial register value 0xFFFF, checked by the boot ROM over the product header.
    ProductHeader,
    /// Initial register value 0, used for provisioning payloads and flash transfers.
    Framing,
}

impl Crc16Variant {
    pub const fn initial_value(self) -> u16 {
        match self {
            Crc16Variant::ProductHeader => 0xFFFF,
            Crc16Variant::Framing => 0x0000,
        }
    }

    fn engine(self) -> &'static Crc<u16> {
        match self {
            Crc16Variant::ProductHeader => &PRODUCT_HEADER_CRC,
            Crc16Variant::Framing => &FRAMING_CRC,
        }
    }
}

/// CRC16 over `data[offset..offset + length]`.
///
/// Returns 0 for an empty range or when the range does not fit in `data`.
pub fn crc16(variant: Crc16Variant, data: &[u8], offset: usize, length: usize) -> u16 {
    if length == 0 {
        return 0;
    }
    let Some(range) = offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
    else {
        return 0;
    };
    variant.engine().checksum(range)
}

/// CRC16 over the whole of `data`.
pub fn crc16_of(variant: Crc16Variant, data: &[u8]) -> u16 {
    crc16(variant, data, 0, data.len())
}

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    fn bitwise_crc16(init: u16, data: &[u8]) -> u16 {
        let mut crc = init;
        for byte in data {
            crc ^= (*byte as u16) << 8;
            for _ in 0..8 {
                if crc & 0x8000 != 0 {
                    crc = (crc << 1) ^ 0x1021;
                } else {
                    crc <<= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn test_crc16_reference_values() {
        assert_eq!(crc16_of(Crc16Variant::Framing, CHECK), 0x31C3);
        assert_eq!(crc16_of(Crc16Variant::ProductHeader, CHECK), 0x29B1);
    }

    #[test]
    fn test_crc16_matches_bitwise_register() {
        let data: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        for variant in [Crc16Variant::ProductHeader, Crc16Variant::Framing] {
            assert_eq!(
                crc16_of(variant, &data),
                bitwise_crc16(variant.initial_value(), &data)
            );
        }
    }

    #[test]
    fn test_crc16_sub_range() {
        let data = b"xx123456789yy";
        assert_eq!(crc16(Crc16Variant::Framing, data, 2, 9), 0x31C3);
    }

    #[test]
    fn test_crc16_empty_and_out_of_bounds() {
        assert_eq!(crc16(Crc16Variant::ProductHeader, CHECK, 0, 0), 0);
        assert_eq!(crc16(Crc16Variant::Framing, &[], 0, 0), 0);
        assert_eq!(crc16(Crc16Variant::Framing, CHECK, 5, 5), 0);
        assert_eq!(crc16(Crc16Variant::Framing, CHECK, 20, 1), 0);
        assert_eq!(crc16(Crc16Variant::Framing, CHECK, usize::MAX, 2), 0);
    }

    #[test]
    fn test_crc32_reference_value() {
        assert_eq!(crc32(CHECK), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }
}
