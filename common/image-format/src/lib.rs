// Licensed under the Apache-2.0 license

//! Binary layout of secure-boot firmware images, the CRC variants that
//! protect them, and OTP key slot / revocation encoding.

pub mod crc;
pub mod keys;
pub mod layout;

pub use crate::crc::{crc16, crc16_of, crc32, Crc16Variant};
pub use keys::{
    decode_revocations, encode_revocations, KeyError, KeySlot, KeyType, OtpSegment,
    RevocationEntry, RevocationRecord, KEY_SLOT_COUNT,
};
pub use layout::*;
