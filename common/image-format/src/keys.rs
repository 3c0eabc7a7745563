// Licensed under the Apache-2.0 license

use core::fmt;
use core::str::FromStr;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of key slots in each OTP key segment.
pub const KEY_SLOT_COUNT: u8 = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Slot value has to be between 0 and 7, got {0}")]
    SlotOutOfRange(u64),
    #[error("Invalid slot value '{0}'")]
    InvalidSlot(String),
    #[error("Unknown key type '{0}', expected signature, user or qspi")]
    UnknownKeyType(String),
    #[error("Unknown key type tag 0x{0:02x}")]
    UnknownKeyTypeTag(u8),
    #[error("Malformed revocation entry '{0}', expected <type>:<slot>")]
    MalformedRevocation(String),
    #[error("Revocation list of {0} bytes is not a whole number of entries")]
    TruncatedRevocationList(usize),
    #[error("Unknown OTP segment '{0}', expected signature, data or qspi")]
    UnknownSegment(String),
}

/// Index of a key slot inside one OTP key segment, always in `0..8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeySlot(u8);

impl KeySlot {
    pub fn new(index: u8) -> Result<Self, KeyError> {
        if index < KEY_SLOT_COUNT {
            Ok(Self(index))
        } else {
            Err(KeyError::SlotOutOfRange(index as u64))
        }
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for KeySlot {
    type Error = KeyError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl FromStr for KeySlot {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| KeyError::InvalidSlot(s.to_string()))?;
        if value >= KEY_SLOT_COUNT as u64 {
            return Err(KeyError::SlotOutOfRange(value));
        }
        Ok(Self(value as u8))
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key categories as tagged in the administration section.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Signature = 0xA1,
    UserData = 0xA2,
    Qspi = 0xA3,
}

impl KeyType {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, KeyError> {
        match tag {
            0xA1 => Ok(KeyType::Signature),
            0xA2 => Ok(KeyType::UserData),
            0xA3 => Ok(KeyType::Qspi),
            other => Err(KeyError::UnknownKeyTypeTag(other)),
        }
    }

    /// OTP segment the key of this type is stored in.
    pub const fn segment(self) -> OtpSegment {
        match self {
            KeyType::Signature => OtpSegment::Signature,
            KeyType::UserData => OtpSegment::UserData,
            KeyType::Qspi => OtpSegment::Qspi,
        }
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signature" | "sig" => Ok(KeyType::Signature),
            "user" | "data" => Ok(KeyType::UserData),
            "qspi" | "device" => Ok(KeyType::Qspi),
            _ => Err(KeyError::UnknownKeyType(s.to_string())),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Signature => "signature",
            KeyType::UserData => "user",
            KeyType::Qspi => "qspi",
        };
        f.write_str(name)
    }
}

/// OTP key segments, numbered as the provisioning firmware expects them.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpSegment {
    Signature = 0,
    UserData = 1,
    Qspi = 2,
}

impl OtpSegment {
    pub const fn id(self) -> u32 {
        self as u32
    }
}

impl FromStr for OtpSegment {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signature" => Ok(OtpSegment::Signature),
            "data" | "user" => Ok(OtpSegment::UserData),
            "qspi" => Ok(OtpSegment::Qspi),
            _ => Err(KeyError::UnknownSegment(s.to_string())),
        }
    }
}

/// On-image encoding of one revocation entry.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct RevocationRecord {
    pub key_type: u8,
    pub index: u8,
}

/// A previously provisioned key that must no longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevocationEntry {
    pub key_type: KeyType,
    pub slot: KeySlot,
}

impl RevocationEntry {
    pub fn new(key_type: KeyType, slot: KeySlot) -> Self {
        Self { key_type, slot }
    }

    pub fn from_record(record: &RevocationRecord) -> Result<Self, KeyError> {
        Ok(Self {
            key_type: KeyType::from_tag(record.key_type)?,
            slot: KeySlot::new(record.index)?,
        })
    }

    pub fn to_record(self) -> RevocationRecord {
        RevocationRecord {
            key_type: self.key_type.tag(),
            index: self.slot.index(),
        }
    }
}

impl FromStr for RevocationEntry {
    type Err = KeyError;

    /// Parses `<type>:<slot>`, e.g. `signature:3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key_type, slot) = s
            .split_once(':')
            .ok_or_else(|| KeyError::MalformedRevocation(s.to_string()))?;
        if key_type.trim().is_empty() || slot.trim().is_empty() {
            return Err(KeyError::MalformedRevocation(s.to_string()));
        }
        Ok(Self {
            key_type: key_type.parse()?,
            slot: slot.parse()?,
        })
    }
}

impl fmt::Display for RevocationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type, self.slot)
    }
}

/// Encodes revocation entries as consecutive (key-type tag, slot index) byte pairs.
pub fn encode_revocations(entries: &[RevocationEntry]) -> Vec<u8> {
    entries
        .iter()
        .flat_map(|entry| {
            let record = entry.to_record();
            [record.key_type, record.index]
        })
        .collect()
}

pub fn decode_revocations(bytes: &[u8]) -> Result<Vec<RevocationEntry>, KeyError> {
    let records = <[RevocationRecord]>::ref_from_bytes(bytes)
        .map_err(|_| KeyError::TruncatedRevocationList(bytes.len()))?;
    records.iter().map(RevocationEntry::from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range() {
        for index in 0..KEY_SLOT_COUNT {
            assert_eq!(KeySlot::new(index).unwrap().index(), index);
        }
        assert_eq!(KeySlot::new(8), Err(KeyError::SlotOutOfRange(8)));
        assert_eq!("9".parse::<KeySlot>(), Err(KeyError::SlotOutOfRange(9)));
        assert!(matches!(
            "-1".parse::<KeySlot>(),
            Err(KeyError::InvalidSlot(_))
        ));
    }

    #[test]
    fn test_parse_revocation_entry() {
        let entry: RevocationEntry = "signature:3".parse().unwrap();
        assert_eq!(entry.key_type, KeyType::Signature);
        assert_eq!(entry.slot.index(), 3);

        let entry: RevocationEntry = "QSPI:7".parse().unwrap();
        assert_eq!(entry.key_type, KeyType::Qspi);
        assert_eq!(entry.to_string(), "qspi:7");

        assert!(matches!(
            "signature".parse::<RevocationEntry>(),
            Err(KeyError::MalformedRevocation(_))
        ));
        assert!(matches!(
            "signature:".parse::<RevocationEntry>(),
            Err(KeyError::MalformedRevocation(_))
        ));
        assert!(matches!(
            "bogus:1".parse::<RevocationEntry>(),
            Err(KeyError::UnknownKeyType(_))
        ));
        assert_eq!(
            "user:8".parse::<RevocationEntry>(),
            Err(KeyError::SlotOutOfRange(8))
        );
    }

    #[test]
    fn test_revocation_round_trip_keeps_order() {
        let entries = vec![
            RevocationEntry::new(KeyType::Qspi, KeySlot::new(2).unwrap()),
            RevocationEntry::new(KeyType::Signature, KeySlot::new(0).unwrap()),
            RevocationEntry::new(KeyType::UserData, KeySlot::new(7).unwrap()),
            RevocationEntry::new(KeyType::Signature, KeySlot::new(5).unwrap()),
        ];
        let encoded = encode_revocations(&entries);
        assert_eq!(encoded, [0xA3, 2, 0xA1, 0, 0xA2, 7, 0xA1, 5]);
        assert_eq!(decode_revocations(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_empty_revocation_list() {
        assert!(encode_revocations(&[]).is_empty());
        assert!(decode_revocations(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        assert_eq!(
            decode_revocations(&[0xA1, 1, 0xA2]),
            Err(KeyError::TruncatedRevocationList(3))
        );
        assert_eq!(
            decode_revocations(&[0xB0, 1]),
            Err(KeyError::UnknownKeyTypeTag(0xB0))
        );
        assert_eq!(
            decode_revocations(&[0xA1, 9]),
            Err(KeyError::SlotOutOfRange(9))
        );
    }

    #[test]
    fn test_segment_names() {
        assert_eq!("signature".parse::<OtpSegment>().unwrap().id(), 0);
        assert_eq!("data".parse::<OtpSegment>().unwrap().id(), 1);
        assert_eq!("qspi".parse::<OtpSegment>().unwrap().id(), 2);
        assert!("flash".parse::<OtpSegment>().is_err());
        assert_eq!(KeyType::UserData.segment(), OtpSegment::UserData);
    }
}
