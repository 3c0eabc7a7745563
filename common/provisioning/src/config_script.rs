// Licensed under the Apache-2.0 license

//! Entries of the OTP configuration script, encoded as 32-bit words.

use crate::codec::CodecError;
use bitflags::bitflags;
use image_format::RevocationEntry;

/// Register holding the secure boot and OTP lock bits.
pub const SECURE_BOOT_REGISTER: u32 = 0x5000_00CC;
pub const DISABLE_DEVELOPMENT_MODE: u32 = 0x7000_0000;
pub const REVOCATION_COMMAND: u32 = 0x8000_0000;
pub const TRIM_COMMAND: u32 = 0x9000_0000;
pub const END_OF_SCRIPT: u32 = 0x0000_0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecureBootFlags: u32 {
        const ENABLE_SECURE_BOOT = 0x01;
        const DISABLE_SWD_DEBUGGER = 0x02;
        const DISABLE_CMAC_DEBUGGER = 0x04;
        const LOCK_SIGNATURE_KEY_WRITE = 0x08;
        const LOCK_USER_KEY_WRITE = 0x10;
        const LOCK_USER_KEY_READ = 0x20;
        const LOCK_QSPI_KEY_WRITE = 0x40;
        const LOCK_QSPI_KEY_READ = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEntry {
    /// Write `value` to the register at `address` during boot.
    Register { address: u32, value: u32 },
    /// Trim values for the block identified by `id`.
    Trim { id: u8, values: Vec<u32> },
    DisableDevelopmentMode,
    SecureBoot(SecureBootFlags),
    Revocation(RevocationEntry),
    EndOfScript,
}

impl ConfigEntry {
    pub fn words(&self) -> Result<Vec<u32>, CodecError> {
        let words = match self {
            ConfigEntry::Register { address, value } => vec![*address, *value],
            ConfigEntry::Trim { id, values } => {
                let count = u8::try_from(values.len())
                    .map_err(|_| CodecError::TooManyTrimValues(values.len()))?;
                let mut words = Vec::with_capacity(values.len() + 1);
                words.push(TRIM_COMMAND + ((count as u32) << 8) + *id as u32);
                words.extend_from_slice(values);
                words
            }
            ConfigEntry::DisableDevelopmentMode => vec![DISABLE_DEVELOPMENT_MODE],
            ConfigEntry::SecureBoot(flags) => vec![SECURE_BOOT_REGISTER, flags.bits()],
            ConfigEntry::Revocation(entry) => vec![
                REVOCATION_COMMAND
                    | ((entry.key_type.tag() as u32) << 8)
                    | entry.slot.index() as u32,
            ],
            ConfigEntry::EndOfScript => vec![END_OF_SCRIPT],
        };
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_format::{KeySlot, KeyType};

    #[test]
    fn test_register_entry() {
        let entry = ConfigEntry::Register {
            address: 0x5000_0010,
            value: 0x1234,
        };
        assert_eq!(entry.words().unwrap(), [0x5000_0010, 0x1234]);
    }

    #[test]
    fn test_trim_entry() {
        let entry = ConfigEntry::Trim {
            id: 3,
            values: vec![0xAAAA, 0xBBBB],
        };
        assert_eq!(entry.words().unwrap(), [0x9000_0203, 0xAAAA, 0xBBBB]);

        let entry = ConfigEntry::Trim {
            id: 0,
            values: vec![0; 256],
        };
        assert_eq!(entry.words(), Err(CodecError::TooManyTrimValues(256)));
    }

    #[test]
    fn test_fixed_entries() {
        assert_eq!(
            ConfigEntry::DisableDevelopmentMode.words().unwrap(),
            [0x7000_0000]
        );
        assert_eq!(
            ConfigEntry::SecureBoot(SecureBootFlags::ENABLE_SECURE_BOOT)
                .words()
                .unwrap(),
            [0x5000_00CC, 0x1]
        );
        assert_eq!(
            ConfigEntry::SecureBoot(SecureBootFlags::LOCK_QSPI_KEY_READ)
                .words()
                .unwrap(),
            [0x5000_00CC, 0x80]
        );
        assert_eq!(ConfigEntry::EndOfScript.words().unwrap(), [0]);
    }

    #[test]
    fn test_revocation_entry() {
        let entry = ConfigEntry::Revocation(RevocationEntry::new(
            KeyType::UserData,
            KeySlot::new(4).unwrap(),
        ));
        assert_eq!(entry.words().unwrap(), [0x8000_A204]);
    }
}
