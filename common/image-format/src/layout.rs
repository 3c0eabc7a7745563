// Licensed under the Apache-2.0 license

//! Fixed-size sections of a secure-boot firmware image.
//!
//! ```text
//! 0x0000  product header + CRC16, zero filled up to 0x2000
//! 0x2000  firmware header
//!         security section
//!         signature section          (secure images only)
//!         administration section     (secure images only)
//!         padding
//! 0x2400  payload (firmware header start + 0x400)
//! ```
//!
//! All multi-byte fields are little endian. Section identifiers are stored
//! as two raw bytes.

use crate::crc::{crc16_of, Crc16Variant};
use crate::keys::{decode_revocations, encode_revocations, KeyError, KeySlot, RevocationEntry};
use core::mem::size_of;
use thiserror::Error;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const PRODUCT_HEADER_ID: [u8; 2] = *b"Pp";
pub const FLASH_CONFIG_ID: [u8; 2] = [0xAA, 0x11];
pub const FIRMWARE_HEADER_ID: [u8; 2] = *b"Qq";
pub const SECURITY_SECTION_ID: [u8; 2] = [0xAA, 0x22];
pub const SIGNATURE_SECTION_ID: [u8; 2] = [0xAA, 0x44];
pub const ADMINISTRATION_SECTION_ID: [u8; 2] = [0xAA, 0x55];

pub const PRODUCT_HEADER_REGION_SIZE: usize = 0x2000;
pub const FIRMWARE_HEADER_OFFSET: usize = PRODUCT_HEADER_REGION_SIZE;
/// Offset of the interrupt vector table inside the payload, which is also
/// the distance from the start of the firmware header to the payload.
pub const IVT_OFFSET: u32 = 0x400;
pub const PAYLOAD_OFFSET: usize = IVT_OFFSET as usize;

pub const VERSION_FIELD_LEN: usize = 16;
pub const MAX_VERSION_LEN: usize = VERSION_FIELD_LEN - 1;
pub const NONCE_LEN: usize = 8;
pub const SIGNATURE_LEN: usize = 64;

pub const PRODUCT_HEADER_SIZE: usize = size_of::<ProductHeader>();
pub const FIRMWARE_HEADER_SIZE: usize = size_of::<FirmwareHeader>();
pub const SECURITY_SECTION_SIZE: usize = size_of::<SecuritySection>();
pub const SIGNATURE_SECTION_SIZE: usize = size_of::<SignatureSection>();
pub const ADMINISTRATION_SECTION_SIZE: usize = size_of::<AdministrationSection>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Version string is {0} bytes long, at most 15 bytes are allowed")]
    VersionTooLong(usize),
    #[error("Image metadata takes {0} bytes and does not fit in front of the payload at offset 0x400")]
    MetadataOverflow(usize),
    #[error("{section} section length {length} does not fit in 16 bits")]
    SectionTooLong {
        section: &'static str,
        length: usize,
    },
    #[error("Flash configuration sequence of {0} bytes does not fit in the product header region")]
    FlashConfigTooLong(usize),
    #[error("Product header declares a {declared} byte flash configuration, {actual} bytes given")]
    FlashConfigLengthMismatch { declared: usize, actual: usize },
    #[error("Payload of {0} bytes does not fit in a 32-bit length")]
    PayloadTooLong(usize),
    #[error("Image truncated: {section} needs {needed} bytes at offset {offset}, image is {available} bytes")]
    Truncated {
        section: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Bad {section} identifier {found:02x?}")]
    BadIdentifier {
        section: &'static str,
        found: [u8; 2],
    },
    #[error("Product header CRC mismatch: stored 0x{stored:04x}, computed 0x{computed:04x}")]
    ProductHeaderCrc { stored: u16, computed: u16 },
    #[error("Signature section declares length {0}, expected 64")]
    BadSignatureLength(u16),
    #[error("Security section declares {declared} bytes but signature and administration sections take {actual}")]
    SecurityLengthMismatch { declared: usize, actual: usize },
    #[error("Bad revocation list: {0}")]
    Revocation(#[from] KeyError),
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct ProductHeader {
    pub identifier: [u8; 2],
    pub active_image_address: U32,
    pub update_image_address: U32,
    pub burst_cmd_a: U32,
    pub burst_cmd_b: U32,
    pub flash_config_id: [u8; 2],
    pub flash_config_length: U16,
}

impl ProductHeader {
    pub fn new(
        active_image_address: u32,
        update_image_address: u32,
        burst_cmd_a: u32,
        burst_cmd_b: u32,
        flash_config_length: usize,
    ) -> Result<Self, LayoutError> {
        // header, flash configuration and CRC16 must share the region
        if PRODUCT_HEADER_SIZE + flash_config_length + size_of::<u16>() > PRODUCT_HEADER_REGION_SIZE
        {
            return Err(LayoutError::FlashConfigTooLong(flash_config_length));
        }
        Ok(Self {
            identifier: PRODUCT_HEADER_ID,
            active_image_address: active_image_address.into(),
            update_image_address: update_image_address.into(),
            burst_cmd_a: burst_cmd_a.into(),
            burst_cmd_b: burst_cmd_b.into(),
            flash_config_id: FLASH_CONFIG_ID,
            flash_config_length: (flash_config_length as u16).into(),
        })
    }
}

/// Builds the full product header region: header, flash configuration
/// sequence, CRC16 over both, zero fill up to `PRODUCT_HEADER_REGION_SIZE`.
pub fn encode_product_header(
    header: &ProductHeader,
    flash_config: &[u8],
) -> Result<Vec<u8>, LayoutError> {
    let declared = header.flash_config_length.get() as usize;
    if declared != flash_config.len() {
        return Err(LayoutError::FlashConfigLengthMismatch {
            declared,
            actual: flash_config.len(),
        });
    }
    let mut region = Vec::with_capacity(PRODUCT_HEADER_REGION_SIZE);
    region.extend_from_slice(header.as_bytes());
    region.extend_from_slice(flash_config);
    if region.len() + size_of::<u16>() > PRODUCT_HEADER_REGION_SIZE {
        return Err(LayoutError::FlashConfigTooLong(flash_config.len()));
    }
    let crc = crc16_of(Crc16Variant::ProductHeader, &region);
    region.extend_from_slice(&crc.to_le_bytes());
    region.resize(PRODUCT_HEADER_REGION_SIZE, 0);
    Ok(region)
}

/// Parses and CRC-checks the product header region at the start of `image`.
pub fn decode_product_header(image: &[u8]) -> Result<(ProductHeader, &[u8]), LayoutError> {
    let header: ProductHeader = read_section(image, 0, "product header")?;
    if header.identifier != PRODUCT_HEADER_ID {
        return Err(LayoutError::BadIdentifier {
            section: "product header",
            found: header.identifier,
        });
    }
    if header.flash_config_id != FLASH_CONFIG_ID {
        return Err(LayoutError::BadIdentifier {
            section: "flash configuration",
            found: header.flash_config_id,
        });
    }
    let body_len = PRODUCT_HEADER_SIZE + header.flash_config_length.get() as usize;
    let crc_bytes: [u8; 2] = read_section(image, body_len, "product header CRC")?;
    let stored = u16::from_le_bytes(crc_bytes);
    let computed = crc16_of(Crc16Variant::ProductHeader, &image[..body_len]);
    if stored != computed {
        return Err(LayoutError::ProductHeaderCrc { stored, computed });
    }
    Ok((header, &image[PRODUCT_HEADER_SIZE..body_len]))
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct FirmwareHeader {
    pub identifier: [u8; 2],
    /// Plaintext payload length.
    pub length: U32,
    /// CRC32 of the payload as stored in the image (ciphertext for secure images).
    pub crc: U32,
    pub version: [u8; VERSION_FIELD_LEN],
    pub timestamp: U32,
    pub ivt_offset: U32,
}

impl FirmwareHeader {
    pub fn new(length: u32, crc: u32, version: [u8; VERSION_FIELD_LEN], timestamp: u32) -> Self {
        Self {
            identifier: FIRMWARE_HEADER_ID,
            length: length.into(),
            crc: crc.into(),
            version,
            timestamp: timestamp.into(),
            ivt_offset: IVT_OFFSET.into(),
        }
    }

    pub fn version_str(&self) -> String {
        let end = self
            .version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(VERSION_FIELD_LEN);
        String::from_utf8_lossy(&self.version[..end]).into_owned()
    }
}

/// Zero-pads `version` into the 16-byte header field, keeping a terminating zero.
pub fn encode_version(version: &str) -> Result<[u8; VERSION_FIELD_LEN], LayoutError> {
    let bytes = version.as_bytes();
    if bytes.len() > MAX_VERSION_LEN {
        return Err(LayoutError::VersionTooLong(bytes.len()));
    }
    let mut field = [0u8; VERSION_FIELD_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct SecuritySection {
    pub identifier: [u8; 2],
    /// Length of the signature and administration sections that follow.
    pub length: U16,
}

impl SecuritySection {
    pub fn new(length: usize) -> Result<Self, LayoutError> {
        Ok(Self {
            identifier: SECURITY_SECTION_ID,
            length: section_length("security", length)?.into(),
        })
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct SignatureSection {
    pub signature_slot: u8,
    pub decryption_slot: u8,
    pub nonce: [u8; NONCE_LEN],
    pub identifier: [u8; 2],
    pub length: U16,
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignatureSection {
    /// Section with a zero-filled signature placeholder.
    pub fn new(signature_slot: KeySlot, decryption_slot: KeySlot, nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            signature_slot: signature_slot.index(),
            decryption_slot: decryption_slot.index(),
            nonce,
            identifier: SIGNATURE_SECTION_ID,
            length: (SIGNATURE_LEN as u16).into(),
            signature: [0; SIGNATURE_LEN],
        }
    }
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct AdministrationSection {
    pub identifier: [u8; 2],
    /// Length of the revocation records that follow.
    pub length: U16,
}

/// Encodes the administration section: header followed by the revocation
/// records. An empty list yields a bare header with length 0.
pub fn administration_section(entries: &[RevocationEntry]) -> Result<Vec<u8>, LayoutError> {
    let records = encode_revocations(entries);
    let header = AdministrationSection {
        identifier: ADMINISTRATION_SECTION_ID,
        length: section_length("administration", records.len())?.into(),
    };
    let mut section = header.as_bytes().to_vec();
    section.extend_from_slice(&records);
    Ok(section)
}

/// Number of padding bytes between the last metadata section and the
/// payload, so that the payload starts `PAYLOAD_OFFSET` bytes after the
/// firmware header.
pub fn metadata_padding(
    security_len: usize,
    signature_len: usize,
    administration_len: usize,
) -> Result<usize, LayoutError> {
    let metadata = FIRMWARE_HEADER_SIZE + security_len + signature_len + administration_len;
    PAYLOAD_OFFSET
        .checked_sub(metadata)
        .ok_or(LayoutError::MetadataOverflow(metadata))
}

fn section_length(section: &'static str, length: usize) -> Result<u16, LayoutError> {
    u16::try_from(length).map_err(|_| LayoutError::SectionTooLong { section, length })
}

fn read_section<T: FromBytes>(
    image: &[u8],
    offset: usize,
    section: &'static str,
) -> Result<T, LayoutError> {
    image
        .get(offset..)
        .and_then(|bytes| T::read_from_prefix(bytes).ok())
        .map(|(value, _)| value)
        .ok_or(LayoutError::Truncated {
            section,
            offset,
            needed: size_of::<T>(),
            available: image.len(),
        })
}

/// A parsed view over a complete image.
#[derive(Debug)]
pub struct ImageView<'a> {
    pub product_header: ProductHeader,
    pub flash_config: &'a [u8],
    pub firmware_header: FirmwareHeader,
    pub security: SecuritySection,
    pub signature: Option<SignatureSection>,
    pub revocations: Vec<RevocationEntry>,
    /// Administration section, padding and payload; empty for non-secure images.
    pub signed_region: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> ImageView<'a> {
    pub fn parse(image: &'a [u8]) -> Result<Self, LayoutError> {
        let (product_header, flash_config) = decode_product_header(image)?;

        let mut offset = FIRMWARE_HEADER_OFFSET;
        let firmware_header: FirmwareHeader = read_section(image, offset, "firmware header")?;
        if firmware_header.identifier != FIRMWARE_HEADER_ID {
            return Err(LayoutError::BadIdentifier {
                section: "firmware header",
                found: firmware_header.identifier,
            });
        }
        offset += FIRMWARE_HEADER_SIZE;

        let security: SecuritySection = read_section(image, offset, "security section")?;
        if security.identifier != SECURITY_SECTION_ID {
            return Err(LayoutError::BadIdentifier {
                section: "security section",
                found: security.identifier,
            });
        }
        offset += SECURITY_SECTION_SIZE;

        let payload_start = FIRMWARE_HEADER_OFFSET + PAYLOAD_OFFSET;
        let payload_len = firmware_header.length.get() as usize;
        let payload_end = payload_start + payload_len;
        if image.len() < payload_end {
            return Err(LayoutError::Truncated {
                section: "payload",
                offset: payload_start,
                needed: payload_len,
                available: image.len(),
            });
        }
        let payload = &image[payload_start..payload_end];

        let signature = if security.length.get() == 0 {
            None
        } else {
            let signature: SignatureSection = read_section(image, offset, "signature section")?;
            if signature.identifier != SIGNATURE_SECTION_ID {
                return Err(LayoutError::BadIdentifier {
                    section: "signature section",
                    found: signature.identifier,
                });
            }
            if signature.length.get() as usize != SIGNATURE_LEN {
                return Err(LayoutError::BadSignatureLength(signature.length.get()));
            }
            offset += SIGNATURE_SECTION_SIZE;
            Some(signature)
        };

        let admin_start = offset;
        let admin: AdministrationSection =
            read_section(image, offset, "administration section")?;
        if admin.identifier != ADMINISTRATION_SECTION_ID {
            return Err(LayoutError::BadIdentifier {
                section: "administration section",
                found: admin.identifier,
            });
        }
        offset += ADMINISTRATION_SECTION_SIZE;
        let records_len = admin.length.get() as usize;
        if signature.is_some() {
            let actual = SIGNATURE_SECTION_SIZE + ADMINISTRATION_SECTION_SIZE + records_len;
            if security.length.get() as usize != actual {
                return Err(LayoutError::SecurityLengthMismatch {
                    declared: security.length.get() as usize,
                    actual,
                });
            }
        }
        if offset + records_len > payload_start {
            return Err(LayoutError::MetadataOverflow(
                offset + records_len - FIRMWARE_HEADER_OFFSET,
            ));
        }
        let revocations = decode_revocations(&image[offset..offset + records_len])?;

        // only secure images carry a signed region
        let signed_region: &[u8] = match signature {
            Some(_) => &image[admin_start..payload_end],
            None => &[],
        };

        Ok(Self {
            product_header,
            flash_config,
            firmware_header,
            security,
            signature,
            revocations,
            signed_region,
            payload,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.signature.is_some()
    }
}
