// Licensed under the Apache-2.0 license

use crate::crypto::{protect_payload, SecureBootKeys};
use crate::error::ImageError;
use crate::product_header::ProductHeaderConfig;
use anyhow::{anyhow, Result};
use image_format::{
    encode_version, FirmwareHeader, LayoutError, RevocationEntry, FIRMWARE_HEADER_OFFSET,
    FIRMWARE_HEADER_SIZE, PAYLOAD_OFFSET,
};
use log::{debug, info};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zerocopy::IntoBytes;

/// Per-build inputs of the image assembler.
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    pub version: String,
    /// Seconds since the Unix epoch, stored in the firmware header.
    pub timestamp: u32,
    pub product_header: ProductHeaderConfig,
    /// `None` builds a non-secure image.
    pub keys: Option<SecureBootKeys>,
    pub revocations: Vec<RevocationEntry>,
}

/// A fully assembled image, ready to be written to flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

impl FirmwareImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)
            .map_err(|e| anyhow!("Unable to create file {}: {}", path.display(), e))?;
        file.write_all(&self.bytes)
            .map_err(|e| anyhow!("Unable to write file {}: {}", path.display(), e))?;
        Ok(())
    }
}

/// Assembles product header, firmware header, security metadata, padding
/// and payload into one image.
pub fn build_image(payload: &[u8], config: &ImageConfig) -> Result<FirmwareImage, ImageError> {
    let version = encode_version(&config.version)?;
    let length =
        u32::try_from(payload.len()).map_err(|_| LayoutError::PayloadTooLong(payload.len()))?;

    let mut bytes = config.product_header.encode()?;

    let protected = protect_payload(payload, config.keys.as_ref(), &config.revocations)?;
    let firmware_header = FirmwareHeader::new(length, protected.crc, version, config.timestamp);

    bytes.extend_from_slice(firmware_header.as_bytes());
    bytes.extend_from_slice(&protected.metadata);
    bytes.resize(bytes.len() + protected.padding, 0);

    let actual = bytes.len() - FIRMWARE_HEADER_OFFSET;
    if actual != PAYLOAD_OFFSET {
        return Err(ImageError::PayloadOffset {
            expected: PAYLOAD_OFFSET,
            actual,
        });
    }
    bytes.extend_from_slice(&protected.payload);

    debug!(
        "Metadata {} bytes, padding {} bytes",
        FIRMWARE_HEADER_SIZE + protected.metadata.len(),
        protected.padding
    );
    info!(
        "Built {} image: version '{}', payload {} bytes, crc32 0x{:08x}, {} revocation(s)",
        if config.keys.is_some() {
            "secure"
        } else {
            "non-secure"
        },
        config.version,
        payload.len(),
        protected.crc,
        config.revocations.len()
    );
    Ok(FirmwareImage { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_format::{ImageView, PRODUCT_HEADER_REGION_SIZE};

    #[test]
    fn test_non_secure_layout() {
        let config = ImageConfig {
            version: "1.0".to_string(),
            timestamp: 1234,
            ..Default::default()
        };
        let payload = [0x5Au8; 100];
        let image = build_image(&payload, &config).unwrap();
        assert_eq!(
            image.len(),
            PRODUCT_HEADER_REGION_SIZE + PAYLOAD_OFFSET + payload.len()
        );

        let view = ImageView::parse(image.as_bytes()).unwrap();
        assert_eq!(view.firmware_header.length.get(), 100);
        assert_eq!(view.firmware_header.timestamp.get(), 1234);
        assert_eq!(view.firmware_header.version_str(), "1.0");
        assert_eq!(view.security.length.get(), 0);
        assert!(!view.is_secure());
        assert_eq!(view.payload, payload);
    }

    #[test]
    fn test_version_too_long() {
        let config = ImageConfig {
            version: "0123456789abcdef".to_string(),
            ..Default::default()
        };
        assert_eq!(
            build_image(b"fw", &config).unwrap_err(),
            ImageError::Layout(LayoutError::VersionTooLong(16))
        );
    }

    #[test]
    fn test_write_to_file() {
        let image = build_image(b"firmware", &ImageConfig::default()).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        image.write_to_file(file.path()).unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), image.as_bytes());
    }
}
