// Licensed under the Apache-2.0 license

use anyhow::{anyhow, Result};
use image_format::{encode_product_header, LayoutError, ProductHeader};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_ACTIVE_IMAGE_ADDRESS: u32 = 0x2000;
pub const DEFAULT_UPDATE_IMAGE_ADDRESS: u32 = 0x2000;
/// QSPI controller burst command A for the reference board flash.
pub const DEFAULT_BURST_CMD_A: u32 = 0xA8A5_00EB;
pub const DEFAULT_BURST_CMD_B: u32 = 0x66;
pub const DEFAULT_FLASH_CONFIG: [u8; 3] = [0x01, 0x40, 0x07];

/// Product header values, overridable from a TOML file.
///
/// ```toml
/// active_image_address = 0x2000
/// update_image_address = 0x2000
/// burst_cmd_a = 0xA8A500EB
/// burst_cmd_b = 0x66
/// flash_config = [0x01, 0x40, 0x07]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProductHeaderConfig {
    pub active_image_address: u32,
    pub update_image_address: u32,
    pub burst_cmd_a: u32,
    pub burst_cmd_b: u32,
    pub flash_config: Vec<u8>,
}

impl Default for ProductHeaderConfig {
    fn default() -> Self {
        Self {
            active_image_address: DEFAULT_ACTIVE_IMAGE_ADDRESS,
            update_image_address: DEFAULT_UPDATE_IMAGE_ADDRESS,
            burst_cmd_a: DEFAULT_BURST_CMD_A,
            burst_cmd_b: DEFAULT_BURST_CMD_B,
            flash_config: DEFAULT_FLASH_CONFIG.to_vec(),
        }
    }
}

impl ProductHeaderConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow!("Invalid product header config: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Unable to read {}: {}", path.display(), e))?;
        Self::parse(&text)
    }

    pub fn header(&self) -> Result<ProductHeader, LayoutError> {
        ProductHeader::new(
            self.active_image_address,
            self.update_image_address,
            self.burst_cmd_a,
            self.burst_cmd_b,
            self.flash_config.len(),
        )
    }

    /// Encodes the complete product header region, CRC and zero fill included.
    pub fn encode(&self) -> Result<Vec<u8>, LayoutError> {
        encode_product_header(&self.header()?, &self.flash_config)
    }
}
