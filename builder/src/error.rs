// Licensed under the Apache-2.0 license

use image_format::{KeyError, LayoutError};
use thiserror::Error;

/// Errors raised while validating build inputs, assembling or verifying an image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("AES key must be 16 bytes, got {0}")]
    AesKeyLength(usize),
    #[error("Ed25519 key must be 32 bytes, got {0}")]
    Ed25519KeyLength(usize),
    #[error("Invalid Ed25519 public key")]
    InvalidVerifyingKey,
    #[error("An encryption key was given without a signing key; secure images need both")]
    MissingSigningKey,
    #[error("A signing key was given without an encryption key; secure images need both")]
    MissingEncryptionKey,
    #[error("Payload starts {actual} bytes after the firmware header, expected {expected}")]
    PayloadOffset { expected: usize, actual: usize },
    #[error("Payload CRC mismatch: header says 0x{stored:08x}, computed 0x{computed:08x}")]
    PayloadCrc { stored: u32, computed: u32 },
    #[error("Image signature does not verify")]
    BadSignature,
    #[error("Decrypted payload does not match the nonce in the signature section")]
    NonceMismatch,
}
