// Licensed under the Apache-2.0 license

//! Digest, nonce derivation, payload encryption and signing, applied in the
//! order the boot ROM checks them.

use crate::error::ImageError;
use aes::cipher::{KeyIvInit, StreamCipher};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use image_format::{
    administration_section, crc32, metadata_padding, KeySlot, RevocationEntry, SecuritySection,
    SignatureSection, NONCE_LEN, SECURITY_SECTION_SIZE, SIGNATURE_SECTION_SIZE,
};
use log::debug;
use sha2::{Digest, Sha256};
use zerocopy::IntoBytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const AES_KEY_LEN: usize = 16;
pub const IV_LEN: usize = 16;
pub const DIGEST_LEN: usize = 32;
pub const ED25519_KEY_LEN: usize = ed25519_dalek::SECRET_KEY_LENGTH;

/// AES-128 in counter mode with a 128-bit big-endian counter.
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; AES_KEY_LEN]);

impl AesKey {
    pub fn new(key: [u8; AES_KEY_LEN]) -> Self {
        Self(key)
    }

    pub fn from_slice(key: &[u8]) -> Result<Self, ImageError> {
        let key: [u8; AES_KEY_LEN] = key
            .try_into()
            .map_err(|_| ImageError::AesKeyLength(key.len()))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LEN] {
        &self.0
    }
}

impl core::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

pub fn signing_key_from_slice(key: &[u8]) -> Result<SigningKey, ImageError> {
    let seed: [u8; ED25519_KEY_LEN] = key
        .try_into()
        .map_err(|_| ImageError::Ed25519KeyLength(key.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn verifying_key_from_slice(key: &[u8]) -> Result<VerifyingKey, ImageError> {
    let bytes: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = key
        .try_into()
        .map_err(|_| ImageError::Ed25519KeyLength(key.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| ImageError::InvalidVerifyingKey)
}

/// Everything a secure image needs: both keys and the OTP slots the device
/// will look them up in.
#[derive(Debug, Clone)]
pub struct SecureBootKeys {
    pub aes_key: AesKey,
    pub signing_key: SigningKey,
    pub signature_slot: KeySlot,
    pub decryption_slot: KeySlot,
}

impl SecureBootKeys {
    /// Pairs the optional keys given on the command line. Encryption and
    /// signing always go together.
    pub fn pair(
        aes_key: Option<AesKey>,
        signing_key: Option<SigningKey>,
        signature_slot: KeySlot,
        decryption_slot: KeySlot,
    ) -> Result<Option<Self>, ImageError> {
        match (aes_key, signing_key) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ImageError::MissingSigningKey),
            (None, Some(_)) => Err(ImageError::MissingEncryptionKey),
            (Some(aes_key), Some(signing_key)) => Ok(Some(Self {
                aes_key,
                signing_key,
                signature_slot,
                decryption_slot,
            })),
        }
    }
}

pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// IV used by the boot ROM: the first 8 digest bytes, then a zero counter.
pub fn derive_iv(digest: &[u8; DIGEST_LEN]) -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv[..NONCE_LEN].copy_from_slice(&digest[..NONCE_LEN]);
    iv
}

pub fn iv_from_nonce(nonce: &[u8; NONCE_LEN]) -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv[..NONCE_LEN].copy_from_slice(nonce);
    iv
}

/// Runs the CTR keystream over `data` in place. Encrypts and decrypts.
pub fn apply_keystream(key: &AesKey, iv: &[u8; IV_LEN], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.as_bytes().into(), iv.into());
    cipher.apply_keystream(data);
}

pub fn decrypt_payload(key: &AesKey, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Vec<u8> {
    let mut plaintext = ciphertext.to_vec();
    apply_keystream(key, iv, &mut plaintext);
    plaintext
}

/// Payload and metadata produced by the pipeline, ready for assembly.
#[derive(Debug, Clone)]
pub struct ProtectedPayload {
    /// Ciphertext for secure images, plaintext otherwise.
    pub payload: Vec<u8>,
    /// CRC32 of `payload`.
    pub crc: u32,
    /// Security section, the signature section for secure images, then the
    /// administration section.
    pub metadata: Vec<u8>,
    pub padding: usize,
    pub iv: Option<[u8; IV_LEN]>,
}

/// Encrypts and signs `plaintext` when `keys` are given, otherwise only
/// checksums it.
pub fn protect_payload(
    plaintext: &[u8],
    keys: Option<&SecureBootKeys>,
    revocations: &[RevocationEntry],
) -> Result<ProtectedPayload, ImageError> {
    let administration = administration_section(revocations)?;

    let Some(keys) = keys else {
        let padding = metadata_padding(SECURITY_SECTION_SIZE, 0, administration.len())?;
        let mut metadata = SecuritySection::new(0)?.as_bytes().to_vec();
        metadata.extend_from_slice(&administration);
        return Ok(ProtectedPayload {
            payload: plaintext.to_vec(),
            crc: crc32(plaintext),
            metadata,
            padding,
            iv: None,
        });
    };

    let padding = metadata_padding(
        SECURITY_SECTION_SIZE,
        SIGNATURE_SECTION_SIZE,
        administration.len(),
    )?;
    let security = SecuritySection::new(SIGNATURE_SECTION_SIZE + administration.len())?;

    let iv = derive_iv(&digest(plaintext));
    let mut payload = plaintext.to_vec();
    apply_keystream(&keys.aes_key, &iv, &mut payload);
    let crc = crc32(&payload);

    let mut signed = Vec::with_capacity(administration.len() + padding + payload.len());
    signed.extend_from_slice(&administration);
    signed.resize(administration.len() + padding, 0);
    signed.extend_from_slice(&payload);
    let signature: Signature = keys.signing_key.sign(&signed);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&iv[..NONCE_LEN]);
    let mut signature_section =
        SignatureSection::new(keys.signature_slot, keys.decryption_slot, nonce);
    signature_section.signature = signature.to_bytes();
    debug!(
        "Signed {} bytes (administration {}, padding {}, ciphertext {})",
        signed.len(),
        administration.len(),
        padding,
        payload.len()
    );

    let mut metadata = security.as_bytes().to_vec();
    metadata.extend_from_slice(signature_section.as_bytes());
    metadata.extend_from_slice(&administration);

    Ok(ProtectedPayload {
        payload,
        crc,
        metadata,
        padding,
        iv: Some(iv),
    })
}
