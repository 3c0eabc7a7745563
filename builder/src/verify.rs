// Licensed under the Apache-2.0 license

use crate::crypto::{decrypt_payload, derive_iv, digest, iv_from_nonce, AesKey};
use crate::error::ImageError;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use image_format::{crc32, ImageView, RevocationEntry, NONCE_LEN};
use log::{debug, info};

/// Result of a successful image check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub version: String,
    pub timestamp: u32,
    pub payload_len: usize,
    pub payload_crc: u32,
    pub secure: bool,
    pub revocations: Vec<RevocationEntry>,
    /// Whether the signature was checked against a supplied public key.
    pub signature_checked: bool,
    /// Decrypted payload, when an AES key was supplied for a secure image.
    pub plaintext: Option<Vec<u8>>,
}

/// Parses `image` and checks every integrity field it carries. The
/// signature and the nonce are only checked when the matching key is given.
pub fn verify_image(
    image: &[u8],
    verifying_key: Option<&VerifyingKey>,
    aes_key: Option<&AesKey>,
) -> Result<VerificationReport, ImageError> {
    let view = ImageView::parse(image)?;

    let stored = view.firmware_header.crc.get();
    let computed = crc32(view.payload);
    if stored != computed {
        return Err(ImageError::PayloadCrc { stored, computed });
    }

    let mut signature_checked = false;
    let mut plaintext = None;
    if let Some(section) = &view.signature {
        if let Some(verifying_key) = verifying_key {
            let signature = Signature::from_bytes(&section.signature);
            verifying_key
                .verify(view.signed_region, &signature)
                .map_err(|_| ImageError::BadSignature)?;
            signature_checked = true;
            debug!("Signature over {} bytes verified", view.signed_region.len());
        }
        if let Some(aes_key) = aes_key {
            let decrypted = decrypt_payload(aes_key, &iv_from_nonce(&section.nonce), view.payload);
            if derive_iv(&digest(&decrypted))[..NONCE_LEN] != section.nonce {
                return Err(ImageError::NonceMismatch);
            }
            plaintext = Some(decrypted);
        }
    }

    let report = VerificationReport {
        version: view.firmware_header.version_str(),
        timestamp: view.firmware_header.timestamp.get(),
        payload_len: view.payload.len(),
        payload_crc: computed,
        secure: view.is_secure(),
        revocations: view.revocations,
        signature_checked,
        plaintext,
    };
    info!(
        "Image OK: version '{}', {} bytes, {}",
        report.version,
        report.payload_len,
        if report.secure { "secure" } else { "non-secure" }
    );
    Ok(report)
}
