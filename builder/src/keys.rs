// Licensed under the Apache-2.0 license

//! Key file loading and development key generation.
//!
//! Key files hold the raw key bytes, or the same bytes as hex text.

use crate::crypto::{
    signing_key_from_slice, verifying_key_from_slice, AesKey, AES_KEY_LEN, ED25519_KEY_LEN,
};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::info;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroizing;

/// Interprets `contents` as a key of `expected_len` bytes.
pub fn decode_key_bytes(contents: &[u8], expected_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    if contents.len() == expected_len {
        return Ok(Zeroizing::new(contents.to_vec()));
    }
    let text = std::str::from_utf8(contents)
        .map_err(|_| anyhow!("Key is {} bytes, expected {}", contents.len(), expected_len))?;
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    let key = Zeroizing::new(hex::decode(digits).context("Key file is neither raw bytes nor hex")?);
    if key.len() != expected_len {
        return Err(anyhow!(
            "Key is {} bytes, expected {}",
            key.len(),
            expected_len
        ));
    }
    Ok(key)
}

fn read_key_file(path: &Path, expected_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let contents = Zeroizing::new(
        std::fs::read(path).map_err(|e| anyhow!("Unable to read {}: {}", path.display(), e))?,
    );
    decode_key_bytes(&contents, expected_len).with_context(|| format!("{}", path.display()))
}

pub fn load_aes_key(path: &Path) -> Result<AesKey> {
    let key = read_key_file(path, AES_KEY_LEN)?;
    Ok(AesKey::from_slice(&key)?)
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let key = read_key_file(path, ED25519_KEY_LEN)?;
    Ok(signing_key_from_slice(&key)?)
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    let key = read_key_file(path, ed25519_dalek::PUBLIC_KEY_LENGTH)?;
    Ok(verifying_key_from_slice(&key)?)
}

/// File names written by [`generate_keys`].
pub const AES_KEY_FILE: &str = "aes.key";
pub const SIGNING_KEY_FILE: &str = "ed25519.key";
pub const VERIFYING_KEY_FILE: &str = "ed25519.pub";

/// Writes a random AES key and Ed25519 key pair into `dir` as raw bytes.
pub fn generate_keys(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow!("Unable to create {}: {}", dir.display(), e))?;

    let mut aes_key = Zeroizing::new([0u8; AES_KEY_LEN]);
    OsRng.fill_bytes(&mut aes_key[..]);
    let mut seed = Zeroizing::new([0u8; ED25519_KEY_LEN]);
    OsRng.fill_bytes(&mut seed[..]);
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();

    for (name, bytes) in [
        (AES_KEY_FILE, aes_key.as_slice()),
        (SIGNING_KEY_FILE, seed.as_slice()),
        (VERIFYING_KEY_FILE, verifying_key.as_bytes().as_slice()),
    ] {
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| anyhow!("Unable to write {}: {}", path.display(), e))?;
    }
    info!("Wrote development keys to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_raw_and_hex() {
        let raw: Vec<u8> = (0..16).collect();
        assert_eq!(decode_key_bytes(&raw, 16).unwrap().as_slice(), raw);

        let hex_text = "00010203 04050607\n08090a0b0c0d0e0f\n";
        assert_eq!(
            decode_key_bytes(hex_text.as_bytes(), 16).unwrap().as_slice(),
            raw
        );
        assert_eq!(
            decode_key_bytes(b"0x000102030405060708090A0B0C0D0E0F", 16)
                .unwrap()
                .as_slice(),
            raw
        );
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(decode_key_bytes(&[0u8; 15], 16).is_err());
        assert!(decode_key_bytes(b"0011", 16).is_err());
        assert!(decode_key_bytes(b"not hex at all", 16).is_err());
    }

    #[test]
    fn test_generate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        generate_keys(dir.path()).unwrap();

        let aes_key = load_aes_key(&dir.path().join(AES_KEY_FILE)).unwrap();
        assert_eq!(aes_key.as_bytes().len(), AES_KEY_LEN);
        let signing_key = load_signing_key(&dir.path().join(SIGNING_KEY_FILE)).unwrap();
        let verifying_key = load_verifying_key(&dir.path().join(VERIFYING_KEY_FILE)).unwrap();
        assert_eq!(signing_key.verifying_key(), verifying_key);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_aes_key(&dir.path().join("absent.key")).is_err());
    }
}
