//! Credential-at-rest protection for the agent's stored password.
//!
//! PBKDF2-HMAC-SHA256 over a fixed passphrase and salt derives an
//! AES-256-GCM key; each encryption uses a fresh random nonce and the
//! stored blob is base64(nonce‖ciphertext). The derivation inputs are
//! constants compiled into the binary, so this is obfuscation for
//! credentials at rest, not strong secret storage.

use std::num::NonZeroU32;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::pbkdf2;
use thiserror::Error;

const KEY_PASSPHRASE: &[u8] = b"marknest-agent-encryption-key-32-byte!";
const KEY_SALT: &[u8] = b"marknest-salt-16-byte";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

fn derive_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERATIONS).unwrap(),
        KEY_SALT,
        KEY_PASSPHRASE,
        &mut key,
    );
    key
}

pub fn encrypt_password(plain_text: &str) -> Result<String, CryptoError> {
    let key = derive_key();
    let cipher = Aes256Gcm::new(key.as_slice().into());

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain_text.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

pub fn decrypt_password(blob: &str) -> Result<String, CryptoError> {
    match decrypt_aead(blob) {
        Ok(plain) => Ok(plain),
        // Blobs written before encryption existed are plain base64.
        Err(_) => {
            let bytes = BASE64.decode(blob).map_err(|_| CryptoError::Decrypt)?;
            String::from_utf8(bytes).map_err(|_| CryptoError::Decrypt)
        }
    }
}

fn decrypt_aead(blob: &str) -> Result<String, CryptoError> {
    let combined = BASE64.decode(blob).map_err(|_| CryptoError::Decrypt)?;
    if combined.len() < NONCE_SIZE {
        return Err(CryptoError::Decrypt);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = derive_key();
    let cipher = Aes256Gcm::new(key.as_slice().into());
    let decrypted = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(decrypted).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let blob = encrypt_password("hunter2").unwrap();
        assert_ne!(blob, "hunter2");
        assert_eq!(decrypt_password(&blob).unwrap(), "hunter2");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let a = encrypt_password("same input").unwrap();
        let b = encrypt_password("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt_password(&a).unwrap(), decrypt_password(&b).unwrap());
    }

    #[test]
    fn tampered_blob_fails_aead_path() {
        let blob = encrypt_password("secret").unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        // The AEAD rejects it; the legacy fallback then fails on the
        // binary payload too.
        assert!(decrypt_password(&tampered).is_err());
    }

    #[test]
    fn legacy_plain_base64_blob_still_decrypts() {
        let legacy = BASE64.encode("old-password");
        assert_eq!(decrypt_password(&legacy).unwrap(), "old-password");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decrypt_password("!!!not-base64!!!").is_err());
    }
}
