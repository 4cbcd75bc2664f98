//! AES-256-GCM implementation of the [`Cipher`] trait.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::{error::VaultError, traits::Cipher};

/// Version tag for the AES-256-GCM cipher.
pub const VERSION_TAG: u8 = 0x01;

/// Nonce size for AES-GCM (12 bytes).
const NONCE_LEN: usize = 12;

/// AES-256-GCM AEAD cipher.
///
/// Encrypted blob layout: `[nonce: 12 bytes][ciphertext + GCM tag: N + 16 bytes]`.
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn version_tag(&self) -> u8 {
        VERSION_TAG
    }

    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = Aes256Gcm::new(key.into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload {
                msg: plaintext,
                aad,
            })
            .map_err(|e| VaultError::Cipher(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if ciphertext.len() < NONCE_LEN + 16 {
            return Err(VaultError::CorruptBlob("ciphertext too short".into()));
        }

        let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(key.into());

        cipher
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|e| VaultError::Cipher(e.to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_no_aad() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let plaintext = b"hello keychain";

        let encrypted = cipher.encrypt(&key, plaintext, b"").unwrap();
        let decrypted = cipher.decrypt(&key, &encrypted, b"").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn round_trip_with_aad() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let plaintext = b"secret data";
        let aad = b"keychain";

        let encrypted = cipher.encrypt(&key, plaintext, aad).unwrap();
        let decrypted = cipher.decrypt(&key, &encrypted, aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = AesGcmCipher;
        let encrypted = cipher.encrypt(&[0x42u8; 32], b"secret", b"").unwrap();
        assert!(cipher.decrypt(&[0x43u8; 32], &encrypted, b"").is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let encrypted = cipher.encrypt(&key, b"secret", b"correct").unwrap();
        assert!(cipher.decrypt(&key, &encrypted, b"wrong").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let mut encrypted = cipher.encrypt(&key, b"secret", b"").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(cipher.decrypt(&key, &encrypted, b"").is_err());
    }

    #[test]
    fn too_short_ciphertext_fails() {
        let cipher = AesGcmCipher;
        assert!(cipher.decrypt(&[0x42u8; 32], &[0u8; 20], b"").is_err());
    }

    #[test]
    fn different_nonces_produce_different_ciphertexts() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let enc1 = cipher.encrypt(&key, b"same input", b"").unwrap();
        let enc2 = cipher.encrypt(&key, b"same input", b"").unwrap();
        assert_ne!(enc1, enc2);
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let cipher = AesGcmCipher;
        let key = [0x42u8; 32];
        let encrypted = cipher.encrypt(&key, b"", b"").unwrap();
        let decrypted = cipher.decrypt(&key, &encrypted, b"").unwrap();
        assert!(decrypted.is_empty());
    }
}
