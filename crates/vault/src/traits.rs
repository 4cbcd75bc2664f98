use crate::error::VaultError;

/// An AEAD cipher used to seal the keychain blob.
///
/// Implementations own their nonce layout; the encrypted output must embed
/// everything needed for decryption except the key and the AAD.
pub trait Cipher: Send + Sync {
    /// Version tag prepended to encrypted blobs, so the on-disk format can
    /// migrate ciphers without guessing.
    fn version_tag(&self) -> u8;

    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError>;

    fn decrypt(&self, key: &[u8; 32], ciphertext: &[u8], aad: &[u8])
    -> Result<Vec<u8>, VaultError>;
}
