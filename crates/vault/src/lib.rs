//! Encryption-at-rest for the keychain blob.
//!
//! A [`Cipher`] trait with an AES-256-GCM implementation, plus
//! [`EncryptedFile`]: a versioned, atomically-written encrypted JSON file
//! keyed by a sibling key file generated from OS entropy.

pub mod aes;
pub mod error;
pub mod store;
pub mod traits;

pub use {aes::AesGcmCipher, error::VaultError, store::EncryptedFile, traits::Cipher};
