//! Encrypted JSON file with atomic writes and a sibling key file.

use std::path::{Path, PathBuf};

use {rand::RngCore, serde::Serialize, serde::de::DeserializeOwned, tracing::debug, zeroize::Zeroizing};

use crate::{aes::AesGcmCipher, error::VaultError, traits::Cipher};

/// A single encrypted JSON document on disk.
///
/// The blob layout is `[version tag][cipher output]`. The 32-byte key lives
/// in a sibling file created from OS entropy on first use (mode 0600 on
/// unix). Writes go to a temp file in the same directory and are renamed
/// into place.
pub struct EncryptedFile {
    path: PathBuf,
    key_path: PathBuf,
    cipher: AesGcmCipher,
}

impl EncryptedFile {
    pub fn new(path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key_path: key_path.into(),
            cipher: AesGcmCipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load and decrypt the document. Returns `Ok(None)` when the file does
    /// not exist yet.
    pub fn load_json<T: DeserializeOwned>(&self, aad: &str) -> Result<Option<T>, VaultError> {
        let blob = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if blob.is_empty() {
            return Err(VaultError::CorruptBlob("empty blob".into()));
        }

        let version = blob[0];
        if version != self.cipher.version_tag() {
            return Err(VaultError::UnsupportedVersion(version));
        }

        let key = self.load_or_create_key()?;
        let plaintext = self.cipher.decrypt(&key, &blob[1..], aad.as_bytes())?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Encrypt and persist the document atomically (temp file + rename).
    pub fn save_json<T: Serialize>(&self, value: &T, aad: &str) -> Result<(), VaultError> {
        let key = self.load_or_create_key()?;
        let plaintext = serde_json::to_vec(value)?;
        let encrypted = self.cipher.encrypt(&key, &plaintext, aad.as_bytes())?;

        let mut blob = Vec::with_capacity(1 + encrypted.len());
        blob.push(self.cipher.version_tag());
        blob.extend_from_slice(&encrypted);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("enc.tmp");
        std::fs::write(&tmp, &blob)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = blob.len(), "keychain blob written");
        Ok(())
    }

    /// Read the key file, generating it on first use.
    fn load_or_create_key(&self) -> Result<Zeroizing<[u8; 32]>, VaultError> {
        match std::fs::read(&self.key_path) {
            Ok(bytes) => {
                let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    VaultError::CorruptBlob(format!(
                        "key file {} is not 32 bytes",
                        self.key_path.display()
                    ))
                })?;
                Ok(Zeroizing::new(key))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = Zeroizing::new([0u8; 32]);
                rand::rng().fill_bytes(key.as_mut());

                if let Some(parent) = self.key_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.key_path, key.as_ref())?;
                restrict_permissions(&self.key_path)?;
                debug!(path = %self.key_path.display(), "generated keychain key");
                Ok(key)
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde::Deserialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    fn store_in(dir: &Path) -> EncryptedFile {
        EncryptedFile::new(dir.join("keychain.enc"), dir.join("keychain.key"))
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let loaded: Option<Doc> = store.load_json("keychain").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let doc = Doc {
            name: "phone".into(),
            count: 3,
        };

        store.save_json(&doc, "keychain").unwrap();
        let loaded: Option<Doc> = store.load_json("keychain").unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[test]
    fn blob_on_disk_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .save_json(
                &Doc {
                    name: "secret-device-name".into(),
                    count: 1,
                },
                "keychain",
            )
            .unwrap();

        let raw = std::fs::read(dir.path().join("keychain.enc")).unwrap();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("secret-device-name"));
        assert_eq!(raw[0], crate::aes::VERSION_TAG);
    }

    #[test]
    fn wrong_aad_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .save_json(
                &Doc {
                    name: "x".into(),
                    count: 0,
                },
                "keychain",
            )
            .unwrap();

        let result: Result<Option<Doc>, _> = store.load_json("other-context");
        assert!(result.is_err());
    }

    #[test]
    fn key_survives_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .save_json(
                    &Doc {
                        name: "persisted".into(),
                        count: 7,
                    },
                    "keychain",
                )
                .unwrap();
        }
        let store = store_in(dir.path());
        let loaded: Option<Doc> = store.load_json("keychain").unwrap();
        assert_eq!(loaded.unwrap().name, "persisted");
    }

    #[test]
    fn truncated_key_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keychain.key"), [0u8; 7]).unwrap();
        let store = store_in(dir.path());
        let result = store.save_json(
            &Doc {
                name: "x".into(),
                count: 0,
            },
            "keychain",
        );
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .save_json(
                &Doc {
                    name: "x".into(),
                    count: 0,
                },
                "keychain",
            )
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("keychain.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
