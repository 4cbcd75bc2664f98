//! The secret store: exclusive owner of the encrypted keychain file.

use std::{collections::HashMap, path::Path, sync::Arc};

use {tokio::sync::RwLock, tracing::warn};

use torbo_vault::EncryptedFile;

use crate::{
    device::{KeychainData, PairedDevice, UserAccount},
    error::Result,
};

/// AAD binding the blob to its role, so a keychain file cannot be replayed
/// into another context.
const KEYCHAIN_AAD: &str = "torbo:keychain";

/// Read-through cached view over `keychain.enc`.
///
/// All mutation goes through this store; the pairing manager and token
/// registry only ever hold data this store handed out. Loads are lazy on
/// first access and cached for the process lifetime; every mutation writes
/// the full document back atomically.
pub struct SecretStore {
    file: EncryptedFile,
    cache: RwLock<Option<Arc<KeychainData>>>,
}

impl SecretStore {
    pub fn new(file: EncryptedFile) -> Self {
        Self {
            file,
            cache: RwLock::new(None),
        }
    }

    /// Open the keychain under the given data directory
    /// (`keychain.enc` + `keychain.key`).
    pub fn open_in(data_dir: &Path) -> Self {
        Self::new(EncryptedFile::new(
            data_dir.join("keychain.enc"),
            data_dir.join("keychain.key"),
        ))
    }

    /// Current keychain contents, loading from disk on first access.
    ///
    /// A corrupt or undecryptable blob logs a warning and yields defaults;
    /// the gateway keeps running with an empty device list rather than
    /// refusing to start.
    pub async fn load(&self) -> Arc<KeychainData> {
        if let Some(data) = self.cache.read().await.as_ref() {
            return Arc::clone(data);
        }

        let mut guard = self.cache.write().await;
        self.load_locked(&mut guard)
    }

    /// Fill the cache under an already-held write lock.
    fn load_locked(&self, guard: &mut Option<Arc<KeychainData>>) -> Arc<KeychainData> {
        // Another task may have loaded while we waited on the lock.
        if let Some(data) = guard.as_ref() {
            return Arc::clone(data);
        }

        let data = match self.file.load_json::<KeychainData>(KEYCHAIN_AAD) {
            Ok(Some(data)) => data,
            Ok(None) => KeychainData::default(),
            Err(e) => {
                warn!(path = %self.file.path().display(), error = %e,
                    "unreadable keychain, starting with empty state");
                KeychainData::default()
            },
        };
        let data = Arc::new(data);
        *guard = Some(Arc::clone(&data));
        data
    }

    /// Apply a mutation to the keychain and persist it atomically. The
    /// read-modify-write runs under the cache's write lock, so concurrent
    /// updates serialize instead of clobbering each other.
    pub async fn update<F>(&self, mutate: F) -> Result<Arc<KeychainData>>
    where
        F: FnOnce(&mut KeychainData),
    {
        let mut guard = self.cache.write().await;
        let current = self.load_locked(&mut guard);

        let mut data = (*current).clone();
        mutate(&mut data);
        self.file.save_json(&data, KEYCHAIN_AAD)?;
        let data = Arc::new(data);
        *guard = Some(Arc::clone(&data));
        Ok(data)
    }

    pub async fn devices(&self) -> Vec<PairedDevice> {
        self.load().await.devices.clone()
    }

    pub async fn user_account(&self) -> Option<UserAccount> {
        self.load().await.user_account.clone()
    }

    pub async fn provider_keys(&self) -> HashMap<String, String> {
        self.load().await.provider_keys.clone()
    }

    /// Merge provider API keys into the keychain. Empty values remove the key.
    pub async fn set_provider_keys(&self, updates: HashMap<String, String>) -> Result<()> {
        self.update(|data| {
            for (provider, key) in updates {
                if key.is_empty() {
                    data.provider_keys.remove(&provider);
                } else {
                    data.provider_keys.insert(provider, key);
                }
            }
        })
        .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::device::generate_token, chrono::Utc};

    fn store_in(dir: &Path) -> SecretStore {
        SecretStore::open_in(dir)
    }

    #[tokio::test]
    async fn empty_store_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.devices().await.is_empty());
        assert!(store.user_account().await.is_none());
        assert!(store.provider_keys().await.is_empty());
    }

    #[tokio::test]
    async fn device_mutations_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store
                .update(|data| {
                    data.devices.push(PairedDevice {
                        id: "d1".into(),
                        name: "phone".into(),
                        token: generate_token(),
                        paired_at: Utc::now(),
                        last_seen: None,
                        user_id: None,
                    });
                })
                .await
                .unwrap();
        }

        let store = store_in(dir.path());
        let devices = store.devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "phone");
    }

    #[tokio::test]
    async fn provider_keys_merge_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store
            .set_provider_keys(HashMap::from([
                ("openai".to_string(), "sk-test".to_string()),
                ("gemini".to_string(), "g-test".to_string()),
            ]))
            .await
            .unwrap();
        assert_eq!(store.provider_keys().await.len(), 2);

        // Empty value removes.
        store
            .set_provider_keys(HashMap::from([("gemini".to_string(), String::new())]))
            .await
            .unwrap();
        let keys = store.provider_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("openai").map(String::as_str), Some("sk-test"));
    }

    #[tokio::test]
    async fn corrupt_blob_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keychain.enc"), b"\x01garbage").unwrap();
        let store = store_in(dir.path());
        assert!(store.devices().await.is_empty());
    }
}
