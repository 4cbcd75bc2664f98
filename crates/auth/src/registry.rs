//! Read-side façade over the paired-device list.
//!
//! The HTTP dispatcher authorizes every request against an immutable
//! snapshot published here, so the hot path never takes the secret store's
//! lock. `touch` is the registry's only mutation: it debounces `last_seen`
//! updates and republishes the snapshot.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

use {
    chrono::Utc,
    tracing::{debug, warn},
};

use crate::{
    device::{PairedDevice, safe_equal},
    store::SecretStore,
};

/// Minimum interval between persisted `last_seen` updates per device.
const TOUCH_DEBOUNCE: Duration = Duration::from_secs(60);

pub struct TokenRegistry {
    store: Arc<SecretStore>,
    /// Idle-expiry window; devices quieter than this are unauthorized.
    expiry: chrono::Duration,
    snapshot: RwLock<Arc<Vec<PairedDevice>>>,
    last_touch: Mutex<HashMap<String, Instant>>,
}

impl TokenRegistry {
    pub fn new(store: Arc<SecretStore>, expiry_days: u32) -> Self {
        Self {
            store,
            expiry: chrono::Duration::days(i64::from(expiry_days)),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_touch: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a new device snapshot. Called by the pairing manager after
    /// every mutation, and once at startup.
    pub fn publish(&self, devices: Vec<PairedDevice>) {
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Arc::new(devices);
        }
    }

    fn current(&self) -> Arc<Vec<PairedDevice>> {
        self.snapshot
            .read()
            .map(|g| Arc::clone(&g))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Is this bearer token a live, unexpired paired device?
    /// Returns the device id on success. Expiry is evaluated now, not by a
    /// background sweeper.
    pub fn authorize(&self, token: &str) -> Option<String> {
        let now = Utc::now();
        self.current()
            .iter()
            .find(|d| safe_equal(&d.token, token))
            .filter(|d| !d.is_expired(self.expiry, now))
            .map(|d| d.id.clone())
    }

    /// Record device activity. Persisted at most once per
    /// [`TOUCH_DEBOUNCE`] per device; intermediate touches are no-ops.
    pub async fn touch(&self, device_id: &str) {
        {
            let Ok(mut guard) = self.last_touch.lock() else {
                return;
            };
            let now = Instant::now();
            if let Some(last) = guard.get(device_id)
                && now.duration_since(*last) < TOUCH_DEBOUNCE
            {
                return;
            }
            guard.insert(device_id.to_string(), now);
        }

        let seen = Utc::now();
        let id = device_id.to_string();
        match self
            .store
            .update(move |data| {
                if let Some(device) = data.devices.iter_mut().find(|d| d.id == id) {
                    device.last_seen = Some(seen);
                }
            })
            .await
        {
            Ok(data) => {
                debug!(device_id, "device last_seen updated");
                self.publish(data.devices.clone());
            },
            Err(e) => warn!(device_id, error = %e, "failed to persist last_seen"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::device::generate_token,
        chrono::{Duration as ChronoDuration, Utc},
    };

    fn device(id: &str, paired_days_ago: i64) -> PairedDevice {
        PairedDevice {
            id: id.into(),
            name: format!("device-{id}"),
            token: generate_token(),
            paired_at: Utc::now() - ChronoDuration::days(paired_days_ago),
            last_seen: None,
            user_id: None,
        }
    }

    fn registry_with(devices: Vec<PairedDevice>, expiry_days: u32) -> (TokenRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SecretStore::open_in(dir.path()));
        let registry = TokenRegistry::new(store, expiry_days);
        registry.publish(devices);
        (registry, dir)
    }

    #[test]
    fn authorize_accepts_fresh_device() {
        let d = device("d1", 1);
        let token = d.token.clone();
        let (registry, _dir) = registry_with(vec![d], 30);
        assert_eq!(registry.authorize(&token), Some("d1".to_string()));
    }

    #[test]
    fn authorize_rejects_unknown_token() {
        let (registry, _dir) = registry_with(vec![device("d1", 1)], 30);
        assert_eq!(registry.authorize("bogus"), None);
    }

    #[test]
    fn authorize_rejects_idle_device_still_in_list() {
        let d = device("d1", 45);
        let token = d.token.clone();
        let (registry, _dir) = registry_with(vec![d], 30);
        assert_eq!(registry.authorize(&token), None);
    }

    #[test]
    fn recent_last_seen_revives_old_pairing() {
        let mut d = device("d1", 45);
        d.last_seen = Some(Utc::now() - ChronoDuration::days(2));
        let token = d.token.clone();
        let (registry, _dir) = registry_with(vec![d], 30);
        assert_eq!(registry.authorize(&token), Some("d1".to_string()));
    }

    #[tokio::test]
    async fn touch_persists_and_republishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SecretStore::open_in(dir.path()));
        let d = device("d1", 45);
        let token = d.token.clone();
        store
            .update({
                let d = d.clone();
                move |data| data.devices.push(d)
            })
            .await
            .unwrap();

        let registry = TokenRegistry::new(Arc::clone(&store), 30);
        registry.publish(store.devices().await);
        // Idle beyond the window: unauthorized before a touch.
        assert_eq!(registry.authorize(&token), None);

        registry.touch("d1").await;
        let devices = store.devices().await;
        assert!(devices[0].last_seen.is_some());
        // Snapshot now carries the fresh last_seen, so the token is live.
        assert_eq!(registry.authorize(&token), Some("d1".to_string()));
    }

    #[tokio::test]
    async fn touch_is_debounced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SecretStore::open_in(dir.path()));
        store
            .update(|data| data.devices.push(device("d1", 0)))
            .await
            .unwrap();

        let registry = TokenRegistry::new(Arc::clone(&store), 30);
        registry.publish(store.devices().await);

        registry.touch("d1").await;
        let first = store.devices().await[0].last_seen;
        assert!(first.is_some());

        // Immediate second touch is swallowed by the debounce.
        registry.touch("d1").await;
        assert_eq!(store.devices().await[0].last_seen, first);
    }
}
