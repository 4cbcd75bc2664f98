//! Pairing state machine: code issuance, code/auto/account pairing, device
//! lifecycle.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    chrono::Utc,
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    device::{PairedDevice, UserAccount, generate_pairing_code, generate_token},
    error::{AuthError, Result},
    registry::TokenRegistry,
    store::SecretStore,
};

/// Pairing codes live this long, single-shot.
const CODE_TTL: Duration = Duration::from_secs(300);

/// Backend that validates an external account token for `POST /pair/auth`.
#[async_trait]
pub trait AccountBackend: Send + Sync {
    async fn validate(&self, auth_token: &str) -> anyhow::Result<UserAccount>;
}

struct ActiveCode {
    code: String,
    expires_at: Instant,
}

/// Holds the device list (through the secret store) and the currently
/// advertised pairing code, if any.
pub struct PairingManager {
    store: Arc<SecretStore>,
    registry: Arc<TokenRegistry>,
    active: Mutex<Option<ActiveCode>>,
    backend: Option<Arc<dyn AccountBackend>>,
}

impl PairingManager {
    pub fn new(store: Arc<SecretStore>, registry: Arc<TokenRegistry>) -> Self {
        Self {
            store,
            registry,
            active: Mutex::new(None),
            backend: None,
        }
    }

    pub fn with_account_backend(mut self, backend: Arc<dyn AccountBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Load persisted devices and publish the initial registry snapshot.
    pub async fn bootstrap(&self) {
        let devices = self.store.devices().await;
        info!(count = devices.len(), "paired devices loaded");
        self.registry.publish(devices);
    }

    /// Generate and advertise a new pairing code, replacing any previous
    /// one. The code is valid for five minutes and is consumed by the first
    /// successful `pair_with_code`.
    pub async fn begin_pairing(&self) -> String {
        let code = generate_pairing_code();
        let mut guard = self.active.lock().await;
        *guard = Some(ActiveCode {
            code: code.clone(),
            expires_at: Instant::now() + CODE_TTL,
        });
        info!("pairing code issued");
        code
    }

    /// Whether a non-expired pairing code is currently advertised.
    pub async fn pairing_active(&self) -> bool {
        let guard = self.active.lock().await;
        guard
            .as_ref()
            .map(|c| Instant::now() < c.expires_at)
            .unwrap_or(false)
    }

    /// Exchange a pairing code for a device token. Codes match
    /// case-insensitively and are single-use: the active code is consumed
    /// on success and cleared on expiry.
    pub async fn pair_with_code(&self, code: &str, device_name: &str) -> Result<PairedDevice> {
        let mut guard = self.active.lock().await;
        let active = guard.as_ref().ok_or(AuthError::NoPairingActive)?;

        if Instant::now() >= active.expires_at {
            *guard = None;
            return Err(AuthError::CodeExpired);
        }
        if !active.code.eq_ignore_ascii_case(code.trim()) {
            warn!(device_name, "pairing attempt with wrong code");
            return Err(AuthError::CodeMismatch);
        }

        // Single-use: consume before issuing.
        *guard = None;
        drop(guard);

        self.issue_device(device_name, None).await
    }

    /// Issue a device token without a code. The caller is responsible for
    /// checking that the client came from a trusted network.
    pub async fn auto_pair(&self, device_name: &str) -> Result<PairedDevice> {
        info!(device_name, "auto-pairing device on trusted network");
        self.issue_device(device_name, None).await
    }

    /// Validate an external account token and pair, linking the account.
    pub async fn pair_with_account(
        &self,
        auth_token: &str,
        device_name: &str,
    ) -> Result<PairedDevice> {
        let backend = self.backend.as_ref().ok_or(AuthError::NoAccountBackend)?;
        let account = backend.validate(auth_token).await.map_err(|e| {
            warn!(device_name, error = %e, "account backend rejected pairing");
            AuthError::AccountRejected
        })?;

        let user_id = account.id.clone();
        let device = self.issue_device(device_name, Some(user_id)).await?;
        self.store
            .update(move |data| data.user_account = Some(account))
            .await?;
        Ok(device)
    }

    /// List paired devices.
    pub async fn list_devices(&self) -> Vec<PairedDevice> {
        self.store.devices().await
    }

    /// Operator removal of a paired device.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let devices = self.store.devices().await;
        if !devices.iter().any(|d| d.id == device_id) {
            return Err(AuthError::DeviceNotFound);
        }

        let id = device_id.to_string();
        let data = self
            .store
            .update(move |data| data.devices.retain(|d| d.id != id))
            .await?;
        self.registry.publish(data.devices.clone());
        info!(device_id, "device removed");
        Ok(())
    }

    async fn issue_device(
        &self,
        device_name: &str,
        user_id: Option<String>,
    ) -> Result<PairedDevice> {
        let devices = self.store.devices().await;

        // Tokens are globally unique across the device list.
        let mut token = generate_token();
        while devices.iter().any(|d| d.token == token) {
            token = generate_token();
        }

        let device = PairedDevice {
            id: uuid::Uuid::new_v4().to_string(),
            name: device_name.to_string(),
            token,
            paired_at: Utc::now(),
            last_seen: None,
            user_id,
        };

        let stored = device.clone();
        let data = self
            .store
            .update(move |data| data.devices.push(stored))
            .await?;
        self.registry.publish(data.devices.clone());

        info!(device_id = %device.id, device_name, "device paired");
        Ok(device)
    }
}
