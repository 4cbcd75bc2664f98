//! Long-lived gateway state, passed by handle into every request.

use std::{collections::HashMap, path::Path, sync::Arc, time::Instant};

use tokio::sync::{RwLock, Semaphore};

use {
    torbo_auth::{PairingManager, SecretStore, TokenRegistry},
    torbo_config::TorboConfig,
    torbo_policy::AuditLog,
    torbo_providers::{LocalDaemon, ProviderChain},
    torbo_tools::{Collaborators, ToolExecutor},
};

use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    /// Whole-config copy-on-write: `PUT /v1/config/settings` swaps the Arc,
    /// readers never observe a torn state.
    config: Arc<RwLock<Arc<TorboConfig>>>,
    pub store: Arc<SecretStore>,
    pub pairing: Arc<PairingManager>,
    pub registry: Arc<TokenRegistry>,
    pub audit: Arc<AuditLog>,
    pub limiter: RateLimiter,
    pub collaborators: Collaborators,
    chain: Arc<RwLock<Arc<ProviderChain>>>,
    /// Caps concurrent upstream provider calls.
    pub provider_permits: Arc<Semaphore>,
    pub daemon: Arc<LocalDaemon>,
    pub started_at: Instant,
}

impl AppState {
    /// Build state over a data directory: keychain, device registry,
    /// audit log, provider chain.
    pub async fn open(config: TorboConfig, data_dir: &Path) -> Self {
        let store = Arc::new(SecretStore::open_in(data_dir));
        let registry = Arc::new(TokenRegistry::new(
            Arc::clone(&store),
            config.gateway.device_expiry_days,
        ));
        let pairing = Arc::new(PairingManager::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        pairing.bootstrap().await;

        let keys = store.provider_keys().await;
        let chain = ProviderChain::from_config(&config.providers, &keys);
        let daemon_base = config
            .providers
            .local
            .base_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:11434".into());
        let max_concurrent = config.gateway.max_concurrent_tasks.max(1);

        Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
            store,
            pairing,
            registry,
            audit: Arc::new(AuditLog::new(data_dir.join("audit.log"))),
            limiter: RateLimiter::new(),
            collaborators: Collaborators::default(),
            chain: Arc::new(RwLock::new(Arc::new(chain))),
            provider_permits: Arc::new(Semaphore::new(max_concurrent)),
            daemon: Arc::new(LocalDaemon::new(daemon_base)),
            started_at: Instant::now(),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Swap in a prebuilt provider chain (tests point this at stub
    /// upstreams).
    pub async fn set_chain(&self, chain: ProviderChain) {
        *self.chain.write().await = Arc::new(chain);
    }

    pub async fn config_snapshot(&self) -> Arc<TorboConfig> {
        Arc::clone(&*self.config.read().await)
    }

    /// Replace the whole config atomically and rebuild what derives from it.
    pub async fn replace_config(&self, config: TorboConfig) {
        *self.config.write().await = Arc::new(config);
        self.rebuild_chain().await;
    }

    pub async fn chain_snapshot(&self) -> Arc<ProviderChain> {
        Arc::clone(&*self.chain.read().await)
    }

    /// Rebuild the provider chain from the current config and keychain.
    /// Called after settings or API-key changes.
    pub async fn rebuild_chain(&self) {
        let cfg = self.config_snapshot().await;
        let keys: HashMap<String, String> = self.store.provider_keys().await;
        let chain = ProviderChain::from_config(&cfg.providers, &keys);
        *self.chain.write().await = Arc::new(chain);
    }

    /// A per-request tool executor over the current config snapshot.
    pub async fn tool_executor(&self) -> ToolExecutor {
        let cfg = self.config_snapshot().await;
        ToolExecutor::new(cfg.tools.clone()).with_collaborators(self.collaborators.clone())
    }
}
