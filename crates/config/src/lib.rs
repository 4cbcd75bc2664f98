//! Configuration schema and loading.
//!
//! Config file: `torbo.toml`, searched in `./` then the platform config dir.
//! Unparseable config logs a warning and falls back to defaults; the gateway
//! never refuses to start over a bad config file.

pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config, set_data_dir},
    schema::{
        AgentConfig, GatewayConfig, ProviderEntry, ProvidersConfig, ShellConfig, TorboConfig,
        ToolsConfig, WebSearchConfig,
    },
};
