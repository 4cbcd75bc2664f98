//! Config schema types (gateway, providers, tools, agents).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use torbo_common::{AccessLevel, ToolCategory};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorboConfig {
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    /// Configured agent personas. The built-in `main` agent is always
    /// present even when this list is empty.
    pub agents: Vec<AgentConfig>,
}

impl Default for TorboConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            providers: ProvidersConfig::default(),
            tools: ToolsConfig::default(),
            agents: vec![AgentConfig::builtin_main()],
        }
    }
}

impl TorboConfig {
    /// Look up an agent by id, falling back to the built-in `main` persona.
    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// The built-in primary agent, creating the default if the config
    /// dropped it.
    pub fn main_agent(&self) -> AgentConfig {
        self.agent("main")
            .cloned()
            .unwrap_or_else(AgentConfig::builtin_main)
    }
}

/// Gateway listener and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// TCP port. Loopback-only unless `lan_access` is set.
    pub port: u16,
    /// Opt-in LAN exposure (binds 0.0.0.0 instead of 127.0.0.1).
    pub lan_access: bool,
    /// Per-IP request budget per minute.
    pub rate_limit_per_minute: u32,
    /// Cap on concurrent upstream provider calls.
    pub max_concurrent_tasks: usize,
    /// CIDR networks where `POST /pair/auto` is allowed.
    pub trusted_networks: Vec<String>,
    /// Paired devices idle longer than this are treated as unauthorized.
    pub device_expiry_days: u32,
    /// Global clamp applied to every agent's access level.
    pub access_level: AccessLevel,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8420,
            lan_access: false,
            rate_limit_per_minute: 120,
            max_concurrent_tasks: 8,
            trusted_networks: Vec::new(),
            device_expiry_days: 30,
            access_level: AccessLevel::Full,
        }
    }
}

impl GatewayConfig {
    /// Parsed trusted networks; invalid CIDR entries are skipped with a warning.
    pub fn trusted_nets(&self) -> Vec<ipnet::IpNet> {
        self.trusted_networks
            .iter()
            .filter_map(|s| match s.parse::<ipnet::IpNet>() {
                Ok(net) => Some(net),
                Err(e) => {
                    tracing::warn!(cidr = %s, error = %e, "ignoring invalid trusted network");
                    None
                },
            })
            .collect()
    }
}

/// A named agent persona with its own access level and directory scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    pub role: String,
    pub personality: String,
    pub access_level: AccessLevel,
    /// Absolute path roots this agent may touch. Empty means unrestricted
    /// within the level's other limits.
    pub directory_scopes: Vec<String>,
    /// Per-category toggles; an absent category counts as enabled.
    pub enabled_capabilities: HashMap<ToolCategory, bool>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            role: String::new(),
            personality: String::new(),
            access_level: AccessLevel::Chat,
            directory_scopes: Vec::new(),
            enabled_capabilities: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// The always-present primary agent.
    pub fn builtin_main() -> Self {
        Self {
            id: "main".into(),
            role: "assistant".into(),
            personality: "Helpful, concise, direct.".into(),
            access_level: AccessLevel::Chat,
            ..Self::default()
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.id == "main"
    }

    /// Whether a tool category is enabled for this agent.
    /// Absent entries default to enabled.
    pub fn category_enabled(&self, category: ToolCategory) -> bool {
        self.enabled_capabilities
            .get(&category)
            .copied()
            .unwrap_or(true)
    }
}

/// Per-provider connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    pub enabled: Option<bool>,
    /// Plaintext key in config is a fallback; the keychain wins.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// Provider configuration and failover pinning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub local: ProviderEntry,
    pub openai: ProviderEntry,
    pub anthropic: ProviderEntry,
    pub gemini: ProviderEntry,
    /// Cloud failover order after the local daemon. Unknown names are
    /// ignored; omitted providers are appended in the default order.
    pub pinned_order: Vec<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            local: ProviderEntry::default(),
            openai: ProviderEntry::default(),
            anthropic: ProviderEntry::default(),
            gemini: ProviderEntry::default(),
            pinned_order: vec!["openai".into(), "anthropic".into(), "gemini".into()],
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        match name {
            "local" => Some(&self.local),
            "openai" => Some(&self.openai),
            "anthropic" => Some(&self.anthropic),
            "gemini" => Some(&self.gemini),
            _ => None,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name)
            .map(|e| e.enabled.unwrap_or(true))
            .unwrap_or(false)
    }

    /// Failover order: local first, then the pinned cloud order with any
    /// missing providers appended.
    pub fn failover_order(&self) -> Vec<String> {
        let mut order = vec!["local".to_string()];
        for name in &self.pinned_order {
            if self.get(name).is_some() && name != "local" && !order.contains(name) {
                order.push(name.clone());
            }
        }
        for name in ["openai", "anthropic", "gemini"] {
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        }
        order
    }
}

/// Shell execution settings for `run_command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub timeout_seconds: u64,
    pub max_timeout_seconds: u64,
    /// Working directory; defaults to the user's home when unset.
    pub working_dir: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "sh".into(),
            timeout_seconds: 30,
            max_timeout_seconds: 300,
            working_dir: None,
        }
    }
}

/// Web search settings. Search goes through a SearXNG-compatible JSON
/// endpoint; unset means the tool reports itself unconfigured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub endpoint: Option<String>,
    pub max_results: Option<usize>,
}

/// Tool settings, including server-wide category toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Server-wide category toggles; absent counts as enabled.
    pub enabled_categories: HashMap<ToolCategory, bool>,
    pub shell: ShellConfig,
    pub web_search: WebSearchConfig,
    /// Character cap applied to fetched web content.
    pub web_fetch_max_chars: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled_categories: HashMap::new(),
            shell: ShellConfig::default(),
            web_search: WebSearchConfig::default(),
            web_fetch_max_chars: 50_000,
        }
    }
}

impl ToolsConfig {
    pub fn category_enabled(&self, category: ToolCategory) -> bool {
        self.enabled_categories
            .get(&category)
            .copied()
            .unwrap_or(true)
    }
}
