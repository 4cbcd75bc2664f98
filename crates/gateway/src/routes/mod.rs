pub mod admin;
pub mod chat;
pub mod pairing;

use axum::http::HeaderMap;

use torbo_config::{AgentConfig, TorboConfig};

use crate::auth_middleware::AGENT_HEADER;

/// The agent persona for this request: `x-torbo-agent-id`, defaulting to
/// the built-in primary agent.
pub(crate) fn resolve_agent(cfg: &TorboConfig, headers: &HeaderMap) -> AgentConfig {
    headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|id| cfg.agent(id).cloned())
        .unwrap_or_else(|| cfg.main_agent())
}
