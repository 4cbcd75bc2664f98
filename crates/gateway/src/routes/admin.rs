//! Operator surface: models, dashboard status, agents, devices, settings,
//! API keys, and the audit log.

use {
    axum::{
        extract::{Path, Query, State},
        response::Json,
    },
    serde::Deserialize,
    tracing::warn,
};

use {
    torbo_common::AccessLevel,
    torbo_config::{AgentConfig, TorboConfig},
    torbo_providers::LocalDaemon,
};

use crate::{error::ApiError, state::AppState};

/// `GET /v1/models` — configured providers' models, with the local
/// daemon's tag list merged in when it answers.
pub async fn list_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let chain = state.chain_snapshot().await;
    let mut data: Vec<serde_json::Value> = Vec::new();

    for name in chain.names() {
        if name == "local" {
            match state.daemon.fetch_model_names().await {
                Ok(models) => {
                    for model in models {
                        data.push(serde_json::json!({
                            "id": model, "object": "model", "owned_by": "local",
                        }));
                    }
                },
                Err(_) => {
                    data.push(serde_json::json!({
                        "id": "auto", "object": "model", "owned_by": "local",
                    }));
                },
            }
        }
    }
    let cfg = state.config_snapshot().await;
    for (provider, default_model) in [
        ("openai", cfg.providers.openai.model.as_deref()),
        ("anthropic", cfg.providers.anthropic.model.as_deref()),
        ("gemini", cfg.providers.gemini.model.as_deref()),
    ] {
        if chain.names().contains(&provider) {
            data.push(serde_json::json!({
                "id": default_model.unwrap_or(provider),
                "object": "model",
                "owned_by": provider,
            }));
        }
    }

    Json(serde_json::json!({ "object": "list", "data": data }))
}

/// `GET /v1/dashboard/status` — server and provider stats.
pub async fn dashboard_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cfg = state.config_snapshot().await;
    let chain = state.chain_snapshot().await;
    let devices = state.pairing.list_devices().await;

    Json(serde_json::json!({
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "accessLevel": cfg.gateway.access_level,
        "providers": chain.names(),
        "localDaemon": {
            "installed": LocalDaemon::is_installed(),
            "healthy": state.daemon.is_healthy().await,
        },
        "pairedDevices": devices.len(),
        "pairingActive": state.pairing.pairing_active().await,
    }))
}

/// `GET /v1/agents`
pub async fn list_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cfg = state.config_snapshot().await;
    let mut agents = cfg.agents.clone();
    if !agents.iter().any(|a| a.id == "main") {
        agents.insert(0, AgentConfig::builtin_main());
    }
    Json(serde_json::json!({ "agents": agents }))
}

/// `PUT /v1/agents/{id}` — partial update of one agent's fields.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cfg = state.config_snapshot().await;
    let mut next = (*cfg).clone();

    if !next.agents.iter().any(|a| a.id == id) {
        if id == "main" {
            next.agents.insert(0, AgentConfig::builtin_main());
        } else {
            return Err(ApiError::NotFound);
        }
    }
    let Some(agent) = next.agents.iter_mut().find(|a| a.id == id) else {
        return Err(ApiError::NotFound);
    };

    if let Some(role) = patch["role"].as_str() {
        agent.role = role.to_string();
    }
    if let Some(personality) = patch["personality"].as_str() {
        agent.personality = personality.to_string();
    }
    if let Some(level) = patch["accessLevel"].as_str() {
        agent.access_level = AccessLevel::parse(level)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown access level: {level}")))?;
    }
    if let Some(scopes) = patch["directoryScopes"].as_array() {
        agent.directory_scopes = scopes
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();
    }
    if let Some(caps) = patch["enabledCapabilities"].as_object() {
        for (key, value) in caps {
            if let (Some(category), Some(enabled)) =
                (torbo_common::ToolCategory::parse(key), value.as_bool())
            {
                agent.enabled_capabilities.insert(category, enabled);
            }
        }
    }

    let updated = agent.clone();
    state.replace_config(next).await;
    Ok(Json(serde_json::json!({ "agent": updated })))
}

/// `DELETE /v1/agents/{id}` — forbidden for built-ins.
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if id == "main" {
        return Err(ApiError::Forbidden("built-in agents cannot be deleted".into()));
    }
    let cfg = state.config_snapshot().await;
    let mut next = (*cfg).clone();
    let before = next.agents.len();
    next.agents.retain(|a| a.id != id);
    if next.agents.len() == before {
        return Err(ApiError::NotFound);
    }
    state.replace_config(next).await;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// `GET /v1/devices`
pub async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices: Vec<serde_json::Value> = state
        .pairing
        .list_devices()
        .await
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "id": d.id,
                "name": d.name,
                "pairedAt": d.paired_at,
                "lastSeen": d.last_seen,
            })
        })
        .collect();
    Json(serde_json::json!({ "devices": devices }))
}

/// `DELETE /v1/devices/{id}` — operator revocation.
pub async fn remove_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .pairing
        .remove_device(&id)
        .await
        .map(|()| Json(serde_json::json!({ "removed": id })))
        .map_err(|_| ApiError::NotFound)
}

/// `POST /v1/pair/begin` — operator requests a fresh pairing code.
pub async fn begin_pairing(State(state): State<AppState>) -> Json<serde_json::Value> {
    let code = state.pairing.begin_pairing().await;
    Json(serde_json::json!({ "code": code, "expiresInSeconds": 300 }))
}

/// `GET /v1/config/settings`
pub async fn get_settings(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cfg = state.config_snapshot().await;
    Json(settings_view(&cfg))
}

/// Config as JSON with any plaintext provider keys scrubbed; keys are only
/// readable (masked) through `/v1/config/apikeys`.
fn settings_view(cfg: &TorboConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(cfg).unwrap_or_default();
    if let Some(providers) = value["providers"].as_object_mut() {
        for (_, entry) in providers.iter_mut() {
            if let Some(obj) = entry.as_object_mut()
                && obj.contains_key("api_key")
            {
                obj.insert("api_key".into(), serde_json::Value::Null);
            }
        }
    }
    value
}

/// `PUT /v1/config/settings` — partial update, applied copy-on-write so
/// readers never see a torn config. The top-level `accessLevel` shorthand
/// sets the global clamp.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(mut patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cfg = state.config_snapshot().await;

    // Shorthand used by clients for the most common toggle.
    if let Some(level) = patch["accessLevel"].as_str() {
        let parsed = AccessLevel::parse(level)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown access level: {level}")))?;
        patch["gateway"]["access_level"] = serde_json::json!(parsed);
    }

    let mut merged = serde_json::to_value(&*cfg)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    merge_json(&mut merged, &patch);

    let next: TorboConfig = serde_json::from_value(merged)
        .map_err(|e| ApiError::BadRequest(format!("invalid settings: {e}")))?;
    state.replace_config(next).await;

    let cfg = state.config_snapshot().await;
    Ok(Json(settings_view(&cfg)))
}

/// Recursive object merge; scalars and arrays replace wholesale.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if key == "accessLevel" {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (base, patch) => *base = patch.clone(),
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 8 {
        return "••••".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}…{tail}")
}

/// `GET /v1/config/apikeys` — providers with masked keys.
pub async fn get_api_keys(State(state): State<AppState>) -> Json<serde_json::Value> {
    let keys = state.store.provider_keys().await;
    let masked: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .map(|(provider, key)| (provider.clone(), serde_json::json!(mask_key(key))))
        .collect();
    Json(serde_json::json!({ "keys": masked }))
}

#[derive(Debug, Deserialize)]
pub struct PutApiKeys {
    pub keys: std::collections::HashMap<String, String>,
}

/// `PUT /v1/config/apikeys` — writes through the secret store; empty
/// values delete a key. The provider chain is rebuilt afterwards.
pub async fn put_api_keys(
    State(state): State<AppState>,
    Json(body): Json<PutApiKeys>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Err(e) = state.store.set_provider_keys(body.keys).await {
        warn!(error = %e, "failed to persist provider keys");
        return Err(ApiError::BadRequest("failed to persist keys".into()));
    }
    state.rebuild_chain().await;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub limit: usize,
    pub offset: usize,
    #[serde(rename = "pathFilter")]
    pub path_filter: Option<String>,
    #[serde(rename = "grantedOnly")]
    pub granted_only: bool,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            path_filter: None,
            granted_only: false,
        }
    }
}

/// `GET /v1/audit/log` — paged, ring first then file.
pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.clamp(1, 1000);
    let entries = state.audit.query(
        limit,
        query.offset,
        query.path_filter.as_deref(),
        query.granted_only,
    );
    Json(serde_json::json!({
        "entries": entries,
        "limit": limit,
        "offset": query.offset,
    }))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_is_recursive_for_objects() {
        let mut base = serde_json::json!({
            "gateway": {"port": 8420, "lan_access": false},
            "agents": [{"id": "main"}],
        });
        let patch = serde_json::json!({
            "gateway": {"lan_access": true},
        });
        merge_json(&mut base, &patch);
        assert_eq!(base["gateway"]["port"], 8420);
        assert_eq!(base["gateway"]["lan_access"], true);
        assert_eq!(base["agents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn merge_json_replaces_arrays() {
        let mut base = serde_json::json!({"list": [1, 2, 3]});
        merge_json(&mut base, &serde_json::json!({"list": [9]}));
        assert_eq!(base["list"], serde_json::json!([9]));
    }

    #[test]
    fn mask_hides_the_middle() {
        let masked = mask_key("sk-abcdefghijklmnop");
        assert!(masked.starts_with("sk-a"));
        assert!(masked.ends_with("op"));
        assert!(!masked.contains("cdefghijklmn"));
        assert_eq!(mask_key("short"), "••••");
    }
}
