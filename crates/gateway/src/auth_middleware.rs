//! Bearer-token authentication and access-control gating for the `/v1`
//! surface. Every ACL decision — grant or denial — lands in the audit log.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use {
    torbo_policy::{AuditEntry, effective_level, required_level},
    tracing::debug,
};

use crate::state::AppState;

/// Header selecting the agent persona; absent means the built-in primary.
pub const AGENT_HEADER: &str = "x-torbo-agent-id";

/// Device identity attached to the request after authentication.
#[derive(Debug, Clone)]
pub struct DeviceId(pub String);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authentication: the bearer token must belong to a live, unexpired
/// paired device. A valid token refreshes the device's `last_seen`
/// (debounced inside the registry).
pub async fn require_device(
    State(state): State<AppState>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return unauthorized();
    };
    let Some(device_id) = state.registry.authorize(token) else {
        debug!("rejected bearer token");
        return unauthorized();
    };

    state.registry.touch(&device_id).await;
    request.extensions_mut().insert(DeviceId(device_id));
    next.run(request).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "not authenticated" })),
    )
        .into_response()
}

/// Access-control evaluation: the route table's required level against
/// `min(server level, agent level)`, audited either way.
pub async fn acl_gate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_owned();
    let path = request.uri().path().to_owned();

    let Some(required) = required_level(&method, &path) else {
        return next.run(request).await;
    };

    let cfg = state.config_snapshot().await;
    let agent = request
        .headers()
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|id| cfg.agent(id).cloned())
        .unwrap_or_else(|| cfg.main_agent());
    let effective = effective_level(cfg.gateway.access_level, agent.access_level);
    let granted = effective >= required;

    let device_id = request
        .extensions()
        .get::<DeviceId>()
        .map(|d| d.0.clone());
    state.audit.record(
        AuditEntry::new(addr.ip().to_string(), &method, &path, required, granted)
            .with_device(device_id),
    );

    if !granted {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "access denied",
                "required": required.as_str(),
                "effective": effective.as_str(),
            })),
        )
            .into_response();
    }
    next.run(request).await
}
