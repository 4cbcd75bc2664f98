//! Public surface: liveness and the three pairing flows.

use std::net::SocketAddr;

use {
    axum::{
        extract::{ConnectInfo, State},
        response::Json,
    },
    serde::Deserialize,
    tracing::warn,
};

use torbo_auth::PairedDevice;

use crate::{error::ApiError, state::AppState};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn pair_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "torbo-base",
        "version": env!("CARGO_PKG_VERSION"),
        "pairingActive": state.pairing.pairing_active().await,
    }))
}

fn paired(device: PairedDevice) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "token": device.token,
        "deviceId": device.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PairCodeRequest {
    pub code: String,
    #[serde(rename = "deviceName")]
    pub device_name: String,
}

/// `POST /pair` — exchange an advertised single-use code for a token.
pub async fn pair_with_code(
    State(state): State<AppState>,
    Json(body): Json<PairCodeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.device_name.trim().is_empty() {
        return Err(ApiError::BadRequest("deviceName is required".into()));
    }
    state
        .pairing
        .pair_with_code(&body.code, body.device_name.trim())
        .await
        .map(paired)
        .map_err(|e| ApiError::Forbidden(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct PairAutoRequest {
    #[serde(rename = "deviceName")]
    pub device_name: String,
}

/// `POST /pair/auto` — codeless pairing, only from trusted networks.
pub async fn pair_auto(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<PairAutoRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.device_name.trim().is_empty() {
        return Err(ApiError::BadRequest("deviceName is required".into()));
    }

    let cfg = state.config_snapshot().await;
    let trusted = cfg
        .gateway
        .trusted_nets()
        .iter()
        .any(|net| net.contains(&addr.ip()));
    if !trusted {
        warn!(ip = %addr.ip(), "auto-pair refused outside trusted networks");
        return Err(ApiError::Forbidden(
            "auto-pairing is not allowed from this network".into(),
        ));
    }

    state
        .pairing
        .auto_pair(body.device_name.trim())
        .await
        .map(paired)
        .map_err(|e| ApiError::Forbidden(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct PairAuthRequest {
    #[serde(rename = "authToken")]
    pub auth_token: String,
    #[serde(rename = "deviceName")]
    pub device_name: String,
}

/// `POST /pair/auth` — validate an account token against the backend and
/// pair with the account linked.
pub async fn pair_auth(
    State(state): State<AppState>,
    Json(body): Json<PairAuthRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.device_name.trim().is_empty() {
        return Err(ApiError::BadRequest("deviceName is required".into()));
    }
    state
        .pairing
        .pair_with_account(&body.auth_token, body.device_name.trim())
        .await
        .map(paired)
        .map_err(|e| ApiError::Forbidden(e.to_string()))
}
