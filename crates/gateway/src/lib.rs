//! The HTTP dispatcher: request auth, rate limiting, access-control
//! evaluation with auditing, routing, and streaming response framing.

pub mod auth_middleware;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod state;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use {
    axum::{Router, middleware},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use crate::state::AppState;

pub use crate::{error::ApiError, state::AppState as GatewayState};

/// Assemble the full router: public pairing/health surface plus the
/// authenticated `/v1` surface. Middleware order on gated routes is
/// authentication, then rate limiting, then access-control evaluation.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", axum::routing::get(routes::pairing::health))
        .route("/pair/info", axum::routing::get(routes::pairing::pair_info))
        .route("/pair", axum::routing::post(routes::pairing::pair_with_code))
        .route("/pair/auto", axum::routing::post(routes::pairing::pair_auto))
        .route("/pair/auth", axum::routing::post(routes::pairing::pair_auth))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_gate,
        ));

    let protected = Router::new()
        .route(
            "/v1/chat/completions",
            axum::routing::post(routes::chat::chat_completions),
        )
        .route("/v1/models", axum::routing::get(routes::admin::list_models))
        .route(
            "/v1/dashboard/status",
            axum::routing::get(routes::admin::dashboard_status),
        )
        .route("/v1/agents", axum::routing::get(routes::admin::list_agents))
        .route(
            "/v1/agents/{id}",
            axum::routing::put(routes::admin::update_agent)
                .delete(routes::admin::delete_agent),
        )
        .route("/v1/devices", axum::routing::get(routes::admin::list_devices))
        .route(
            "/v1/devices/{id}",
            axum::routing::delete(routes::admin::remove_device),
        )
        .route(
            "/v1/pair/begin",
            axum::routing::post(routes::admin::begin_pairing),
        )
        .route(
            "/v1/config/settings",
            axum::routing::get(routes::admin::get_settings)
                .put(routes::admin::put_settings),
        )
        .route(
            "/v1/config/apikeys",
            axum::routing::get(routes::admin::get_api_keys)
                .put(routes::admin::put_api_keys),
        )
        .route("/v1/audit/log", axum::routing::get(routes::admin::audit_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::acl_gate,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_gate,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_device,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(axum::extract::DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until ctrl-c. Bind failure is fatal and propagates.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let (port, lan_access) = {
        let cfg = state.config_snapshot().await;
        (cfg.gateway.port, cfg.gateway.lan_access)
    };
    let host: IpAddr = if lan_access {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    let addr = SocketAddr::new(host, port);

    let flusher = torbo_policy::AuditLog::spawn_flusher(state.audit.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(%addr, lan_access, "gateway listening");

    let router = build_router(state.clone());
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    flusher.abort();
    state.audit.flush();
    Ok(())
}
