//! Admin API — operator-facing profile CRUD and traffic introspection.
//!
//! Mounted on its own port so it can be firewalled independently of the
//! client-facing API (e.g. reachable only from the internal network).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    dispatcher::RouterState,
    error::AppError,
    profiles::Credential,
};

/// Build the admin-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/profiles", get(list_profiles).post(upsert_profile))
        .route("/admin/profiles/:id", axum::routing::delete(remove_profile))
        .route("/admin/profiles/:id/clear-cooldown", post(clear_cooldown))
        .route("/metrics", get(crate::api::metrics::metrics))
        .with_state(state)
}

/// GET /admin/health — liveness plus a coarse summary of routing surface area.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    let profiles = state.profiles.list_all().await;
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "tiers": {
            "simple": config.tiers.simple.len(),
            "medium": config.tiers.medium.len(),
            "complex": config.tiers.complex.len(),
            "reasoning": config.tiers.reasoning.len(),
        },
        "profiles": profiles.len(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N traffic entries plus aggregate stats.
pub async fn traffic(State(state): State<Arc<RouterState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.traffic_log.recent(q.limit).await;
    let stats = state.traffic_log.stats().await;
    Json(json!({ "stats": stats, "entries": entries }))
}

/// GET /admin/config — current live config with no credentials to redact
/// (the config file carries no secrets; only env var *names*).
pub async fn config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();
    Json(json!({
        "gateway": {
            "client_port": cfg.gateway.client_port,
            "admin_port": cfg.gateway.admin_port,
            "traffic_log_capacity": cfg.gateway.traffic_log_capacity,
            "rate_limit_rpm": cfg.gateway.rate_limit_rpm,
        },
        "scoring": {
            "dimensions": cfg.scoring.dimensions.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
            "tier_medium_min": cfg.scoring.tier_medium_min,
            "tier_complex_min": cfg.scoring.tier_complex_min,
            "tier_reasoning_min": cfg.scoring.tier_reasoning_min,
        },
        "tiers": cfg.tiers,
        "provider_fallback_order": cfg.provider_fallback_order,
    }))
}

/// GET /admin/profiles — every stored profile, credential secrets excluded.
pub async fn list_profiles(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(state.profiles.list_all().await)
}

#[derive(Deserialize)]
pub struct UpsertProfileRequest {
    pub provider: String,
    pub credential: Credential,
    #[serde(default)]
    pub label: Option<String>,
}

/// POST /admin/profiles — write or replace one stored credential.
pub async fn upsert_profile(State(state): State<Arc<RouterState>>, Json(req): Json<UpsertProfileRequest>) -> Result<impl IntoResponse, AppError> {
    let id = state.profiles.upsert_profile(&req.provider, req.credential, req.label.as_deref()).await?;
    Ok((StatusCode::OK, Json(json!({ "id": id }))))
}

/// DELETE /admin/profiles/:id
pub async fn remove_profile(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let existed = state.profiles.remove_profile(&id).await?;
    let status = if existed { StatusCode::OK } else { StatusCode::NOT_FOUND };
    Ok((status, Json(json!({ "removed": existed }))))
}

/// POST /admin/profiles/:id/clear-cooldown — operator override.
pub async fn clear_cooldown(State(state): State<Arc<RouterState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    state.profiles.clear_cooldown(&id).await?;
    Ok(Json(json!({ "cleared": true })))
}
