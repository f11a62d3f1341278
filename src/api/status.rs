//! Public readiness endpoint (`GET /health`, client port).
//!
//! Distinct from `/healthz`: this one reports a coarse count of routable
//! providers and stored profiles rather than an unconditional 200, so a
//! caller can tell "the process is up" apart from "the process can actually
//! reach an upstream".

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::dispatcher::RouterState;

/// `GET /health` — `{status: "ok", providers: n, profiles: n}`.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let providers = state.profiles.available_providers().await.len();
    let profiles = state.profiles.list_all().await.len();

    Json(json!({
        "status": "ok",
        "providers": providers,
        "profiles": profiles,
    }))
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::{
        config::{Config, GatewayConfig},
        dispatcher::RouterState,
        profiles::ProfileStore,
        traffic::TrafficLog,
    };

    async fn minimal_state() -> Arc<RouterState> {
        let config = Config {
            gateway: GatewayConfig {
                client_port: 18100,
                admin_port: 18101,
                traffic_log_capacity: 10,
                log_level: None,
                rate_limit_rpm: None,
                admin_token_env: None,
                client_key_env: None,
                auth_store_path: None,
                timeout_ms: 30_000,
            },
            scoring: Default::default(),
            tiers: Default::default(),
            provider_fallback_order: Vec::new(),
            provider_rate_limits: Default::default(),
        };
        let profiles = Arc::new(ProfileStore::load(PathBuf::from("/tmp/smart-router-health-test.json"), Default::default()).await.unwrap());
        let traffic = Arc::new(TrafficLog::new(10));
        Arc::new(RouterState::new(config, PathBuf::default(), profiles, traffic).unwrap())
    }

    #[tokio::test]
    async fn health_reports_zero_with_no_providers_or_profiles() {
        let state = minimal_state().await;
        let app = crate::api::client::router(state);
        let resp = app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["providers"], 0);
        assert_eq!(json["profiles"], 0);
    }

    #[tokio::test]
    async fn health_counts_env_backed_providers() {
        unsafe { std::env::set_var("GROQ_API_KEY", "sk-test") };
        let state = minimal_state().await;
        let app = crate::api::client::router(state);
        let resp = app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["providers"], 1);
        unsafe { std::env::remove_var("GROQ_API_KEY") };
    }
}
