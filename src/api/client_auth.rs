//! Client-port bearer token authentication.
//!
//! The minimal in-process API-key registry: a single token seeded from
//! `SMART_ROUTER_CLIENT_KEY` (or the env var named by `client_key_env`). A
//! richer persistent key store (rotation, multiple keys, per-key usage
//! accounting) is an external collaborator and out of scope here — this is
//! just enough to keep the client port from being wide open by default.
//!
//! When `state.client_key` is `None`, the middleware is a no-op: client auth
//! is disabled. Absence of the header when a key *is* configured is also
//! permitted — only a present-but-wrong key is rejected.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::dispatcher::RouterState;

/// Axum middleware: rejects a present-but-invalid `Authorization: Bearer
/// sk-sr-...` header when `state.client_key` is configured.
pub async fn client_auth_middleware(State(state): State<Arc<RouterState>>, req: Request, next: Next) -> Response {
    let Some(expected) = &state.client_key else {
        return next.run(req).await;
    };

    let provided = req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        None => next.run(req).await,
        Some(token) if token == expected.as_str() => next.run(req).await,
        Some(_) => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer realm=\"smart-router\"")],
            axum::Json(serde_json::json!({
                "error": { "code": "invalid_api_key", "message": "Invalid or missing API key." }
            })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use crate::{
        config::{Config, GatewayConfig},
        dispatcher::RouterState,
        profiles::ProfileStore,
        traffic::TrafficLog,
    };

    async fn state_with_key(key: Option<&str>) -> Arc<RouterState> {
        if let Some(k) = key {
            unsafe { std::env::set_var("SMART_ROUTER_CLIENT_KEY", k) };
        } else {
            unsafe { std::env::remove_var("SMART_ROUTER_CLIENT_KEY") };
        }

        let config = Config {
            gateway: GatewayConfig {
                client_port: 18080,
                admin_port: 18081,
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
        let profiles = Arc::new(ProfileStore::load(PathBuf::from("/tmp/smart-router-client-auth-test.json"), Default::default()).await.unwrap());
        let traffic = Arc::new(TrafficLog::new(10));
        Arc::new(RouterState::new(config, PathBuf::default(), profiles, traffic).unwrap())
    }

    fn app(state: Arc<RouterState>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), super::client_auth_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn no_key_configured_passes_through_unauthenticated() {
        let state = state_with_key(None).await;
        let resp = app(state).oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_permitted_when_key_is_configured() {
        let state = state_with_key(Some("sk-sr-test")).await;
        let resp = app(state).oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn valid_key_is_accepted() {
        let state = state_with_key(Some("sk-sr-test")).await;
        let resp = app(state)
            .oneshot(Request::get("/").header("authorization", "Bearer sk-sr-test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let state = state_with_key(Some("sk-sr-test")).await;
        let resp = app(state)
            .oneshot(Request::get("/").header("authorization", "Bearer wrong").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "invalid_api_key");
    }
}
