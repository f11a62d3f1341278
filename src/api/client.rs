//! Client-facing API — the endpoint callers talk to.
//!
//! Thin HTTP translation layer: all routing logic lives in
//! [`crate::dispatcher`]. Handlers turn a [`crate::dispatcher::DispatchOutcome`]
//! into either a JSON response (buffered) or a live SSE body (streaming), and
//! translate [`AppError`] into the wire-level shapes clients expect.

use std::{pin::Pin, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::{
    dispatcher::{dispatch_chat_completion, DispatchOutcome, ResponseMeta, RouterState},
    error::AppError,
    streaming::{Dialect, StreamTranslator},
    traffic::{RequestStats, TrafficSink},
};

/// Build the client-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/health", get(crate::api::status::health))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

fn pinned_profile_from_headers(headers: &HeaderMap) -> Option<String> {
    headers.get("x-smart-router-profile").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn meta_headers(meta: &ResponseMeta) -> [(&'static str, String); 5] {
    [
        ("x-smart-router-provider", meta.provider.clone()),
        ("x-smart-router-profile", meta.profile_id.clone().unwrap_or_default()),
        ("x-smart-router-tier", meta.tier.as_str().to_string()),
        ("x-smart-router-score", meta.score.to_string()),
        ("x-smart-router-reason", meta.reason.to_string()),
    ]
}

fn apply_headers(response: &mut Response, pairs: impl IntoIterator<Item = (&'static str, String)>) {
    for (name, value) in pairs {
        if let Ok(v) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, v);
        }
    }
}

/// POST /v1/chat/completions
pub async fn chat_completions(State(state): State<Arc<RouterState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let pinned_profile = pinned_profile_from_headers(&headers);

    match dispatch_chat_completion(&state, body, pinned_profile).await {
        Err(e) => e.into_response(),
        Ok((meta, DispatchOutcome::Buffered(mut openai_body))) => {
            if let Some(obj) = openai_body.as_object_mut() {
                obj.insert(
                    "_routing".to_string(),
                    json!({
                        "tier": meta.tier.as_str(),
                        "provider": meta.provider,
                        "model": meta.model,
                        "score": meta.score,
                        "profileId": meta.profile_id,
                    }),
                );
            }
            let mut response = (StatusCode::OK, Json(openai_body)).into_response();
            apply_headers(&mut response, meta_headers(&meta));
            response
        }
        Ok((meta, DispatchOutcome::Stream { dialect, model, response: upstream })) => {
            let body = streaming_body(Arc::clone(&state), upstream, dialect, model, &meta);
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .body(body)
                .expect("streaming response build");
            apply_headers(
                &mut response,
                [
                    ("x-smart-router-provider", meta.provider.clone()),
                    ("x-smart-router-profile", meta.profile_id.clone().unwrap_or_default()),
                ],
            );
            response
        }
    }
}

struct StreamState {
    upstream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    translator: StreamTranslator,
    dialect: Dialect,
    pending: std::collections::VecDeque<Bytes>,
    finished: bool,
    recorded: bool,
    state: Arc<RouterState>,
    provider: String,
    model: String,
    profile_id: Option<String>,
    tier: String,
    score: f64,
    t0: std::time::Instant,
}

/// Build the downstream SSE body for a streaming dispatch outcome.
///
/// Pass-through dialects forward upstream bytes verbatim, feeding a copy
/// into the translator purely for opportunistic token accounting. Transform
/// dialects (`Gemini`, `ResponsesApi`) emit only what [`StreamTranslator`]
/// produces. Either way, a [`RequestStats`] entry is recorded once the
/// upstream stream ends — the one place in the streaming path that still
/// needs to happen after [`crate::dispatcher::dispatch_chat_completion`] has
/// already returned.
fn streaming_body(state: Arc<RouterState>, upstream: reqwest::Response, dialect: Dialect, model: String, meta: &ResponseMeta) -> Body {
    let init = StreamState {
        upstream: Box::pin(upstream.bytes_stream()),
        translator: StreamTranslator::new(dialect, model.clone()),
        dialect,
        pending: std::collections::VecDeque::new(),
        finished: false,
        recorded: false,
        state,
        provider: meta.provider.clone(),
        model,
        profile_id: meta.profile_id.clone(),
        tier: meta.tier.as_str().to_lowercase(),
        score: meta.score,
        t0: std::time::Instant::now(),
    };

    let stream = futures_util::stream::unfold(init, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Some((Ok::<Bytes, std::convert::Infallible>(chunk), st));
            }
            if st.finished {
                if !st.recorded {
                    record_stream_stats(&st).await;
                    st.recorded = true;
                }
                return None;
            }

            match st.upstream.next().await {
                Some(Ok(bytes)) => {
                    if st.dialect == Dialect::PassThrough {
                        let _ = st.translator.push(&bytes);
                        st.pending.push_back(bytes);
                    } else {
                        for emitted in st.translator.push(&bytes) {
                            st.pending.push_back(Bytes::from(emitted.to_sse()));
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "upstream stream read failed, ending early");
                    st.finished = true;
                }
                None => {
                    if st.dialect != Dialect::PassThrough {
                        for emitted in st.translator.finish() {
                            st.pending.push_back(Bytes::from(emitted.to_sse()));
                        }
                    }
                    st.finished = true;
                }
            }
        }
    });

    Body::from_stream(stream)
}

async fn record_stream_stats(st: &StreamState) {
    let mut stats = RequestStats::new(st.provider.clone(), st.model.clone(), st.tier.clone());
    stats.tier_score = st.score;
    stats.profile_id = st.profile_id.clone();
    stats.latency_ms = st.t0.elapsed().as_millis() as u64;
    stats.prompt_tokens = st.translator.usage.prompt_tokens;
    stats.completion_tokens = st.translator.usage.completion_tokens;
    st.state.traffic.record_request(stats).await;
}

/// GET /v1/models — every model whose provider currently has a usable credential.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let available = state.profiles.available_providers().await;
    let created = chrono::Utc::now().timestamp();

    let data: Vec<Value> = state
        .models
        .all()
        .iter()
        .filter(|m| available.contains(&m.provider))
        .map(|m| {
            json!({
                "id": m.slug,
                "object": "model",
                "created": created,
                "owned_by": m.provider,
                "name": m.model_id,
                "capabilities": m.capabilities,
                "free": m.free,
                "pricing": m.pricing,
                "context_window": m.context_window,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use axum::{
        body::to_bytes,
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
                client_port: 18090,
                admin_port: 18091,
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
        let profiles = Arc::new(ProfileStore::load(PathBuf::from("/tmp/smart-router-client-test.json"), Default::default()).await.unwrap());
        let traffic = Arc::new(TrafficLog::new(10));
        Arc::new(RouterState::new(config, PathBuf::default(), profiles, traffic).unwrap())
    }

    #[tokio::test]
    async fn models_list_is_empty_with_no_available_providers() {
        let state = minimal_state().await;
        let app = super::router(state);
        let resp = app.oneshot(Request::get("/v1/models").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["object"], "list");
        assert!(json["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn models_list_includes_models_for_available_env_provider() {
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-test") };
        let state = minimal_state().await;
        let app = super::router(state);
        let resp = app.oneshot(Request::get("/v1/models").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let data = json["data"].as_array().unwrap();
        assert!(data.iter().any(|m| m["owned_by"] == "openai"));
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let state = minimal_state().await;
        let app = super::router(state);
        let resp = app.oneshot(Request::get("/healthz").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_completions_returns_service_unavailable_with_no_providers() {
        let state = minimal_state().await;
        let app = super::router(state);
        let req = Request::post("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
