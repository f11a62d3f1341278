//! Request dispatch — the brain of smart-router.
//!
//! [`RouterState`] is the shared application state injected into every axum
//! handler. [`dispatch_chat_completion`] is the whole algorithm: resolve a
//! routing decision from the prompt or an explicit model, walk the resulting
//! candidate list one attempt at a time, and return either a buffered
//! response or a live upstream [`reqwest::Response`] for the caller to
//! stream back. Exactly one `reqwest::Client` is shared across every
//! candidate and every provider — adapters never own their own.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    backends::{provider_def, BackendClient, ProviderAdapter},
    config::{CandidateRef, Config, Tier},
    error::AppError,
    models::ModelRegistry,
    profiles::{Credential, FailureReason, ProfileStore},
    scoring::{self, CompiledScoring},
    selector,
    streaming::dialect_for,
    traffic::{RequestStats, TrafficSink},
};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

/// Shared application state injected into every request handler via [`axum::extract::State`].
pub struct RouterState {
    /// Atomically-swappable live config; the lock is held only for the
    /// duration of `Arc::clone`, so it never blocks request handling.
    config_lock: std::sync::RwLock<Arc<Config>>,
    /// Compiled scoring patterns, rebuilt alongside the config on every hot-reload.
    scoring_lock: std::sync::RwLock<Arc<CompiledScoring>>,
    /// Path to the config file on disk — used by the hot-reload background task.
    pub config_path: PathBuf,
    pub profiles: Arc<ProfileStore>,
    pub models: ModelRegistry,
    /// The dispatcher's write-only view — matches the external `TrafficSink`
    /// collaborator interface, so a durable sink could be swapped in without
    /// touching dispatch logic.
    pub traffic: Arc<dyn TrafficSink>,
    /// Concrete handle to the same instance behind `traffic`, for the admin
    /// API's `recent()`/`stats()` reads — `TrafficSink` itself exposes only
    /// `record_request`, since those reads aren't part of the collaborator contract.
    pub traffic_log: Arc<crate::traffic::TrafficLog>,
    http: Client,
    pub started_at: std::time::Instant,
    /// Bearer token required on the client port. `None` disables client auth.
    pub client_key: Option<String>,
    /// Bearer token required for admin API access. `None` disables admin auth.
    pub admin_token: Option<String>,
    /// Per-IP token bucket for the client port. `None` when `rate_limit_rpm` is unset.
    pub rate_limiter: Option<Arc<crate::rate_limiter::RateLimiter>>,
}

impl RouterState {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        profiles: Arc<ProfileStore>,
        traffic_log: Arc<crate::traffic::TrafficLog>,
    ) -> anyhow::Result<Self> {
        let scoring = CompiledScoring::compile(&config.scoring)?;

        // SMART_ROUTER_CLIENT_KEY / SMART_ROUTER_ADMIN_TOKEN hold the bearer
        // value directly; `client_key_env`/`admin_token_env` name a different
        // env var to read it from instead, for deployments that prefer to
        // wire the secret in under their own name.
        let client_key = std::env::var("SMART_ROUTER_CLIENT_KEY")
            .ok()
            .or_else(|| config.gateway.client_key_env.as_deref().and_then(|var| std::env::var(var).ok()))
            .filter(|k| !k.is_empty());
        let admin_token = std::env::var("SMART_ROUTER_ADMIN_TOKEN")
            .ok()
            .or_else(|| config.gateway.admin_token_env.as_deref().and_then(|var| std::env::var(var).ok()))
            .filter(|t| !t.is_empty());
        let rate_limiter = config
            .gateway
            .rate_limit_rpm
            .filter(|&rpm| rpm > 0)
            .map(|rpm| Arc::new(crate::rate_limiter::RateLimiter::new(rpm)));

        Ok(Self {
            config_lock: std::sync::RwLock::new(Arc::new(config)),
            scoring_lock: std::sync::RwLock::new(Arc::new(scoring)),
            config_path,
            profiles,
            models: ModelRegistry::default(),
            traffic: Arc::clone(&traffic_log) as Arc<dyn TrafficSink>,
            traffic_log,
            http: Client::builder().build().expect("failed to build reqwest client"),
            started_at: std::time::Instant::now(),
            client_key,
            admin_token,
            rate_limiter,
        })
    }

    /// Returns a snapshot of the current live config.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    pub fn scoring(&self) -> Arc<CompiledScoring> {
        self.scoring_lock.read().expect("scoring lock poisoned").clone()
    }

    /// Atomically replace the live config and its compiled scoring patterns.
    /// Called only from the hot-reload background task; a config whose
    /// scoring section fails to compile is rejected and the previous config
    /// stays live.
    pub fn reload_config(&self, new_config: Config) -> anyhow::Result<()> {
        let compiled = CompiledScoring::compile(&new_config.scoring)?;
        *self.config_lock.write().expect("config lock poisoned") = Arc::new(new_config);
        *self.scoring_lock.write().expect("scoring lock poisoned") = Arc::new(compiled);
        Ok(())
    }
}

/// Response metadata surfaced as `X-Smart-Router-*` headers and, for
/// non-streaming responses, the `_routing` body field.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub provider: String,
    pub model: String,
    pub profile_id: Option<String>,
    pub tier: Tier,
    pub score: f64,
    pub reason: &'static str,
}

/// The outcome of a successful dispatch.
pub enum DispatchOutcome {
    Buffered(Value),
    Stream { dialect: crate::streaming::Dialect, model: String, response: reqwest::Response },
}

struct RoutingContext {
    candidates: Vec<CandidateRef>,
    tier: Tier,
    score: f64,
    reason: &'static str,
}

/// Extract the most recent `role: "user"` message's content, for classification.
fn last_user_message(body: &Value) -> String {
    body.get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .and_then(|m| m.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// `true` when the requested model string asks for automatic routing:
/// absent, `"auto"`, or ending in `/auto`.
fn wants_auto_routing(requested_model: Option<&str>) -> bool {
    match requested_model {
        None => true,
        Some(m) => m == "auto" || m.ends_with("/auto"),
    }
}

async fn resolve_routing(
    state: &RouterState,
    config: &Config,
    available: &HashSet<String>,
    body: &Value,
) -> Result<RoutingContext, AppError> {
    let requested_model = body.get("model").and_then(Value::as_str);

    if !wants_auto_routing(requested_model) {
        let model_str = requested_model.unwrap();
        let entry = state.models.find(model_str).ok_or_else(|| AppError::ModelNotFound(model_str.to_string()))?;
        if available.contains(&entry.provider) {
            return Ok(RoutingContext {
                candidates: vec![CandidateRef { provider: entry.provider.clone(), model: entry.model_id.clone() }],
                tier: Tier::Simple,
                score: 0.0,
                reason: "explicit_model",
            });
        }
        // The requested provider has no usable credential right now — fall
        // through to automatic routing rather than failing outright.
        warn!(model = model_str, provider = %entry.provider, "explicit model's provider unavailable, falling back to auto routing");
    }

    let prompt = last_user_message(body);
    let result = scoring::classify(&prompt, &state.scoring());
    let decision = selector::select(result.tier, available, config);
    if decision.is_empty() {
        return Err(AppError::ServiceUnavailable { retry_after_secs: 5 });
    }

    Ok(RoutingContext {
        candidates: decision.all(),
        tier: result.tier,
        score: result.total_score,
        reason: "auto_classified",
    })
}

/// Status-code + body-substring + header classification of a failed upstream
/// attempt. Returns the failure reason and, when the upstream told us
/// exactly how long to wait, the cooldown in milliseconds.
fn classify_failure(status: StatusCode, headers: &reqwest::header::HeaderMap, body: &str) -> (FailureReason, Option<i64>) {
    let lower = body.to_lowercase();

    let mut reason = match status.as_u16() {
        429 => FailureReason::RateLimit,
        404 => FailureReason::ModelNotFound,
        401 | 403 => FailureReason::Auth,
        402 => FailureReason::Billing,
        504 | 408 => FailureReason::Timeout,
        _ => FailureReason::Unknown,
    };

    if reason == FailureReason::Unknown {
        const RATE_LIMIT_MARKERS: &[&str] =
            &["rate_limit", "rate limit", "too many requests", "quota_exceeded", "usage_limit", "limit_exceeded", "exhausted"];
        const AUTH_MARKERS: &[&str] = &["invalid_api_key", "unauthorized", "permission_denied", "invalid api key"];
        const BILLING_MARKERS: &[&str] = &["billing", "insufficient_balance", "payment_required", "insufficient_quota"];

        if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
            reason = FailureReason::RateLimit;
        } else if lower.contains("model_not_found") || lower.contains("model not found") || lower.contains("does not exist") {
            reason = FailureReason::ModelNotFound;
        } else if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
            reason = FailureReason::Auth;
        } else if BILLING_MARKERS.iter().any(|m| lower.contains(m)) {
            reason = FailureReason::Billing;
        }
    }

    let has_rate_limit_header = ["retry-after", "x-ratelimit-reset", "x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"]
        .iter()
        .any(|h| headers.contains_key(*h));
    if has_rate_limit_header {
        reason = FailureReason::RateLimit;
    }

    (reason, extract_cooldown_ms(headers))
}

/// Pull an explicit retry delay out of rate-limit-shaped headers.
/// `Retry-After` is preferred, accepted either as an integer-seconds count or
/// an RFC 7231 HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`); otherwise the
/// various `X-RateLimit-Reset*` headers are read as either a relative second
/// count or, when large enough to be a Unix timestamp, converted to a
/// relative wait.
fn extract_cooldown_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    if let Some(raw) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = raw.parse::<i64>() {
            return Some(secs.max(0) * 1000);
        }
        if let Ok(at) = chrono::DateTime::parse_from_rfc2822(raw.trim()) {
            return Some((at.timestamp_millis() - now_ms()).max(0));
        }
    }
    for name in ["x-ratelimit-reset", "x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"] {
        let Some(raw) = headers.get(name).and_then(|v| v.to_str().ok()) else { continue };
        let Ok(n) = raw.parse::<i64>() else { continue };
        // Values that look like a Unix timestamp (vs. a relative second count).
        if n > 1_700_000_000 {
            return Some(((n * 1000) - now_ms()).max(0));
        }
        return Some(n.max(0) * 1000);
    }
    None
}

fn credential_base_url(cred: &Credential) -> Option<String> {
    match cred {
        Credential::ApiKey { base_url: Some(url), .. } => Some(url.clone()),
        Credential::OAuth { resource_url: Some(url), .. } => Some(url.clone()),
        _ => None,
    }
}

/// Rewrite a Gemini `generateContent` URL to its streaming counterpart.
fn gemini_streaming_url(url: &str) -> String {
    url.replace(":generateContent", ":streamGenerateContent?alt=sse")
}

fn failure_stats(ctx_tier: Tier, ctx_score: f64, candidate: &CandidateRef, profile_id: Option<&str>, latency_ms: u64, error: &str) -> RequestStats {
    let mut stats = RequestStats::new(candidate.provider.clone(), candidate.model.clone(), ctx_tier.as_str().to_lowercase());
    stats.tier_score = ctx_score;
    stats.profile_id = profile_id.map(str::to_string);
    stats.latency_ms = latency_ms;
    stats.success = false;
    stats.error = Some(error.to_string());
    stats
}

/// Dispatch one `/v1/chat/completions` request: resolve candidates, attempt
/// each in order, and return the first success. `pinned_profile` comes from
/// the `X-Smart-Router-Profile` header or the request body's `profile`/
/// `profile_id` fields and restricts the attempt to exactly that profile.
pub async fn dispatch_chat_completion(
    state: &RouterState,
    body: Value,
    pinned_profile: Option<String>,
) -> Result<(ResponseMeta, DispatchOutcome), AppError> {
    let config = state.config();
    let available = state.profiles.available_providers().await;
    if available.is_empty() {
        return Err(AppError::ServiceUnavailable { retry_after_secs: 5 });
    }

    let ctx = resolve_routing(state, &config, &available, &body).await?;
    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let pinned_profile = pinned_profile
        .or_else(|| body.get("profile").and_then(Value::as_str).map(str::to_string))
        .or_else(|| body.get("profile_id").and_then(Value::as_str).map(str::to_string));

    let mut candidates = ctx.candidates.clone();
    let mut pinned_cred: Option<(String, Credential)> = None;
    if let Some(pid) = pinned_profile {
        let cred = state.profiles.get_credential(&pid).await.ok_or_else(|| AppError::ProfileNotFound(pid.clone()))?;
        let expected = candidates.first().map(|c| c.provider.clone()).unwrap_or_default();
        if cred.provider() != expected {
            return Err(AppError::ProfileProviderMismatch {
                profile: pid.clone(),
                expected,
                actual: cred.provider().to_string(),
            });
        }
        candidates.truncate(1);
        pinned_cred = Some((pid, cred));
    }

    if candidates.is_empty() {
        return Err(AppError::ServiceUnavailable { retry_after_secs: 5 });
    }

    // (wait_ms, is_antigravity) for every candidate that was actually attempted and failed.
    let mut attempted_waits: Vec<(i64, bool)> = Vec::new();

    for candidate in &candidates {
        let Some(adapter) = BackendClient::for_provider(&candidate.provider) else { continue };
        let Some(def) = provider_def(&candidate.provider) else { continue };

        let (profile_id, mut cred) = match &pinned_cred {
            Some((pid, cred)) => (Some(pid.clone()), cred.clone()),
            None => match state.profiles.pick_next_profile(&candidate.provider, Some(&candidate.model)).await {
                Some((pid, cred)) => (Some(pid), cred),
                None => match state.profiles.env_api_key(&candidate.provider) {
                    Some(key) => (
                        Some(format!("{}:env", candidate.provider)),
                        Credential::ApiKey { provider: candidate.provider.clone(), key, base_url: None },
                    ),
                    None => continue,
                },
            },
        };

        if cred.is_expired() {
            match adapter.refresh_token(&state.http, &cred).await {
                Ok(refreshed) => {
                    if let Some(pid) = &profile_id {
                        if let Err(e) = state.profiles.update_credential(pid, refreshed.clone()).await {
                            warn!(profile = %pid, error = %e, "failed to persist refreshed credential");
                        }
                    }
                    cred = refreshed;
                }
                Err(e) => {
                    debug!(provider = %candidate.provider, error = %e, "token refresh failed, attempting with stale token");
                }
            }
        }

        let base_url = credential_base_url(&cred).unwrap_or_else(|| def.base_url.to_string());
        let mut url = adapter.build_url(&base_url, &candidate.model);
        if streaming && dialect_for(&candidate.provider) == crate::streaming::Dialect::Gemini {
            url = gemini_streaming_url(&url);
        }

        let headers = match adapter.headers(&cred) {
            Ok(h) => h,
            Err(e) => {
                warn!(provider = %candidate.provider, error = %e, "adapter rejected credential, skipping candidate");
                continue;
            }
        };

        let mut upstream_body = adapter.format_request(&body, &candidate.model)?;
        if streaming {
            upstream_body["stream"] = json!(true);
        }
        if let Credential::OAuth { project_id: Some(project), .. } = &cred {
            upstream_body["project"] = json!(project);
        }

        let mut req = state.http.post(&url).timeout(Duration::from_millis(config.gateway.timeout_ms)).json(&upstream_body);
        for (name, value) in &headers {
            req = req.header(name, value);
        }

        let t0 = std::time::Instant::now();
        let response = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let latency_ms = t0.elapsed().as_millis() as u64;
                if let Some(pid) = &profile_id {
                    let _ = state.profiles.mark_failure(pid, FailureReason::Unknown, None, None).await;
                }
                state
                    .traffic
                    .record_request(failure_stats(ctx.tier, ctx.score, candidate, profile_id.as_deref(), latency_ms, &e.to_string()))
                    .await;
                attempted_waits.push((BACKOFF_FLOOR_MS, false));
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let latency_ms = t0.elapsed().as_millis() as u64;
            let resp_headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            let (reason, cooldown_ms) = classify_failure(status, &resp_headers, &text);
            let model_scoped = matches!(reason, FailureReason::RateLimit | FailureReason::ModelNotFound);

            if let Some(pid) = &profile_id {
                let _ = state
                    .profiles
                    .mark_failure(pid, reason, cooldown_ms, if model_scoped { Some(candidate.model.as_str()) } else { None })
                    .await;
            }
            state
                .traffic
                .record_request(failure_stats(ctx.tier, ctx.score, candidate, profile_id.as_deref(), latency_ms, &text))
                .await;

            attempted_waits.push((cooldown_ms.unwrap_or(BACKOFF_FLOOR_MS), candidate.provider == "antigravity"));
            continue;
        }

        // Success: mark usage immediately, even for a streaming response we
        // haven't finished reading yet — an upstream 200 OK is success.
        if let Some(pid) = &profile_id {
            let _ = state.profiles.increment_usage(pid).await;
            let _ = state.profiles.mark_used(pid).await;
        }

        let meta = ResponseMeta {
            provider: candidate.provider.clone(),
            model: candidate.model.clone(),
            profile_id: profile_id.clone(),
            tier: ctx.tier,
            score: ctx.score,
            reason: ctx.reason,
        };

        if streaming && def.supports_streaming {
            return Ok((meta, DispatchOutcome::Stream { dialect: dialect_for(&candidate.provider), model: candidate.model.clone(), response }));
        }

        let latency_ms = t0.elapsed().as_millis() as u64;
        let text = response.text().await.map_err(|e| AppError::Internal(e.into()))?;
        let raw: Value = serde_json::from_str(&text).map_err(|e| AppError::Internal(e.into()))?;
        let openai_body = adapter.format_response(&raw, Some(&candidate.model))?;

        let mut stats = RequestStats::new(candidate.provider.clone(), candidate.model.clone(), ctx.tier.as_str().to_lowercase());
        stats.tier_score = ctx.score;
        stats.profile_id = profile_id;
        stats.latency_ms = latency_ms;
        stats.prompt_tokens = openai_body.pointer("/usage/prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
        stats.completion_tokens = openai_body.pointer("/usage/completion_tokens").and_then(Value::as_u64).unwrap_or(0);
        state.traffic.record_request(stats).await;

        return Ok((meta, DispatchOutcome::Buffered(openai_body)));
    }

    if attempted_waits.is_empty() {
        return Err(AppError::ServiceUnavailable { retry_after_secs: 5 });
    }

    let antigravity_waits: Vec<i64> = attempted_waits.iter().filter(|(_, ag)| *ag).map(|(w, _)| *w).collect();
    if let Some(&dominant) = antigravity_waits.iter().max() {
        return Err(AppError::RateLimited { retry_after_secs: (dominant / 1000).max(0) as u64, google_style: true });
    }

    let positive: Vec<i64> = attempted_waits.iter().map(|(w, _)| *w).filter(|w| *w > 0).collect();
    if let Some(&min_wait) = positive.iter().min() {
        return Err(AppError::RateLimited { retry_after_secs: (min_wait / 1000).max(0) as u64, google_style: false });
    }

    Err(AppError::ServiceUnavailable { retry_after_secs: 5 })
}

/// Used as the reported wait for a failure with no explicit server-provided
/// cooldown header — matches the profile store's own shortest backoff rung.
const BACKOFF_FLOOR_MS: i64 = 30_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_auto_routing_covers_absent_auto_and_suffix() {
        assert!(wants_auto_routing(None));
        assert!(wants_auto_routing(Some("auto")));
        assert!(wants_auto_routing(Some("openai/auto")));
        assert!(!wants_auto_routing(Some("gpt-4o")));
    }

    #[test]
    fn last_user_message_finds_the_most_recent_user_turn() {
        let body = json!({
            "messages": [
                { "role": "user", "content": "first" },
                { "role": "assistant", "content": "reply" },
                { "role": "user", "content": "second" },
            ]
        });
        assert_eq!(last_user_message(&body), "second");
    }

    #[test]
    fn last_user_message_is_empty_when_no_user_turn_exists() {
        let body = json!({ "messages": [{ "role": "system", "content": "sys" }] });
        assert_eq!(last_user_message(&body), "");
    }

    #[test]
    fn classify_failure_maps_status_codes() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(classify_failure(StatusCode::TOO_MANY_REQUESTS, &headers, "").0, FailureReason::RateLimit);
        assert_eq!(classify_failure(StatusCode::NOT_FOUND, &headers, "").0, FailureReason::ModelNotFound);
        assert_eq!(classify_failure(StatusCode::UNAUTHORIZED, &headers, "").0, FailureReason::Auth);
        assert_eq!(classify_failure(StatusCode::PAYMENT_REQUIRED, &headers, "").0, FailureReason::Billing);
        assert_eq!(classify_failure(StatusCode::GATEWAY_TIMEOUT, &headers, "").0, FailureReason::Timeout);
    }

    #[test]
    fn classify_failure_refines_unknown_status_via_body_substring() {
        let headers = reqwest::header::HeaderMap::new();
        let (reason, _) = classify_failure(StatusCode::BAD_REQUEST, &headers, r#"{"error":"rate_limit_exceeded"}"#);
        assert_eq!(reason, FailureReason::RateLimit);
    }

    #[test]
    fn classify_failure_header_forces_rate_limit_even_on_generic_status() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "30".parse().unwrap());
        let (reason, cooldown) = classify_failure(StatusCode::BAD_REQUEST, &headers, "{}");
        assert_eq!(reason, FailureReason::RateLimit);
        assert_eq!(cooldown, Some(30_000));
    }

    #[test]
    fn extract_cooldown_prefers_retry_after_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("retry-after", "15".parse().unwrap());
        headers.insert("x-ratelimit-reset", "999".parse().unwrap());
        assert_eq!(extract_cooldown_ms(&headers), Some(15_000));
    }

    #[test]
    fn extract_cooldown_parses_http_date_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        let future = chrono::Utc::now() + chrono::Duration::seconds(60);
        headers.insert("retry-after", future.to_rfc2822().parse().unwrap());
        let wait = extract_cooldown_ms(&headers).unwrap();
        // Allow a little slack for test execution time.
        assert!((55_000..=61_000).contains(&wait), "wait was {wait}");
    }

    #[test]
    fn extract_cooldown_treats_large_reset_values_as_unix_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        let future = now_ms() / 1000 + 120;
        headers.insert("x-ratelimit-reset", future.to_string().parse().unwrap());
        let wait = extract_cooldown_ms(&headers).unwrap();
        // Allow a little slack for test execution time.
        assert!((100_000..=121_000).contains(&wait), "wait was {wait}");
    }

    #[test]
    fn extract_cooldown_treats_small_reset_values_as_relative_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-reset-requests", "45".parse().unwrap());
        assert_eq!(extract_cooldown_ms(&headers), Some(45_000));
    }

    #[test]
    fn gemini_streaming_url_swaps_the_endpoint() {
        let url = gemini_streaming_url("https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent");
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn credential_base_url_reads_api_key_override() {
        let cred = Credential::ApiKey { provider: "openai".into(), key: "x".into(), base_url: Some("https://proxy.internal/v1".into()) };
        assert_eq!(credential_base_url(&cred), Some("https://proxy.internal/v1".to_string()));
    }

    #[test]
    fn credential_base_url_is_none_for_plain_api_key() {
        let cred = Credential::ApiKey { provider: "openai".into(), key: "x".into(), base_url: None };
        assert_eq!(credential_base_url(&cred), None);
    }
}
