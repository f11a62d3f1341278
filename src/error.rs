//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] renders the dispatcher's failure taxonomy (auth, rate_limit,
//! billing, timeout, model_not_found, format, unknown) to the wire-level
//! shapes clients expect, instead of collapsing everything to `500`.
//! Subsystems raise their own `thiserror` enums; the dispatcher is the only
//! place that converts those into an `AppError` and picks the externally
//! visible status code and body.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// Errors raised by [`crate::profiles::ProfileStore`].
#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("failed to read profile store at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write profile store at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt profile store document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised while formatting a request for, or parsing a response from,
/// a provider adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unsupported model for this provider: {0}")]
    UnsupportedModel(String),
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
    #[error("token refresh is not supported for provider {0}")]
    RefreshUnsupported(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// The unified HTTP error type returned by every client-facing handler.
///
/// Constructed directly by the dispatcher, which already knows which
/// taxonomy entry applies and what the client should see, or via the blanket
/// [`From`] impl for unexpected internal failures, which degrade to `500`.
#[derive(Debug)]
pub enum AppError {
    /// `401` — the `Authorization: Bearer sk-sr-...` header failed validation.
    InvalidApiKey,
    /// `404` — an explicitly requested model string did not resolve.
    ModelNotFound(String),
    /// `400` — `X-Smart-Router-Profile` (or `profile`/`profile_id` in the
    /// body) named an unknown profile id.
    ProfileNotFound(String),
    /// `400` — the pinned profile's provider does not match the resolved target provider.
    ProfileProviderMismatch { profile: String, expected: String, actual: String },
    /// `400` — an adapter pre-check rejected the request (e.g. unsupported model).
    BadRequest(String),
    /// `429` — at least one attempted candidate reported a retryable rate
    /// limit, timeout, or unknown failure. `retry_after_secs` is the minimum
    /// positive wait observed across attempted candidates; `google_style`
    /// selects the `RESOURCE_EXHAUSTED` body shape when an Antigravity
    /// cooldown dominated the exhaustion.
    RateLimited { retry_after_secs: u64, google_style: bool },
    /// `503` — no candidate could even be attempted.
    ServiceUnavailable { retry_after_secs: u64 },
    /// Anything else — surfaced as `500` with the error's `Display` text.
    Internal(anyhow::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidApiKey => write!(f, "invalid API key"),
            Self::ModelNotFound(m) => write!(f, "model not found: {m}"),
            Self::ProfileNotFound(p) => write!(f, "profile not found: {p}"),
            Self::ProfileProviderMismatch { profile, expected, actual } => write!(
                f,
                "profile {profile} belongs to provider {actual}, expected {expected}"
            ),
            Self::BadRequest(m) => write!(f, "{m}"),
            Self::RateLimited { retry_after_secs, .. } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            Self::ServiceUnavailable { retry_after_secs } => {
                write!(f, "service unavailable, retry after {retry_after_secs}s")
            }
            Self::Internal(e) => write!(f, "{e}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, retry_after, body): (StatusCode, Option<u64>, Value) = match &self {
            Self::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                None,
                json!({ "error": { "code": "invalid_api_key", "message": "Invalid or missing API key." } }),
            ),
            Self::ModelNotFound(m) => (
                StatusCode::NOT_FOUND,
                None,
                json!({ "error": { "code": "model_not_found", "message": format!("Model not found: {m}") } }),
            ),
            Self::ProfileNotFound(p) => (
                StatusCode::BAD_REQUEST,
                None,
                json!({ "error": { "code": "profile_not_found", "message": format!("Profile not found: {p}") } }),
            ),
            Self::ProfileProviderMismatch { profile, expected, actual } => (
                StatusCode::BAD_REQUEST,
                None,
                json!({
                    "error": {
                        "code": "profile_provider_mismatch",
                        "message": format!(
                            "Profile {profile} belongs to provider {actual}, but the resolved target is {expected}."
                        ),
                    }
                }),
            ),
            Self::BadRequest(m) => (
                StatusCode::BAD_REQUEST,
                None,
                json!({ "error": { "code": "bad_request", "message": m } }),
            ),
            Self::RateLimited { retry_after_secs, google_style } => {
                let body = if *google_style {
                    json!({
                        "error": {
                            "code": 429,
                            "status": "RESOURCE_EXHAUSTED",
                            "details": [{ "retryDelay": format!("{retry_after_secs}s") }],
                        }
                    })
                } else {
                    json!({
                        "error": {
                            "type": "rate_limit_exceeded",
                            "code": 429,
                            "retry_after": retry_after_secs,
                        }
                    })
                };
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs), body)
            }
            Self::ServiceUnavailable { retry_after_secs } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Some(*retry_after_secs),
                json!({ "error": { "code": "service_unavailable", "message": "No upstream candidate was available." } }),
            ),
            Self::Internal(e) => {
                tracing::warn!(error = %e, "unhandled internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    json!({ "error": { "code": "internal_error", "message": e.to_string() } }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<ProfileStoreError> for AppError {
    fn from(e: ProfileStoreError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<AdapterError> for AppError {
    fn from(e: AdapterError) -> Self {
        match &e {
            AdapterError::UnsupportedModel(_) => Self::BadRequest(e.to_string()),
            _ => Self::Internal(e.into()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}
