//! Provider adapters — the closed, build-time-known set of upstream wire
//! formats this gateway speaks.
//!
//! Unlike the teacher's `BackendClient`, where each adapter owns its own
//! `reqwest::Client` and performs the HTTP call itself, here an adapter is
//! pure request/response *translation*: [`ProviderAdapter`] has no network
//! access at all. [`crate::dispatcher`] owns one shared `reqwest::Client`
//! and POSTs every upstream call itself, so failure classification (status
//! code, body substrings, rate-limit headers) happens in exactly one place
//! across all ten providers instead of being re-implemented per adapter.
//! `BackendClient` still does the enum-based static dispatch the teacher's
//! version did; only the responsibility split underneath it changed.

mod anthropic;
mod google;
mod codex;
mod openai_compat;

pub use anthropic::AnthropicAdapter;
pub use codex::CodexAdapter;
pub use google::GoogleAdapter;
pub use openai_compat::OpenAiCompatAdapter;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AdapterError;
use crate::profiles::Credential;

/// One outgoing header for an upstream request.
pub type Header = (String, String);

/// Static, process-constant facts about one upstream provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub base_url: &'static str,
    pub supports_streaming: bool,
    pub is_openai_compatible: bool,
    /// `(requests_per_minute, requests_per_day)`, when the provider publishes one.
    pub rate_limits: Option<(u32, u32)>,
    /// `true` when this provider is only ever reachable via a stored OAuth
    /// profile — it has no environment-variable API key fallback.
    pub oauth_only: bool,
}

/// The full provider roster. Order matches the default
/// `provider_fallback_order` in `config.example.toml`.
pub const PROVIDER_DEFS: &[ProviderDef] = &[
    ProviderDef {
        id: "openai",
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "openrouter",
        name: "OpenRouter",
        base_url: "https://openrouter.ai/api/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "dashscope",
        name: "Alibaba DashScope",
        base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "deepseek",
        name: "DeepSeek",
        base_url: "https://api.deepseek.com/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "xai",
        name: "xAI",
        base_url: "https://api.x.ai/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "groq",
        name: "Groq",
        base_url: "https://api.groq.com/openai/v1",
        supports_streaming: true,
        is_openai_compatible: true,
        rate_limits: Some((1_000, 14_400)),
        oauth_only: false,
    },
    ProviderDef {
        id: "anthropic",
        name: "Anthropic",
        base_url: "https://api.anthropic.com/v1",
        supports_streaming: true,
        is_openai_compatible: false,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "google",
        name: "Google Gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        supports_streaming: true,
        is_openai_compatible: false,
        rate_limits: None,
        oauth_only: false,
    },
    ProviderDef {
        id: "antigravity",
        name: "Antigravity",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        supports_streaming: true,
        is_openai_compatible: false,
        rate_limits: None,
        oauth_only: true,
    },
    ProviderDef {
        id: "codex",
        name: "Codex",
        base_url: "https://api.openai.com/v1",
        supports_streaming: true,
        is_openai_compatible: false,
        rate_limits: None,
        oauth_only: true,
    },
];

pub fn provider_def(id: &str) -> Option<&'static ProviderDef> {
    PROVIDER_DEFS.iter().find(|p| p.id == id)
}

/// The translation operations one upstream wire format needs. No method
/// performs I/O; the dispatcher owns the HTTP client and the SSE loop.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Build the upstream URL for one request. Default: `{base_url}/chat/completions`.
    fn build_url(&self, base_url: &str, _model: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    /// Produce auth and adapter-specific headers for this credential.
    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError>;

    /// Translate an OpenAI-shaped chat completion request body into this
    /// provider's wire format.
    fn format_request(&self, body: &Value, model: &str) -> Result<Value, AdapterError>;

    /// Translate a non-streaming upstream response back into an OpenAI
    /// completion. OpenAI-compatible adapters pass the body through
    /// unchanged; translating adapters override this.
    fn format_response(&self, raw: &Value, _model_id: Option<&str>) -> Result<Value, AdapterError> {
        Ok(raw.clone())
    }

    /// Refresh an OAuth credential. Takes the dispatcher's shared HTTP
    /// client rather than owning one, since this is the one adapter
    /// operation that genuinely needs to make a network call. Providers
    /// with no OAuth flow (plain API-key providers) never call this.
    async fn refresh_token(&self, _client: &reqwest::Client, _cred: &Credential) -> Result<Credential, AdapterError> {
        Err(AdapterError::RefreshUnsupported("this provider has no OAuth refresh flow".to_string()))
    }
}

/// Enum dispatch across the closed adapter set, mirroring the teacher's
/// `BackendClient` shape.
pub enum BackendClient {
    OpenAiCompat(OpenAiCompatAdapter),
    Anthropic(AnthropicAdapter),
    Google(GoogleAdapter),
    Codex(CodexAdapter),
}

impl BackendClient {
    /// Construct the adapter for a known provider id. Returns `None` for an
    /// id not present in [`PROVIDER_DEFS`].
    pub fn for_provider(provider_id: &str) -> Option<Self> {
        match provider_id {
            "openai" | "openrouter" | "dashscope" | "deepseek" | "xai" | "groq" => {
                Some(Self::OpenAiCompat(OpenAiCompatAdapter::new(provider_id)))
            }
            "anthropic" => Some(Self::Anthropic(AnthropicAdapter)),
            "google" | "antigravity" => Some(Self::Google(GoogleAdapter::new(provider_id))),
            "codex" => Some(Self::Codex(CodexAdapter)),
            _ => None,
        }
    }
}

#[async_trait]
impl ProviderAdapter for BackendClient {
    fn build_url(&self, base_url: &str, model: &str) -> String {
        match self {
            Self::OpenAiCompat(a) => a.build_url(base_url, model),
            Self::Anthropic(a) => a.build_url(base_url, model),
            Self::Google(a) => a.build_url(base_url, model),
            Self::Codex(a) => a.build_url(base_url, model),
        }
    }

    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError> {
        match self {
            Self::OpenAiCompat(a) => a.headers(cred),
            Self::Anthropic(a) => a.headers(cred),
            Self::Google(a) => a.headers(cred),
            Self::Codex(a) => a.headers(cred),
        }
    }

    fn format_request(&self, body: &Value, model: &str) -> Result<Value, AdapterError> {
        match self {
            Self::OpenAiCompat(a) => a.format_request(body, model),
            Self::Anthropic(a) => a.format_request(body, model),
            Self::Google(a) => a.format_request(body, model),
            Self::Codex(a) => a.format_request(body, model),
        }
    }

    fn format_response(&self, raw: &Value, model_id: Option<&str>) -> Result<Value, AdapterError> {
        match self {
            Self::OpenAiCompat(a) => a.format_response(raw, model_id),
            Self::Anthropic(a) => a.format_response(raw, model_id),
            Self::Google(a) => a.format_response(raw, model_id),
            Self::Codex(a) => a.format_response(raw, model_id),
        }
    }

    async fn refresh_token(&self, client: &reqwest::Client, cred: &Credential) -> Result<Credential, AdapterError> {
        match self {
            Self::OpenAiCompat(a) => a.refresh_token(client, cred).await,
            Self::Anthropic(a) => a.refresh_token(client, cred).await,
            Self::Google(a) => a.refresh_token(client, cred).await,
            Self::Codex(a) => a.refresh_token(client, cred).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_def_resolves_every_roster_entry() {
        for id in ["openai", "openrouter", "dashscope", "deepseek", "xai", "groq", "anthropic", "google", "antigravity", "codex"] {
            assert!(provider_def(id).is_some(), "missing provider def for {id}");
        }
    }

    #[test]
    fn provider_def_returns_none_for_unknown_id() {
        assert!(provider_def("nonexistent").is_none());
    }

    #[test]
    fn oauth_only_providers_are_flagged() {
        assert!(provider_def("antigravity").unwrap().oauth_only);
        assert!(provider_def("codex").unwrap().oauth_only);
        assert!(!provider_def("openai").unwrap().oauth_only);
    }

    #[test]
    fn backend_client_for_provider_covers_the_whole_roster() {
        for id in ["openai", "openrouter", "dashscope", "deepseek", "xai", "groq", "anthropic", "google", "antigravity", "codex"] {
            assert!(BackendClient::for_provider(id).is_some(), "no adapter for {id}");
        }
        assert!(BackendClient::for_provider("nonexistent").is_none());
    }
}
