//! Shared adapter for every upstream that already speaks OpenAI's wire
//! format: `openai`, `openrouter`, `dashscope`, `deepseek`, `xai`, `groq`.
//!
//! Request and response bodies pass through unchanged; the only per-provider
//! variation is the auth header shape and, for OpenRouter, two attribution
//! headers it asks integrators to send.

use async_trait::async_trait;
use serde_json::Value;

use super::{Header, ProviderAdapter};
use crate::error::AdapterError;
use crate::profiles::Credential;

pub struct OpenAiCompatAdapter {
    provider_id: &'static str,
}

impl OpenAiCompatAdapter {
    pub fn new(provider_id: &str) -> Self {
        let provider_id = match provider_id {
            "openai" => "openai",
            "openrouter" => "openrouter",
            "dashscope" => "dashscope",
            "deepseek" => "deepseek",
            "xai" => "xai",
            "groq" => "groq",
            other => unreachable!("OpenAiCompatAdapter constructed for non-compatible provider {other}"),
        };
        Self { provider_id }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError> {
        let key = match cred {
            Credential::ApiKey { key, .. } => key.clone(),
            Credential::Token { token, .. } => token.clone(),
            Credential::OAuth { access_token, .. } => access_token.clone(),
        };
        let mut headers = vec![("authorization".to_string(), format!("Bearer {key}"))];
        if self.provider_id == "openrouter" {
            headers.push(("HTTP-Referer".to_string(), "https://github.com".to_string()));
            headers.push(("X-Title".to_string(), "smart-router".to_string()));
        }
        Ok(headers)
    }

    fn format_request(&self, body: &Value, model: &str) -> Result<Value, AdapterError> {
        let mut req = body.clone();
        req["model"] = Value::String(model.to_string());
        Ok(req)
    }

    fn format_response(&self, raw: &Value, _model_id: Option<&str>) -> Result<Value, AdapterError> {
        Ok(raw.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(key: &str) -> Credential {
        Credential::ApiKey { provider: "openai".into(), key: key.to_string(), base_url: None }
    }

    #[test]
    fn headers_carry_bearer_token() {
        let adapter = OpenAiCompatAdapter::new("openai");
        let headers = adapter.headers(&cred("sk-test")).unwrap();
        assert!(headers.contains(&("authorization".to_string(), "Bearer sk-test".to_string())));
    }

    #[test]
    fn openrouter_adds_attribution_headers() {
        let adapter = OpenAiCompatAdapter::new("openrouter");
        let headers = adapter.headers(&cred("sk-or-test")).unwrap();
        assert!(headers.iter().any(|(k, _)| k == "HTTP-Referer"));
        assert!(headers.iter().any(|(k, _)| k == "X-Title"));
    }

    #[test]
    fn other_providers_do_not_get_openrouter_headers() {
        let adapter = OpenAiCompatAdapter::new("groq");
        let headers = adapter.headers(&cred("gsk-test")).unwrap();
        assert!(!headers.iter().any(|(k, _)| k == "HTTP-Referer"));
    }

    #[test]
    fn format_request_rewrites_model_to_the_resolved_upstream_id() {
        let adapter = OpenAiCompatAdapter::new("openai");
        let body = serde_json::json!({ "model": "auto", "messages": [] });
        let out = adapter.format_request(&body, "gpt-4o").unwrap();
        assert_eq!(out["model"], "gpt-4o");
    }

    #[test]
    fn format_response_passes_through_unchanged() {
        let adapter = OpenAiCompatAdapter::new("openai");
        let raw = serde_json::json!({ "choices": [] });
        assert_eq!(adapter.format_response(&raw, None).unwrap(), raw);
    }
}
