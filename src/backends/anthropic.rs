//! Anthropic Messages API adapter.
//!
//! Translates between the OpenAI chat completions schema this gateway
//! speaks internally and Anthropic's
//! [`/v1/messages`](https://docs.anthropic.com/en/api/messages) API.
//!
//! # Protocol differences handled here
//!
//! | Concern | OpenAI | Anthropic |
//! |---|---|---|
//! | System prompt | First message with `role: "system"` | Top-level `system` field |
//! | Max tokens | Optional (`max_tokens`) | **Required** (`max_tokens`) |
//! | Finish reasons | `"stop"`, `"length"` | `"end_turn"`, `"max_tokens"` |
//! | Response shape | `choices[].message.content` | `content[].text` |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Header, ProviderAdapter};
use crate::error::AdapterError;
use crate::profiles::Credential;

/// Default max_tokens when the caller omits it. Required by Anthropic; sensible
/// ceiling for most conversational use-cases.
const DEFAULT_MAX_TOKENS: u64 = 8_192;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter;

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn build_url(&self, base_url: &str, _model: &str) -> String {
        format!("{}/messages", base_url.trim_end_matches('/'))
    }

    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError> {
        let key = match cred {
            Credential::ApiKey { key, .. } => key.clone(),
            _ => return Err(AdapterError::MalformedResponse("anthropic requires an API-key credential".into())),
        };
        Ok(vec![
            ("x-api-key".to_string(), key),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ])
    }

    fn format_request(&self, body: &Value, model: &str) -> Result<Value, AdapterError> {
        to_anthropic(body, model)
    }

    fn format_response(&self, raw: &Value, _model_id: Option<&str>) -> Result<Value, AdapterError> {
        from_anthropic(raw)
    }
}

/// Convert an OpenAI chat completions request body to the Anthropic Messages format.
pub(crate) fn to_anthropic(request: &Value, model: &str) -> Result<Value, AdapterError> {
    let max_tokens = request["max_tokens"].as_u64().unwrap_or(DEFAULT_MAX_TOKENS);

    let raw_messages = request["messages"]
        .as_array()
        .ok_or_else(|| AdapterError::MalformedResponse("`messages` array is required".into()))?;

    // Anthropic treats system content as a top-level field, not a message role.
    // If multiple system messages are present, concatenate them.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        if msg["role"].as_str() == Some("system") {
            if let Some(content) = msg["content"].as_str() {
                system_parts.push(content);
            }
        } else {
            messages.push(msg.clone());
        }
    }

    let mut req = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": messages,
    });

    if !system_parts.is_empty() {
        req["system"] = Value::String(system_parts.join("\n\n"));
    }

    if let Some(temp) = request["temperature"].as_f64() {
        req["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop") {
        req["stop_sequences"] = stop.clone();
    }
    if request["stream"].as_bool() == Some(true) {
        req["stream"] = json!(true);
    }

    Ok(req)
}

/// Convert an Anthropic Messages API response to the OpenAI chat completions schema.
pub(crate) fn from_anthropic(resp: &Value) -> Result<Value, AdapterError> {
    let text = resp["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .ok_or_else(|| AdapterError::MalformedResponse("no text block in Anthropic response `content` array".into()))?
        .to_string();

    let model = resp["model"].as_str().unwrap_or("unknown");

    let finish_reason = match resp["stop_reason"].as_str().unwrap_or("stop") {
        "end_turn" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = resp["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": resp["id"],
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cred(key: &str) -> Credential {
        Credential::ApiKey { provider: "anthropic".into(), key: key.to_string(), base_url: None }
    }

    #[test]
    fn to_anthropic_extracts_system_message_to_top_level() {
        let req = json!({
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user",   "content": "Hello" },
            ],
        });
        let out = to_anthropic(&req, "claude-haiku-4-5-20251001").unwrap();

        assert_eq!(out["system"], "You are a helpful assistant.");
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1, "system message should be removed from messages array");
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn to_anthropic_concatenates_multiple_system_messages() {
        let req = json!({
            "messages": [
                { "role": "system", "content": "Part one." },
                { "role": "system", "content": "Part two." },
                { "role": "user",   "content": "Hello" },
            ],
        });
        let out = to_anthropic(&req, "claude-haiku-4-5-20251001").unwrap();
        assert_eq!(out["system"], "Part one.\n\nPart two.");
    }

    #[test]
    fn to_anthropic_defaults_max_tokens_when_absent() {
        let req = json!({ "messages": [{ "role": "user", "content": "Hi" }] });
        let out = to_anthropic(&req, "claude-haiku-4-5-20251001").unwrap();
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn to_anthropic_uses_caller_max_tokens() {
        let req = json!({ "max_tokens": 256, "messages": [{ "role": "user", "content": "Hi" }] });
        let out = to_anthropic(&req, "claude-haiku-4-5-20251001").unwrap();
        assert_eq!(out["max_tokens"], 256);
    }

    #[test]
    fn to_anthropic_forwards_temperature() {
        let req = json!({ "messages": [{ "role": "user", "content": "Hi" }], "temperature": 0.3 });
        let out = to_anthropic(&req, "claude-haiku-4-5-20251001").unwrap();
        assert!((out["temperature"].as_f64().unwrap() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn to_anthropic_errors_without_messages() {
        let req = json!({});
        assert!(to_anthropic(&req, "claude-haiku-4-5-20251001").is_err());
    }

    #[test]
    fn from_anthropic_maps_end_turn_to_stop() {
        let resp = json!({
            "id": "msg_123",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "text", "text": "Hello!" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 },
        });
        let out = from_anthropic(&resp).unwrap();

        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["choices"][0]["message"]["content"], "Hello!");
        assert_eq!(out["usage"]["prompt_tokens"], 10);
        assert_eq!(out["usage"]["completion_tokens"], 5);
        assert_eq!(out["usage"]["total_tokens"], 15);
    }

    #[test]
    fn from_anthropic_maps_max_tokens_stop_reason_to_length() {
        let resp = json!({
            "id": "msg_456",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "text", "text": "…" }],
            "stop_reason": "max_tokens",
            "usage": { "input_tokens": 100, "output_tokens": 1024 },
        });
        let out = from_anthropic(&resp).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn from_anthropic_errors_when_no_text_block_present() {
        let resp = json!({
            "id": "msg_789",
            "model": "claude-haiku-4-5-20251001",
            "content": [{ "type": "tool_use", "id": "toolu_1", "name": "calculator", "input": {} }],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 10, "output_tokens": 5 },
        });
        assert!(from_anthropic(&resp).is_err());
    }

    #[test]
    fn headers_rejects_non_api_key_credential() {
        let adapter = AnthropicAdapter;
        let oauth = Credential::OAuth {
            provider: "anthropic".into(),
            access_token: "x".into(),
            refresh_token: "y".into(),
            expires_at: 0,
            email: None,
            account_id: None,
            project_id: None,
            resource_url: None,
        };
        assert!(adapter.headers(&oauth).is_err());
    }

    #[test]
    fn headers_carries_the_api_key_and_version() {
        let adapter = AnthropicAdapter;
        let headers = adapter.headers(&cred("sk-ant-test")).unwrap();
        assert!(headers.contains(&("x-api-key".to_string(), "sk-ant-test".to_string())));
        assert!(headers.contains(&("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string())));
    }
}
