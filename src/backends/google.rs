//! Gemini wire-dialect adapter, shared by `google` and `antigravity`.
//!
//! Both speak the same `generateContent`/`streamGenerateContent` API; they
//! differ only in which base URL/project plumbing a given credential
//! carries and in `antigravity`'s distinct cooldown table (handled in
//! [`crate::profiles`], not here). `google` credentials may be a plain API
//! key or OAuth; `antigravity` is OAuth-only.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Header, ProviderAdapter};
use crate::error::AdapterError;
use crate::profiles::Credential;

pub struct GoogleAdapter {
    #[allow(dead_code)]
    provider_id: &'static str,
}

impl GoogleAdapter {
    pub fn new(provider_id: &str) -> Self {
        let provider_id = match provider_id {
            "google" => "google",
            "antigravity" => "antigravity",
            other => unreachable!("GoogleAdapter constructed for non-Gemini provider {other}"),
        };
        Self { provider_id }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn build_url(&self, base_url: &str, model: &str) -> String {
        // The dispatcher swaps `generateContent` for `streamGenerateContent?alt=sse`
        // when the client requested a streaming response.
        format!("{}/models/{model}:generateContent", base_url.trim_end_matches('/'))
    }

    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError> {
        Ok(match cred {
            Credential::ApiKey { key, .. } => vec![("x-goog-api-key".to_string(), key.clone())],
            Credential::OAuth { access_token, project_id, .. } => {
                let mut headers = vec![("authorization".to_string(), format!("Bearer {access_token}"))];
                if let Some(project) = project_id {
                    headers.push(("x-goog-user-project".to_string(), project.clone()));
                }
                headers
            }
            Credential::Token { token, .. } => vec![("authorization".to_string(), format!("Bearer {token}"))],
        })
    }

    fn format_request(&self, body: &Value, _model: &str) -> Result<Value, AdapterError> {
        let messages = body["messages"]
            .as_array()
            .ok_or_else(|| AdapterError::MalformedResponse("`messages` array is required".into()))?;

        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = msg["role"].as_str().unwrap_or("user");
            let text = msg["content"].as_str().unwrap_or_default();
            if role == "system" {
                system_parts.push(text);
                continue;
            }
            let gemini_role = if role == "assistant" { "model" } else { "user" };
            contents.push(json!({ "role": gemini_role, "parts": [{ "text": text }] }));
        }

        let mut req = json!({ "contents": contents });

        if !system_parts.is_empty() {
            req["systemInstruction"] = json!({ "parts": [{ "text": system_parts.join("\n\n") }] });
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(max_tokens) = body["max_tokens"].as_u64() {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(temp) = body["temperature"].as_f64() {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if !generation_config.is_empty() {
            req["generationConfig"] = Value::Object(generation_config);
        }

        Ok(req)
    }

    fn format_response(&self, raw: &Value, model_id: Option<&str>) -> Result<Value, AdapterError> {
        let candidates = raw["candidates"]
            .as_array()
            .ok_or_else(|| AdapterError::MalformedResponse("no `candidates` in Gemini response".into()))?;

        let mut text = String::new();
        let mut finish_reason = "stop";
        for candidate in candidates {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                for part in parts {
                    if part.get("thoughtSignature").is_some() {
                        continue;
                    }
                    if let Some(t) = part.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
            }
            if let Some(fr) = candidate.get("finishReason").and_then(Value::as_str) {
                finish_reason = if fr == "STOP" { "stop" } else { "length" };
            }
        }

        let prompt_tokens = raw.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
        let completion_tokens = raw.pointer("/usageMetadata/candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);

        Ok(json!({
            "object": "chat.completion",
            "model": model_id.unwrap_or("unknown"),
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": finish_reason,
            }],
            "usage": {
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
                "total_tokens": prompt_tokens + completion_tokens,
            },
        }))
    }

    async fn refresh_token(&self, client: &reqwest::Client, cred: &Credential) -> Result<Credential, AdapterError> {
        let Credential::OAuth { provider, refresh_token, .. } = cred else {
            return Err(AdapterError::RefreshUnsupported("credential is not OAuth".into()));
        };

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
            #[serde(default)]
            refresh_token: Option<String>,
        }

        let response = client
            .post("https://oauth2.googleapis.com/token")
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
            .send()
            .await
            .map_err(|e| AdapterError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdapterError::RefreshFailed(format!("token endpoint returned {}", response.status())));
        }

        let parsed: TokenResponse =
            response.json().await.map_err(|e| AdapterError::RefreshFailed(e.to_string()))?;

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| AdapterError::RefreshFailed(e.to_string()))?
            .as_millis() as i64;
        // Shave 60s off the upstream TTL as a safety margin.
        let expires_at = now_ms + (parsed.expires_in - 60).max(0) * 1000;

        let Credential::OAuth { refresh_token: old_refresh, email, account_id, project_id, resource_url, .. } = cred.clone() else {
            unreachable!()
        };

        Ok(Credential::OAuth {
            provider: provider.clone(),
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.unwrap_or(old_refresh),
            expires_at,
            email,
            account_id,
            project_id,
            resource_url,
        })
    }
}
