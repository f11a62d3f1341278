//! Codex Responses API adapter — OAuth-only, speaks a dialect distinct from
//! plain OpenAI chat completions.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Header, ProviderAdapter};
use crate::error::AdapterError;
use crate::profiles::Credential;

pub struct CodexAdapter;

#[async_trait]
impl ProviderAdapter for CodexAdapter {
    fn build_url(&self, base_url: &str, _model: &str) -> String {
        format!("{}/responses", base_url.trim_end_matches('/'))
    }

    fn headers(&self, cred: &Credential) -> Result<Vec<Header>, AdapterError> {
        let Credential::OAuth { access_token, account_id, .. } = cred else {
            return Err(AdapterError::MalformedResponse("codex requires an OAuth credential".into()));
        };
        let mut headers = vec![("authorization".to_string(), format!("Bearer {access_token}"))];
        if let Some(account_id) = account_id {
            headers.push(("chatgpt-account-id".to_string(), account_id.clone()));
        }
        Ok(headers)
    }

    fn format_request(&self, body: &Value, model: &str) -> Result<Value, AdapterError> {
        let messages = body["messages"]
            .as_array()
            .ok_or_else(|| AdapterError::MalformedResponse("`messages` array is required".into()))?;

        let input: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m["role"].as_str().unwrap_or("user"),
                    "content": [{ "type": "input_text", "text": m["content"].as_str().unwrap_or_default() }],
                })
            })
            .collect();

        let mut req = json!({
            "model": model,
            "input": input,
            "stream": body["stream"].as_bool().unwrap_or(false),
        });

        if let Some(max_tokens) = body["max_tokens"].as_u64() {
            req["max_output_tokens"] = json!(max_tokens);
        }

        Ok(req)
    }

    fn format_response(&self, raw: &Value, model_id: Option<&str>) -> Result<Value, AdapterError> {
        let text = raw["output"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|item| item["type"] == "message")
            .flat_map(|item| item["content"].as_array().into_iter().flatten())
            .filter(|part| part["type"] == "output_text")
            .filter_map(|part| part["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        let input_tokens = raw.pointer("/usage/input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output_tokens = raw.pointer("/usage/output_tokens").and_then(Value::as_u64).unwrap_or(0);
        let total_tokens = raw.pointer("/usage/total_tokens").and_then(Value::as_u64).unwrap_or(input_tokens + output_tokens);

        Ok(json!({
            "object": "chat.completion",
            "model": model_id.unwrap_or("unknown"),
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": input_tokens,
                "completion_tokens": output_tokens,
                "total_tokens": total_tokens,
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
            .post("https://auth.openai.com/oauth/token")
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": "codex-cli",
            }))
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
