//! Model registry — the catalogue of models each provider exposes.
//!
//! Used by `GET /v1/models`, by explicit-model resolution in the dispatcher
//! (an unknown `model` string in the request body is a `404`), and by the
//! admin API to describe pricing/capabilities. The registry is a fixed,
//! in-process table; adding a model does not require touching the scoring or
//! selector configuration — those only ever reference `provider`+`model`
//! pairs that must additionally resolve here.

use once_cell::sync::Lazy;
use serde::Serialize;

/// Per-million-token pricing in USD, when known.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// One entry in the model catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    /// Provider-qualified slug as returned by `GET /v1/models`, e.g. `"openai/gpt-4o"`.
    pub slug: String,
    pub provider: String,
    /// The literal model identifier sent upstream.
    pub model_id: String,
    pub context_window: u32,
    pub capabilities: Vec<&'static str>,
    pub pricing: Option<Pricing>,
    /// `true` for models reachable only through a free/OAuth-backed account
    /// (no per-token billing), e.g. Antigravity.
    pub free: bool,
}

/// In-process catalogue of every model this deployment's providers expose.
pub struct ModelRegistry {
    models: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelEntry>) -> Self {
        Self { models }
    }

    /// Resolve a model string against `model_id` first, then the full
    /// provider-qualified `slug`, then a `*/id` suffix match against any
    /// slug (covers a caller-supplied string that doesn't quite match
    /// either exact form).
    pub fn find(&self, id: &str) -> Option<&ModelEntry> {
        self.models
            .iter()
            .find(|m| m.model_id == id)
            .or_else(|| self.models.iter().find(|m| m.slug == id))
            .or_else(|| self.models.iter().find(|m| m.slug.ends_with(&format!("/{id}"))))
    }

    pub fn for_provider(&self, provider: &str) -> Vec<&ModelEntry> {
        self.models.iter().filter(|m| m.provider == provider).collect()
    }

    pub fn all(&self) -> &[ModelEntry] {
        &self.models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MODELS.clone())
    }
}

static DEFAULT_MODELS: Lazy<Vec<ModelEntry>> = Lazy::new(|| {
    vec![
        entry("openai", "gpt-4o", 128_000, &["chat", "vision", "tools"], Some((2.50, 10.00)), false),
        entry("openai", "gpt-4o-mini", 128_000, &["chat", "vision", "tools"], Some((0.15, 0.60)), false),
        entry("openai", "gpt-4.1", 1_047_576, &["chat", "vision", "tools"], Some((2.00, 8.00)), false),
        entry("openai", "o3", 200_000, &["chat", "reasoning", "tools"], Some((2.00, 8.00)), false),
        entry("openrouter", "openrouter/auto", 128_000, &["chat"], None, false),
        entry("dashscope", "qwen-max", 32_768, &["chat", "tools"], Some((1.60, 6.40)), false),
        entry("dashscope", "qwen-plus", 131_072, &["chat", "tools"], Some((0.40, 1.20)), false),
        entry("deepseek", "deepseek-chat", 64_000, &["chat", "tools"], Some((0.27, 1.10)), false),
        entry("deepseek", "deepseek-reasoner", 64_000, &["chat", "reasoning"], Some((0.55, 2.19)), false),
        entry("xai", "grok-4", 256_000, &["chat", "tools"], Some((3.00, 15.00)), false),
        entry("groq", "llama-3.3-70b-versatile", 128_000, &["chat", "tools"], Some((0.59, 0.79)), false),
        entry("anthropic", "claude-haiku-4-5-20251001", 200_000, &["chat", "vision", "tools"], Some((1.00, 5.00)), false),
        entry("anthropic", "claude-sonnet-4-5-20250929", 200_000, &["chat", "vision", "tools", "reasoning"], Some((3.00, 15.00)), false),
        entry("anthropic", "claude-opus-4-5-20251101", 200_000, &["chat", "vision", "tools", "reasoning"], Some((5.00, 25.00)), false),
        entry("google", "gemini-2.0-flash", 1_048_576, &["chat", "vision", "tools"], Some((0.10, 0.40)), false),
        entry("google", "gemini-2.5-pro", 1_048_576, &["chat", "vision", "tools", "reasoning"], Some((1.25, 10.00)), false),
        entry("antigravity", "gemini-3-pro", 1_048_576, &["chat", "vision", "tools", "reasoning"], None, true),
        entry("codex", "gpt-5.1-codex", 272_000, &["chat", "tools", "reasoning"], None, true),
    ]
});

fn entry(
    provider: &str,
    model_id: &str,
    context_window: u32,
    capabilities: &[&'static str],
    pricing: Option<(f64, f64)>,
    free: bool,
) -> ModelEntry {
    ModelEntry {
        slug: format!("{provider}/{model_id}"),
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        context_window,
        capabilities: capabilities.to_vec(),
        pricing: pricing.map(|(i, o)| Pricing { input_per_million: i, output_per_million: o }),
        free,
    }
}
