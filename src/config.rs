//! Configuration types for smart-router.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. The file is re-read every
//! few seconds by a background watcher; a bad edit logs a warning and the
//! previous config stays live (see [`crate::dispatcher::RouterState`]).
//!
//! # Example
//! ```toml
//! [gateway]
//! client_port = 8080
//! admin_port  = 8081
//!
//! [scoring]
//! tier_medium_min    = 3.0
//! tier_complex_min   = 8.0
//! tier_reasoning_min = 15.0
//!
//! [[scoring.dimensions]]
//! name     = "code"
//! weight   = 1.0
//! keywords = ["function", "class", "compile", "refactor"]
//!
//! [[tiers.simple]]
//! provider = "groq"
//! model    = "llama-3.3-70b-versatile"
//!
//! provider_fallback_order = ["openai", "anthropic", "google"]
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Complexity tier assigned to a prompt by the scoring engine.
///
/// Ordered cheapest-to-most-capable; [`Tier::ALL`] walks them in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Simple,
    Medium,
    Complex,
    Reasoning,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Simple, Tier::Medium, Tier::Complex, Tier::Reasoning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Medium => "MEDIUM",
            Self::Complex => "COMPLEX",
            Self::Reasoning => "REASONING",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single provider+model pairing that can serve a tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CandidateRef {
    pub provider: String,
    pub model: String,
}

/// Ordered per-tier candidate lists, walked by [`crate::selector`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TierTable {
    #[serde(default)]
    pub simple: Vec<CandidateRef>,
    #[serde(default)]
    pub medium: Vec<CandidateRef>,
    #[serde(default)]
    pub complex: Vec<CandidateRef>,
    #[serde(default)]
    pub reasoning: Vec<CandidateRef>,
}

impl TierTable {
    pub fn for_tier(&self, tier: Tier) -> &[CandidateRef] {
        match tier {
            Tier::Simple => &self.simple,
            Tier::Medium => &self.medium,
            Tier::Complex => &self.complex,
            Tier::Reasoning => &self.reasoning,
        }
    }

    /// The first candidate for `provider`, searching tiers in [`Tier::ALL`] order.
    pub fn first_candidate_for_provider(&self, provider: &str) -> Option<&CandidateRef> {
        Tier::ALL
            .iter()
            .find_map(|t| self.for_tier(*t).iter().find(|c| c.provider == provider))
    }
}

/// A single scoring dimension: a named, weighted bag of keywords.
///
/// Matching is whole-word and case-insensitive; see [`crate::scoring`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DimensionConfig {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The prompt classifier's configuration: dimensions plus tier boundaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    #[serde(default = "defaults::tier_medium_min")]
    pub tier_medium_min: f64,
    #[serde(default = "defaults::tier_complex_min")]
    pub tier_complex_min: f64,
    #[serde(default = "defaults::tier_reasoning_min")]
    pub tier_reasoning_min: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            dimensions: Vec::new(),
            tier_medium_min: defaults::tier_medium_min(),
            tier_complex_min: defaults::tier_complex_min(),
            tier_reasoning_min: defaults::tier_reasoning_min(),
        }
    }
}

/// Core gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Port for the agent-facing client API (default: 8080).
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,

    /// Port for the admin API (default: 8081).
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Number of recent requests to keep in the in-memory traffic log (default: 500).
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    /// Log level override (also controlled by `RUST_LOG`).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Maximum requests per minute per client IP on the client port.
    /// Leave unset (or `0`) to disable rate limiting.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,

    /// Environment variable whose value is the Bearer token required for all
    /// admin API requests. Leave unset to disable admin auth (only
    /// recommended when the admin port is strictly firewalled).
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Environment variable whose value is the Bearer token required on the
    /// client port. Leave unset to disable client auth.
    #[serde(default)]
    pub client_key_env: Option<String>,

    /// Path to the JSON profile-store document. Defaults to
    /// `/etc/smart-router/profiles.json`; overridable via `SMART_ROUTER_AUTH_STORE`.
    #[serde(default)]
    pub auth_store_path: Option<String>,

    /// Request timeout in milliseconds for buffered (non-streaming) upstream
    /// calls (default: 60 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

/// Static metadata about a known provider — not itself user-configurable;
/// see [`crate::backends::provider_def`]. Per-provider request-per-minute
/// limits used by the profile store's rate-limit window live here.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProviderRateLimits {
    #[serde(flatten)]
    pub rpm_by_provider: std::collections::HashMap<String, u32>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub tiers: TierTable,

    /// Order in which providers are tried once the tier-based walk and the
    /// other-tier walk are both exhausted. See [`crate::selector::select`].
    #[serde(default)]
    pub provider_fallback_order: Vec<String>,

    /// Per-provider requests-per-minute caps enforced by the profile store.
    #[serde(default)]
    pub provider_rate_limits: ProviderRateLimits,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.gateway.client_port != self.gateway.admin_port, "client_port and admin_port must differ");

        for dim in &self.scoring.dimensions {
            anyhow::ensure!(dim.weight.is_finite(), "dimension `{}` has a non-finite weight", dim.name);
        }
        anyhow::ensure!(
            self.scoring.tier_medium_min <= self.scoring.tier_complex_min
                && self.scoring.tier_complex_min <= self.scoring.tier_reasoning_min,
            "scoring tier boundaries must be non-decreasing: medium_min <= complex_min <= reasoning_min"
        );

        for tier in Tier::ALL {
            for cand in self.tiers.for_tier(tier) {
                anyhow::ensure!(
                    !cand.provider.is_empty() && !cand.model.is_empty(),
                    "tier `{tier}` has a candidate with an empty provider or model"
                );
            }
        }

        Ok(())
    }
}

mod defaults {
    pub fn client_port() -> u16 {
        8080
    }
    pub fn admin_port() -> u16 {
        8081
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn timeout_ms() -> u64 {
        60_000
    }
    pub fn tier_medium_min() -> f64 {
        3.0
    }
    pub fn tier_complex_min() -> f64 {
        8.0
    }
    pub fn tier_reasoning_min() -> f64 {
        15.0
    }
}
