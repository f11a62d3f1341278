//! Profile store — credentials, usage stats, cooldowns, and LRU selection.
//!
//! A "profile" is one account bound to one provider, identified by
//! `"<provider>:<label>"`. The store persists to a single JSON document
//! (write-through on every mutation, full rewrite, matching the teacher's
//! config load/validate/rewrite discipline) and serialises all access behind
//! a `tokio::sync::Mutex` so selection-then-bump stays a single critical
//! section under concurrent requests.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ProfileStoreError;

/// Default per-provider environment variable names for keyless API-key auth.
/// Providers not listed here (antigravity, codex) are OAuth-only and must
/// come from a stored profile.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("dashscope", "DASHSCOPE_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("xai", "XAI_API_KEY"),
    ("groq", "GROQ_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("google", "GEMINI_API_KEY"),
];

/// Exponential backoff table indexed by `min(errorCount - 1, 4)`.
const BACKOFF_MS: [i64; 5] = [30_000, 60_000, 120_000, 300_000, 600_000];

/// Antigravity's rate_limit cooldowns don't follow the generic backoff table.
const ANTIGRAVITY_PROFILE_COOLDOWN_MS: i64 = 5 * 60 * 60 * 1000;
const ANTIGRAVITY_MODEL_COOLDOWN_MS: i64 = 5 * 60 * 1000;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

/// A stored account credential. Tagged by `kind` in the JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    OAuth {
        provider: String,
        access_token: String,
        refresh_token: String,
        expires_at: i64,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        account_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        resource_url: Option<String>,
    },
    ApiKey {
        provider: String,
        key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    Token {
        provider: String,
        token: String,
        #[serde(default)]
        expires_at: Option<i64>,
    },
}

impl Credential {
    pub fn provider(&self) -> &str {
        match self {
            Self::OAuth { provider, .. } | Self::ApiKey { provider, .. } | Self::Token { provider, .. } => provider,
        }
    }

    /// `true` when this is an OAuth credential whose access token has expired.
    pub fn is_expired(&self) -> bool {
        match self {
            Self::OAuth { expires_at, .. } => now_ms() >= *expires_at,
            Self::Token { expires_at: Some(exp), .. } => now_ms() >= *exp,
            _ => false,
        }
    }
}

/// Classification of why a candidate attempt failed, used to pick the
/// cooldown strategy and, for `auth`/`billing`, to disable the profile
/// outright rather than merely cool it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Auth,
    RateLimit,
    Billing,
    Timeout,
    ModelNotFound,
    Format,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileState {
    Active,
    Cooldown,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub window_start: i64,
    pub request_count: u32,
}

impl Default for RateLimitStats {
    fn default() -> Self {
        Self { window_start: 0, request_count: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub state: ProfileState,
    pub last_used: i64,
    pub cooldown_until: i64,
    #[serde(default)]
    pub model_cooldowns: HashMap<String, i64>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_failure_at: Option<i64>,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    #[serde(default)]
    pub rate_limit_stats: RateLimitStats,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            state: ProfileState::Active,
            last_used: 0,
            cooldown_until: 0,
            model_cooldowns: HashMap::new(),
            error_count: 0,
            last_failure_at: None,
            failure_reason: None,
            rate_limit_stats: RateLimitStats::default(),
        }
    }
}

/// A read-only view of a profile for the admin API — never serialises credential secrets.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    pub id: String,
    pub provider: String,
    pub label: String,
    pub state: ProfileState,
    pub in_cooldown: bool,
    pub error_count: u32,
    pub last_used: i64,
    pub last_failure_at: Option<i64>,
    pub failure_reason: Option<FailureReason>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    profiles: HashMap<String, Credential>,
    #[serde(default)]
    usage_stats: HashMap<String, UsageStats>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self { version: 1, profiles: HashMap::new(), usage_stats: HashMap::new() }
    }
}

/// Persistent, mutex-guarded store of provider account credentials and their
/// usage/cooldown state.
pub struct ProfileStore {
    path: PathBuf,
    inner: Mutex<StoreDocument>,
    provider_rpm: HashMap<String, u32>,
}

impl ProfileStore {
    pub async fn load(path: PathBuf, provider_rpm: HashMap<String, u32>) -> Result<Self, ProfileStoreError> {
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(ProfileStoreError::Read { path: path.display().to_string(), source: e }),
        };
        Ok(Self { path, inner: Mutex::new(doc), provider_rpm })
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), ProfileStoreError> {
        let mut text = serde_json::to_string_pretty(doc)?;
        text.push('\n');
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| ProfileStoreError::Write { path: self.path.display().to_string(), source: e })
    }

    /// Insert or replace a profile's credential. Returns the profile id.
    pub async fn upsert_profile(
        &self,
        provider: &str,
        cred: Credential,
        label: Option<&str>,
    ) -> Result<String, ProfileStoreError> {
        let label = label.map(str::to_string).unwrap_or_else(|| match &cred {
            Credential::OAuth { email: Some(email), .. } => email.clone(),
            _ => "default".to_string(),
        });
        let id = format!("{provider}:{label}");

        let mut doc = self.inner.lock().await;
        doc.profiles.insert(id.clone(), cred);
        // Unconditional reset per spec: re-upserting a DISABLED/COOLDOWN profile
        // (e.g. an operator fixing a broken credential) must make it ACTIVE again.
        doc.usage_stats.insert(id.clone(), UsageStats::default());
        self.persist(&doc).await?;
        Ok(id)
    }

    pub async fn remove_profile(&self, id: &str) -> Result<bool, ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        let existed = doc.profiles.remove(id).is_some();
        doc.usage_stats.remove(id);
        if existed {
            self.persist(&doc).await?;
        }
        Ok(existed)
    }

    pub async fn get_credential(&self, id: &str) -> Option<Credential> {
        self.inner.lock().await.profiles.get(id).cloned()
    }

    /// Replace the stored credential in place (e.g. after an OAuth refresh),
    /// without disturbing usage stats.
    pub async fn update_credential(&self, id: &str, cred: Credential) -> Result<(), ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        if doc.profiles.contains_key(id) {
            doc.profiles.insert(id.to_string(), cred);
            self.persist(&doc).await?;
        }
        Ok(())
    }

    pub async fn list_all(&self) -> Vec<ProfileView> {
        let doc = self.inner.lock().await;
        let now = now_ms();
        doc.profiles
            .keys()
            .map(|id| {
                let stats = doc.usage_stats.get(id).cloned().unwrap_or_default();
                let (provider, label) = id.split_once(':').unwrap_or((id.as_str(), ""));
                ProfileView {
                    id: id.clone(),
                    provider: provider.to_string(),
                    label: label.to_string(),
                    state: stats.state,
                    in_cooldown: stats.state == ProfileState::Disabled || now < stats.cooldown_until,
                    error_count: stats.error_count,
                    last_used: stats.last_used,
                    last_failure_at: stats.last_failure_at,
                    failure_reason: stats.failure_reason,
                }
            })
            .collect()
    }

    /// Union of providers with at least one stored profile and providers
    /// whose well-known environment variable currently holds a non-empty value.
    pub async fn available_providers(&self) -> HashSet<String> {
        let doc = self.inner.lock().await;
        let mut set: HashSet<String> = doc.profiles.values().map(|c| c.provider().to_string()).collect();
        for (provider, var) in PROVIDER_ENV_VARS {
            if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
                set.insert((*provider).to_string());
            }
        }
        set
    }

    /// Resolve a provider's keyless API key from its well-known environment variable.
    pub fn env_api_key(&self, provider: &str) -> Option<String> {
        PROVIDER_ENV_VARS
            .iter()
            .find(|(p, _)| *p == provider)
            .and_then(|(_, var)| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }

    /// Select the least-recently-used eligible profile for `provider`
    /// (optionally further filtered by a per-model cooldown), and claim it by
    /// bumping `lastUsed` within the same critical section — so two
    /// concurrent callers never receive the same LRU profile. The
    /// rolling-RPM-window bump happens later, in [`Self::increment_usage`],
    /// which is called once the request actually succeeds.
    pub async fn pick_next_profile(&self, provider: &str, model_id: Option<&str>) -> Option<(String, Credential)> {
        let mut doc = self.inner.lock().await;
        let now = now_ms();
        let rpm = self.provider_rpm.get(provider).copied();

        let mut best: Option<(String, i64)> = None;
        for (id, cred) in doc.profiles.iter() {
            if cred.provider() != provider {
                continue;
            }
            let stats = match doc.usage_stats.get(id) {
                Some(s) => s,
                None => continue,
            };
            if stats.state == ProfileState::Disabled || now < stats.cooldown_until {
                continue;
            }
            if let Some(model) = model_id {
                if let Some(&until) = stats.model_cooldowns.get(model) {
                    if now < until {
                        continue;
                    }
                }
            }
            if let Some(rpm) = rpm {
                let within_window = now - stats.rate_limit_stats.window_start < 60_000;
                if within_window && stats.rate_limit_stats.request_count >= rpm {
                    continue;
                }
            }
            match &best {
                None => best = Some((id.clone(), stats.last_used)),
                Some((_, lu)) if stats.last_used < *lu => best = Some((id.clone(), stats.last_used)),
                _ => {}
            }
        }

        let (id, _) = best?;
        if let Some(stats) = doc.usage_stats.get_mut(&id) {
            stats.last_used = now;
        }
        let cred = doc.profiles.get(&id).cloned()?;
        Some((id, cred))
    }

    /// Advance the rolling 60-second RPM window and refresh `lastUsed`.
    /// Called once per successfully completed request.
    pub async fn increment_usage(&self, id: &str) -> Result<(), ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        let now = now_ms();
        if let Some(stats) = doc.usage_stats.get_mut(id) {
            if now - stats.rate_limit_stats.window_start >= 60_000 {
                stats.rate_limit_stats.window_start = now;
                stats.rate_limit_stats.request_count = 0;
            }
            stats.rate_limit_stats.request_count += 1;
            stats.last_used = now;
        }
        self.persist(&doc).await
    }

    /// Reset error accounting after a successful response.
    pub async fn mark_used(&self, id: &str) -> Result<(), ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        if let Some(stats) = doc.usage_stats.get_mut(id) {
            stats.error_count = 0;
            stats.cooldown_until = 0;
            stats.failure_reason = None;
            stats.state = ProfileState::Active;
        }
        self.persist(&doc).await
    }

    /// Record a failed attempt. Model-scoped failures (`rate_limit` /
    /// `model_not_found` with a `model_id`) touch only that model's cooldown
    /// map, never the profile-wide `errorCount`/`cooldownUntil`/`state`.
    pub async fn mark_failure(
        &self,
        id: &str,
        reason: FailureReason,
        cooldown_ms: Option<i64>,
        model_id: Option<&str>,
    ) -> Result<(), ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        let now = now_ms();
        let provider = id.split(':').next().unwrap_or("").to_string();
        let stats = doc.usage_stats.entry(id.to_string()).or_default();
        stats.last_failure_at = Some(now);
        stats.failure_reason = Some(reason);

        let model_scoped = model_id.is_some() && matches!(reason, FailureReason::RateLimit | FailureReason::ModelNotFound);

        if model_scoped {
            let cd = cooldown_ms.unwrap_or_else(|| default_cooldown_ms(&provider, reason, stats.error_count, true));
            stats.model_cooldowns.insert(model_id.unwrap().to_string(), now + cd);
        } else {
            stats.error_count += 1;
            let cd = cooldown_ms.unwrap_or_else(|| default_cooldown_ms(&provider, reason, stats.error_count, false));
            stats.cooldown_until = now + cd;
            stats.state = if matches!(reason, FailureReason::Auth | FailureReason::Billing) {
                ProfileState::Disabled
            } else {
                ProfileState::Cooldown
            };
        }

        self.persist(&doc).await
    }

    pub async fn clear_cooldown(&self, id: &str) -> Result<(), ProfileStoreError> {
        let mut doc = self.inner.lock().await;
        if let Some(stats) = doc.usage_stats.get_mut(id) {
            stats.cooldown_until = 0;
            stats.state = ProfileState::Active;
        }
        self.persist(&doc).await
    }
}

fn default_cooldown_ms(provider: &str, reason: FailureReason, error_count: u32, model_scoped: bool) -> i64 {
    if provider == "antigravity" && reason == FailureReason::RateLimit {
        return if model_scoped { ANTIGRAVITY_MODEL_COOLDOWN_MS } else { ANTIGRAVITY_PROFILE_COOLDOWN_MS };
    }
    let idx = error_count.saturating_sub(1).min(4) as usize;
    BACKOFF_MS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_key_cred(provider: &str, key: &str) -> Credential {
        Credential::ApiKey { provider: provider.to_string(), key: key.to_string(), base_url: None }
    }

    async fn store() -> ProfileStore {
        let dir = std::env::temp_dir().join(format!("smart-router-test-{}", uuid_like()));
        ProfileStore::load(dir.join("profiles.json"), HashMap::new()).await.unwrap()
    }

    fn uuid_like() -> u64 {
        // Deterministic-enough unique suffix for parallel test temp dirs.
        std::thread::current().id().as_u64_hash()
    }

    trait AsU64Hash {
        fn as_u64_hash(&self) -> u64;
    }
    impl AsU64Hash for std::thread::ThreadId {
        fn as_u64_hash(&self) -> u64 {
            use std::hash::{Hash, Hasher};
            let mut h = std::collections::hash_map::DefaultHasher::new();
            self.hash(&mut h);
            h.finish()
        }
    }

    #[tokio::test]
    async fn upsert_then_pick_returns_the_profile() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("acct-a")).await.unwrap();
        assert_eq!(id, "openai:acct-a");

        let (picked, _cred) = store.pick_next_profile("openai", None).await.unwrap();
        assert_eq!(picked, id);
    }

    #[tokio::test]
    async fn pick_prefers_least_recently_used() {
        let store = store().await;
        let a = store.upsert_profile("openai", api_key_cred("openai", "sk-a"), Some("a")).await.unwrap();
        let b = store.upsert_profile("openai", api_key_cred("openai", "sk-b"), Some("b")).await.unwrap();

        // First pick claims one of them (both lastUsed == 0 — arbitrary but deterministic tie-break).
        let (first, _) = store.pick_next_profile("openai", None).await.unwrap();
        let (second, _) = store.pick_next_profile("openai", None).await.unwrap();
        assert_ne!(first, second, "two consecutive picks must not return the same profile when two are eligible");
        assert!([a.clone(), b.clone()].contains(&first));
        assert!([a, b].contains(&second));
    }

    #[tokio::test]
    async fn disabled_profile_is_never_picked() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("a")).await.unwrap();
        store.mark_failure(&id, FailureReason::Auth, None, None).await.unwrap();

        assert!(store.pick_next_profile("openai", None).await.is_none());
        let view = store.list_all().await;
        assert_eq!(view[0].state, ProfileState::Disabled);
    }

    #[tokio::test]
    async fn re_upserting_a_disabled_profile_resets_it_to_active() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("a")).await.unwrap();
        store.mark_failure(&id, FailureReason::Auth, None, None).await.unwrap();
        assert!(store.pick_next_profile("openai", None).await.is_none());

        store.upsert_profile("openai", api_key_cred("openai", "sk-2"), Some("a")).await.unwrap();

        let view = store.list_all().await;
        assert_eq!(view[0].state, ProfileState::Active);
        assert_eq!(view[0].error_count, 0);
        assert!(store.pick_next_profile("openai", None).await.is_some());
    }

    #[tokio::test]
    async fn cooldown_expires_and_profile_becomes_eligible_again() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("a")).await.unwrap();
        store.mark_failure(&id, FailureReason::RateLimit, Some(1), None).await.unwrap();
        assert!(store.pick_next_profile("openai", None).await.is_none());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (picked, _) = store.pick_next_profile("openai", None).await.unwrap();
        assert_eq!(picked, id);
    }

    #[tokio::test]
    async fn model_scoped_failure_does_not_touch_profile_wide_state() {
        let store = store().await;
        let id = store.upsert_profile("google", api_key_cred("google", "key"), Some("a")).await.unwrap();
        store.mark_failure(&id, FailureReason::ModelNotFound, Some(60_000), Some("gemini-2.0-flash")).await.unwrap();

        let view = store.list_all().await;
        assert_eq!(view[0].state, ProfileState::Active, "model-scoped failure must not disable the profile");
        assert_eq!(view[0].error_count, 0, "model-scoped failure must not touch errorCount");

        // Still ineligible for the specific model...
        assert!(store.pick_next_profile("google", Some("gemini-2.0-flash")).await.is_none());
        // ...but eligible for a different model on the same profile.
        assert!(store.pick_next_profile("google", Some("gemini-2.5-pro")).await.is_some());
    }

    #[tokio::test]
    async fn antigravity_rate_limit_uses_its_own_cooldown_table() {
        let store = store().await;
        let id = store
            .upsert_profile("antigravity", api_key_cred("antigravity", "oauth-ish"), Some("a"))
            .await
            .unwrap();
        store.mark_failure(&id, FailureReason::RateLimit, None, None).await.unwrap();

        let view = store.list_all().await;
        assert!(view[0].in_cooldown);
        // 5h cooldown is far longer than the generic 30s floor, so re-picking immediately must fail.
        assert!(store.pick_next_profile("antigravity", None).await.is_none());
    }

    #[tokio::test]
    async fn mark_used_clears_error_state() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("a")).await.unwrap();
        store.mark_failure(&id, FailureReason::Timeout, Some(1), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.mark_used(&id).await.unwrap();

        let view = store.list_all().await;
        assert_eq!(view[0].state, ProfileState::Active);
        assert_eq!(view[0].error_count, 0);
    }

    #[tokio::test]
    async fn available_providers_includes_env_backed_providers() {
        let store = store().await;
        // SAFETY: single-threaded-enough test env; restored immediately after the assertion.
        unsafe { std::env::set_var("OPENAI_API_KEY", "sk-env-test") };
        let providers = store.available_providers().await;
        assert!(providers.contains("openai"));
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
    }

    #[tokio::test]
    async fn remove_profile_reports_whether_it_existed() {
        let store = store().await;
        let id = store.upsert_profile("openai", api_key_cred("openai", "sk-1"), Some("a")).await.unwrap();
        assert!(store.remove_profile(&id).await.unwrap());
        assert!(!store.remove_profile(&id).await.unwrap());
    }
}
