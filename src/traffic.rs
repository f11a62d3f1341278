//! Request-log sink — the `recordRequest` external collaborator.
//!
//! [`TrafficSink`] is the trait the dispatcher depends on; [`TrafficLog`] is
//! the one in-process implementation this gateway ships, a fixed-capacity
//! ring buffer exposed through the admin API. A durable sink is an external
//! collaborator and out of scope here, same as the teacher's own
//! non-persistent traffic log.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One completed request, as reported by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStats {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    /// The upstream's own model id, if different from the requested one.
    #[serde(default)]
    pub real_model: Option<String>,
    pub profile_id: Option<String>,
    pub tier: String,
    pub tier_score: f64,
    /// Dominant scoring dimension, if any.
    #[serde(default)]
    pub task: Option<String>,
    pub latency_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub estimated_cost_usd: Option<f64>,
    #[serde(default)]
    pub actual_cost_usd: Option<f64>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl RequestStats {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: provider.into(),
            model: model.into(),
            real_model: None,
            profile_id: None,
            tier: tier.into(),
            tier_score: 0.0,
            task: None,
            latency_ms: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            estimated_cost_usd: None,
            actual_cost_usd: None,
            success: true,
            error: None,
        }
    }
}

/// The `recordRequest` external collaborator interface.
#[async_trait]
pub trait TrafficSink: Send + Sync {
    async fn record_request(&self, stats: RequestStats);
}

/// Fixed-capacity ring-buffer of recent [`RequestStats`] records.
///
/// [`record_request`][Self::record_request] uses a non-blocking `try_lock`
/// so it never delays request handling; under contention the entry is
/// silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<StoredEntry>>,
}

#[derive(Debug, Clone, Serialize)]
struct StoredEntry {
    id: String,
    #[serde(flatten)]
    stats: RequestStats,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<serde_json::Value> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| serde_json::to_value(e).unwrap_or(serde_json::Value::Null))
            .collect()
    }

    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.stats.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.stats.success).count();

        let mut tier_counts: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter() {
            *tier_counts.entry(entry.stats.tier.clone()).or_default() += 1;
        }

        let mut provider_counts: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter() {
            *provider_counts.entry(entry.stats.provider.clone()).or_default() += 1;
        }

        TrafficStats { total_requests: total, error_count, avg_latency_ms, tier_counts, provider_counts }
    }
}

#[async_trait]
impl TrafficSink for TrafficLog {
    async fn record_request(&self, stats: RequestStats) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(StoredEntry { id: Uuid::new_v4().to_string(), stats });
        }
    }
}

/// Aggregate statistics derived from all buffered [`RequestStats`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub avg_latency_ms: f64,
    pub tier_counts: HashMap<String, usize>,
    pub provider_counts: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stats(provider: &str, tier: &str, latency_ms: u64, success: bool) -> RequestStats {
        let mut s = RequestStats::new(provider, "some-model", tier);
        s.latency_ms = latency_ms;
        s.success = success;
        s
    }

    #[tokio::test]
    async fn record_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.record_request(make_stats("openai", "simple", 42, true)).await;

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["tier"], "simple");
        assert_eq!(recent[0]["latency_ms"], 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.record_request(make_stats("openai", "simple", 1, true)).await;
        log.record_request(make_stats("openai", "medium", 2, true)).await;
        log.record_request(make_stats("openai", "complex", 3, true)).await;

        let recent = log.recent(10).await;
        assert_eq!(recent[0]["tier"], "complex");
        assert_eq!(recent[1]["tier"], "medium");
        assert_eq!(recent[2]["tier"], "simple");
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.record_request(make_stats("openai", "oldest", 1, true)).await;
        log.record_request(make_stats("openai", "middle", 2, true)).await;
        log.record_request(make_stats("openai", "newest", 3, true)).await;
        log.record_request(make_stats("openai", "extra", 4, true)).await;

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e["tier"] == "oldest"));
        assert!(all.iter().any(|e| e["tier"] == "extra"));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert!(stats.tier_counts.is_empty());
    }

    #[tokio::test]
    async fn stats_averages_latency_and_counts_errors() {
        let log = TrafficLog::new(10);
        log.record_request(make_stats("openai", "simple", 100, true)).await;
        log.record_request(make_stats("openai", "simple", 200, false)).await;
        log.record_request(make_stats("anthropic", "complex", 300, true)).await;

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.error_count, 1);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.provider_counts["openai"], 2);
        assert_eq!(stats.provider_counts["anthropic"], 1);
    }
}
