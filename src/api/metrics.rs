//! Prometheus-compatible `/metrics` endpoint (admin port).
//!
//! All metrics are derived from the in-memory ring-buffer traffic log, so
//! they represent a **sliding window** of recent requests rather than
//! lifetime counters — `TYPE gauge` throughout, values may decrease as old
//! entries rotate out.
//!
//! Metric families:
//! - `smart_router_window_size`        — entries currently in the ring buffer
//! - `smart_router_requests`           — per-tier/provider/outcome request counts
//! - `smart_router_latency_ms_sum`     — sum of latencies per tier/provider (for avg)
//! - `smart_router_latency_ms_count`   — denominator matching the sum above
//! - `smart_router_errors_total`       — requests that returned an error

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::dispatcher::RouterState;

pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let entries = state.traffic_log.recent(usize::MAX).await;

    let window_size = entries.len();
    let mut errors: u64 = 0;
    // (tier, provider, success) -> count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // (tier, provider) -> (latency_sum_ms, count)
    let mut latency: HashMap<(String, String), (u64, u64)> = HashMap::new();

    for e in &entries {
        let tier = e["tier"].as_str().unwrap_or("unknown").to_string();
        let provider = e["provider"].as_str().unwrap_or("unknown").to_string();
        let success = e["success"].as_bool().unwrap_or(false);
        let latency_ms = e["latency_ms"].as_u64().unwrap_or(0);

        if !success {
            errors += 1;
        }
        *request_counts.entry((tier.clone(), provider.clone(), success)).or_default() += 1;
        let lat = latency.entry((tier, provider)).or_default();
        lat.0 += latency_ms;
        lat.1 += 1;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP smart_router_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE smart_router_window_size gauge\n");
    out.push_str(&format!("smart_router_window_size {window_size}\n\n"));

    out.push_str("# HELP smart_router_requests Request count in the current window, labelled by tier, provider, and outcome.\n");
    out.push_str("# TYPE smart_router_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((tier, provider, success), count) in req_rows {
        out.push_str(&format!(
            "smart_router_requests{{tier=\"{tier}\",provider=\"{provider}\",success=\"{success}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP smart_router_latency_ms_sum Sum of request latency (ms) in the current window, grouped by tier and provider.\n");
    out.push_str("# TYPE smart_router_latency_ms_sum gauge\n");
    out.push_str("# HELP smart_router_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE smart_router_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((tier, provider), (sum, count)) in lat_rows {
        out.push_str(&format!("smart_router_latency_ms_sum{{tier=\"{tier}\",provider=\"{provider}\"}} {sum}\n"));
        out.push_str(&format!("smart_router_latency_ms_count{{tier=\"{tier}\",provider=\"{provider}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP smart_router_errors_total Requests that returned an error in the current window.\n");
    out.push_str("# TYPE smart_router_errors_total gauge\n");
    out.push_str(&format!("smart_router_errors_total {errors}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::traffic::{RequestStats, TrafficLog, TrafficSink};

    async fn mock_log() -> Arc<TrafficLog> {
        let log = Arc::new(TrafficLog::new(100));
        let mut s1 = RequestStats::new("openai", "gpt-4o", "simple");
        s1.latency_ms = 120;
        log.record_request(s1).await;
        let mut s2 = RequestStats::new("openai", "gpt-4o", "simple");
        s2.latency_ms = 95;
        log.record_request(s2).await;
        let mut s3 = RequestStats::new("groq", "llama-3.3-70b-versatile", "medium");
        s3.latency_ms = 430;
        log.record_request(s3).await;
        let mut s4 = RequestStats::new("openai", "gpt-4o", "simple");
        s4.latency_ms = 80;
        s4.success = false;
        s4.error = Some("upstream 500".into());
        log.record_request(s4).await;
        log
    }

    #[tokio::test]
    async fn window_size_equals_entry_count() {
        let log = mock_log().await;
        assert_eq!(log.recent(usize::MAX).await.len(), 4);
    }

    #[tokio::test]
    async fn error_count_is_accurate() {
        let log = mock_log().await;
        let entries = log.recent(usize::MAX).await;
        let errors = entries.iter().filter(|e| !e["success"].as_bool().unwrap_or(true)).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn latency_sum_is_accurate() {
        let log = mock_log().await;
        let entries = log.recent(usize::MAX).await;
        let sum: u64 = entries
            .iter()
            .filter(|e| e["tier"] == "simple" && e["provider"] == "openai")
            .map(|e| e["latency_ms"].as_u64().unwrap_or(0))
            .sum();
        // 120 + 95 + 80 = 295
        assert_eq!(sum, 295);
    }
}
