//! Per-IP token bucket rate limiting for the client port.
//!
//! Tokens refill steadily at `rpm / 60` tokens/second and the burst cap is
//! `ceil(rpm / 2)` — enough to absorb short spikes without allowing runaway
//! bursts. Disabled entirely when `rate_limit_rpm` is absent from the
//! gateway config.

use std::{net::IpAddr, time::Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct Bucket {
    last_refill: Instant,
    tokens: f64,
}

/// Shared rate limiter: one token bucket per client IP address.
pub struct RateLimiter {
    pub rpm: u32,
    fill_rate: f64,
    capacity: f64,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        let capacity = ((rpm + 1) / 2) as f64; // ceil(rpm / 2)
        let fill_rate = rpm as f64 / 60.0;
        Self { rpm, fill_rate, capacity, buckets: DashMap::new() }
    }

    /// Attempt to consume one token for `ip`. `Ok(())` if allowed, or
    /// `Err(retry_after_secs)` if the bucket is empty.
    pub fn check(&self, ip: IpAddr) -> Result<(), f64> {
        let now = Instant::now();

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| Bucket { last_refill: now, tokens: self.capacity });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let new_tokens = (bucket.tokens + elapsed * self.fill_rate).min(self.capacity);

        if new_tokens < 1.0 {
            let retry_after = (1.0 - new_tokens) / self.fill_rate;
            return Err(retry_after.ceil());
        }

        bucket.last_refill = now;
        bucket.tokens = new_tokens - 1.0;
        Ok(())
    }
}
