//! Rate limiting: per-(site, host, action) cooldown plus per-client
//! and global hourly ceilings, with adaptive cooldown doubling on
//! repeated failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_seconds: u64,
}

/// Storage for rate-limit counters. The default implementation is
/// local (`dashmap` + wall-clock windows); a distributed backend can
/// be swapped in without touching the policy logic in `RateLimiter`.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    async fn check_and_record(&self, client_id: &str, site: &str, host: &str, action: &str) -> RateLimitResult;
    async fn record_failure(&self, client_id: &str, site: &str, host: &str, action: &str);
    fn clear(&self, client_id: &str);
}

struct HourlyCounter {
    count: AtomicU32,
    window_start: parking_lot::Mutex<DateTime<Utc>>,
}

impl HourlyCounter {
    fn new() -> Self {
        Self { count: AtomicU32::new(0), window_start: parking_lot::Mutex::new(Utc::now()) }
    }

    fn increment(&self) -> u32 {
        let mut start = self.window_start.lock();
        if (Utc::now() - *start).num_seconds() >= 3600 {
            *start = Utc::now();
            self.count.store(0, Ordering::SeqCst);
        }
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current(&self) -> u32 {
        let start = self.window_start.lock();
        if (Utc::now() - *start).num_seconds() >= 3600 {
            0
        } else {
            self.count.load(Ordering::SeqCst)
        }
    }

    fn seconds_remaining(&self) -> u64 {
        let start = self.window_start.lock();
        let elapsed = (Utc::now() - *start).num_seconds().max(0);
        (3600 - elapsed).max(0) as u64
    }
}

pub struct LocalRateLimiter {
    cooldowns: DashMap<String, (DateTime<Utc>, u32)>,
    client_counters: DashMap<String, HourlyCounter>,
    global_counter: HourlyCounter,
    base_cooldown_seconds: u64,
    max_cooldown_seconds: u64,
    client_limit_per_hour: u32,
    global_limit_per_hour: u32,
}

impl LocalRateLimiter {
    pub fn new(base_cooldown_seconds: u64, client_limit_per_hour: u32, global_limit_per_hour: u32) -> Self {
        Self {
            cooldowns: DashMap::new(),
            client_counters: DashMap::new(),
            global_counter: HourlyCounter::new(),
            base_cooldown_seconds,
            max_cooldown_seconds: base_cooldown_seconds * 8,
            client_limit_per_hour,
            global_limit_per_hour,
        }
    }

    fn cooldown_key(site: &str, host: &str, action: &str) -> String {
        format!("{site}\u{1}{host}\u{1}{action}")
    }
}

#[async_trait]
impl RateLimitBackend for LocalRateLimiter {
    async fn check_and_record(&self, client_id: &str, site: &str, host: &str, action: &str) -> RateLimitResult {
        let cooldown_key = Self::cooldown_key(site, host, action);

        if let Some(entry) = self.cooldowns.get(&cooldown_key) {
            let (started_at, failures) = *entry;
            let cooldown = (self.base_cooldown_seconds * 2u64.saturating_pow(failures)).min(self.max_cooldown_seconds);
            let elapsed = (Utc::now() - started_at).num_seconds().max(0) as u64;
            if elapsed < cooldown {
                return RateLimitResult { allowed: false, remaining: 0, retry_after_seconds: cooldown - elapsed };
            }
        }

        let client_counter = self.client_counters.entry(client_id.to_string()).or_insert_with(HourlyCounter::new);
        if client_counter.current() >= self.client_limit_per_hour {
            return RateLimitResult { allowed: false, remaining: 0, retry_after_seconds: client_counter.seconds_remaining() };
        }
        if self.global_counter.current() >= self.global_limit_per_hour {
            return RateLimitResult { allowed: false, remaining: 0, retry_after_seconds: self.global_counter.seconds_remaining() };
        }

        self.cooldowns.insert(cooldown_key, (Utc::now(), 0));
        let used = client_counter.increment();
        self.global_counter.increment();

        RateLimitResult { allowed: true, remaining: self.client_limit_per_hour.saturating_sub(used), retry_after_seconds: 0 }
    }

    /// Doubles the next cooldown for this (site, host, action), capped
    /// at `max_cooldown_seconds`, so a flapping action backs off
    /// faster than its nominal cooldown.
    async fn record_failure(&self, _client_id: &str, site: &str, host: &str, action: &str) {
        let key = Self::cooldown_key(site, host, action);
        self.cooldowns
            .entry(key)
            .and_modify(|(started_at, failures)| {
                *started_at = Utc::now();
                *failures = (*failures + 1).min(8);
            })
            .or_insert((Utc::now(), 1));
    }

    fn clear(&self, client_id: &str) {
        self.client_counters.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_is_allowed_then_cooldown_applies() {
        let limiter = LocalRateLimiter::new(300, 100, 1000);
        let first = limiter.check_and_record("client-1", "site", "host", "restart_service").await;
        assert!(first.allowed);
        let second = limiter.check_and_record("client-1", "site", "host", "restart_service").await;
        assert!(!second.allowed);
        assert!(second.retry_after_seconds > 0);
    }

    #[tokio::test]
    async fn client_hourly_ceiling_is_enforced() {
        let limiter = LocalRateLimiter::new(0, 2, 1000);
        assert!(limiter.check_and_record("c", "s1", "h1", "a").await.allowed);
        assert!(limiter.check_and_record("c", "s2", "h2", "a").await.allowed);
        assert!(!limiter.check_and_record("c", "s3", "h3", "a").await.allowed);
    }

    #[tokio::test]
    async fn repeated_failures_double_the_cooldown() {
        let limiter = LocalRateLimiter::new(10, 100, 1000);
        limiter.check_and_record("c", "s", "h", "a").await;
        limiter.record_failure("c", "s", "h", "a").await;
        let result = limiter.check_and_record("c", "s", "h", "a").await;
        assert!(!result.allowed);
        assert!(result.retry_after_seconds >= 10);
    }
}
