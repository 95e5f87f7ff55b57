//! Sliding-window limiter keyed by client identity, adapted from ironclaw's
//! per-(user, tool) window accounting down to a single per-client window.

use super::Decision;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 60, window: Duration::from_secs(60) }
    }
}

struct Window {
    started_at: Instant,
    count: u32,
}

impl Window {
    fn new() -> Self {
        Self { started_at: Instant::now(), count: 0 }
    }

    fn maybe_reset(&mut self, window: Duration) {
        if self.started_at.elapsed() >= window {
            self.started_at = Instant::now();
            self.count = 0;
        }
    }

    fn time_until_reset(&self, window: Duration) -> Duration {
        window.saturating_sub(self.started_at.elapsed())
    }
}

/// Tracks one sliding window per client. A client with no prior traffic is
/// implicitly allowed: the map only grows on first contact.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: RwLock<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, windows: RwLock::new(HashMap::new()) }
    }

    /// Checks and records one request against `client`'s window.
    pub fn check_and_record(&self, client: &str) -> Decision {
        let mut windows = self.windows.write().expect("rate limiter poisoned");
        let entry = windows.entry(client.to_string()).or_insert_with(Window::new);
        entry.maybe_reset(self.config.window);

        if entry.count >= self.config.max_requests {
            return Decision::Denied { wait: entry.time_until_reset(self.config.window) };
        }

        entry.count += 1;
        Decision::Allowed { remaining: self.config.max_requests - entry.count }
    }

    pub fn clear(&self) {
        self.windows.write().expect("rate limiter poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 3, window: Duration::from_secs(60) });
        for _ in 0..3 {
            assert!(limiter.check_and_record("client-a").is_allowed());
        }
        assert!(!limiter.check_and_record("client-a").is_allowed());
    }

    #[test]
    fn clients_are_isolated() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 1, window: Duration::from_secs(60) });
        assert!(limiter.check_and_record("client-a").is_allowed());
        assert!(limiter.check_and_record("client-b").is_allowed());
        assert!(!limiter.check_and_record("client-a").is_allowed());
    }

    #[test]
    fn denied_decision_reports_wait_duration() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 1, window: Duration::from_secs(30) });
        limiter.check_and_record("client-a");
        match limiter.check_and_record("client-a") {
            Decision::Denied { wait } => assert!(wait <= Duration::from_secs(30)),
            Decision::Allowed { .. } => panic!("expected denial"),
        }
    }

    #[test]
    fn clear_resets_all_clients() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 1, window: Duration::from_secs(60) });
        limiter.check_and_record("client-a");
        assert!(!limiter.check_and_record("client-a").is_allowed());
        limiter.clear();
        assert!(limiter.check_and_record("client-a").is_allowed());
    }
}
