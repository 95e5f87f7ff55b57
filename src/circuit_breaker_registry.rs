//! Named lookup over per-provider circuit breakers.

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default, Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: String, breaker: CircuitBreaker) {
        self.inner.lock().expect("breaker registry poisoned").insert(provider, breaker);
    }

    pub fn get(&self, provider: &str) -> Option<CircuitBreaker> {
        self.inner.lock().expect("breaker registry poisoned").get(provider).cloned()
    }

    /// Snapshot of every registered breaker's state, sorted by provider name,
    /// for the `circuit_breaker_state{provider}` gauge and `/health`.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().expect("breaker registry poisoned");
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(name, breaker)| (name.clone(), breaker.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
