//! Provider capability trait and the ordered preference-list registry.

use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::error::ProviderErrorKind;
use crate::health::HealthRegistry;
use crate::model::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

/// A backend LLM provider. Each instance is exclusively owned by the
/// [`ProviderRegistry`]; callers look it up by name.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        request: &CompletionRequest,
        deadline: Duration,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Minimal canary call used by the health monitor. Default delegates to
    /// `call` with an empty ping request; providers with a cheaper liveness
    /// endpoint should override this.
    async fn probe(&self, deadline: Duration) -> Result<(), ProviderError> {
        let ping = CompletionRequest {
            input: Some("ping".to_string()),
            ..Default::default()
        };
        self.call(&ping, deadline).await.map(|_| ())
    }
}

struct Entry {
    provider: Arc<dyn Provider>,
    preference_rank: usize,
}

/// Ordered preference list over providers, with health and breaker state
/// consulted at lookup time to skip unavailable candidates.
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Arc<Vec<Entry>>,
    health: HealthRegistry,
    breakers: CircuitBreakerRegistry,
}

impl ProviderRegistry {
    pub fn new(
        providers_in_preference_order: Vec<Arc<dyn Provider>>,
        health: HealthRegistry,
        breakers: CircuitBreakerRegistry,
    ) -> Self {
        let entries = providers_in_preference_order
            .into_iter()
            .enumerate()
            .map(|(rank, provider)| Entry { provider, preference_rank: rank })
            .collect();
        Self { entries: Arc::new(entries), health, breakers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.entries.iter().find(|e| e.provider.name() == name).map(|e| e.provider.clone())
    }

    /// Providers in strict preference-list order, skipping any whose health
    /// is `Unhealthy` or whose breaker is `Open`. No load balancing within a
    /// tier: ties are broken by list position alone.
    pub fn next_available(&self) -> impl Iterator<Item = Arc<dyn Provider>> + '_ {
        self.entries
            .iter()
            .filter(|entry| {
                let healthy = self.health.is_healthy(entry.provider.name());
                let breaker_open = self
                    .breakers
                    .get(entry.provider.name())
                    .map(|b| b.state() == crate::circuit_breaker::CircuitState::Open)
                    .unwrap_or(false);
                healthy && !breaker_open
            })
            .map(|entry| entry.provider.clone())
    }

    pub fn preference_rank(&self, name: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.provider.name() == name).map(|e| e.preference_rank)
    }

    pub fn breaker_for(&self, name: &str) -> Option<crate::circuit_breaker::CircuitBreaker> {
        self.breakers.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct ScriptedProvider {
        name: String,
        pub calls: AtomicUsize,
        script: Vec<Result<CompletionResponse, ProviderError>>,
    }

    impl ScriptedProvider {
        pub fn new(name: &str, script: Vec<Result<CompletionResponse, ProviderError>>) -> Self {
            Self { name: name.to_string(), calls: AtomicUsize::new(0), script }
        }

        pub fn always_ok(name: &str, completion: &str) -> Self {
            Self::new(name, vec![Ok(CompletionResponse { completion: completion.to_string() })])
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(
            &self,
            _request: &CompletionRequest,
            _deadline: Duration,
        ) -> Result<CompletionResponse, ProviderError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.script.get(idx).or_else(|| self.script.last());
            outcome.cloned().unwrap_or_else(|| {
                Ok(CompletionResponse { completion: "default".to_string() })
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::health::HealthRegistry;

    fn registry_with(names: &[&str]) -> (ProviderRegistry, HealthRegistry, CircuitBreakerRegistry) {
        let health = HealthRegistry::new(3);
        let breakers = CircuitBreakerRegistry::new();
        let providers: Vec<Arc<dyn Provider>> = names
            .iter()
            .map(|n| {
                health.register(n);
                breakers.register(n.to_string(), CircuitBreaker::new(CircuitBreakerConfig::disabled()));
                Arc::new(ScriptedProvider::always_ok(n, "ok")) as Arc<dyn Provider>
            })
            .collect();
        let registry = ProviderRegistry::new(providers, health.clone(), breakers.clone());
        (registry, health, breakers)
    }

    #[test]
    fn next_available_follows_preference_order() {
        let (registry, _health, _breakers) = registry_with(&["a", "b", "c"]);
        let names: Vec<String> = registry.next_available().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn unhealthy_providers_are_skipped() {
        let (registry, health, _breakers) = registry_with(&["a", "b", "c"]);
        health.mark_unhealthy("a");
        let names: Vec<String> = registry.next_available().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn open_breaker_providers_are_skipped() {
        let (registry, _health, breakers) = registry_with(&["a", "b", "c"]);
        let tripping = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            interval: std::time::Duration::from_secs(60),
            timeout: std::time::Duration::from_secs(30),
            max_requests: 1,
        });
        tripping.try_acquire().unwrap().failure();
        breakers.register("b".to_string(), tripping);
        let names: Vec<String> = registry.next_available().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
