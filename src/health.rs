//! Per-provider health monitor: independent periodic probes, never blocking
//! request-serving tasks.

use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::metrics::Metrics;
use crate::provider::Provider;
use crate::sleeper::{Sleeper, TokioSleeper};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HEALTHY: u8 = 0;
const UNHEALTHY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

struct Record {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    last_check_ts: Mutex<Option<DateTime<Utc>>>,
}

/// Holds `ProviderHealth` for every registered provider. Updated solely by
/// the health monitor's probe loop; read by the orchestrator and by metrics.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    records: Arc<Mutex<HashMap<String, Arc<Record>>>>,
    failure_threshold: usize,
    metrics: Option<Arc<Metrics>>,
}

impl HealthRegistry {
    pub fn new(failure_threshold: usize) -> Self {
        Self { records: Arc::new(Mutex::new(HashMap::new())), failure_threshold, metrics: None }
    }

    /// Attaches the metrics sink `hapax_healthy_providers` is reported
    /// through. Every clone carries the same attachment, so call this once
    /// before the registry is cloned out to the probe loop / router state.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn emit_healthy_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_healthy_providers(self.healthy_count() as i64);
        }
    }

    pub fn register(&self, provider: &str) {
        {
            let mut records = self.records.lock().expect("health registry poisoned");
            records.entry(provider.to_string()).or_insert_with(|| {
                Arc::new(Record {
                    state: AtomicU8::new(HEALTHY),
                    consecutive_failures: AtomicUsize::new(0),
                    last_check_ts: Mutex::new(None),
                })
            });
        }
        self.emit_healthy_gauge();
    }

    pub fn is_healthy(&self, provider: &str) -> bool {
        self.state(provider) == HealthState::Healthy
    }

    pub fn state(&self, provider: &str) -> HealthState {
        let records = self.records.lock().expect("health registry poisoned");
        match records.get(provider) {
            Some(r) if r.state.load(Ordering::Acquire) == UNHEALTHY => HealthState::Unhealthy,
            // Unregistered providers are treated as unhealthy: they cannot
            // be consulted safely until the monitor has observed them.
            None => HealthState::Unhealthy,
            _ => HealthState::Healthy,
        }
    }

    pub fn record_success(&self, provider: &str) {
        if let Some(record) = self.records.lock().expect("health registry poisoned").get(provider) {
            record.consecutive_failures.store(0, Ordering::Release);
            record.state.store(HEALTHY, Ordering::Release);
            *record.last_check_ts.lock().expect("health registry poisoned") = Some(Utc::now());
        }
        self.emit_healthy_gauge();
    }

    pub fn record_failure(&self, provider: &str) {
        if let Some(record) = self.records.lock().expect("health registry poisoned").get(provider) {
            let failures = record.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            if failures >= self.failure_threshold {
                record.state.store(UNHEALTHY, Ordering::Release);
            }
            *record.last_check_ts.lock().expect("health registry poisoned") = Some(Utc::now());
        }
        self.emit_healthy_gauge();
    }

    pub fn mark_unhealthy(&self, provider: &str) {
        if let Some(record) = self.records.lock().expect("health registry poisoned").get(provider) {
            record.state.store(UNHEALTHY, Ordering::Release);
            record.consecutive_failures.store(self.failure_threshold, Ordering::Release);
        }
        self.emit_healthy_gauge();
    }

    pub fn mark_healthy(&self, provider: &str) {
        self.record_success(provider);
    }

    /// `(provider, state)` pairs, sorted by name, for `/health` and the
    /// `hapax_healthy_providers` gauge.
    pub fn snapshot(&self) -> Vec<(String, HealthState)> {
        self.detailed_snapshot().into_iter().map(|s| (s.provider_name, s.state)).collect()
    }

    /// The full `ProviderHealth` record per spec §3, sorted by name.
    pub fn detailed_snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let records = self.records.lock().expect("health registry poisoned");
        let mut entries: Vec<ProviderHealthSnapshot> = records
            .iter()
            .map(|(name, r)| {
                let state = if r.state.load(Ordering::Acquire) == UNHEALTHY {
                    HealthState::Unhealthy
                } else {
                    HealthState::Healthy
                };
                ProviderHealthSnapshot {
                    provider_name: name.clone(),
                    state,
                    last_check_ts: *r.last_check_ts.lock().expect("health registry poisoned"),
                    consecutive_failures: r.consecutive_failures.load(Ordering::Acquire),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.provider_name.cmp(&b.provider_name));
        entries
    }

    pub fn healthy_count(&self) -> usize {
        self.snapshot().iter().filter(|(_, s)| *s == HealthState::Healthy).count()
    }
}

/// The `ProviderHealth` record of spec §3, as read by the orchestrator and by metrics.
#[derive(Debug, Clone)]
pub struct ProviderHealthSnapshot {
    pub provider_name: String,
    pub state: HealthState,
    pub last_check_ts: Option<DateTime<Utc>>,
    pub consecutive_failures: usize,
}

/// Runs one provider's periodic canary probe until the owning task is
/// aborted. Probe failures feed both the health registry and the breaker,
/// since an out-of-band probe failure still counts per the spec.
pub async fn run_probe_loop(
    provider: Arc<dyn Provider>,
    health: HealthRegistry,
    breakers: CircuitBreakerRegistry,
    interval: Duration,
    timeout: Duration,
) {
    run_probe_loop_with_sleeper(provider, health, breakers, interval, timeout, Arc::new(TokioSleeper)).await
}

async fn run_probe_loop_with_sleeper(
    provider: Arc<dyn Provider>,
    health: HealthRegistry,
    breakers: CircuitBreakerRegistry,
    interval: Duration,
    timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
) {
    health.register(provider.name());
    loop {
        sleeper.sleep(interval).await;
        probe_once(&provider, &health, &breakers, timeout).await;
    }
}

async fn probe_once(
    provider: &Arc<dyn Provider>,
    health: &HealthRegistry,
    breakers: &CircuitBreakerRegistry,
    timeout: Duration,
) {
    let outcome = tokio::time::timeout(timeout, provider.probe(timeout)).await;
    let breaker = breakers.get(provider.name());
    match outcome {
        Ok(Ok(())) => {
            health.record_success(provider.name());
            if let Some(breaker) = breaker {
                if let Ok(permit) = breaker.try_acquire() {
                    permit.success();
                }
            }
            tracing::debug!(provider = provider.name(), "health probe ok");
        }
        Ok(Err(err)) => {
            health.record_failure(provider.name());
            if let Some(breaker) = breaker {
                if let Ok(permit) = breaker.try_acquire() {
                    permit.failure();
                }
            }
            tracing::warn!(provider = provider.name(), error = %err, "health probe failed");
        }
        Err(_) => {
            health.record_failure(provider.name());
            if let Some(breaker) = breaker {
                if let Ok(permit) = breaker.try_acquire() {
                    permit.failure();
                }
            }
            tracing::warn!(provider = provider.name(), "health probe timed out");
        }
    }
}
