//! Prometheus-backed metrics, wired to the exact names required on the wire.

use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_active_requests: IntGaugeVec,
    pub errors_total: IntCounterVec,
    pub circuit_breaker_state: IntGaugeVec,
    pub health_check_duration_seconds: HistogramVec,
    pub healthy_providers: IntGauge,
    pub deduplicated_requests_total: IntCounter,
    pub rate_limit_hits_total: IntCounterVec,
    pub provider_calls_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("hapax_http_requests_total", "Total HTTP requests by endpoint and status"),
            &["endpoint", "status"],
        )
        .expect("metric registration");

        let http_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "hapax_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["endpoint"],
        )
        .expect("metric registration");

        let http_active_requests = IntGaugeVec::new(
            Opts::new("hapax_http_active_requests", "In-flight HTTP requests by endpoint"),
            &["endpoint"],
        )
        .expect("metric registration");

        let errors_total = IntCounterVec::new(
            Opts::new("hapax_errors_total", "Total errors by kind"),
            &["type"],
        )
        .expect("metric registration");

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Per-provider breaker state: 0=closed, 1=half-open, 2=open",
            ),
            &["provider"],
        )
        .expect("metric registration");

        let health_check_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "hapax_health_check_duration_seconds",
                "Per-provider health probe duration in seconds",
            ),
            &["provider"],
        )
        .expect("metric registration");

        let healthy_providers = IntGauge::new(
            "hapax_healthy_providers",
            "Count of providers currently reporting healthy",
        )
        .expect("metric registration");

        let deduplicated_requests_total = IntCounter::new(
            "hapax_deduplicated_requests_total",
            "Requests that joined an already in-flight call rather than triggering a new one",
        )
        .expect("metric registration");

        let rate_limit_hits_total = IntCounterVec::new(
            Opts::new("hapax_rate_limit_hits_total", "Rate limit rejections by client"),
            &["client"],
        )
        .expect("metric registration");

        registry.register(Box::new(http_requests_total.clone())).expect("metric registration");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric registration");
        registry.register(Box::new(http_active_requests.clone())).expect("metric registration");
        registry.register(Box::new(errors_total.clone())).expect("metric registration");
        registry.register(Box::new(circuit_breaker_state.clone())).expect("metric registration");
        registry
            .register(Box::new(health_check_duration_seconds.clone()))
            .expect("metric registration");
        registry.register(Box::new(healthy_providers.clone())).expect("metric registration");
        registry
            .register(Box::new(deduplicated_requests_total.clone()))
            .expect("metric registration");
        registry.register(Box::new(rate_limit_hits_total.clone())).expect("metric registration");

        let provider_calls_total = IntCounterVec::new(
            Opts::new("hapax_provider_calls_total", "Per-provider call outcomes"),
            &["provider", "outcome"],
        )
        .expect("metric registration");
        registry.register(Box::new(provider_calls_total.clone())).expect("metric registration");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_active_requests,
            errors_total,
            circuit_breaker_state,
            health_check_duration_seconds,
            healthy_providers,
            deduplicated_requests_total,
            rate_limit_hits_total,
            provider_calls_total,
        }
    }

    pub fn observe_request(&self, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total.with_label_values(&[endpoint, &status.to_string()]).inc();
        self.http_request_duration_seconds.with_label_values(&[endpoint]).observe(duration.as_secs_f64());
    }

    pub fn request_started(&self, endpoint: &str) -> ActiveRequestGuard<'_> {
        self.http_active_requests.with_label_values(&[endpoint]).inc();
        ActiveRequestGuard { metrics: self, endpoint: endpoint.to_string() }
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total.with_label_values(&[kind]).inc();
    }

    pub fn set_breaker_state(&self, provider: &str, value: i64) {
        self.circuit_breaker_state.with_label_values(&[provider]).set(value);
    }

    pub fn observe_health_check(&self, provider: &str, duration: Duration) {
        self.health_check_duration_seconds.with_label_values(&[provider]).observe(duration.as_secs_f64());
    }

    pub fn set_healthy_providers(&self, count: i64) {
        self.healthy_providers.set(count);
    }

    pub fn record_rate_limit_hit(&self, client: &str) {
        self.rate_limit_hits_total.with_label_values(&[client]).inc();
    }

    pub fn record_provider_success(&self, provider: &str) {
        self.provider_calls_total.with_label_values(&[provider, "success"]).inc();
    }

    pub fn record_provider_failure(&self, provider: &str) {
        self.provider_calls_total.with_label_values(&[provider, "failure"]).inc();
    }

    /// Render the registry in Prometheus text exposition format, for `GET /metrics`.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer).expect("metrics encoding never fails");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements `hapax_http_active_requests` when dropped, so cancellation
/// (the guard's scope ending early) is reflected within one scheduling quantum.
pub struct ActiveRequestGuard<'a> {
    metrics: &'a Metrics,
    endpoint: String,
}

impl Drop for ActiveRequestGuard<'_> {
    fn drop(&mut self) {
        self.metrics.http_active_requests.with_label_values(&[&self.endpoint]).dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_request_guard_decrements_on_drop() {
        let metrics = Metrics::new();
        {
            let _guard = metrics.request_started("/v1/completions");
            assert_eq!(metrics.http_active_requests.with_label_values(&["/v1/completions"]).get(), 1);
        }
        assert_eq!(metrics.http_active_requests.with_label_values(&["/v1/completions"]).get(), 0);
    }

    #[test]
    fn render_includes_required_metric_names() {
        let metrics = Metrics::new();
        metrics.observe_request("/v1/completions", 200, Duration::from_millis(10));
        metrics.deduplicated_requests_total.inc();
        let text = metrics.render();
        assert!(text.contains("hapax_http_requests_total"));
        assert!(text.contains("hapax_deduplicated_requests_total"));
    }
}
