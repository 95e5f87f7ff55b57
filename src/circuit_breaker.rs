//! Per-provider three-state circuit breaker: lock-free atomics state machine.
//!
//! `Closed -> Open -> HalfOpen -> (Closed | Open)` only; no state is skipped.
//! `HalfOpen -> Closed` requires every admitted probe in the window to
//! succeed, not merely the first.

use crate::clock::{Clock, MonotonicClock};
use crate::metrics::Metrics;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Value for the `circuit_breaker_state{provider}` gauge:
    /// 0=closed, 1=half-open, 2=open.
    pub fn metric_value(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// `N_failures`: failures within `interval` before tripping open.
    pub failure_threshold: usize,
    /// `T_interval`: rolling window over which failures accumulate while closed.
    pub interval: Duration,
    /// `T_open`: how long the breaker stays open before probing.
    pub timeout: Duration,
    /// `N_halfopen_max`: concurrent probe calls admitted while half-open.
    pub max_requests: usize,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            interval: Duration::from_secs(u64::MAX / 2),
            timeout: Duration::from_secs(0),
            max_requests: usize::MAX,
        }
    }
}

struct State {
    state: AtomicU8,
    failure_count: AtomicUsize,
    window_start_millis: AtomicU64,
    opened_at_millis: AtomicU64,
    half_open_admitted: AtomicUsize,
    half_open_successes: AtomicUsize,
}

/// Rejection reason when a call is refused without reaching the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    pub failure_count: usize,
    pub open_duration: Duration,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<State>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    name: Option<Arc<str>>,
    metrics: Option<Arc<Metrics>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::default())
    }

    pub fn with_clock<C: Clock + 'static>(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            state: Arc::new(State {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                window_start_millis: AtomicU64::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_admitted: AtomicUsize::new(0),
                half_open_successes: AtomicUsize::new(0),
            }),
            config,
            clock: Arc::new(clock),
            name: None,
            metrics: None,
        }
    }

    /// Attaches the provider name and metrics sink this breaker reports
    /// `circuit_breaker_state{provider}` under. Every clone carries the same
    /// attachment, so call this once before the breaker is registered and
    /// handed out to callers.
    pub fn with_metrics(mut self, name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        self.name = Some(name.into().into());
        self.metrics = Some(metrics);
        self
    }

    fn emit_metric(&self, state: CircuitState) {
        if let (Some(name), Some(metrics)) = (&self.name, &self.metrics) {
            metrics.set_breaker_state(name, state.metric_value());
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Acquire a permit to call the provider. `Err(CircuitOpen)` means fail
    /// fast without invoking the provider at all.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
        loop {
            let current = self.state.state.load(Ordering::Acquire);
            match current {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);
                    if elapsed < self.config.timeout.as_millis() as u64 {
                        return Err(CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                    match self.state.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!("circuit breaker -> half-open");
                            self.state.half_open_admitted.store(0, Ordering::Release);
                            self.state.half_open_successes.store(0, Ordering::Release);
                            self.emit_metric(CircuitState::HalfOpen);
                            continue;
                        }
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    let admitted = self.state.half_open_admitted.fetch_add(1, Ordering::AcqRel);
                    if admitted >= self.config.max_requests {
                        self.state.half_open_admitted.fetch_sub(1, Ordering::Release);
                        return Err(CircuitOpen {
                            failure_count: self.state.failure_count.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    return Ok(Permit { breaker: self, half_open: true, resolved: false });
                }
                _ => return Ok(Permit { breaker: self, half_open: false, resolved: false }),
            }
        }
    }

    fn on_success(&self, half_open: bool) {
        if half_open {
            let successes = self.state.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.max_requests.max(1) {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.window_start_millis.store(self.now_millis(), Ordering::Release);
                    tracing::info!("circuit breaker -> closed");
                    self.emit_metric(CircuitState::Closed);
                }
            }
        } else {
            self.maybe_roll_window();
            self.state.failure_count.store(0, Ordering::Release);
        }
    }

    fn on_failure(&self, half_open: bool) {
        if half_open {
            if self
                .state
                .state
                .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                tracing::warn!("circuit breaker: probe failed -> open");
                self.emit_metric(CircuitState::Open);
            }
            return;
        }

        self.maybe_roll_window();
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold
            && self
                .state
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
            tracing::error!(failures, threshold = self.config.failure_threshold, "circuit breaker -> open");
            self.emit_metric(CircuitState::Open);
        }
    }

    fn maybe_roll_window(&self) {
        let start = self.state.window_start_millis.load(Ordering::Acquire);
        let now = self.now_millis();
        if now.saturating_sub(start) >= self.config.interval.as_millis() as u64 {
            self.state.window_start_millis.store(now, Ordering::Release);
            self.state.failure_count.store(0, Ordering::Release);
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

/// A single admitted call. Must be resolved with [`Permit::success`] or
/// [`Permit::failure`]; dropping without resolving is treated as a failure
/// (a panicking provider call must still move the breaker's counters).
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    resolved: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.half_open);
        if self.half_open {
            self.breaker.state.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.half_open);
        if self.half_open {
            self.breaker.state.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_failure(self.half_open);
            if self.half_open {
                self.breaker.state.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}
