#![forbid(unsafe_code)]

//! # Hapax
//!
//! A deduplicating, failover-aware HTTP gateway in front of multiple LLM
//! providers.
//!
//! ## Features
//!
//! - **Request coalescing**: identical in-flight completions share one
//!   upstream call via a fingerprint-keyed single-flight registry.
//! - **Ordered failover**: a configured provider preference list, skipping
//!   unhealthy or circuit-broken candidates.
//! - **Per-provider circuit breakers**: lock-free three-state atomics
//!   (`Closed -> Open -> HalfOpen`) independent of request-serving tasks.
//! - **Background health monitoring**: periodic canary probes feed both the
//!   health registry and the breakers.
//! - **Retry-before-failover**: bounded per-provider retries with
//!   exponential backoff and full jitter before advancing to the next
//!   candidate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hapax::config::Config;
//! use hapax::router::{build_router, AppState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let _ = config;
//!     // See `hapax::main` (the `hapax` binary) for the full wiring from
//!     // `Config` through to a running `axum` server.
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod http_provider;
pub mod jitter;
pub mod metrics;
pub mod middleware;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod rate_limit;
pub mod router;
pub mod single_flight;
pub mod sleeper;
pub mod validation;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::Config;
pub use error::{ErrorKind, HapaxError, ProviderErrorKind};
pub use fingerprint::{fingerprint, Fingerprint};
pub use health::HealthRegistry;
pub use http_provider::HttpProvider;
pub use metrics::Metrics;
pub use model::{CompletionRequest, CompletionResponse};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use provider::{Provider, ProviderError, ProviderRegistry};
pub use router::{build_router, AppState};
