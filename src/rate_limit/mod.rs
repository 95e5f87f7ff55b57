//! Per-client rate limiting, satisfying the middleware contract of §4.8. The
//! concrete strategy is ambient infrastructure (not named by the core spec),
//! so it borrows the teacher's `RateLimiter`/`Decision` shape and the sliding
//! window accounting ironclaw's tool rate limiter uses per-key.

mod limiter;

pub use limiter::{RateLimitConfig, RateLimiter};

use std::time::Duration;

/// Outcome of a rate-limit check, in the teacher's `Decision` idiom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Denied { wait: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}
