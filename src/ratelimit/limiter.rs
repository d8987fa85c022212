//! Core rate limiting decision logic.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FloodgateError, Result};

use super::key::KeyParam;
use super::store::{now_micros, CounterStore};

/// Prefix applied to every key at the store boundary so counters never
/// collide with other users of a shared cache.
const KEY_PREFIX: &str = "floodgate";

/// Default message returned to a rate limited caller.
pub const DEFAULT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Granularity of a rate limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }

    /// Window length in whole seconds.
    pub fn as_secs(&self) -> u64 {
        self.duration().as_secs()
    }
}

/// Rate limiting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Count requests in discrete buckets anchored to the first request.
    ///
    /// Two bursts straddling a window boundary can together exceed the
    /// limit within a short real-time span. That imprecision is inherent
    /// to the strategy and accepted in exchange for a single scalar
    /// counter per key.
    #[default]
    FixedWindow,
    /// Count requests within a continuously moving trailing interval.
    ///
    /// Strictly more accurate than the fixed window at the cost of an
    /// ordered collection per key.
    SlidingWindow,
}

/// A complete limit definition for one protected handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Maximum requests allowed within one window
    pub max_count: u64,
    /// Window granularity
    pub unit: TimeUnit,
    /// Strategy used to count requests
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Message shown to the caller on denial
    #[serde(default = "default_message")]
    pub message: String,
    /// Request attributes the key is built from
    pub params: Vec<KeyParam>,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

impl LimitSpec {
    /// Validate the spec, so misconfiguration surfaces at setup time
    /// instead of degrading silently per request.
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(FloodgateError::Config(
                "max_count must be a positive integer".to_string(),
            ));
        }
        if self.params.is_empty() {
            return Err(FloodgateError::Config(
                "at least one key parameter is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of evaluating one request against a limit.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request must be denied
    pub limited: bool,
    /// Message for the caller when denied
    pub message: String,
    /// Requests left in the current window (0 when denied)
    pub remaining: u64,
    /// Upper bound on the wait until the window frees up
    pub retry_after: Duration,
}

impl Decision {
    pub fn allowed(&self) -> bool {
        !self.limited
    }

    fn allow(spec: &LimitSpec, count: u64) -> Self {
        Self {
            limited: false,
            message: spec.message.clone(),
            remaining: spec.max_count.saturating_sub(count),
            retry_after: Duration::ZERO,
        }
    }

    fn deny(spec: &LimitSpec) -> Self {
        Self {
            limited: true,
            message: spec.message.clone(),
            remaining: 0,
            retry_after: spec.unit.duration(),
        }
    }
}

/// The core rate limiter.
///
/// Stateless apart from the injected [`CounterStore`]; safe to share
/// across any number of handlers and worker tasks.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Create a rate limiter over the given store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Evaluate one request for `key` against `spec`.
    ///
    /// The request that brings the in-window count to exactly `max_count`
    /// is allowed; only a count strictly greater than the maximum denies.
    ///
    /// Store failures fail open: the request is allowed and the failure is
    /// logged, so the limiter never becomes a point of failure for the
    /// whole service.
    pub async fn check(&self, key: &str, spec: &LimitSpec) -> Decision {
        let store_key = format!("{}:{}", KEY_PREFIX, key);
        let window_secs = spec.unit.as_secs();

        let result = match spec.algorithm {
            Algorithm::FixedWindow => {
                self.store
                    .increment_with_expiry(&store_key, window_secs)
                    .await
            }
            Algorithm::SlidingWindow => {
                self.store
                    .add_timestamped_event(&store_key, now_micros(), window_secs)
                    .await
            }
        };

        match result {
            Ok(count) if count > spec.max_count => {
                debug!(
                    key = %key,
                    count = count,
                    limit = spec.max_count,
                    "Rate limit exceeded"
                );
                Decision::deny(spec)
            }
            Ok(count) => Decision::allow(spec, count),
            Err(error) => {
                warn!(
                    key = %key,
                    algorithm = ?spec.algorithm,
                    error = %error,
                    "Counter store failure, allowing request"
                );
                Decision::allow(spec, 0)
            }
        }
    }
}
