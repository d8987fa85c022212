//! Counter store abstraction and in-memory implementation.
//!
//! Both rate limiting algorithms read and write exclusively through the
//! [`CounterStore`] trait, so the store can be the shared Redis deployment
//! in production or an in-process map in tests and single-instance setups.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Operations between automatic sweeps of expired in-memory entries.
const SWEEP_INTERVAL: u64 = 4096;

/// Current wall-clock time in microseconds.
///
/// Microsecond resolution keeps concurrent requests distinguishable in
/// the sliding window's event log.
pub(crate) fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// Errors that can occur when talking to a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
    /// The store did not answer within the configured bound.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Atomic counter primitives shared by both rate limiting algorithms.
///
/// Implementations must guarantee that concurrent callers sharing a key
/// never lose updates; the algorithms perform no client-side
/// read-modify-write of their own.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the integer counter at `key`.
    ///
    /// If the key does not exist it is created with value 1 and an expiry
    /// of `window_secs`. Returns the post-increment value.
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> Result<u64, StoreError>;

    /// Add an event marker scored by `timestamp_micros` to the ordered
    /// collection at `key`, discarding markers older than the trailing
    /// window. Returns the count of markers currently within the window.
    async fn add_timestamped_event(
        &self,
        key: &str,
        timestamp_micros: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError>;
}

/// A fixed-window counter with its expiry deadline.
#[derive(Debug)]
struct WindowCounter {
    count: u64,
    expires_at: Instant,
}

/// A sliding-window event log with the window it was last pruned to.
#[derive(Debug)]
struct EventLog {
    window_micros: u64,
    timestamps: Vec<u64>,
}

/// In-process counter store.
///
/// Implements the exact same contract as the Redis store, which makes it
/// suitable both for deterministic tests and for single-instance
/// deployments that have no shared cache. Expired entries are swept
/// every `SWEEP_INTERVAL` operations so idle keys do not accumulate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, WindowCounter>,
    events: DashMap<String, EventLog>,
    ops: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live fixed-window counters, expired or not.
    ///
    /// Primarily useful for tests.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Number of live sliding-window event logs.
    pub fn event_log_count(&self) -> usize {
        self.events.len()
    }

    /// Drop every counter past its expiry and every event log whose
    /// markers have all aged out of their window.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, counter| counter.expires_at > now);

        let now_micros = now_micros();
        self.events.retain(|_, log| {
            log.timestamps
                .iter()
                .any(|&ts| ts + log.window_micros > now_micros)
        });
    }

    fn maybe_sweep(&self) {
        if self.ops.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        self.maybe_sweep();

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter {
                count: 0,
                expires_at: now + Duration::from_secs(window_secs),
            });

        // TTL-style reset: the window is anchored to the first request.
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + Duration::from_secs(window_secs);
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn add_timestamped_event(
        &self,
        key: &str,
        timestamp_micros: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError> {
        self.maybe_sweep();

        let window_micros = window_secs.saturating_mul(1_000_000);

        let mut log = self.events.entry(key.to_string()).or_insert_with(|| EventLog {
            window_micros,
            timestamps: Vec::new(),
        });
        log.window_micros = window_micros;
        // A marker exactly one window old is expired; only strictly
        // younger markers count.
        log.timestamps
            .retain(|&ts| ts + window_micros > timestamp_micros);
        log.timestamps.push(timestamp_micros);

        Ok(log.timestamps.len() as u64)
    }
}
