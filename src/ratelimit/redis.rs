//! Redis-backed counter store.
//!
//! Fixed-window counters use an atomic `INCR` + `EXPIRE NX` pipeline.
//! Sliding-window event logs use a sorted set maintained by an atomic
//! `MULTI`/`EXEC` pipeline of prune, add, and count.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::store::{CounterStore, StoreError};

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Counter store backed by a shared Redis deployment.
pub struct RedisStore {
    client: redis::Client,
    command_timeout: Duration,
}

impl RedisStore {
    /// Create a store for the given Redis URL.
    ///
    /// Every store round-trip is bounded by `command_timeout` so a slow or
    /// unreachable Redis never stalls request handling.
    pub fn new(url: &str, command_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            command_timeout,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(Into::into)
    }

    async fn bounded<F, T>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.command_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_with_expiry(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;

            // One MULTI/EXEC round-trip: a failure applies neither the
            // increment nor the expiry, so the key can never be left
            // counting without a TTL. EXPIRE NX sets the expiry only
            // when the key has none, keeping the window anchored to its
            // first request.
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .incr(key, 1u64)
                .cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .arg("NX")
                .ignore()
                .query_async(&mut conn)
                .await?;

            Ok(count)
        })
        .await
    }

    async fn add_timestamped_event(
        &self,
        key: &str,
        timestamp_micros: u64,
        window_secs: u64,
    ) -> Result<u64, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;

            let window_micros = window_secs.saturating_mul(1_000_000);
            let cutoff = timestamp_micros.saturating_sub(window_micros);
            // Unique member per request so concurrent events with the same
            // timestamp are all counted.
            let member = format!("{}-{}", timestamp_micros, Uuid::new_v4());

            let (count,): (u64,) = redis::pipe()
                .atomic()
                .zrembyscore(key, 0u64, cutoff)
                .ignore()
                .zadd(key, member, timestamp_micros)
                .ignore()
                .zcard(key)
                .expire(key, window_secs as i64)
                .ignore()
                .query_async(&mut conn)
                .await?;

            Ok(count)
        })
        .await
    }
}
