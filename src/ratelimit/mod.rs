//! Rate limiting logic and counter storage.

mod key;
mod limiter;
mod redis;
mod rules;
mod store;

pub use key::{build_key, KeyParam, RequestFacts, ANONYMOUS_USER};
pub use limiter::{Algorithm, Decision, LimitSpec, RateLimiter, TimeUnit, DEFAULT_MESSAGE};
pub use redis::RedisStore;
pub use rules::{ConfigProvider, FeatureRule, RulesConfig, StaticConfigProvider};
pub use store::{CounterStore, MemoryStore, StoreError};

#[cfg(test)]
pub(crate) use store::testing;
