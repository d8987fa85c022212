//! HTTP integration for axum applications.

mod gate;
mod middleware;

pub use gate::{feature_rate_limit, FeatureGate};
pub use middleware::{rate_limit, AuthenticatedUser, Gate};
