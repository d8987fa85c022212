//! Feature-gated rate limiting.
//!
//! Looks up a dynamic per-feature rule before deciding whether to rate
//! limit at all, and with which parameters. When the feature is inactive,
//! missing, or misconfigured, requests pass straight through to the inner
//! handler.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::ratelimit::{build_key, ConfigProvider, CounterStore, RateLimiter};

use super::middleware::{enforce, request_facts};

/// A rate limit applied to one handler only while its feature is active.
///
/// Thin wrapper around the generic enforcement path: the per-request work
/// is the rule lookup and the derivation of the limit parameters.
pub struct FeatureGate {
    feature: String,
    provider: Arc<dyn ConfigProvider>,
    limiter: RateLimiter,
}

impl FeatureGate {
    /// Create a gate for the named feature.
    pub fn new(
        feature: impl Into<String>,
        provider: Arc<dyn ConfigProvider>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            feature: feature.into(),
            provider,
            limiter: RateLimiter::new(store),
        }
    }

    /// Evaluate the request against the feature's current rule.
    pub async fn handle(&self, req: Request, next: Next) -> Response {
        let Some(rule) = self.provider.feature_rule(&self.feature).await else {
            return next.run(req).await;
        };

        if !rule.active {
            return next.run(req).await;
        }

        let spec = rule.to_spec();
        if let Err(error) = spec.validate() {
            warn!(
                feature = %self.feature,
                error = %error,
                "Invalid feature rule, skipping rate limit"
            );
            return next.run(req).await;
        }

        let facts = request_facts(&req);
        // Namespace per feature so two features sharing key parameters
        // never share counters.
        let key = format!("{}:{}", self.feature, build_key(&spec.params, &facts));

        enforce(&self.limiter, &spec, &key, &facts, req, next).await
    }
}

/// axum middleware adapter for [`FeatureGate`].
pub async fn feature_rate_limit(
    State(gate): State<Arc<FeatureGate>>,
    req: Request,
    next: Next,
) -> Response {
    gate.handle(req, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{
        Algorithm, FeatureRule, KeyParam, MemoryStore, StaticConfigProvider, TimeUnit,
    };
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn rule(active: bool, max_count: u64) -> FeatureRule {
        FeatureRule {
            active,
            max_count,
            unit: TimeUnit::Minute,
            algorithm: Algorithm::FixedWindow,
            message: None,
            params: vec![KeyParam::Path],
        }
    }

    fn gated_app(provider: Arc<StaticConfigProvider>) -> Router {
        let gate = Arc::new(FeatureGate::new(
            "login",
            provider,
            Arc::new(MemoryStore::new()),
        ));
        Router::new().route(
            "/login",
            get(|| async { "ok" })
                .layer(axum::middleware::from_fn_with_state(gate, feature_rate_limit)),
        )
    }

    fn request() -> Request {
        axum::http::Request::builder()
            .uri("/login")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_active_rule_is_enforced() {
        let provider = Arc::new(StaticConfigProvider::new());
        provider.set_rule("login", rule(true, 2));
        let app = gated_app(provider);

        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.clone().oneshot(request()).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_inactive_rule_passes_through() {
        let provider = Arc::new(StaticConfigProvider::new());
        provider.set_rule("login", rule(false, 1));
        let app = gated_app(provider);

        for _ in 0..5 {
            assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_missing_rule_passes_through() {
        let app = gated_app(Arc::new(StaticConfigProvider::new()));

        for _ in 0..5 {
            assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_invalid_rule_passes_through() {
        let provider = Arc::new(StaticConfigProvider::new());
        provider.set_rule("login", rule(true, 0));
        let app = gated_app(provider);

        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rule_can_be_flipped_at_runtime() {
        let provider = Arc::new(StaticConfigProvider::new());
        provider.set_rule("login", rule(true, 1));
        let app = gated_app(provider.clone());

        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.clone().oneshot(request()).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        // Deactivate the feature; the same caller is no longer throttled.
        provider.set_rule("login", rule(false, 1));
        assert_eq!(app.clone().oneshot(request()).await.unwrap().status(), StatusCode::OK);
    }
}
