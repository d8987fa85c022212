//! HTTP middleware guarding handlers with a rate limit.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{
    build_key, CounterStore, Decision, LimitSpec, RateLimiter, RequestFacts, ANONYMOUS_USER,
};

/// Identity of the authenticated caller.
///
/// The application's auth layer inserts this into request extensions;
/// when absent, keys fall back to the anonymous placeholder.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub String);

/// JSON body returned with a denial.
#[derive(Debug, Serialize)]
struct DenialBody {
    message: String,
}

/// A rate limit applied to one handler.
///
/// Holds no per-request state of its own; any number of handlers can be
/// guarded by independent gates, each namespaced by its own key.
pub struct Gate {
    limiter: RateLimiter,
    spec: LimitSpec,
}

impl Gate {
    /// Create a gate over the given store.
    ///
    /// Fails immediately on an invalid spec rather than letting the
    /// misconfiguration surface per request in production.
    pub fn new(store: Arc<dyn CounterStore>, spec: LimitSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            limiter: RateLimiter::new(store),
            spec,
        })
    }

    /// Evaluate the request and either pass it to the inner handler or
    /// short-circuit with a throttling response.
    pub async fn handle(&self, req: Request, next: Next) -> Response {
        let facts = request_facts(&req);
        let key = build_key(&self.spec.params, &facts);
        enforce(&self.limiter, &self.spec, &key, &facts, req, next).await
    }
}

/// axum middleware adapter for [`Gate`].
///
/// Attach with `middleware::from_fn_with_state(gate, rate_limit)`.
pub async fn rate_limit(State(gate): State<Arc<Gate>>, req: Request, next: Next) -> Response {
    gate.handle(req, next).await
}

/// Snapshot the request attributes the key builder works from.
pub(crate) fn request_facts(req: &Request) -> RequestFacts {
    RequestFacts {
        path: req.uri().path().to_string(),
        method: req.method().as_str().to_string(),
        user: req
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone()),
    }
}

/// Shared enforcement path for [`Gate`] and the feature-gated variant.
pub(crate) async fn enforce(
    limiter: &RateLimiter,
    spec: &LimitSpec,
    key: &str,
    facts: &RequestFacts,
    req: Request,
    next: Next,
) -> Response {
    let decision = limiter.check(key, spec).await;

    if decision.limited {
        info!(
            key = %key,
            caller = %facts.user.as_deref().unwrap_or(ANONYMOUS_USER),
            timestamp = %chrono::Utc::now(),
            "Request rate limited"
        );
        return too_many_requests(&decision);
    }

    next.run(req).await
}

fn too_many_requests(decision: &Decision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(DenialBody {
            message: decision.message.clone(),
        }),
    )
        .into_response();

    response.headers_mut().insert(
        header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after.as_secs()),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{testing::FailingStore, Algorithm, KeyParam, MemoryStore, TimeUnit};
    use axum::{body::Body, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn spec(max_count: u64, params: Vec<KeyParam>) -> LimitSpec {
        LimitSpec {
            max_count,
            unit: TimeUnit::Minute,
            algorithm: Algorithm::FixedWindow,
            message: "Slow down.".to_string(),
            params,
        }
    }

    fn guarded_app(store: Arc<dyn CounterStore>, spec: LimitSpec) -> Router {
        let gate = Arc::new(Gate::new(store, spec).unwrap());
        Router::new().route(
            "/api/loans",
            get(|| async { "ok" })
                .layer(axum::middleware::from_fn_with_state(gate, rate_limit)),
        )
    }

    fn request(user: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/loans");
        if let Some(user) = user {
            builder = builder.extension(AuthenticatedUser(user.to_string()));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_fourth_request_is_denied_with_message() {
        let app = guarded_app(
            Arc::new(MemoryStore::new()),
            spec(3, vec![KeyParam::Path, KeyParam::AuthenticatedUser, KeyParam::Method]),
        );

        for _ in 0..3 {
            let response = app.clone().oneshot(request(Some("user-1"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request(Some("user-1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(60u64)
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Slow down.");
    }

    #[tokio::test]
    async fn test_callers_are_limited_independently() {
        let app = guarded_app(
            Arc::new(MemoryStore::new()),
            spec(1, vec![KeyParam::Path, KeyParam::AuthenticatedUser]),
        );

        let ok = app.clone().oneshot(request(Some("user-1"))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = app.clone().oneshot(request(Some("user-1"))).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        // A different caller and the anonymous caller each get their own
        // counter.
        let other = app.clone().oneshot(request(Some("user-2"))).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);

        let anonymous = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_lets_requests_through() {
        let app = guarded_app(Arc::new(FailingStore), spec(1, vec![KeyParam::Path]));

        for _ in 0..5 {
            let response = app.clone().oneshot(request(None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_gate_rejects_invalid_spec_at_setup() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let result = Gate::new(store, spec(0, vec![KeyParam::Path]));
        assert!(result.is_err());
    }
}
