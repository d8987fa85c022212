//! Rate limit key construction.

use serde::{Deserialize, Serialize};

/// Placeholder identity used when a key includes the authenticated user
/// but the request carries no identity.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Request attribute kinds a rate limit key can be built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyParam {
    /// The request path
    Path,
    /// The authenticated caller identity
    AuthenticatedUser,
    /// The HTTP method
    Method,
    /// A literal value supplied by the caller
    Custom(String),
}

/// Framework-agnostic snapshot of the request attributes the key builder
/// needs. The HTTP adapter fills this in from the real request.
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    /// The request path (e.g. `/api/loans`)
    pub path: String,
    /// The HTTP method (e.g. `GET`)
    pub method: String,
    /// The authenticated caller identity, if any
    pub user: Option<String>,
}

/// Build a rate limit key from the selected request attributes.
///
/// The key is deterministic: two requests with identical values for every
/// selected attribute produce the same key. Components are joined with `:`
/// in the order the parameters were given.
pub fn build_key(params: &[KeyParam], facts: &RequestFacts) -> String {
    let parts: Vec<&str> = params
        .iter()
        .map(|param| match param {
            KeyParam::Path => facts.path.as_str(),
            KeyParam::AuthenticatedUser => facts.user.as_deref().unwrap_or(ANONYMOUS_USER),
            KeyParam::Method => facts.method.as_str(),
            KeyParam::Custom(value) => value.as_str(),
        })
        .collect();

    parts.join(":")
}
