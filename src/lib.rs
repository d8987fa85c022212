//! Floodgate - Request Rate Limiting
//!
//! This crate implements request rate limiting with interchangeable fixed
//! window and sliding window strategies over a shared counter store
//! (Redis in production, in-process memory for tests and single-instance
//! deployments), plus axum middleware that turns limit decisions into
//! HTTP 429 responses.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
