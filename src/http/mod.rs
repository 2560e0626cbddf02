//! HTTP middleware adapter.
//!
//! Wraps the rate limiter as a tower layer for the platform's axum
//! router: quota headers on admitted responses, a 429 short-circuit when
//! a guard rejects, and fail-open pass-through when the store is down.

mod layer;

pub use layer::{AuthIdentity, RateLimitLayer, RateLimitService};
