//! Shared store adapter.
//!
//! All cross-process rate limit state lives in a shared remote key-value
//! store. This module defines the narrow contract the rate limiter needs
//! from it (one atomic window update, one expiring counter) and the Redis
//! implementation of that contract.

mod redis;

#[cfg(test)]
pub(crate) mod memory;

pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors talking to the shared store.
///
/// Either variant means the outcome of the check is indeterminate; the
/// caller decides whether to fail open or closed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(#[from] ::redis::RedisError),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// What the store observed while atomically recording a window event.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    /// Number of in-window events before the new event was recorded.
    pub prior_count: u64,
    /// Timestamp (epoch milliseconds) of the oldest event now in the window.
    pub oldest_ms: i64,
}

/// Contract over the shared remote key-value store.
///
/// Implementations must execute each method as one indivisible unit with
/// respect to concurrent callers, across process boundaries. That atomicity
/// is the sole correctness mechanism: no interleaving caller may observe or
/// act on a stale count.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically drop events at or before `window_start_ms`, count what
    /// remains, record a new event at `now_ms`, and refresh the key's
    /// expiry to `ttl`.
    ///
    /// The returned count is taken *before* the new event is added.
    async fn record_event(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Increment a plain counter, arming `ttl` only when the counter is
    /// created. Returns the post-increment value.
    async fn increment_counter(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}
