//! Sliding window accounting.
//!
//! The engine keeps, per key, the timestamps of all events inside a moving
//! window ending at "now". A request is admissible while the window holds
//! fewer than `limit` events. The prune-count-record sequence executes as
//! one atomic store operation, so two concurrent evaluations can never
//! both act on the same stale count; that atomicity, not any in-process
//! lock, is what upholds the limit across server processes.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::trace;

use super::key::RateLimitKey;
use crate::store::{RateLimitStore, StoreError};

/// Configuration for a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Maximum admissions within the window
    pub limit: u32,
    /// Window duration
    pub window: Duration,
}

/// The outcome of an admission check. Computed fresh per request, never
/// persisted.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The limit that applied
    pub limit: u32,
    /// Remaining quota in the window
    pub remaining: u32,
    /// When the window resets (epoch seconds)
    pub reset_at: i64,
}

impl Decision {
    /// Seconds until the caller should retry. Never negative.
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now.timestamp()).max(0) as u64
    }
}

/// Check whether a new event for `key` is admissible under `config`.
///
/// The count taken before the event is recorded decides admission, so at
/// most `limit` events are ever considered in-window at evaluation time.
/// The event is recorded whether or not it is admitted: rejected requests
/// still count against the caller, so rapid retries cannot reset the
/// window. Entries at exactly `now - window` are already expired (the
/// window is half-open).
///
/// A store failure is returned as-is; the caller owns the fail-open or
/// fail-closed decision.
pub async fn evaluate(
    store: &dyn RateLimitStore,
    key: &RateLimitKey,
    config: &WindowConfig,
    now: DateTime<Utc>,
) -> Result<Decision, StoreError> {
    let window_ms = config.window.as_millis() as i64;
    let now_ms = now.timestamp_millis();
    let window_start_ms = now_ms - window_ms;
    let storage_key = format!("window:{}", key);

    let snapshot = store
        .record_event(&storage_key, window_start_ms, now_ms, config.window)
        .await?;

    let seen = snapshot.prior_count.min(u64::from(u32::MAX)) as u32;
    let allowed = seen < config.limit;
    let remaining = config.limit.saturating_sub(seen).saturating_sub(1);
    // The window frees up when its oldest event ages out.
    let reset_at = (snapshot.oldest_ms + window_ms) / 1000;

    trace!(
        key = %key,
        seen = seen,
        limit = config.limit,
        allowed = allowed,
        "Sliding window evaluated"
    );

    Ok(Decision {
        allowed,
        limit: config.limit,
        remaining,
        reset_at,
    })
}
