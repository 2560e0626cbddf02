//! Burst guard: a short-horizon spike cap.
//!
//! Independent of the sliding window, a plain counter per client address
//! catches short spikes that a coarse window would admit. The counter
//! lives in its own key namespace and expires a fixed short interval
//! after its first increment. It is not atomic with the window check and
//! carries no part of the primary soundness invariant.

use tracing::debug;

use super::policy::BurstQuota;
use crate::store::{RateLimitStore, StoreError};

/// Record one burst-guarded request for `subject` and report whether it
/// stays within the cap.
pub async fn check(
    store: &dyn RateLimitStore,
    subject: &str,
    quota: &BurstQuota,
) -> Result<bool, StoreError> {
    let key = format!("burst:{}", subject);
    let count = store.increment_counter(&key, quota.window()).await?;
    let allowed = count <= u64::from(quota.size);

    if !allowed {
        debug!(
            subject = %subject,
            count = count,
            size = quota.size,
            "Burst guard tripped"
        );
    }

    Ok(allowed)
}
