//! Core rate limiter implementation.
//!
//! Combines policy selection, sliding window accounting and the burst
//! guard into a single per-request check. The limiter itself is
//! stateless apart from the policy table; every counter lives in the
//! shared store.

use parking_lot::RwLock;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::burst;
use super::policy::{RateLimitPolicies, RequestContext};
use super::window::{self, Decision};
use crate::store::RateLimitStore;

/// The terminal outcome of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub enum Verdict {
    /// Forward the request; the decision carries quota headers.
    Admitted(Decision),
    /// Short-circuit the request with a rejection.
    Rejected(Decision),
    /// The store was unreachable; forward the request without quota
    /// numbers (fail-open).
    AdmittedDegraded,
}

/// The rate limiter shared by all request tasks.
///
/// Holds no per-key state: arbitrarily many tasks across arbitrarily many
/// server processes may call [`check`](Self::check) concurrently, and the
/// admitted count within any rolling window still never exceeds the
/// configured limit while the store is reachable.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policies: RwLock<RateLimitPolicies>,
}

impl RateLimiter {
    /// Create a rate limiter with default policies.
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self::with_policies(store, RateLimitPolicies::new())
    }

    /// Create a rate limiter with the given policy table.
    pub fn with_policies(store: Arc<dyn RateLimitStore>, policies: RateLimitPolicies) -> Self {
        Self {
            store,
            policies: RwLock::new(policies),
        }
    }

    /// Replace the policy table.
    pub fn set_policies(&self, policies: RateLimitPolicies) {
        let mut current = self.policies.write();
        *current = policies;
    }

    /// Get the current policy table.
    pub fn policies(&self) -> RateLimitPolicies {
        self.policies.read().clone()
    }

    /// Check one request against its resolved policy.
    ///
    /// Never fails: a store outage resolves to a degraded admission, so
    /// the limiter cannot cascade a store failure into request failures.
    pub async fn check(&self, ctx: &RequestContext) -> Verdict {
        let resolved = self.policies.read().resolve(ctx);
        let now = Utc::now();

        let decision = match window::evaluate(
            self.store.as_ref(),
            &resolved.key,
            &resolved.window,
            now,
        )
        .await
        {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    key = %resolved.key,
                    error = %error,
                    "Store unreachable, admitting request without rate limit"
                );
                return Verdict::AdmittedDegraded;
            }
        };

        if !decision.allowed {
            debug!(
                key = %resolved.key,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            return Verdict::Rejected(decision);
        }

        if let Some(quota) = &resolved.burst {
            match burst::check(self.store.as_ref(), &resolved.ip_subject, quota).await {
                Ok(true) => {}
                Ok(false) => {
                    return Verdict::Rejected(Decision {
                        allowed: false,
                        limit: decision.limit,
                        remaining: 0,
                        reset_at: now.timestamp() + quota.window_secs as i64,
                    });
                }
                Err(error) => {
                    // The window verdict stands; the burst guard carries no
                    // part of the soundness invariant.
                    warn!(
                        subject = %resolved.ip_subject,
                        error = %error,
                        "Burst guard unreachable, skipping burst check"
                    );
                }
            }
        }

        Verdict::Admitted(decision)
    }
}
