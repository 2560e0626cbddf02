//! Rate limiting logic and policy resolution.

mod limiter;
mod window;
mod burst;
mod key;
mod policy;

pub use limiter::{RateLimiter, Verdict};
pub use window::{Decision, WindowConfig};
pub use key::{RateLimitKey, UNKNOWN_SUBJECT};
pub use policy::{
    BurstQuota, QuotaConfig, RateLimitPolicies, RequestContext, ResolvedPolicy, RouteQuota,
};
