//! Rate limit policy configuration and selection.
//!
//! This module derives, for each inbound request, the key under which its
//! quota is tracked and the quota configuration that applies: a per-route
//! policy when one is configured, the global default otherwise, with a
//! stricter variant for anonymous callers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use super::key::{RateLimitKey, UNKNOWN_SUBJECT};
use super::window::WindowConfig;

/// The complete policy table: a global default plus per-route overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitPolicies {
    /// Quota applied to routes without an explicit entry
    #[serde(default)]
    pub default: QuotaConfig,

    /// Burst guard applied to every route unless overridden per route
    #[serde(default)]
    pub burst: Option<BurstQuota>,

    /// Per-route quotas, keyed by `"METHOD /route"`
    #[serde(default)]
    pub routes: HashMap<String, RouteQuota>,
}

/// Quota for a sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Requests allowed per window for authenticated callers
    #[serde(default = "default_requests")]
    pub requests: u32,

    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per window for anonymous callers.
    /// Defaults to half the authenticated quota.
    #[serde(default)]
    pub anonymous_requests: Option<u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
            anonymous_requests: None,
        }
    }
}

fn default_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

/// Quota for one route. Requests tracked under these policies are keyed
/// per endpoint, so a caller's quota here is independent of its global one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteQuota {
    /// Requests allowed per window for authenticated callers
    pub requests: u32,

    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per window for anonymous callers
    #[serde(default)]
    pub anonymous_requests: Option<u32>,

    /// Burst guard for this route, overriding the shared setting
    #[serde(default)]
    pub burst: Option<BurstQuota>,
}

/// Short-horizon burst cap, independent of the sliding window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstQuota {
    /// Requests allowed within one burst window
    #[serde(default = "default_burst_size")]
    pub size: u32,

    /// Burst window duration in seconds
    #[serde(default = "default_burst_window_secs")]
    pub window_secs: u64,
}

impl BurstQuota {
    /// The burst window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_burst_size() -> u32 {
    50
}

fn default_burst_window_secs() -> u64 {
    1
}

/// Typed request-scoped context consumed by the policy selector.
///
/// The routing and authentication collaborators populate this before the
/// limiter runs; it replaces any untyped grab-bag access to the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP method
    pub method: String,
    /// Raw request path
    pub path: String,
    /// Matched route template, when the router matched one
    pub route: Option<String>,
    /// Client network address, when it could be determined
    pub client_ip: Option<IpAddr>,
    /// Authenticated identity; absence implies anonymous
    pub user_id: Option<String>,
}

impl RequestContext {
    /// Identifier used for per-route policy lookup.
    pub fn route_id(&self) -> String {
        format!("{} {}", self.method, self.route.as_deref().unwrap_or(&self.path))
    }

    /// Subject string used by the burst guard, which keys on the client
    /// address for authenticated and anonymous callers alike.
    pub fn ip_subject(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string())
    }
}

/// The policy resolved for one request.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    /// Key under which the window quota is tracked
    pub key: RateLimitKey,
    /// The sliding window configuration
    pub window: WindowConfig,
    /// Burst guard configuration, when one applies to this route
    pub burst: Option<BurstQuota>,
    /// Subject for the burst guard counter
    pub ip_subject: String,
}

impl RateLimitPolicies {
    /// Create an empty policy table (global defaults only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the key and quota configuration for a request.
    ///
    /// Deterministic and pure: the same request context always resolves to
    /// the same key and configuration.
    pub fn resolve(&self, ctx: &RequestContext) -> ResolvedPolicy {
        let route_id = ctx.route_id();
        let route = self.routes.get(&route_id);

        let (requests, window_secs, anonymous_requests) = match route {
            Some(quota) => (quota.requests, quota.window_secs, quota.anonymous_requests),
            None => (
                self.default.requests,
                self.default.window_secs,
                self.default.anonymous_requests,
            ),
        };

        let limit = match ctx.user_id {
            Some(_) => requests,
            // Anonymous callers get the configured quota or half the
            // authenticated one, never less than a single request.
            None => anonymous_requests.unwrap_or_else(|| (requests / 2).max(1)),
        };

        let key = match &ctx.user_id {
            Some(id) => RateLimitKey::user(id),
            None => RateLimitKey::ip(ctx.client_ip),
        };
        let key = if route.is_some() {
            key.scoped_to(&route_id)
        } else {
            key
        };

        let burst = route
            .and_then(|quota| quota.burst.clone())
            .or_else(|| self.burst.clone());

        ResolvedPolicy {
            key,
            window: WindowConfig {
                limit,
                window: Duration::from_secs(window_secs),
            },
            burst,
            ip_subject: ctx.ip_subject(),
        }
    }
}
