//! Rate limit key composition.

use std::fmt;
use std::net::IpAddr;

/// Subject used when the client address cannot be determined. All
/// unidentifiable clients share one bucket; availability over fairness.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// A key that uniquely identifies a throttled subject.
///
/// The key is composed of a scope (authenticated user or client address,
/// optionally narrowed to one endpoint) and a subject identifier. The
/// composition rules live here so keys for different subjects can never
/// collide in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The endpoint this key is scoped to, when a per-route policy applies.
    endpoint: Option<String>,
    /// The scope of the subject identifier.
    scope: Scope,
    /// The subject identifier (user id or client address).
    subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    User,
    Ip,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::Ip => "ip",
        }
    }
}

impl RateLimitKey {
    /// Key for an authenticated user.
    pub fn user(id: &str) -> Self {
        Self {
            endpoint: None,
            scope: Scope::User,
            subject: id.to_string(),
        }
    }

    /// Key for an anonymous caller, falling back to the shared sentinel
    /// bucket when the address is unknown.
    pub fn ip(addr: Option<IpAddr>) -> Self {
        Self {
            endpoint: None,
            scope: Scope::Ip,
            subject: addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
        }
    }

    /// Narrow this key to a single endpoint.
    pub fn scoped_to(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Whether this key tracks quota for one endpoint only.
    pub fn is_endpoint_scoped(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}|{}:{}", endpoint, self.scope.as_str(), self.subject),
            None => write!(f, "{}:{}", self.scope.as_str(), self.subject),
        }
    }
}
