//! Tower layer enforcing rate limits in front of the router.

use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::ratelimit::{Decision, RateLimiter, RequestContext, Verdict};

static LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Authenticated identity attached to the request by the authentication
/// middleware before this layer runs. Absence implies anonymous.
#[derive(Debug, Clone)]
pub struct AuthIdentity(pub String);

/// Layer that applies rate limiting to every request passing through it.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    /// Create a layer around a shared rate limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

/// Service implementation for the rate limit layer.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let limiter = Arc::clone(&self.limiter);
        // Take the ready inner service, leaving a fresh clone in its place.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let ctx = request_context(&req);

            match limiter.check(&ctx).await {
                Verdict::Rejected(decision) => Ok(too_many_requests(&decision)),
                Verdict::Admitted(decision) => {
                    let mut response = inner.call(req).await?;
                    apply_quota_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                // Fail-open: no truthful quota numbers exist, so no quota
                // headers are attached.
                Verdict::AdmittedDegraded => inner.call(req).await,
            }
        })
    }
}

/// Build the typed request context the policy selector consumes.
fn request_context(req: &Request) -> RequestContext {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());

    let client_ip = forwarded_ip(req.headers()).or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip())
    });

    let user_id = req
        .extensions()
        .get::<AuthIdentity>()
        .map(|identity| identity.0.clone());

    RequestContext {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        route,
        client_ip,
        user_id,
    }
}

/// First parseable address in `X-Forwarded-For`, if any.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(LIMIT_HEADER.clone(), HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER.clone(), HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER.clone(), HeaderValue::from(decision.reset_at));
}

fn too_many_requests(decision: &Decision) -> Response<Body> {
    let retry_after = decision.retry_after(Utc::now());
    let body = Json(json!({
        "error": "Rate limit exceeded",
        "retry_after": retry_after,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    apply_quota_headers(response.headers_mut(), decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitPolicies, RouteQuota};
    use crate::store::memory::MemoryStore;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>, policies: RateLimitPolicies) -> Router {
        let limiter = Arc::new(RateLimiter::with_policies(store, policies));
        Router::new()
            .route("/api/v1/posts", get(|| async { "posts" }))
            .layer(RateLimitLayer::new(limiter))
    }

    fn posts_request(forwarded_for: &str) -> Request {
        Request::builder()
            .uri("/api/v1/posts")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap()
    }

    fn policies_with_limit(limit: u32) -> RateLimitPolicies {
        let mut policies = RateLimitPolicies::new();
        policies.routes.insert(
            "GET /api/v1/posts".to_string(),
            RouteQuota {
                requests: limit,
                window_secs: 60,
                // Anonymous test traffic gets the full quota
                anonymous_requests: Some(limit),
                burst: None,
            },
        );
        policies
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_headers() {
        let app = app(Arc::new(MemoryStore::new()), policies_with_limit(10));

        let response = app.oneshot(posts_request("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn test_over_limit_returns_429_with_retry_after() {
        let app = app(Arc::new(MemoryStore::new()), policies_with_limit(2));

        for _ in 0..2 {
            let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(posts_request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Rate limit exceeded");
        assert!(body["retry_after"].as_u64().unwrap() <= 60);
    }

    #[tokio::test]
    async fn test_store_outage_admits_without_quota_headers() {
        let store = Arc::new(MemoryStore::new());
        let app = app(Arc::clone(&store), policies_with_limit(1));

        store.set_unavailable(true);
        for _ in 0..5 {
            let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
            assert!(!response.headers().contains_key("x-ratelimit-remaining"));
        }
    }

    #[tokio::test]
    async fn test_clients_are_tracked_under_independent_keys() {
        let app = app(Arc::new(MemoryStore::new()), policies_with_limit(1));

        let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(posts_request("10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authenticated_caller_does_not_share_anonymous_quota() {
        let app = app(Arc::new(MemoryStore::new()), policies_with_limit(1));

        // Exhaust the anonymous quota for this address
        let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.clone().oneshot(posts_request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // The same address with an authenticated identity has its own key
        let mut request = posts_request("10.0.0.1");
        request.extensions_mut().insert(AuthIdentity("42".to_string()));
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_address_falls_back_to_shared_bucket() {
        let app = app(Arc::new(MemoryStore::new()), policies_with_limit(1));

        let request = Request::builder()
            .uri("/api/v1/posts")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // A second unidentifiable client lands in the same bucket
        let request = Request::builder()
            .uri("/api/v1/posts")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
