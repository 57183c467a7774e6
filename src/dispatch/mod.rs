//! Request dispatch pipeline
//!
//! This module owns the gateway's single hard algorithm: resolve the route
//! for an inbound path, run the ordered gate of status → auth → rate limit,
//! forward the request to the backend and map the outcome (or failure) to a
//! well-formed HTTP response. Every gating failure short-circuits with a
//! local decision; only the forwarding step can fail against the network.

use crate::auth::Authenticator;
use crate::context::RequestContext;
use crate::metrics::GatewayMetrics;
use crate::rate_limit::RateLimiter;
use crate::route::{Route, RouteStatus, RouteTable};
use axum::body::Body;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, warn};

/// Fixed rate-limit window; `rate_limit_per_minute` is always evaluated
/// against 60-second buckets.
const RATE_WINDOW_SECONDS: u64 = 60;

/// Gating and forwarding failures, each mapping to one response class
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Service not found")]
    NotFound,
    #[error("Service {name} is {status}")]
    Unavailable { name: String, status: RouteStatus },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Proxy error: {0}")]
    Upstream(String),
    #[error("{0}")]
    Validation(#[from] crate::route::ValidationError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Orchestrates route table, authenticator and rate limiter, then forwards
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    authenticator: Arc<dyn Authenticator>,
    rate_limiter: Arc<dyn RateLimiter>,
    metrics: Arc<GatewayMetrics>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<RouteTable>,
        authenticator: Arc<dyn Authenticator>,
        rate_limiter: Arc<dyn RateLimiter>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            routes,
            authenticator,
            rate_limiter,
            metrics,
            client,
        }
    }

    /// Run the full pipeline for one request. Always yields a well-formed
    /// response; no failure escapes as a fault.
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
        context: &mut RequestContext,
    ) -> Response<Body> {
        let start = Instant::now();
        let (route_label, response) = match self
            .dispatch_inner(method.clone(), path, query, headers, body, context)
            .await
        {
            Ok((route, response)) => (route, response),
            Err(e) => {
                let label = match &e {
                    GatewayError::NotFound => "unmatched".to_string(),
                    _ => "gated".to_string(),
                };
                (label, e.into_response().into_parts())
            }
        };

        let (parts, body) = response;
        self.metrics.record_dispatch(
            method.as_str(),
            &route_label,
            parts.status.as_u16(),
            start.elapsed(),
        );
        Response::from_parts(parts, body)
    }

    async fn dispatch_inner(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
        context: &mut RequestContext,
    ) -> Result<(String, (axum::http::response::Parts, Body)), GatewayError> {
        // Route resolution
        let route = self.routes.resolve(path).ok_or(GatewayError::NotFound)?;

        // Status gate
        if route.status != RouteStatus::Active {
            return Err(GatewayError::Unavailable {
                name: route.name.clone(),
                status: route.status,
            });
        }

        // Auth gate
        if route.requires_auth {
            let user_id = self
                .authenticator
                .authenticate(context)
                .await
                .ok_or(GatewayError::Unauthorized)?;
            context.user_id = Some(user_id);
        }

        // Rate-limit gate: check, then record the admitted hit. The pair is
        // deliberately not atomic (see the rate_limit module docs).
        if let Some(limit) = route.rate_limit_per_minute {
            let identity = context.rate_limit_identity().to_string();
            let within = self
                .rate_limiter
                .is_within_limit(&identity, limit, RATE_WINDOW_SECONDS)
                .await
                .map_err(|e| GatewayError::Upstream(e.to_string()))?;
            if !within {
                warn!(
                    identity = %identity,
                    route = %route.name,
                    "Rate limit exceeded"
                );
                return Err(GatewayError::RateLimited);
            }
            // Fire-and-forget relative to the response: a failed increment is
            // logged, never surfaced to the caller.
            if let Err(e) = self
                .rate_limiter
                .record_hit(&identity, RATE_WINDOW_SECONDS)
                .await
            {
                error!("Failed to record rate limit hit: {}", e);
            }
        }

        // Forward
        let response = self.forward(&route, method, path, query, headers, body).await?;
        Ok((route.name, response.into_parts()))
    }

    async fn forward(
        &self,
        route: &Route,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Body>, GatewayError> {
        let target_url = build_target_url(&route.target_url, &route.path_prefix, path, query);

        let mut builder = axum::http::Request::builder()
            .method(method)
            .uri(target_url.as_str());

        if let Some(out_headers) = builder.headers_mut() {
            for (name, value) in headers.iter() {
                if !is_hop_by_hop_header(name.as_str()) {
                    out_headers.insert(name.clone(), value.clone());
                }
            }
            // The backend sees its own host, not the gateway's.
            if let Some(host) = extract_host_from_url(&target_url) {
                match host.parse::<axum::http::header::HeaderValue>() {
                    Ok(value) => {
                        out_headers.insert(axum::http::header::HOST, value);
                    }
                    Err(e) => warn!("Failed to parse target host '{}': {}", host, e),
                }
            }
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| GatewayError::Upstream(format!("failed to build request: {}", e)))?;

        let timeout = Duration::from_secs(route.timeout_seconds);
        let response = match tokio::time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(route = %route.name, "Proxy error: {}", e);
                return Err(GatewayError::Upstream(e.to_string()));
            }
            Err(_) => {
                error!(route = %route.name, "Proxy error: upstream timed out after {}s", route.timeout_seconds);
                return Err(GatewayError::Upstream(format!(
                    "upstream timed out after {}s",
                    route.timeout_seconds
                )));
            }
        };

        // Relay the backend response verbatim, whatever its status.
        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| GatewayError::Upstream(format!("failed to read response body: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(parts, Body::from(body_bytes)))
    }
}

/// Strip the matched prefix from the path and join the remainder onto the
/// target base URL with exactly one slash, regardless of trailing or leading
/// slashes on either side.
fn build_target_url(target_url: &str, path_prefix: &str, path: &str, query: Option<&str>) -> String {
    let remainder = path.strip_prefix(path_prefix).unwrap_or(path);
    let base = target_url.trim_end_matches('/');
    let joined = format!("{}/{}", base, remainder.trim_start_matches('/'));
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", joined, q),
        _ => joined,
    }
}

/// Hop-by-hop headers are not forwarded. Host is included here because the
/// proxy replaces it with the target's host after filtering.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn extract_host_from_url(url: &str) -> Option<String> {
    url.parse::<axum::http::Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(|a| a.to_string()))
}
