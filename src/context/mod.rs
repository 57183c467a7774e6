//! Per-request metadata
//!
//! A [`RequestContext`] is built once at the edge of the pipeline and passed
//! by reference through the whole dispatch. The only mutation after creation
//! is attaching the user id when authentication succeeds.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Immutable per-request metadata
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Generated once per request, echoed back as `x-request-id`
    pub request_id: String,
    /// Subject id, populated only after successful authentication
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    /// Lowercase header names; first value wins per name
    pub headers: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    /// Build a context from the inbound request's headers and peer address
    pub fn from_request(headers: &HeaderMap, ip_address: String) -> Self {
        let mut context_headers = HashMap::new();
        for (name, value) in headers.iter() {
            if let Ok(value) = value.to_str() {
                context_headers
                    .entry(name.as_str().to_lowercase())
                    .or_insert_with(|| value.to_string());
            }
        }

        let user_agent = context_headers
            .get("user-agent")
            .cloned()
            .unwrap_or_default();

        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            ip_address,
            user_agent,
            timestamp: Utc::now(),
            headers: context_headers,
            metadata: HashMap::new(),
        }
    }

    /// Header lookup by lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Attach the authenticated subject id
    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Identity used for rate limiting: user id when authenticated, else IP
    pub fn rate_limit_identity(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.ip_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::{HeaderName, HeaderValue};

    #[test]
    fn test_headers_lowercased_first_value_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-custom"),
            HeaderValue::from_static("first"),
        );
        headers.append(
            HeaderName::from_static("x-custom"),
            HeaderValue::from_static("second"),
        );
        headers.insert(
            HeaderName::from_static("user-agent"),
            HeaderValue::from_static("test-agent"),
        );

        let context = RequestContext::from_request(&headers, "10.0.0.1".to_string());
        assert_eq!(context.header("x-custom"), Some("first"));
        assert_eq!(context.user_agent, "test-agent");
        assert_eq!(context.ip_address, "10.0.0.1");
        assert!(!context.request_id.is_empty());
    }

    #[test]
    fn test_rate_limit_identity_prefers_user_id() {
        let headers = HeaderMap::new();
        let context = RequestContext::from_request(&headers, "10.0.0.1".to_string());
        assert_eq!(context.rate_limit_identity(), "10.0.0.1");

        let context = context.with_user_id("user-7".to_string());
        assert_eq!(context.rate_limit_identity(), "user-7");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let headers = HeaderMap::new();
        let a = RequestContext::from_request(&headers, "::1".to_string());
        let b = RequestContext::from_request(&headers, "::1".to_string());
        assert_ne!(a.request_id, b.request_id);
    }
}
