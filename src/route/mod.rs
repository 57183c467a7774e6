//! Route model and route table
//!
//! A route maps a path prefix to a backend base URL plus policy:
//! auth requirement, optional per-minute rate limit and a forward timeout.
//! The table resolves inbound paths with longest-prefix-wins semantics and
//! supports concurrent reads and upserts without caller-side locking.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Operational status of a route
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

impl std::fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteStatus::Active => write!(f, "ACTIVE"),
            RouteStatus::Inactive => write!(f, "INACTIVE"),
            RouteStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// A named forwarding rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    /// Unique route name
    pub name: String,
    /// Path prefix to match against inbound request paths
    pub path_prefix: String,
    /// Base URL of the backend service
    pub target_url: String,
    /// Operational status; only ACTIVE routes are dispatched
    #[serde(default)]
    pub status: RouteStatus,
    /// Forward timeout in seconds, must be positive
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Retained for forward compatibility; dispatch does not retry yet
    #[serde(default)]
    pub retry_count: i32,
    /// Requests per minute per identity; `None` means unlimited
    #[serde(default)]
    pub rate_limit_per_minute: Option<u32>,
    /// Whether a verified bearer token is required
    #[serde(default)]
    pub requires_auth: bool,
    /// Informational key/value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Route rejected by validation on upsert
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("route '{0}': timeout_seconds must be greater than 0")]
    NonPositiveTimeout(String),
    #[error("route '{0}': retry_count must not be negative")]
    NegativeRetryCount(String),
    #[error("route '{0}': rate_limit_per_minute must be greater than 0")]
    ZeroRateLimit(String),
}

impl Route {
    /// Check the route invariants enforced on every upsert
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_seconds == 0 {
            return Err(ValidationError::NonPositiveTimeout(self.name.clone()));
        }
        if self.retry_count < 0 {
            return Err(ValidationError::NegativeRetryCount(self.name.clone()));
        }
        if self.rate_limit_per_minute == Some(0) {
            return Err(ValidationError::ZeroRateLimit(self.name.clone()));
        }
        Ok(())
    }
}

/// A route plus the sequence number of its first registration.
///
/// The sequence breaks ties when two routes share the same maximal prefix
/// length: the earliest-registered route wins. Upserting an existing name
/// keeps its original sequence so replacement does not reorder resolution.
#[derive(Debug, Clone)]
struct StoredRoute {
    route: Route,
    seq: u64,
}

/// Concurrent route table keyed by route name
pub struct RouteTable {
    routes: DashMap<String, StoredRoute>,
    next_seq: AtomicU64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Resolve a request path to the matching route with the longest prefix.
    ///
    /// Ties on prefix length go to the earliest-registered route.
    pub fn resolve(&self, path: &str) -> Option<Route> {
        let mut best: Option<StoredRoute> = None;
        for entry in self.routes.iter() {
            let candidate = entry.value();
            if !path.starts_with(&candidate.route.path_prefix) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    let cand_len = candidate.route.path_prefix.len();
                    let cur_len = current.route.path_prefix.len();
                    cand_len > cur_len || (cand_len == cur_len && candidate.seq < current.seq)
                }
            };
            if better {
                best = Some(candidate.clone());
            }
        }
        best.map(|stored| stored.route)
    }

    /// Exact lookup by route name
    pub fn find_by_name(&self, name: &str) -> Option<Route> {
        self.routes.get(name).map(|entry| entry.route.clone())
    }

    /// Snapshot of all routes; iteration order is not significant
    pub fn list_all(&self) -> Vec<Route> {
        self.routes
            .iter()
            .map(|entry| entry.route.clone())
            .collect()
    }

    /// Validate and store a route, replacing any route with the same name
    pub fn upsert(&self, route: Route) -> Result<Route, ValidationError> {
        route.validate()?;
        let seq = match self.routes.get(&route.name) {
            Some(existing) => existing.seq,
            None => self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.routes.insert(
            route.name.clone(),
            StoredRoute {
                route: route.clone(),
                seq,
            },
        );
        Ok(route)
    }

    /// Number of configured routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
