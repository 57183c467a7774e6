//! Edge Gateway - A lightweight API gateway
//!
//! This service provides:
//! - Path-prefix routing with longest-prefix-wins resolution
//! - Optional JWT bearer authentication per route
//! - Fixed-window per-identity rate limiting (in-process or Redis-backed)
//! - Request forwarding with per-route timeouts
//! - Prometheus metrics and health checks

pub mod auth;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod route;

pub use config::GatewayConfig;
pub use context::RequestContext;
pub use dispatch::{Dispatcher, GatewayError};
pub use route::{Route, RouteStatus, RouteTable};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
