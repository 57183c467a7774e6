//! Edge Gateway - CLI Application
//!
//! A lightweight API gateway with:
//! - Path-prefix routing configured via TOML
//! - JWT bearer authentication
//! - Fixed-window rate limiting (in-memory or Redis)
//! - Prometheus metrics

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::HeaderValue, Request, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use edge_gateway::{
    auth::JwtAuthenticator,
    config::{GatewayConfig, RateLimitBackend},
    context::RequestContext,
    dispatch::Dispatcher,
    health::HealthChecker,
    metrics::GatewayMetrics,
    rate_limit::{MemoryRateLimiter, RateLimiter, RedisRateLimiter},
    route::{Route, RouteTable},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Edge Gateway - A lightweight API gateway service
#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(version, about = "A lightweight API gateway service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Validate the configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    routes: Arc<RouteTable>,
    authenticator: Arc<JwtAuthenticator>,
    metrics: Arc<GatewayMetrics>,
    health: Arc<HealthChecker>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(&config).await?,
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
    }

    Ok(())
}

/// Start the gateway server
async fn start_server(config_path: &str) -> anyhow::Result<()> {
    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = GatewayConfig::from_file(config_path)?;
    info!("Loaded configuration from {}", config_path);

    // Bootstrap the route table
    let routes = Arc::new(RouteTable::new());
    for route in &config.routes {
        routes.upsert(route.clone())?;
    }

    // Pick the rate limiter backend
    let rate_limiter: Arc<dyn RateLimiter> = match config.rate_limit.backend {
        RateLimitBackend::Memory => Arc::new(MemoryRateLimiter::new()),
        RateLimitBackend::Redis => {
            let limiter = RedisRateLimiter::connect(&config.rate_limit.redis_url).await?;
            info!("Connected to rate limit store at {}", config.rate_limit.redis_url);
            Arc::new(limiter)
        }
    };

    let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
    let metrics = Arc::new(GatewayMetrics::new());
    let health = Arc::new(HealthChecker::new());

    let dispatcher = Arc::new(Dispatcher::new(
        routes.clone(),
        authenticator.clone(),
        rate_limiter,
        metrics.clone(),
    ));

    let state = AppState {
        dispatcher,
        routes: routes.clone(),
        authenticator,
        metrics,
        health,
    };

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/gateway/health", get(health_handler))
        .route(
            "/gateway/routes",
            get(list_routes_handler).post(upsert_route_handler),
        )
        .route("/metrics", get(metrics_handler))
        .route("/api/auth/token", post(issue_token_handler))
        .fallback(gateway_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Starting gateway server on {}", addr);
    info!("Routes configured: {}", routes.len());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Validate configuration file
fn validate_config(config_path: &str) -> anyhow::Result<()> {
    match GatewayConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}:{}", config.server.host, config.server.port);
            println!("Rate limit backend: {:?}", config.rate_limit.backend);
            println!("Routes: {}", config.routes.len());
            println!();
            println!("Routes:");
            for route in &config.routes {
                println!(
                    "  [{}] {} {} → {}",
                    route.status, route.name, route.path_prefix, route.target_url
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &str) -> anyhow::Result<()> {
    let sample_config = r#"# Edge Gateway Configuration

[server]
host = "0.0.0.0"
port = 8080

[auth]
jwt_secret = "your-secret-key-change-in-production"

[rate_limit]
backend = "memory"  # Options: memory, redis
redis_url = "redis://127.0.0.1:6379"

# Bootstrap routes
[[routes]]
name = "ai-server"
path_prefix = "/api/v1/date-courses"
target_url = "http://localhost:8001"
status = "ACTIVE"
timeout_seconds = 30
retry_count = 3
rate_limit_per_minute = 100
requires_auth = false

[routes.metadata]
description = "Date course recommendation service"

[[routes]]
name = "health"
path_prefix = "/health"
target_url = "http://localhost:8001/health"
status = "ACTIVE"
timeout_seconds = 5
retry_count = 1
requires_auth = false

[routes.metadata]
description = "Backend health check"
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path);
    Ok(())
}

/// Root info handler
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "API Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Metrics handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}

/// Informational route listing for `/gateway/routes`
#[derive(Debug, Serialize, Deserialize)]
struct RouteInfo {
    name: String,
    path_prefix: String,
    target_url: String,
    status: String,
    requires_auth: bool,
    rate_limit: Option<u32>,
}

impl From<Route> for RouteInfo {
    fn from(route: Route) -> Self {
        Self {
            name: route.name,
            path_prefix: route.path_prefix,
            target_url: route.target_url,
            status: route.status.to_string(),
            requires_auth: route.requires_auth,
            rate_limit: route.rate_limit_per_minute,
        }
    }
}

/// List configured routes
async fn list_routes_handler(State(state): State<AppState>) -> impl IntoResponse {
    let routes: Vec<RouteInfo> = state
        .routes
        .list_all()
        .into_iter()
        .map(RouteInfo::from)
        .collect();
    Json(routes)
}

/// Upsert a route; invalid routes are rejected before becoming visible
async fn upsert_route_handler(
    State(state): State<AppState>,
    Json(route): Json<Route>,
) -> axum::response::Response {
    match state.routes.upsert(route) {
        Ok(stored) => (StatusCode::OK, Json(RouteInfo::from(stored))).into_response(),
        Err(e) => edge_gateway::GatewayError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    user_id: String,
    token: String,
}

/// Mint a bearer token for a user id
async fn issue_token_handler(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> axum::response::Response {
    match state.authenticator.generate_token(&request.user_id) {
        Ok(token) => (
            StatusCode::OK,
            Json(TokenResponse {
                user_id: request.user_id,
                token,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Fallback handler: every unmatched method/path enters the dispatch pipeline
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> axum::response::Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();

    let mut context = RequestContext::from_request(&headers, peer.ip().to_string());
    let request_id = context.request_id.clone();

    info!("Request: {} {} - IP: {}", method, path, context.ip_address);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": format!("Failed to read request body: {}", e)
                })),
            )
                .into_response();
        }
    };

    let mut response = state
        .dispatcher
        .dispatch(
            method.clone(),
            &path,
            query.as_deref(),
            &headers,
            body,
            &mut context,
        )
        .await;

    let elapsed_ms = start.elapsed().as_millis();
    info!(
        "Response: {} {} - Status: {} - Time: {}ms",
        method,
        path,
        response.status(),
        elapsed_ms
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms.to_string()) {
        response.headers_mut().insert("x-process-time", value);
    }

    response.into_response()
}
