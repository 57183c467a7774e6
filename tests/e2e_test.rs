//! End-to-end tests for the Edge Gateway service
//!
//! These tests start the gateway server and verify the endpoints and the
//! dispatch gates work correctly.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::Duration;

/// Base port for tests, incremented atomically to avoid conflicts
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19000);

/// Get a unique port for testing
fn get_unique_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Create a temporary config file with the specified port
fn create_test_config(port: u16) -> tempfile::NamedTempFile {
    let config = format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[auth]
jwt_secret = "e2e-test-secret"

[rate_limit]
backend = "memory"

[[routes]]
name = "dead-backend"
path_prefix = "/api/dead"
target_url = "http://127.0.0.1:9"
status = "ACTIVE"
timeout_seconds = 2

[[routes]]
name = "maintenance"
path_prefix = "/api/maintenance"
target_url = "http://127.0.0.1:9"
status = "MAINTENANCE"
timeout_seconds = 2

[[routes]]
name = "secured"
path_prefix = "/api/secured"
target_url = "http://127.0.0.1:9"
status = "ACTIVE"
timeout_seconds = 2
requires_auth = true
"#,
        port
    );

    let file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    std::fs::write(file.path(), config).unwrap();
    file
}

/// Start the gateway server
fn start_server(config_path: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_edge-gateway"))
        .args(["start", "-c", config_path])
        .spawn()
        .expect("Failed to start gateway server")
}

/// Wait for the server to be ready by polling the health endpoint
fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    while start.elapsed() < timeout {
        if let Ok(response) = client
            .get(format!("http://127.0.0.1:{}/gateway/health", port))
            .send()
        {
            if response.status().is_success() {
                return true;
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn test_health_endpoint() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/gateway/health", port))
        .send()
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "api-gateway");
    assert!(body["uptime_seconds"].is_number());

    server.kill().ok();
}

#[test]
fn test_root_endpoint() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/", port))
        .send()
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["message"], "API Gateway");
    assert_eq!(body["status"], "running");

    server.kill().ok();
}

#[test]
fn test_routes_listing() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/gateway/routes", port))
        .send()
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let routes: serde_json::Value = response.json().unwrap();
    let routes = routes.as_array().unwrap();
    assert_eq!(routes.len(), 3);

    let secured = routes
        .iter()
        .find(|r| r["name"] == "secured")
        .expect("secured route missing from listing");
    assert_eq!(secured["path_prefix"], "/api/secured");
    assert_eq!(secured["requires_auth"], true);
    assert_eq!(secured["status"], "ACTIVE");

    server.kill().ok();
}

#[test]
fn test_metrics_endpoint() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();

    // Generate at least one dispatch so the counters exist.
    client
        .get(format!("http://127.0.0.1:{}/nonexistent", port))
        .send()
        .expect("Failed to send request");

    let response = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body = response.text().unwrap();
    assert!(body.contains("gateway_dispatches_total"));

    server.kill().ok();
}

#[test]
fn test_unmatched_route_returns_404() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/nonexistent", port))
        .send()
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["error"], "Service not found");

    server.kill().ok();
}

#[test]
fn test_maintenance_route_returns_503() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/maintenance/x", port))
        .send()
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 503);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["error"], "Service maintenance is MAINTENANCE");

    server.kill().ok();
}

#[test]
fn test_secured_route_requires_token() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();

    // Without a token: 401 before anything else.
    let response = client
        .get(format!("http://127.0.0.1:{}/api/secured/x", port))
        .send()
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 401);

    // Mint a token through the gateway.
    let response = client
        .post(format!("http://127.0.0.1:{}/api/auth/token", port))
        .json(&serde_json::json!({ "user_id": "e2e-user" }))
        .send()
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    // With the token the auth gate passes; the dead backend yields 502.
    let response = client
        .get(format!("http://127.0.0.1:{}/api/secured/x", port))
        .header("authorization", format!("Bearer {}", token))
        .send()
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 502);

    server.kill().ok();
}

#[test]
fn test_unreachable_backend_returns_502_with_request_id() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/dead/x", port))
        .send()
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 502);
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Proxy error"));

    server.kill().ok();
}

#[test]
fn test_route_upsert_validation() {
    let port = get_unique_port();
    let config_file = create_test_config(port);
    let mut server = start_server(config_file.path().to_str().unwrap());

    assert!(
        wait_for_server(port, 10),
        "Server failed to start within timeout"
    );

    let client = reqwest::blocking::Client::new();

    // Invalid timeout is rejected before becoming visible.
    let response = client
        .post(format!("http://127.0.0.1:{}/gateway/routes", port))
        .json(&serde_json::json!({
            "name": "broken",
            "path_prefix": "/api/broken",
            "target_url": "http://127.0.0.1:9",
            "timeout_seconds": 0
        }))
        .send()
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 400);

    // Valid route is stored and shows up in the listing.
    let response = client
        .post(format!("http://127.0.0.1:{}/gateway/routes", port))
        .json(&serde_json::json!({
            "name": "added",
            "path_prefix": "/api/added",
            "target_url": "http://127.0.0.1:9",
            "timeout_seconds": 1,
            "retry_count": 0
        }))
        .send()
        .expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 200);

    let routes: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/gateway/routes", port))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert!(routes
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["name"] == "added"));

    server.kill().ok();
}
