//! End-to-end tests of the request pipeline, driven in-process.
//!
//! Every test builds the full router (all stages, error handler included)
//! and sends requests with `tower::ServiceExt::oneshot`. No sockets are
//! opened; client identity comes from `X-Forwarded-For`.
//!
//! Run with: `cargo test --test pipeline_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::RawQuery;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceExt;

use shop_gateway::error::GENERIC_ERROR_MESSAGE;
use shop_gateway::handlers::AppJson;
use shop_gateway::middleware::RATE_LIMIT_MESSAGE;
use shop_gateway::{
    AppError, AppResult, AppState, Config, Environment, MemoryStore, RateLimitStore,
    build_router, build_router_with_groups,
};

// ============================================================================
// Harness
// ============================================================================

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "body is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn config(environment: Environment) -> Config {
    Config {
        environment,
        rate_limit_max: 1000,
        log_level: "warn".to_string(),
        ..Config::default()
    }
}

/// Groups exercising handler outcomes the resource groups never produce.
fn diagnostic_group() -> Router {
    async fn echo_body(AppJson(body): AppJson<Value>) -> Json<Value> {
        Json(body)
    }

    async fn echo_query(RawQuery(query): RawQuery) -> String {
        query.unwrap_or_default()
    }

    async fn internal() -> AppResult<&'static str> {
        Err(AppError::Internal("database exploded".to_string()))
    }

    async fn anyhow_chain() -> AppResult<&'static str> {
        let err = anyhow::anyhow!("connection reset").context("loading cart");
        Err(err.into())
    }

    async fn forbidden() -> AppResult<&'static str> {
        Err(AppError::new("You do not own this cart", StatusCode::FORBIDDEN))
    }

    async fn explode() -> &'static str {
        panic!("inventory index out of bounds")
    }

    async fn large() -> String {
        "lorem ipsum ".repeat(500)
    }

    Router::new()
        .route("/echo", post(echo_body).get(echo_query))
        .route("/internal", get(internal))
        .route("/anyhow", get(anyhow_chain))
        .route("/forbidden", get(forbidden))
        .route("/panic", get(explode))
        .route("/large", get(large))
}

fn app_with_diagnostics(config: Config) -> (Router, AppState) {
    let state = AppState::new(config);
    let mut groups = shop_gateway::routes::default_groups(&state);
    groups.push(("/diag".to_string(), diagnostic_group()));
    let app = build_router_with_groups(state.clone(), groups).unwrap();
    (app, state)
}

async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

fn get_from(client: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.10")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .unwrap()
}

// ============================================================================
// Sanitization
// ============================================================================

#[tokio::test]
async fn test_operator_keys_removed_before_handler() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(
        &app,
        post_json(
            "/diag/echo",
            r#"{"email":{"$gt":""},"password":"pass1234","profile.role":"admin","$where":"1"}"#,
        ),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"email": {}, "password": "pass1234"}));
}

#[tokio::test]
async fn test_operator_query_keys_removed() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(
        &app,
        get_from("198.51.100.10", "/diag/echo?price%5B%24gt%5D=10&sort=asc"),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "sort=asc");
}

#[tokio::test]
async fn test_script_payload_stored_escaped() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(
        &app,
        post_json(
            "/api/v1/products",
            r#"{"name":"<script>alert(1)</script>","tags":["<img src=x>"]}"#,
        ),
    )
    .await;

    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json();
    assert_eq!(body["data"]["name"], "&lt;script&gt;alert(1)&lt;/script&gt;");
    assert_eq!(body["data"]["tags"][0], "&lt;img src=x&gt;");
    assert!(!response.text().contains('<'));
}

#[tokio::test]
async fn test_path_param_markup_neutralized() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(
        &app,
        get_from("198.51.100.10", "/api/v1/products/%3Cscript%3E"),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json(),
        json!({"status": "fail", "message": "Invalid id: &lt;script&gt;"})
    );
}

#[tokio::test]
async fn test_malformed_json_is_operational_400() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, post_json("/api/v1/users", r#"{"name": "#)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json(),
        json!({"status": "fail", "message": "Malformed JSON in request body"})
    );
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let (app, _state) = app_with_diagnostics(Config {
        max_request_body_size: 64,
        ..config(Environment::Production)
    });

    let big = json!({"bio": "a".repeat(200)}).to_string();
    let response = send(&app, post_json("/api/v1/users", &big)).await;

    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.json()["status"], "fail");
}

#[tokio::test]
async fn test_wrong_content_type_rejected_by_extractor() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/users")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("name=ada"))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response.json()["status"], "fail");
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_max_accepted_then_rejected() {
    let (app, _state) = app_with_diagnostics(Config {
        rate_limit_max: 3,
        ..config(Environment::Production)
    });

    for expected_remaining in ["2", "1", "0"] {
        let response = send(&app, get_from("203.0.113.7", "/health")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["x-ratelimit-limit"], "3");
        assert_eq!(response.headers["x-ratelimit-remaining"], expected_remaining);
    }

    let rejected = send(&app, get_from("203.0.113.7", "/health")).await;
    assert_eq!(rejected.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        rejected.json(),
        json!({"status": "fail", "message": RATE_LIMIT_MESSAGE})
    );
    assert!(rejected.headers.contains_key("retry-after"));

    // Other clients keep their own budget
    let other = send(&app, get_from("203.0.113.8", "/health")).await;
    assert_eq!(other.status, StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_request_never_reaches_handler() {
    let (app, _state) = app_with_diagnostics(Config {
        rate_limit_max: 1,
        ..config(Environment::Production)
    });

    let first = send(&app, post_json("/api/v1/products", r#"{"name":"Lamp"}"#)).await;
    assert_eq!(first.status, StatusCode::CREATED);

    let second = send(&app, post_json("/api/v1/products", r#"{"name":"Desk"}"#)).await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.json()["message"], RATE_LIMIT_MESSAGE);

    // Checked from another client: only the first document was stored
    let report = send(&app, get_from("198.51.100.99", "/api/v1/reports")).await;
    assert_eq!(report.json()["data"]["products"], 1);
}

#[tokio::test]
async fn test_body_parsed_before_rate_check() {
    let (app, _state) = app_with_diagnostics(Config {
        rate_limit_max: 1,
        ..config(Environment::Production)
    });

    let first = send(&app, post_json("/api/v1/products", r#"{"name":"Lamp"}"#)).await;
    assert_eq!(first.status, StatusCode::CREATED);

    // Same client, limit used up: the parse failure wins
    let malformed = send(&app, post_json("/api/v1/products", r#"{"name": "#)).await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        malformed.json(),
        json!({"status": "fail", "message": "Malformed JSON in request body"})
    );

    let valid = send(&app, post_json("/api/v1/products", r#"{"name":"Desk"}"#)).await;
    assert_eq!(valid.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test(start_paused = true)]
async fn test_window_elapses_and_client_is_readmitted() {
    let (app, _state) = app_with_diagnostics(Config {
        rate_limit_max: 1,
        rate_limit_window: Duration::from_secs(60),
        ..config(Environment::Production)
    });

    assert_eq!(
        send(&app, get_from("203.0.113.9", "/health")).await.status,
        StatusCode::OK
    );

    tokio::time::advance(Duration::from_secs(59)).await;
    let limited = send(&app, get_from("203.0.113.9", "/health")).await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers["retry-after"], "1");

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(
        send(&app, get_from("203.0.113.9", "/health")).await.status,
        StatusCode::OK
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_counted_exactly() {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_store(
        Config {
            rate_limit_max: 50,
            ..config(Environment::Production)
        },
        store.clone(),
    );
    let app = build_router(state).unwrap();

    let handles: Vec<_> = (0..80)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { send(&app, get_from("203.0.113.20", "/health")).await.status })
        })
        .collect();

    let mut ok = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 50);
    assert_eq!(limited, 30);
    assert_eq!(store.get("203.0.113.20").unwrap().count, 80);
}

#[tokio::test]
async fn test_forwarding_headers_ignored_without_trust_proxy() {
    let (app, _state) = app_with_diagnostics(Config {
        rate_limit_max: 1,
        trust_proxy: false,
        ..config(Environment::Production)
    });

    // Without a socket peer both requests resolve to the same identity
    let first = send(&app, get_from("203.0.113.30", "/health")).await;
    let second = send(&app, get_from("203.0.113.31", "/health")).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limiting_disabled() {
    let (app, state) = app_with_diagnostics(Config {
        rate_limit_max: 0,
        ..config(Environment::Production)
    });

    for _ in 0..5 {
        let response = send(&app, get_from("203.0.113.40", "/health")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(!response.headers.contains_key("x-ratelimit-limit"));
    }
    assert!(state.rate_limit_store().is_empty());
}

// ============================================================================
// Not Found
// ============================================================================

#[tokio::test]
async fn test_unregistered_path_is_operational_404() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, get_from("198.51.100.10", "/api/v2/nothing?x=1")).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.json(),
        json!({
            "status": "fail",
            "message": "can not find /api/v2/nothing?x=1 on this server"
        })
    );
}

#[tokio::test]
async fn test_unrouted_method_inside_group_is_404() {
    let (app, _state) = app_with_diagnostics(config(Environment::Development));

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/reports")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let body = response.json();
    assert_eq!(body["message"], "can not find /api/v1/reports on this server");
    assert_eq!(body["error"]["isOperational"], true);
}

#[tokio::test]
async fn test_unrouted_method_on_top_level_route_is_404() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let request = Request::builder()
        .method("POST")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.json(),
        json!({"status": "fail", "message": "can not find /health on this server"})
    );
}

#[tokio::test]
async fn test_group_prefix_ignores_case() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, get_from("198.51.100.10", "/API/v1/Products")).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["results"], 0);
}

#[tokio::test]
async fn test_not_found_message_uses_sanitized_url() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, get_from("198.51.100.10", "/nowhere/%3Cb%3E")).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.json()["message"],
        "can not find /nowhere/%26lt%3Bb%26gt%3B on this server"
    );
}

// ============================================================================
// Error Contract
// ============================================================================

#[tokio::test]
async fn test_programming_error_hidden_in_production() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    for path in ["/diag/internal", "/diag/anyhow", "/diag/panic"] {
        let response = send(&app, get_from("198.51.100.10", path)).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR, "{path}");
        assert_eq!(
            response.json(),
            json!({"status": "error", "message": GENERIC_ERROR_MESSAGE}),
            "{path}"
        );
    }
}

#[tokio::test]
async fn test_programming_error_detailed_in_development() {
    let (app, _state) = app_with_diagnostics(config(Environment::Development));

    let response = send(&app, get_from("198.51.100.10", "/diag/internal")).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Internal server error: database exploded");
    assert_eq!(
        body["error"],
        json!({"statusCode": 500, "isOperational": false})
    );
    assert!(body["stack"].as_str().unwrap().contains("database exploded"));
}

#[tokio::test]
async fn test_anyhow_context_chain_in_development() {
    let (app, _state) = app_with_diagnostics(config(Environment::Development));

    let response = send(&app, get_from("198.51.100.10", "/diag/anyhow")).await;

    let body = response.json();
    assert_eq!(body["message"], "loading cart");
    assert!(body["stack"].as_str().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_panic_reported_in_development() {
    let (app, _state) = app_with_diagnostics(config(Environment::Development));

    let response = send(&app, get_from("198.51.100.10", "/diag/panic")).await;

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.json();
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("inventory index out of bounds")
    );
    assert_eq!(body["error"]["isOperational"], false);
}

#[tokio::test]
async fn test_operational_error_keeps_status_and_message() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, get_from("198.51.100.10", "/diag/forbidden")).await;

    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(
        response.json(),
        json!({"status": "fail", "message": "You do not own this cart"})
    );
}

// ============================================================================
// Ambient Stages
// ============================================================================

#[tokio::test]
async fn test_large_responses_compressed() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let request = Request::builder()
        .uri("/diag/large")
        .header("accept-encoding", "gzip")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[CONTENT_ENCODING], "gzip");
    assert!(response.body.len() < "lorem ipsum ".len() * 500);
}

#[tokio::test]
async fn test_error_body_readable_when_compression_requested() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let request = Request::builder()
        .uri("/definitely/not/mounted/anywhere/at/all")
        .header("accept-encoding", "gzip")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.headers.contains_key(CONTENT_ENCODING));
    assert_eq!(response.json()["status"], "fail");
}

#[tokio::test]
async fn test_security_headers_on_success_and_error() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    for path in ["/health", "/missing"] {
        let response = send(&app, get_from("198.51.100.10", path)).await;
        assert_eq!(response.headers["x-content-type-options"], "nosniff", "{path}");
        assert_eq!(response.headers["x-frame-options"], "SAMEORIGIN", "{path}");
        assert!(response.headers.contains_key("strict-transport-security"));
    }
}

#[tokio::test]
async fn test_request_id_generated_and_propagated() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let generated = send(&app, get_from("198.51.100.10", "/health")).await;
    let id = generated.headers["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "checkout-42")
        .body(Body::empty())
        .unwrap();
    let propagated = send(&app, request).await;
    assert_eq!(propagated.headers["x-request-id"], "checkout-42");
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/products")
        .header("origin", "https://shop.example.com")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers["access-control-allow-origin"], "*");
}

// ============================================================================
// Resource Groups
// ============================================================================

#[tokio::test]
async fn test_document_lifecycle() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let created = send(
        &app,
        post_json("/api/v1/categories", r#"{"name":"Lighting"}"#),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let document = created.json()["data"].clone();
    let id = document["id"].as_str().unwrap().to_string();
    assert_eq!(document["name"], "Lighting");
    assert!(document["requestedAt"].as_str().unwrap().ends_with('Z'));

    let fetched = send(
        &app,
        get_from("198.51.100.10", &format!("/api/v1/categories/{id}")),
    )
    .await;
    assert_eq!(fetched.json()["data"], document);

    let listed = send(&app, get_from("198.51.100.10", "/api/v1/categories")).await;
    assert_eq!(listed.json()["results"], 1);

    let report = send(&app, get_from("198.51.100.10", "/api/v1/reports")).await;
    assert_eq!(
        report.json()["data"],
        json!({"categories": 1, "products": 0, "users": 0})
    );

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/categories/{id}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, delete).await.status, StatusCode::NO_CONTENT);

    let gone = send(
        &app,
        get_from("198.51.100.10", &format!("/api/v1/categories/{id}")),
    )
    .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
    assert_eq!(
        gone.json(),
        json!({"status": "fail", "message": "No document found with that ID"})
    );
}

#[tokio::test]
async fn test_non_object_body_rejected() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, post_json("/api/v1/users", "[1, 2, 3]")).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["message"],
        "Request body must be a JSON object"
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = app_with_diagnostics(config(Environment::Production));

    let response = send(&app, get_from("198.51.100.10", "/health")).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "production");
    assert!(body.get("version").is_some());
    assert!(body.get("timestamp").is_some());
}
