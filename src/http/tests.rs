use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use serde_json::{Value, json};

use super::protocol::{Body, key_is_url_encoded};
use super::{api_router, backend_router};
use crate::admission::{AdmissionParams, RateLimiter};
use crate::cache::{Cache, SyncMapStore, TtlParams, sharded_ttl_stack};
use crate::client::HttpBackend;
use crate::service::Service;

// ============================================================
// URL-ENCODING RULE
// ============================================================

#[test]
fn test_url_rule_accepts_percent_encoded_key() {
    // Wire: a%20b, router decodes to "a b".
    assert!(key_is_url_encoded("a%20b", "a b"));
}

#[test]
fn test_url_rule_rejects_raw_reserved_characters() {
    // Wire: a space straight in the path.
    assert!(!key_is_url_encoded("a b", "a b"));
    assert!(!key_is_url_encoded("a+b", "a+b"));
}

#[test]
fn test_url_rule_accepts_plainly_safe_key() {
    assert!(key_is_url_encoded("plain", "plain"));
    assert!(key_is_url_encoded("key-1_2.3~x", "key-1_2.3~x"));
}

#[test]
fn test_url_rule_accepts_encoded_slash() {
    // Wire: a%2Fb, router decodes to "a/b".
    assert!(key_is_url_encoded("a%2Fb", "a/b"));
}

// ============================================================
// HARNESS
// ============================================================

async fn spawn_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A real backend tier on an ephemeral port.
async fn spawn_backend() -> SocketAddr {
    let store: Arc<dyn Cache> = Arc::new(SyncMapStore::default());
    let limiter = RateLimiter::new(AdmissionParams::default());
    spawn_router(backend_router(store, limiter)).await
}

/// A real API tier pointed at `upstream` (a full storage URL).
async fn spawn_api(
    upstream: String,
    ttl: TtlParams,
    admission: AdmissionParams,
    client_timeout: Duration,
) -> SocketAddr {
    let cache = sharded_ttl_stack(4, ttl);
    let backend = Arc::new(HttpBackend::new(upstream, client_timeout));
    let service = Arc::new(Service::new(cache, backend));
    let limiter = RateLimiter::new(admission);
    spawn_router(api_router(service, limiter)).await
}

fn quiet_ttl() -> TtlParams {
    TtlParams {
        ttl: Duration::from_secs(60),
        ticker_period: Duration::from_secs(3600),
        skew_percent: 0,
        ..TtlParams::default()
    }
}

fn storage_url(addr: SocketAddr) -> String {
    format!("http://{}/storage", addr)
}

async fn put_body(client: &reqwest::Client, addr: SocketAddr, key: &str, value: Value) -> u16 {
    client
        .put(storage_url(addr))
        .json(&json!({ "key": key, "value": value }))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

// ============================================================
// BACKEND TIER SURFACE
// ============================================================

#[tokio::test]
async fn test_backend_set_statuses_and_get() {
    let backend = spawn_backend().await;
    let client = reqwest::Client::new();

    // First insertion, repeat, update.
    assert_eq!(put_body(&client, backend, "k", json!("v1")).await, 201);
    assert_eq!(put_body(&client, backend, "k", json!("v1")).await, 204);
    assert_eq!(put_body(&client, backend, "k", json!("v2")).await, 200);

    let response = client
        .get(format!("{}/k", storage_url(backend)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Body = response.json().await.unwrap();
    assert_eq!(body.key, "k");
    assert_eq!(body.value, json!("v2"));
}

#[tokio::test]
async fn test_backend_missing_key_is_404() {
    let backend = spawn_backend().await;
    let response = reqwest::Client::new()
        .get(format!("{}/ghost", storage_url(backend)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_backend_delete_then_get() {
    let backend = spawn_backend().await;
    let client = reqwest::Client::new();

    put_body(&client, backend, "k", json!("v")).await;

    let deleted = client
        .delete(format!("{}/k", storage_url(backend)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status().as_u16(), 204);

    let got = client
        .get(format!("{}/k", storage_url(backend)))
        .send()
        .await
        .unwrap();
    assert_eq!(got.status().as_u16(), 404);
}

#[tokio::test]
async fn test_backend_malformed_body_is_400() {
    let backend = spawn_backend().await;
    let client = reqwest::Client::new();

    let response = client
        .put(storage_url(backend))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = client
        .put(storage_url(backend))
        .json(&json!({ "key": "", "value": "v" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = client
        .put(storage_url(backend))
        .json(&json!({ "key": "k", "value": null }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_request_id_is_assigned_and_mirrored() {
    let backend = spawn_backend().await;
    let client = reqwest::Client::new();

    // Assigned when absent.
    let response = client
        .get(format!("{}/ghost", storage_url(backend)))
        .send()
        .await
        .unwrap();
    let assigned = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert!(!assigned.is_empty());

    // Mirrored when present.
    let response = client
        .get(format!("{}/ghost", storage_url(backend)))
        .header("x-request-id", "caller-supplied")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "caller-supplied");
}

#[tokio::test]
async fn test_metrics_route_scrapes_admission_counters() {
    let backend = spawn_backend().await;
    let response = reqwest::Client::new()
        .get(format!("http://{}/metrics", backend))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let text = response.text().await.unwrap();
    assert!(text.contains("rate_limiter_running_requests"));
    assert!(text.contains("rate_limiter_total_requests_static"));
}

// ============================================================
// END-TO-END SCENARIOS (API tier over an upstream)
// ============================================================

/// Scenario: cache-miss population. The first read round-trips to the
/// upstream and populates the cache; the second is served locally even when
/// the upstream starts failing.
#[tokio::test]
async fn test_scenario_cache_miss_population() {
    let broken = Arc::new(AtomicBool::new(false));
    let upstream = {
        let broken = broken.clone();
        Router::new().route(
            "/storage/:key",
            get(move |Path(key): Path<String>| {
                let broken = broken.clone();
                async move {
                    if broken.load(Ordering::SeqCst) {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        Json(Body {
                            key,
                            value: json!("bar"),
                        })
                        .into_response()
                    }
                }
            }),
        )
    };
    let upstream_addr = spawn_router(upstream).await;

    let api = spawn_api(
        storage_url(upstream_addr),
        quiet_ttl(),
        AdmissionParams::default(),
        Duration::from_millis(500),
    )
    .await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/foo", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Body = response.json().await.unwrap();
    assert_eq!(body.key, "foo");
    assert_eq!(body.value, json!("bar"));

    // Break the upstream; the cached copy still answers.
    broken.store(true, Ordering::SeqCst);

    let response = client
        .get(format!("{}/foo", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Body = response.json().await.unwrap();
    assert_eq!(body.value, json!("bar"));
}

/// Scenario: write-through against a real backend tier. The client's status
/// echoes the backend's (201 create, 204 unchanged, 200 update), and reads
/// see the latest write.
#[tokio::test]
async fn test_scenario_write_through() {
    let backend = spawn_backend().await;
    let api = spawn_api(
        storage_url(backend),
        quiet_ttl(),
        AdmissionParams::default(),
        Duration::from_millis(500),
    )
    .await;
    let client = reqwest::Client::new();

    assert_eq!(put_body(&client, api, "k", json!("v1")).await, 201);
    assert_eq!(put_body(&client, api, "k", json!("v1")).await, 204);
    assert_eq!(put_body(&client, api, "k", json!("v2")).await, 200);

    let response = client
        .get(format!("{}/k", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Body = response.json().await.unwrap();
    assert_eq!(body.value, json!("v2"));
}

/// Scenario: delete propagates to the backend and evicts the local copy.
#[tokio::test]
async fn test_scenario_delete() {
    let backend = spawn_backend().await;
    let api = spawn_api(
        storage_url(backend),
        quiet_ttl(),
        AdmissionParams::default(),
        Duration::from_millis(500),
    )
    .await;
    let client = reqwest::Client::new();

    put_body(&client, api, "k", json!("v")).await;

    let response = client
        .delete(format!("{}/k", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = client
        .get(format!("{}/k", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

/// Scenario: rejection under load with N=1, W=1. Three overlapping slow
/// requests: one runs, one queues, one bounces with 429 + Retry-After.
#[tokio::test]
async fn test_scenario_rejection_under_load() {
    let upstream = Router::new().route(
        "/storage/:key",
        get(|Path(key): Path<String>| async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Json(Body {
                key,
                value: json!("slow"),
            })
        }),
    );
    let upstream_addr = spawn_router(upstream).await;

    let api = spawn_api(
        storage_url(upstream_addr),
        quiet_ttl(),
        AdmissionParams {
            max_running: 1,
            max_waiting: 1,
            retry_after_secs: 1,
        },
        Duration::from_millis(800),
    )
    .await;

    let client = reqwest::Client::new();
    let url = format!("{}/slow", storage_url(api));

    let fire = |client: reqwest::Client, url: String| {
        tokio::spawn(async move {
            let response = client.get(url).send().await.unwrap();
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (status, retry_after)
        })
    };

    // Staggered so the arrival order is deterministic: run, queue, reject.
    let first = fire(client.clone(), url.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = fire(client.clone(), url.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let third = fire(client.clone(), url.clone());

    let mut results = vec![
        first.await.unwrap(),
        second.await.unwrap(),
        third.await.unwrap(),
    ];
    results.sort();

    assert_eq!(results[0].0, 200);
    assert_eq!(results[1].0, 200);
    assert_eq!(results[2].0, 429);
    assert_eq!(results[2].1.as_deref(), Some("1"));
}

/// Scenario: TTL expiry. A cached write stops answering once the TTL has
/// elapsed and the upstream reports absence.
#[tokio::test]
async fn test_scenario_ttl_expiry() {
    let upstream = Router::new()
        .route(
            "/storage/:key",
            get(|_key: Path<String>| async { StatusCode::NOT_FOUND }),
        )
        .route(
            "/storage",
            put(|_body: Json<Body>| async { StatusCode::CREATED }),
        );
    let upstream_addr = spawn_router(upstream).await;

    let api = spawn_api(
        storage_url(upstream_addr),
        TtlParams {
            ttl: Duration::from_millis(200),
            ticker_period: Duration::from_millis(50),
            skew_percent: 0,
            ..TtlParams::default()
        },
        AdmissionParams::default(),
        Duration::from_millis(500),
    )
    .await;
    let client = reqwest::Client::new();

    assert_eq!(put_body(&client, api, "k", json!("v")).await, 201);

    // Inside the TTL the cache answers despite the 404ing upstream.
    let response = client
        .get(format!("{}/k", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    tokio::time::sleep(Duration::from_millis(350)).await;

    let response = client
        .get(format!("{}/k", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

/// Scenario: malformed key. A properly encoded space is served; a raw
/// reserved character in the path is rejected before it reaches the store.
#[tokio::test]
async fn test_scenario_malformed_key() {
    let backend = spawn_backend().await;
    let api = spawn_api(
        storage_url(backend),
        quiet_ttl(),
        AdmissionParams::default(),
        Duration::from_millis(500),
    )
    .await;
    let client = reqwest::Client::new();

    assert_eq!(put_body(&client, api, "a b", json!("spaced")).await, 201);

    let response = client
        .get(format!("{}/a%20b", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Body = response.json().await.unwrap();
    assert_eq!(body.key, "a b");
    assert_eq!(body.value, json!("spaced"));

    // A raw '+' survives HTTP parsing but fails the URL-encoding rule.
    let response = client
        .get(format!("{}/a+b", storage_url(api)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
