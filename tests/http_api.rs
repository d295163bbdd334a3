//! HTTP surface: status codes, body validation, auth and throttling.

use chrono::{Duration, Utc};
use device_trust::config::TrustConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};

mod common;
use common::{config, spawn_server, TestServer, CHROME};

/// Operator routes served without a key.
fn open_operators() -> TrustConfig {
    let mut cfg = config();
    cfg.admin.open_operator_routes = true;
    cfg
}

/// Admin surface on, operator routes keyed.
fn keyed_admin() -> TrustConfig {
    let mut cfg = config();
    cfg.admin.enabled = true;
    cfg.admin.api_key = "test-key".into();
    cfg
}

async fn register(server: &TestServer, client: &reqwest::Client, id: &str) -> reqwest::Response {
    client
        .post(server.url("/api/device/register"))
        .json(&json!({
            "sessionId": id,
            "userAgent": CHROME,
            "platform": "Win32",
            "vendor": "Google Inc.",
            "connection": { "type": "wifi", "effectiveType": "4g", "downlink": 10.0, "rtt": 50 }
        }))
        .send()
        .await
        .unwrap()
}

async fn heartbeat(
    server: &TestServer,
    client: &reqwest::Client,
    id: &str,
    ahead: Duration,
) -> reqwest::Response {
    client
        .post(server.url("/api/device/heartbeat"))
        .json(&json!({
            "deviceId": id,
            "timestamp": (Utc::now() + ahead).to_rfc3339(),
            "status": "active"
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn register_then_fetch_device() {
    let server = spawn_server(config()).await;
    let client = reqwest::Client::new();

    let res = register(&server, &client, "web-1").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["deviceId"], "web-1");
    assert_eq!(body["authorized"], true);
    assert_eq!(body["trustState"], "authorized");

    let res = client
        .get(server.url("/api/device/web-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let record: Value = res.json().await.unwrap();
    assert_eq!(record["deviceId"], "web-1");
    assert_eq!(record["lastKnownIP"], "127.0.0.1");
    assert_eq!(record["connectionProfile"]["type"], "wifi");

    let res = client
        .get(server.url("/api/device/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let server = spawn_server(config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/api/device/register"))
        .json(&json!({ "sessionId": "x", "userAgent": "ua", "bogus": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "error");

    let res = client
        .post(server.url("/api/device/register"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/api/device/register"))
        .json(&json!({ "sessionId": "bad id with spaces", "userAgent": "ua" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn heartbeat_status_codes() {
    let server = spawn_server(open_operators()).await;
    let client = reqwest::Client::new();

    let res = heartbeat(&server, &client, "nobody", Duration::zero()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    register(&server, &client, "hb-1").await;
    let res = heartbeat(&server, &client, "hb-1", Duration::seconds(1)).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = heartbeat(&server, &client, "hb-1", Duration::hours(2)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/api/device/hb-1/block"))
        .header("x-operator", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["trustState"], "blocked");

    let res = heartbeat(&server, &client, "hb-1", Duration::seconds(2)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["authorized"], false);

    let res = client
        .post(server.url("/api/device/hb-1/authorize"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = heartbeat(&server, &client, "hb-1", Duration::seconds(3)).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn operator_action_on_unknown_device_is_404() {
    let server = spawn_server(keyed_admin()).await;
    let res = reqwest::Client::new()
        .post(server.url("/api/device/ghost/authorize"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn operator_routes_closed_by_default() {
    let server = spawn_server(config()).await;
    let client = reqwest::Client::new();
    register(&server, &client, "self-1").await;

    for action in ["authorize", "block"] {
        let res = client
            .post(server.url(&format!("/api/device/self-1/{action}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    let record: Value = client
        .get(server.url("/api/device/self-1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record["trustState"], "authorized");
}

#[tokio::test]
async fn browser_tracker_registration_is_accepted() {
    let server = spawn_server(config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/api/device/register"))
        .header("user-agent", CHROME)
        .json(&json!({
            "userAgent": CHROME,
            "platform": "Win32",
            "vendor": "Google Inc.",
            "language": "en-US",
            "cookiesEnabled": true,
            "doNotTrack": null,
            "screenResolution": { "width": 2560, "height": 1440, "depth": 24, "pixelRatio": 2 },
            "webGL": { "vendor": "WebKit", "renderer": "WebKit WebGL", "version": "WebGL 1.0" },
            "canvas": { "available": true, "fingerprint": "data:image/png;base64,AAAA" },
            "audio": { "available": false },
            "connection": {
                "type": "wifi",
                "effectiveType": "4g",
                "downlinkMax": 100,
                "downlink": 9.5,
                "rtt": 50,
                "saveData": false
            },
            "timezone": "America/Chicago",
            "timezoneOffset": 360,
            "cores": 12,
            "memory": 8,
            "sessionId": "9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d",
            "timestamp": "2025-01-15T12:00:00.000Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let record: Value = client
        .get(server.url("/api/device/9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(record["attributes"]["timezone"], "America/Chicago");
    assert_eq!(record["attributes"]["cores"], 12);
    assert_eq!(record["connectionProfile"]["saveData"], false);
}

#[tokio::test]
async fn security_log_and_event_queries() {
    let server = spawn_server(config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/api/security/log"))
        .json(&json!({
            "type": "anomaly_detected",
            "deviceId": "web-9",
            "severity": "high",
            "details": "devtools opened",
            "ipAddress": "6.6.6.6",
            "timestamp": "1999-01-01T00:00:00Z"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(server.url("/api/security/log"))
        .json(&json!({ "type": "device_authorized", "deviceId": "web-9" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(server.url("/api/security/events?deviceId=web-9&severity=warning&limit=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let events: Vec<Value> = res.json().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["eventType"], "anomaly_detected");
    // Server-assigned, whatever the client sent.
    assert_eq!(events[0]["sourceIP"], "127.0.0.1");
    assert_ne!(events[0]["timestamp"], "1999-01-01T00:00:00Z");

    let res = client
        .get(server.url("/api/security/events?limit=many"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_carries_request_id_and_security_headers() {
    let server = spawn_server(config()).await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn admin_surface_requires_bearer_key() {
    let server = spawn_server(keyed_admin()).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/admin/stats"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stats: Value = res.json().await.unwrap();
    assert_eq!(stats["devices"]["total"], 0);

    register(&server, &client, "op-1").await;
    let res = client
        .post(server.url("/api/device/op-1/block"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = client
        .post(server.url("/api/device/op-1/block"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_surface_hidden_when_disabled() {
    let server = spawn_server(config()).await;
    let res = reqwest::get(server.url("/admin/status")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn throttled_requests_get_429() {
    let mut cfg = config();
    cfg.rate_limit.enabled = true;
    cfg.rate_limit.requests_per_second = 1;
    cfg.rate_limit.burst_size = 2;
    let server = spawn_server(cfg).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let res = client
            .get(server.url("/api/device/anything"))
            .send()
            .await
            .unwrap();
        statuses.push(res.status());
    }
    assert_eq!(statuses[0], StatusCode::NOT_FOUND);
    assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));

    // Liveness is never throttled.
    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn config_reload_replaces_policy() {
    let server = spawn_server(config()).await;
    let mut cfg = config();
    cfg.device_tracking.suspicious_activity.block_suspicious = true;
    server.config_tx.send(cfg).unwrap();

    for _ in 0..50 {
        if server.engine.policy().block_suspicious {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("policy was not reloaded");
}
