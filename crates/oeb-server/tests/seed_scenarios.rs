// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios exercising the full ingest -> store -> query/WS path
//! against a real router, mirroring the daemon's own websocket test style.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use oeb_server::{AppState, EventBus, ServerConfig, VoiceCatalog, build_app};
use oeb_store::EventStore;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

fn test_state(dir: &std::path::Path) -> Arc<AppState> {
    let store = Arc::new(EventStore::new(1000, None).unwrap());
    Arc::new(AppState {
        store,
        bus: EventBus::new(),
        voice: None,
        voice_catalog: VoiceCatalog::new(dir.join("voice")),
        config: ServerConfig {
            cache_dir: dir.to_path_buf(),
            ..ServerConfig::default()
        },
        nonce: "test-nonce".to_string(),
        started_at: Instant::now(),
    })
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

/// A hook call carrying the default Claude Code session-start shape
/// normalizes into a full envelope, is retained, and is visible via query.
#[tokio::test]
async fn session_start_hook_round_trips_through_query() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let (status, body) = post_json(
        app.clone(),
        "/events/session-start",
        json!({ "session_id": "S", "cwd": "/p", "model": "m" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["id"].is_string());

    let (status, events) = get_json(app, "/events?type=hook.session_start").await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 1);
    let envelope = &events[0];
    assert_eq!(envelope["type"], "hook.session_start");
    assert_eq!(envelope["source"], "hook");
    assert_eq!(envelope["appRoot"], "/p");
    assert_eq!(envelope["data"]["sessionId"], "S");
    assert_eq!(envelope["data"]["model"], "m");
    assert_eq!(envelope["data"]["hookEvent"], "session_start");
}

/// A 3000-character `tool_input` is truncated to 2003 characters in the
/// stored envelope's preview field, ending in an ellipsis.
#[tokio::test]
async fn oversized_tool_input_is_truncated_in_the_stored_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let huge = "x".repeat(3000);
    post_json(
        app.clone(),
        "/events/pre-tool-use",
        json!({ "tool_name": "Bash", "tool_input": huge }),
    )
    .await;

    let (_, events) = get_json(app, "/events?type=hook.pre_tool_use").await;
    let preview = events[0]["data"]["toolInputPreview"].as_str().unwrap();
    assert_eq!(preview.len(), 2003);
    assert!(preview.ends_with("..."));
}

/// A stop hook reporting `stop_hook_active: true` is skipped rather than
/// stored, leaving the event count untouched.
#[tokio::test]
async fn recursive_stop_hook_is_skipped_and_does_not_grow_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let (_, before) = get_json(app.clone(), "/health").await;
    assert_eq!(before["events"]["total"], 0);

    let (status, body) = post_json(
        app.clone(),
        "/events/stop",
        json!({ "stop_hook_active": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");

    let (_, after) = get_json(app, "/health").await;
    assert_eq!(after["events"]["total"], 0);
}

/// Pushing past the ring buffer's capacity evicts the oldest entries; a
/// `limit`-bounded query returns only the newest ones, oldest first.
#[tokio::test]
async fn overflowing_capacity_keeps_only_the_newest_events() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    for i in 0..1001 {
        let (status, _) = post_json(
            build_app(Arc::clone(&state)),
            "/events",
            json!({ "type": "probe.tick", "data": { "i": i } }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, events) = get_json(build_app(Arc::clone(&state)), "/events?limit=2").await;
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["data"]["i"], 999);
    assert_eq!(events[1]["data"]["i"], 1000);
}

/// A WebSocket subscriber attached with a type filter receives only the
/// matching envelope out of several published, and nothing else.
#[tokio::test]
async fn ws_subscriber_with_type_filter_receives_only_the_matching_event() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let addr = spawn_server(build_app(Arc::clone(&state))).await;

    let url = format!("ws://127.0.0.1:{}/ws?type=worktree.deleted", addr.port());
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let (_write, mut read) = ws_stream.split();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let publish_app = build_app(Arc::clone(&state));
    post_json(publish_app.clone(), "/events", json!({ "type": "worktree.created", "data": {} })).await;
    post_json(publish_app.clone(), "/events", json!({ "type": "worktree.deleted", "data": {} })).await;
    post_json(publish_app, "/events", json!({ "type": "worktree.created", "data": {} })).await;

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("matching frame should arrive")
        .unwrap()
        .unwrap();
    let envelope: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(envelope["type"], "worktree.deleted");

    let second = tokio::time::timeout(Duration::from_millis(200), read.next()).await;
    assert!(
        second.is_err(),
        "non-matching events must not be delivered to a filtered subscriber"
    );
}

/// A CORS preflight `OPTIONS` request is answered directly by the cors
/// layer with `204 No Content`, never reaching the router's fallback.
#[tokio::test]
async fn options_preflight_request_returns_no_content() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/events")
        .header("origin", "http://localhost")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

/// A body over the configured size limit is rejected with `413` and this
/// crate's uniform `{"error": ...}` body, not tower_http's bare default.
#[tokio::test]
async fn oversized_body_is_rejected_with_api_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let oversized = vec![b'a'; 1024 * 1024 + 10];
    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(oversized))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value["error"].is_string());
}

/// Genuinely unparseable JSON is rejected with `400` and this crate's
/// uniform error body rather than Axum's plain-text default rejection.
#[tokio::test]
async fn malformed_json_body_is_rejected_with_api_error_shape() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(test_state(dir.path()));

    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value["error"].is_string());
}

/// The discovery guard rejects a second `serve` call while a first
/// instance's triple is live, without ever binding a listener.
#[tokio::test]
async fn serve_refuses_to_start_while_another_instance_holds_the_triple() {
    let dir = tempfile::tempdir().unwrap();
    let registry = oeb_discovery::Registry::new(dir.path().to_path_buf());
    let _owner = registry.acquire(4999).unwrap();

    let config = ServerConfig {
        cache_dir: dir.path().to_path_buf(),
        bind: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let err = oeb_server::serve(config).await.unwrap_err();
    match err {
        oeb_server::ServerError::AlreadyRunning { port } => assert_eq!(port, 4999),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}
