//! Integration tests for the HTTP transport.
//!
//! Requests go straight into the axum router with `tower::ServiceExt::oneshot`;
//! no socket is opened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use mcp_engine::config::Config;
use mcp_engine::mcp::dispatcher::Dispatcher;
use mcp_engine::mcp::http::{self, HttpOptions, HttpState, SESSION_HEADER};
use mcp_engine::mcp::session::{SessionManager, SessionSettings};
use mcp_engine::mcp::store::MemorySessionStore;
use mcp_engine::mcp::types::Implementation;
use mcp_engine::mcp::McpServer;

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{}}}"#;
const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

async fn app(configure: impl FnOnce(&mut Config)) -> Router {
    let mut config = Config::default();
    configure(&mut config);
    let mut server = McpServer::new(config);
    server.register_fn("echo", |params, _| Ok(params.unwrap_or(Value::Null)));
    http::router(server.into_http_state().await.unwrap())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

fn post(session: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = session {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(session: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(SESSION_HEADER, session)
        .body(Body::empty())
        .unwrap()
}

fn delete(session: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header(SESSION_HEADER, session)
        .body(Body::empty())
        .unwrap()
}

fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn session_of(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string()
}

// =============================================================================
// Queued Delivery
// =============================================================================

#[tokio::test]
async fn test_post_then_poll_delivers_once() {
    let app = app(|c| {
        c.http.enable_sse = false;
        c.http.sync_replies = false;
    })
    .await;

    let (status, headers, body) = send(&app, post(None, INITIALIZE)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.is_empty());
    let session = session_of(&headers);

    let (status, headers, body) = send(&app, get(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session_of(&headers), session);
    let delivered = json_body(&body);
    assert_eq!(delivered.as_array().unwrap().len(), 1);
    assert_eq!(delivered[0]["id"], 1);
    assert_eq!(delivered[0]["result"]["protocolVersion"], "2025-06-18");

    let (status, _, body) = send(&app, get(&session)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!([]));
}

#[tokio::test]
async fn test_queued_replies_keep_order() {
    let app = app(|c| {
        c.http.enable_sse = false;
        c.http.sync_replies = false;
    })
    .await;

    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);
    send(&app, post(Some(&session), INITIALIZED)).await;
    for n in 2..5 {
        let body = json!({"jsonrpc": "2.0", "id": n, "method": "echo", "params": {"n": n}});
        let (status, _, _) = send(&app, post(Some(&session), &body.to_string())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (_, _, body) = send(&app, get(&session)).await;
    let ids: Vec<Value> = json_body(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
}

#[tokio::test]
async fn test_full_queue_is_reported() {
    let app = app(|c| {
        c.http.enable_sse = false;
        c.http.sync_replies = false;
        c.http.max_queue_size = 1;
    })
    .await;

    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let (status, _, body) = send(
        &app,
        post(Some(&session), r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(&body)["error"]["code"], -32000);

    let (_, _, body) = send(&app, get(&session)).await;
    assert_eq!(json_body(&body).as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_full_queue_rejects_before_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = Config::default();
    config.http.enable_sse = false;
    config.http.sync_replies = false;
    config.http.max_queue_size = 1;
    let mut server = McpServer::new(config);
    let counter = Arc::clone(&calls);
    server.register_fn("count", move |_, _| {
        Ok(json!(counter.fetch_add(1, Ordering::SeqCst) + 1))
    });
    let app = http::router(server.into_http_state().await.unwrap());

    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);
    send(&app, post(Some(&session), INITIALIZED)).await;

    let count = r#"{"jsonrpc":"2.0","id":2,"method":"count"}"#;
    let (status, _, _) = send(&app, post(Some(&session), count)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let (_, _, body) = send(&app, get(&session)).await;
    assert_eq!(json_body(&body)[0]["id"], 1);

    let (status, _, _) = send(&app, post(Some(&session), count)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let (_, _, body) = send(&app, get(&session)).await;
    assert_eq!(
        json_body(&body),
        json!([{"jsonrpc": "2.0", "id": 2, "result": 1}])
    );
}

#[tokio::test]
async fn test_reply_returned_in_body_when_handler_fills_queue() {
    let mut config = Config::default();
    config.http.enable_sse = false;
    config.http.sync_replies = false;
    config.http.max_queue_size = 2;
    let mut server = McpServer::new(config);
    server.register_fn("chatty", |_, ctx| {
        ctx.notify("notifications/message", Some(json!({"n": 1})))?;
        ctx.notify("notifications/message", Some(json!({"n": 2})))?;
        Ok(json!("done"))
    });
    let app = http::router(server.into_http_state().await.unwrap());

    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);
    send(&app, post(Some(&session), INITIALIZED)).await;
    send(&app, get(&session)).await;

    let (status, _, body) = send(
        &app,
        post(Some(&session), r#"{"jsonrpc":"2.0","id":5,"method":"chatty"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["result"], "done");

    let (_, _, body) = send(&app, get(&session)).await;
    let queued = json_body(&body);
    assert_eq!(queued.as_array().unwrap().len(), 2);
    assert_eq!(queued[1]["params"]["n"], 2);
}

#[tokio::test]
async fn test_malformed_notification_is_not_answered() {
    let app = app(|_| {}).await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let (status, _, body) = send(
        &app,
        post(
            Some(&session),
            r#"{"jsonrpc":"2.0","method":"notifications/x","params":3}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.is_empty());
}

// =============================================================================
// Synchronous Replies
// =============================================================================

#[tokio::test]
async fn test_sync_reply_in_body() {
    let app = app(|_| {}).await;

    let (status, headers, body) = send(&app, post(None, INITIALIZE)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["result"]["serverInfo"]["name"], "mcp-engine");
    let session = session_of(&headers);

    let (status, _, body) = send(&app, post(Some(&session), INITIALIZED)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.is_empty());

    let (status, _, body) = send(
        &app,
        post(
            Some(&session),
            r#"{"jsonrpc":"2.0","id":2,"method":"echo","params":{"text":"hi"}}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({"jsonrpc": "2.0", "id": 2, "result": {"text": "hi"}})
    );
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = app(|_| {}).await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::COOKIE, format!("mcp_session_id={session}"))
        .body(Body::from(INITIALIZE))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["error"]["message"], "Server already initialized");
}

#[tokio::test]
async fn test_gate_applies_over_http() {
    let app = app(|_| {}).await;
    let (status, _, body) = send(&app, post(None, r#"{"method":"unknown/thing","id":1}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let value = json_body(&body);
    assert_eq!(value["id"], 1);
    assert_eq!(value["error"]["code"], -32600);
}

#[tokio::test]
async fn test_unparseable_body_is_bad_request() {
    let app = app(|_| {}).await;
    let (status, headers, body) = send(&app, post(None, "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(SESSION_HEADER).is_none());
    let value = json_body(&body);
    assert_eq!(value["error"]["code"], -32700);
    assert!(value["id"].is_null());
}

// =============================================================================
// Session Lifecycle
// =============================================================================

#[tokio::test]
async fn test_delete_is_idempotent() {
    let app = app(|_| {}).await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let (status, _, _) = send(&app, delete(&session)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, delete(&session)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = send(&app, get(&session)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"]["code"], -32001);
}

#[tokio::test]
async fn test_unknown_session_on_post() {
    let app = app(|_| {}).await;
    let (status, _, _) = send(&app, post(Some("does-not-exist"), INITIALIZE)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_without_session_is_bad_request() {
    let app = app(|_| {}).await;
    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expired_session_is_gone() {
    let mut dispatcher = Dispatcher::new(Implementation::new("t", "1"));
    dispatcher.register_fn("echo", |params, _| Ok(params.unwrap_or(Value::Null)));
    let sessions = SessionManager::new(
        Arc::new(MemorySessionStore::new()),
        SessionSettings {
            timeout: Duration::from_millis(20),
            max_queue_size: 8,
        },
    );
    let app = http::router(HttpState::new(
        Arc::new(dispatcher),
        sessions.clone(),
        HttpOptions::default(),
    ));

    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, _, body) = send(&app, get(&session)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"]["code"], -32001);
    assert_eq!(sessions.sweep_expired().await.unwrap(), 0);
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_other_methods_are_not_allowed() {
    let app = app(|_| {}).await;
    let request = Request::builder()
        .method("PUT")
        .uri("/mcp")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers.get(header::ALLOW).unwrap(), "GET, POST, DELETE");
}

#[tokio::test]
async fn test_head_is_not_allowed_and_keeps_queue() {
    let app = app(|c| {
        c.http.enable_sse = false;
        c.http.sync_replies = false;
    })
    .await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let request = Request::builder()
        .method("HEAD")
        .uri("/mcp")
        .header(SESSION_HEADER, &session)
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers.get(header::ALLOW).unwrap(), "GET, POST, DELETE");

    let (_, _, body) = send(&app, get(&session)).await;
    assert_eq!(json_body(&body)[0]["id"], 1);
}

#[tokio::test]
async fn test_other_paths_are_not_found() {
    let app = app(|_| {}).await;
    let request = Request::builder()
        .method("POST")
        .uri("/elsewhere")
        .body(Body::from(INITIALIZE))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body), json!({"error": "Not found"}));
}

#[tokio::test]
async fn test_custom_endpoint() {
    let app = app(|c| c.http.endpoint = "/rpc".to_string()).await;
    let (status, _, _) = send(&app, post(None, INITIALIZE)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .body(Body::from(INITIALIZE))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Server-Sent Events
// =============================================================================

#[tokio::test]
async fn test_sse_stream_when_accepted() {
    let app = app(|c| c.http.sync_replies = false).await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(SESSION_HEADER, &session)
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(session_of(response.headers()), session);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_sse_stream_ends_with_session() {
    let app = app(|c| {
        c.http.sync_replies = false;
        c.http.sse_poll_interval_ms = 10;
    })
    .await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(SESSION_HEADER, &session)
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let reader = tokio::spawn(to_bytes(response.into_body(), usize::MAX));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, _, _) = send(&app, delete(&session)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let body = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("stream should close once the session is gone")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: message"));
    assert!(text.contains(r#""protocolVersion":"2025-06-18""#));
}

#[tokio::test]
async fn test_sse_disabled_falls_back_to_poll() {
    let app = app(|c| {
        c.http.enable_sse = false;
        c.http.sync_replies = false;
    })
    .await;
    let (_, headers, _) = send(&app, post(None, INITIALIZE)).await;
    let session = session_of(&headers);

    let request = Request::builder()
        .method("GET")
        .uri("/mcp")
        .header(SESSION_HEADER, &session)
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    assert_eq!(json_body(&body).as_array().unwrap().len(), 1);
}
