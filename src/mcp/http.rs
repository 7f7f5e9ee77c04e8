//! HTTP transport.
//!
//! One endpoint, three verbs:
//!
//! - `POST`: a JSON-RPC envelope or batch. The session comes from the
//!   `Mcp-Session-Id` header or `mcp_session_id` cookie; a new session is
//!   created when neither is present. The reply is returned in the body
//!   (`sync_replies`) or queued for a later `GET` with `202 Accepted`.
//! - `GET`: delivers queued messages, as a server-sent event stream when SSE
//!   is enabled and the client accepts `text/event-stream`, otherwise as a
//!   JSON array.
//! - `DELETE`: terminates the session.
//!
//! Every request reloads its session from the store; nothing is cached in
//! the handlers.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::config::{HttpConfig, MAX_STREAM_DURATION_SECS};
use crate::error::SessionError;
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::protocol::{parse, ErrorCode, Inbound, InvalidEnvelope, Reply};
use crate::mcp::session::{SessionId, SessionManager};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Cookie accepted as an alternative to [`SESSION_HEADER`].
pub const SESSION_COOKIE: &str = "mcp_session_id";

/// Methods served on the endpoint, as sent in `Allow`.
pub const ALLOWED_METHODS: &str = "GET, POST, DELETE";

const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;
const SSE_KEEP_ALIVE_SECS: u64 = 15;
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const MAX_STREAM_DURATION: Duration = Duration::from_secs(MAX_STREAM_DURATION_SECS);

/// Effective HTTP behaviour, derived from [`HttpConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    /// Path of the MCP endpoint.
    pub endpoint: String,
    /// Whether GET may answer with an SSE stream.
    pub enable_sse: bool,
    /// Whether POST replies go in the response body.
    pub sync_replies: bool,
    /// Most messages handed out per GET or SSE poll.
    pub drain_limit: usize,
    /// How often an SSE stream checks the queue.
    pub poll_interval: Duration,
    /// Longest an SSE stream stays open.
    pub max_stream_duration: Duration,
}

impl HttpOptions {
    /// Derives options from configuration, applying shared-hosting limits.
    #[must_use]
    pub fn from_config(config: &HttpConfig) -> Self {
        let effective = config.effective();
        Self {
            endpoint: effective.endpoint.clone(),
            enable_sse: effective.enable_sse,
            sync_replies: effective.sync_replies,
            drain_limit: effective.max_queue_size,
            poll_interval: effective.sse_poll_interval(),
            max_stream_duration: effective.max_stream_duration(),
        }
    }
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default())
    }
}

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    dispatcher: Arc<Dispatcher>,
    sessions: SessionManager,
    options: Arc<HttpOptions>,
}

impl HttpState {
    /// Bundles a dispatcher, a session manager and transport options.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, sessions: SessionManager, options: HttpOptions) -> Self {
        Self {
            dispatcher,
            sessions,
            options: Arc::new(options),
        }
    }

    /// The session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The transport options.
    #[must_use]
    pub fn options(&self) -> &HttpOptions {
        &self.options
    }
}

/// Builds the axum router for the MCP endpoint.
pub fn router(state: HttpState) -> Router {
    let endpoint = state.options.endpoint.clone();
    Router::new()
        .route(
            &endpoint,
            // HEAD would otherwise run the GET handler and drain the queue.
            get(handle_get)
                .head(method_not_allowed)
                .post(handle_post)
                .delete(handle_delete)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Serves `state` on `bind` until `shutdown` resolves.
///
/// Also runs the expired-session sweeper for the lifetime of the server.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn serve<F>(state: HttpState, bind: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        endpoint = %state.options.endpoint,
        sse = state.options.enable_sse,
        "MCP HTTP server listening"
    );

    let sweeper = spawn_sweeper(state.sessions.clone());
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    result
}

/// Periodically evicts expired sessions.
///
/// Runs every `min(session_timeout / 2, 60s)`.
pub fn spawn_sweeper(sessions: SessionManager) -> JoinHandle<()> {
    let period = (sessions.settings().timeout / 2).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sessions.sweep_expired().await {
                tracing::warn!(error = %e, "Session sweep failed");
            }
        }
    })
}

/// Reads the session id from the header, then the cookie.
///
/// # Errors
///
/// Returns [`SessionError::InvalidId`] for a malformed id.
pub fn session_id_from(headers: &HeaderMap) -> Result<Option<SessionId>, SessionError> {
    if let Some(value) = headers.get(SESSION_HEADER) {
        let raw = value
            .to_str()
            .map_err(|_| SessionError::InvalidId("header is not ASCII".to_string()))?;
        return SessionId::parse(raw.trim()).map(Some);
    }

    let cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE);

    cookie.map(|(_, raw)| SessionId::parse(raw.trim())).transpose()
}

fn require_session_id(headers: &HeaderMap) -> Result<SessionId, SessionError> {
    session_id_from(headers)?
        .ok_or_else(|| SessionError::InvalidId("missing Mcp-Session-Id header".to_string()))
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

fn with_session_header(mut response: Response, id: &SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}

fn session_error_response(error: &SessionError) -> Response {
    match error {
        SessionError::Store(e) => tracing::error!(error = %e, "Session store failure"),
        other => tracing::debug!(error = %other, "Session request rejected"),
    }
    (error.http_status(), Json(error.to_jsonrpc())).into_response()
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let parsed = match parse(&body) {
        Err(e) if e.code() == ErrorCode::ParseError.code() => {
            return (StatusCode::BAD_REQUEST, Json(e.into_error())).into_response();
        }
        other => other,
    };

    let id = match session_id_from(&headers) {
        Ok(Some(id)) => id,
        Ok(None) => match state.sessions.create_session().await {
            Ok(id) => id,
            Err(e) => return session_error_response(&e),
        },
        Err(e) => return session_error_response(&e),
    };

    let dispatcher = Arc::clone(&state.dispatcher);
    let sync_replies = state.options.sync_replies;
    let outcome = state
        .sessions
        .with_session(&id, move |session| -> Result<Option<Reply>, SessionError> {
            session.touch();
            if sync_replies {
                return Ok(dispatcher.dispatch_parsed(parsed, session));
            }

            // Nothing runs unless every reply fits in the queue.
            let limit = session.max_queue_size();
            if expected_replies(&parsed) > limit.saturating_sub(session.queue_len()) {
                return Err(SessionError::QueueFull { limit });
            }

            let Some(reply) = dispatcher.dispatch_parsed(parsed, session) else {
                return Ok(None);
            };
            if reply_len(&reply) > limit.saturating_sub(session.queue_len()) {
                tracing::warn!(
                    session_id = %session.id(),
                    "Queue filled during dispatch, replying in the response body"
                );
                return Ok(Some(reply));
            }
            for message in reply.into_messages() {
                session.enqueue(message)?;
            }
            Ok(None)
        })
        .await
        .and_then(|inner| inner);

    let response = match outcome {
        Ok(Some(reply)) => (StatusCode::OK, Json(reply)).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => return session_error_response(&e),
    };
    with_session_header(response, &id)
}

fn expected_replies(parsed: &Result<Inbound, InvalidEnvelope>) -> usize {
    match parsed {
        Ok(inbound) => inbound.expected_replies(),
        Err(invalid) => usize::from(!invalid.is_notification()),
    }
}

const fn reply_len(reply: &Reply) -> usize {
    match reply {
        Reply::Single(_) => 1,
        Reply::Batch(messages) => messages.len(),
    }
}

async fn handle_get(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let id = match require_session_id(&headers) {
        Ok(id) => id,
        Err(e) => return session_error_response(&e),
    };

    if state.options.enable_sse && wants_event_stream(&headers) {
        if let Err(e) = state.sessions.touch(&id).await {
            return session_error_response(&e);
        }
        tracing::debug!(session_id = %id, "Opening SSE stream");
        return with_session_header(sse_response(&state, id.clone()), &id);
    }

    let limit = state.options.drain_limit;
    let drained = state
        .sessions
        .with_session(&id, |session| {
            session.touch();
            session.drain(limit)
        })
        .await;

    match drained {
        Ok(messages) => with_session_header((StatusCode::OK, Json(messages)).into_response(), &id),
        Err(e) => session_error_response(&e),
    }
}

fn sse_response(state: &HttpState, id: SessionId) -> Response {
    let stream = event_stream(
        state.sessions.clone(),
        id,
        state.options.drain_limit,
        state.options.poll_interval,
        state.options.max_stream_duration,
    );

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEP_ALIVE_SECS)))
        .into_response()
}

/// Polls the session queue, yielding one `message` event per envelope.
///
/// Ends when the session can no longer be loaded or `max_duration` elapses.
fn event_stream(
    sessions: SessionManager,
    id: SessionId,
    limit: usize,
    poll_interval: Duration,
    max_duration: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let deadline = tokio::time::Instant::now() + max_duration.min(MAX_STREAM_DURATION);

    async_stream::stream! {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(session_id = %id, "SSE stream reached its time limit");
                break;
            }
            match sessions.drain_outbound(&id, limit).await {
                Ok(messages) => {
                    for message in messages {
                        match Event::default().event("message").json_data(&message) {
                            Ok(event) => {
                                yield Ok::<Event, Infallible>(event);
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to encode SSE event"),
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(session_id = %id, error = %e, "Closing SSE stream");
                    break;
                }
            }
        }
    }
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let id = match require_session_id(&headers) {
        Ok(id) => id,
        Err(e) => return session_error_response(&e),
    };

    match state.sessions.terminate(&id).await {
        Ok(existed) => {
            tracing::debug!(session_id = %id, existed, "Session deleted by client");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => session_error_response(&e),
    }
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOWED_METHODS)],
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.append(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn session_id_prefers_header_over_cookie() {
        let map = headers(&[("mcp-session-id", "abc"), ("cookie", "mcp_session_id=def")]);
        assert_eq!(session_id_from(&map).unwrap().unwrap().as_str(), "abc");
    }

    #[test]
    fn session_id_from_cookie() {
        let map = headers(&[("cookie", "theme=dark; mcp_session_id=s-1; other=x")]);
        assert_eq!(session_id_from(&map).unwrap().unwrap().as_str(), "s-1");
        assert!(session_id_from(&HeaderMap::new()).unwrap().is_none());
    }

    #[test]
    fn malformed_session_id_is_rejected() {
        let map = headers(&[("mcp-session-id", "../../etc")]);
        assert!(matches!(
            session_id_from(&map),
            Err(SessionError::InvalidId(_))
        ));
    }

    #[test]
    fn accept_header_selects_sse() {
        assert!(wants_event_stream(&headers(&[(
            "accept",
            "application/json, text/event-stream"
        )])));
        assert!(!wants_event_stream(&headers(&[("accept", "application/json")])));
    }

    #[tokio::test]
    async fn event_stream_stops_at_deadline() {
        use futures::StreamExt;

        use crate::mcp::protocol::JsonRpcNotification;
        use crate::mcp::session::SessionSettings;
        use crate::mcp::store::MemorySessionStore;

        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionSettings::default(),
        );
        let id = sessions.create_session().await.unwrap();
        let changed = JsonRpcNotification::new("notifications/tools/list_changed", None);
        sessions.enqueue_outbound(&id, changed.into()).await.unwrap();

        let events: Vec<_> = event_stream(
            sessions,
            id,
            10,
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
        .collect()
        .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn huge_stream_duration_is_capped() {
        use futures::StreamExt;

        use crate::mcp::session::SessionSettings;
        use crate::mcp::store::MemorySessionStore;

        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionSettings::default(),
        );
        let id = sessions.create_session().await.unwrap();
        let mut stream = Box::pin(event_stream(
            sessions.clone(),
            id.clone(),
            10,
            Duration::from_millis(5),
            Duration::MAX,
        ));

        sessions.terminate(&id).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn shared_hosting_disables_sse() {
        let options = HttpOptions::from_config(&HttpConfig {
            shared_hosting: true,
            ..HttpConfig::default()
        });
        assert!(!options.enable_sse);
        assert_eq!(options.drain_limit, 500);
        assert_eq!(options.max_stream_duration, Duration::from_secs(25));
    }
}
