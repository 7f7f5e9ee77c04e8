//! Method dispatcher.
//!
//! Routes inbound envelopes to registered handlers, enforces the
//! initialization gate and turns every handler outcome into a protocol-correct
//! reply. This is the one place where failures become wire error envelopes.
//!
//! The handshake methods (`initialize`, `notifications/initialized`, `ping`)
//! are handled here and cannot be overridden.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::SessionError;
use crate::mcp::capabilities::{Capabilities, NegotiatedCapabilities};
use crate::mcp::protocol::{
    methods, parse, ErrorCode, Inbound, InvalidEnvelope, JsonRpcError, JsonRpcErrorData,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProgressToken, Reply,
    RequestId, Validate, ValidationError, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::session::{Session, SessionId};
use crate::mcp::state::{InitializationState, LifecycleEvent};
use crate::mcp::types::{
    CancelledNotificationParams, Implementation, InitializeParams, InitializeResult, Meta,
    ProgressNotificationParams,
};

/// Failure reported by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The params did not match what the method expects. Reported as -32602.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A domain error with its own code, reported as-is.
    #[error("{message}")]
    Application {
        /// Error code sent to the client.
        code: ErrorCode,
        /// Message sent to the client.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },

    /// Anything else. Reported as -32603 with the detail redacted unless
    /// internal errors are exposed.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidParams`].
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// A -32002 error for an unknown resource.
    pub fn resource_not_found(uri: &str) -> Self {
        Self::Application {
            code: ErrorCode::ResourceNotFound,
            message: format!("Resource not found: {uri}"),
            data: Some(json!({ "uri": uri })),
        }
    }

    /// Converts to a wire error object.
    #[must_use]
    pub fn into_error_data(self, expose_internal: bool) -> JsonRpcErrorData {
        match self {
            Self::InvalidParams(message) => {
                JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message)
            }
            Self::Application {
                code,
                message,
                data,
            } => {
                let error = JsonRpcErrorData::with_message(code, message);
                match data {
                    Some(data) => error.with_data(data),
                    None => error,
                }
            }
            Self::Internal(detail) if expose_internal => JsonRpcErrorData::with_message(
                ErrorCode::InternalError,
                format!("Internal error: {detail}"),
            ),
            Self::Internal(_) => JsonRpcErrorData::from_code(ErrorCode::InternalError),
        }
    }
}

impl From<ValidationError> for HandlerError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidParams(e.message().to_string())
    }
}

impl From<SessionError> for HandlerError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::QueueFull { .. } => Self::Application {
                code: e.error_code(),
                message: e.to_string(),
                data: None,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Deserialises and validates request params.
///
/// Absent params are treated as an empty object.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] if the params do not decode or fail
/// validation.
pub fn parse_params<T: DeserializeOwned + Validate>(
    params: Option<Value>,
) -> Result<T, HandlerError> {
    let value = params.unwrap_or_else(|| json!({}));
    let parsed: T =
        serde_json::from_value(value).map_err(|e| HandlerError::InvalidParams(e.to_string()))?;
    parsed.validate()?;
    Ok(parsed)
}

/// What a handler can see and do while it runs.
pub struct RequestContext<'a> {
    session: &'a mut Session,
    request_id: Option<RequestId>,
    method: &'a str,
    progress_token: Option<ProgressToken>,
}

impl fmt::Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", self.session.id())
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl<'a> RequestContext<'a> {
    fn new(
        session: &'a mut Session,
        request_id: Option<RequestId>,
        method: &'a str,
        params: Option<&Value>,
    ) -> Self {
        let progress_token = Meta::from_params(params).and_then(|meta| meta.progress_token);
        Self {
            session,
            request_id,
            method,
            progress_token,
        }
    }

    /// The session the call arrived on.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// The request id; `None` for a notification.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// The method being handled.
    #[must_use]
    pub const fn method(&self) -> &str {
        self.method
    }

    /// Capabilities recorded during the handshake.
    #[must_use]
    pub fn capabilities(&self) -> &NegotiatedCapabilities {
        self.session.capabilities()
    }

    /// Handshake state of the session.
    #[must_use]
    pub fn state(&self) -> InitializationState {
        self.session.state()
    }

    /// Progress token supplied in `params._meta`, if any.
    #[must_use]
    pub const fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Queues a server notification for the client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] when the session queue is at its bound.
    pub fn notify(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(), SessionError> {
        self.session
            .enqueue(JsonRpcNotification::new(method, params).into())
    }

    /// Queues a `notifications/progress` update against the request's progress
    /// token. Does nothing when the client did not ask for progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the update is invalid (e.g. `total < progress`) or
    /// the session queue is full.
    pub fn progress(
        &mut self,
        progress: f64,
        total: Option<f64>,
        message: Option<&str>,
    ) -> Result<(), HandlerError> {
        let Some(token) = self.progress_token.clone() else {
            return Ok(());
        };
        let mut params = ProgressNotificationParams::new(token, progress, total);
        if let Some(message) = message {
            params = params.with_message(message);
        }
        let notification = params
            .into_notification()
            .map_err(|e| HandlerError::Internal(e.to_string()))?;
        self.session.enqueue(notification.into())?;
        Ok(())
    }

    /// Whether the client has cancelled this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.request_id
            .as_ref()
            .is_some_and(|id| self.session.is_cancelled(id))
    }
}

/// A registered method implementation.
///
/// Requests use the returned value as the result; for notifications it is
/// discarded. A panic is caught and treated as an internal error; changes the
/// handler made to the session before panicking are kept.
pub trait Handler: Send + Sync {
    /// Handles one call.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] which the dispatcher converts to an error
    /// reply (requests) or a log line (notifications).
    fn handle(
        &self,
        params: Option<Value>,
        ctx: &mut RequestContext<'_>,
    ) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(Option<Value>, &mut RequestContext<'_>) -> Result<Value, HandlerError> + Send + Sync,
{
    fn handle(
        &self,
        params: Option<Value>,
        ctx: &mut RequestContext<'_>,
    ) -> Result<Value, HandlerError> {
        (self.0)(params, ctx)
    }
}

fn is_reserved(method: &str) -> bool {
    matches!(
        method,
        methods::INITIALIZE | methods::INITIALIZED | methods::INITIALIZED_ALIAS | methods::PING
    )
}

fn call_handler(
    handler: &dyn Handler,
    params: Option<Value>,
    ctx: &mut RequestContext<'_>,
) -> Result<Value, HandlerError> {
    catch_unwind(AssertUnwindSafe(|| handler.handle(params, ctx)))
        .unwrap_or_else(|panic| Err(HandlerError::Internal(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned());
    detail.map_or_else(
        || "handler panicked".to_string(),
        |detail| format!("handler panicked: {detail}"),
    )
}

fn reject(invalid: InvalidEnvelope) -> Option<JsonRpcMessage> {
    if invalid.is_notification() {
        tracing::warn!(
            code = invalid.code(),
            reason = %invalid.error().error.message,
            "Dropping malformed notification"
        );
        return None;
    }
    tracing::debug!(code = invalid.code(), "Rejected inbound payload");
    invalid.into_reply().map(Into::into)
}

/// Picks the protocol version to answer an initialize request with.
#[must_use]
pub fn negotiate_version(requested: &str) -> &str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Method registry plus the built-in handshake.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    server_info: Implementation,
    capabilities: Capabilities,
    instructions: Option<String>,
    expose_internal_errors: bool,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("Dispatcher")
            .field("methods", &methods)
            .field("server_info", &self.server_info)
            .field("capabilities", &self.capabilities)
            .field("expose_internal_errors", &self.expose_internal_errors)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with no registered methods.
    #[must_use]
    pub fn new(server_info: Implementation) -> Self {
        Self {
            handlers: HashMap::new(),
            server_info,
            capabilities: Capabilities::new(),
            instructions: None,
            expose_internal_errors: false,
        }
    }

    /// Sets the capabilities advertised in the initialize result.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the usage hints returned in the initialize result.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Sends internal handler error detail to clients. Off by default.
    #[must_use]
    pub const fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// The advertised server capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Registers `handler` for `method`, replacing any previous handler.
    ///
    /// Returns `false` (and registers nothing) for the built-in handshake methods.
    pub fn register_handler(
        &mut self,
        method: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> bool {
        let method = method.into();
        if is_reserved(&method) {
            tracing::warn!(method = %method, "Ignoring handler for built-in method");
            return false;
        }
        if self.handlers.insert(method.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(method = %method, "Replaced handler");
        }
        true
    }

    /// Registers a closure for `method`. See [`Self::register_handler`].
    pub fn register_fn<F>(&mut self, method: impl Into<String>, f: F) -> bool
    where
        F: Fn(Option<Value>, &mut RequestContext<'_>) -> Result<Value, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register_handler(method, FnHandler(f))
    }

    /// Whether a handler is registered for `method`.
    #[must_use]
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Parses and dispatches one raw transport payload.
    ///
    /// Returns `None` when nothing needs to be sent back.
    pub fn handle_raw(&self, raw: &str, session: &mut Session) -> Option<Reply> {
        self.dispatch_parsed(parse(raw), session)
    }

    /// Dispatches the outcome of [`parse`]. A payload that failed to parse is
    /// answered with its error unless it was shaped like a notification.
    pub fn dispatch_parsed(
        &self,
        parsed: Result<Inbound, InvalidEnvelope>,
        session: &mut Session,
    ) -> Option<Reply> {
        match parsed {
            Ok(inbound) => self.dispatch_inbound(inbound, session),
            Err(invalid) => reject(invalid).map(Reply::Single),
        }
    }

    /// Dispatches a parsed payload.
    ///
    /// Batch elements are dispatched in order. The reply batch holds one entry
    /// per request and per invalid non-notification element; a batch that
    /// yields no entries yields no reply at all.
    pub fn dispatch_inbound(&self, inbound: Inbound, session: &mut Session) -> Option<Reply> {
        match inbound {
            Inbound::Single(message) => self.dispatch(message, session).map(Reply::Single),
            Inbound::Batch(items) => {
                let replies: Vec<JsonRpcMessage> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Ok(message) => self.dispatch(message, session),
                        Err(invalid) => reject(invalid),
                    })
                    .collect();
                (!replies.is_empty()).then_some(Reply::Batch(replies))
            }
        }
    }

    /// Dispatches one envelope. Only requests produce a reply.
    pub fn dispatch(&self, message: JsonRpcMessage, session: &mut Session) -> Option<JsonRpcMessage> {
        match message {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req, session)),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif, session);
                None
            }
            JsonRpcMessage::Response(JsonRpcResponse { id, .. }) => {
                tracing::debug!(session_id = %session.id(), id = %id, "Dropping unsolicited response");
                None
            }
            JsonRpcMessage::Error(JsonRpcError { id, error, .. }) => {
                tracing::debug!(
                    session_id = %session.id(),
                    id = ?id,
                    code = error.code,
                    "Dropping unsolicited error"
                );
                None
            }
        }
    }

    fn handle_request(&self, req: JsonRpcRequest, session: &mut Session) -> JsonRpcMessage {
        let JsonRpcRequest {
            id, method, params, ..
        } = req;
        tracing::debug!(session_id = %session.id(), method = %method, id = %id, "Handling request");

        if !session.state().allows(&method) {
            tracing::warn!(method = %method, state = ?session.state(), "Request before initialization");
            return JsonRpcError::not_initialized(id).into();
        }

        match LifecycleEvent::from_method(&method) {
            Some(LifecycleEvent::InitializeRequest) => self.handle_initialize(id, params, session),
            Some(event) => match session.advance(event) {
                Ok(_) => JsonRpcResponse::success(id, json!({})).into(),
                Err(e) => JsonRpcError::invalid_request_because(Some(id), &e.to_string()).into(),
            },
            None if method == methods::PING => JsonRpcResponse::success(id, json!({})).into(),
            None => self.invoke(id, &method, params, session),
        }
    }

    fn invoke(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        session: &mut Session,
    ) -> JsonRpcMessage {
        let Some(handler) = self.handlers.get(method) else {
            return JsonRpcError::method_not_found(id, method).into();
        };

        let mut ctx = RequestContext::new(session, Some(id.clone()), method, params.as_ref());
        match call_handler(handler.as_ref(), params, &mut ctx) {
            Ok(result) => JsonRpcResponse::success(id, result).into(),
            Err(e) => {
                match &e {
                    HandlerError::Internal(detail) => {
                        tracing::error!(method = %method, id = %id, error = %detail, "Handler failed");
                    }
                    other => {
                        tracing::debug!(method = %method, id = %id, error = %other, "Handler returned an error");
                    }
                }
                JsonRpcError::new(Some(id), e.into_error_data(self.expose_internal_errors)).into()
            }
        }
    }

    fn handle_initialize(
        &self,
        id: RequestId,
        params: Option<Value>,
        session: &mut Session,
    ) -> JsonRpcMessage {
        if session.state() != InitializationState::NotInitialized {
            return JsonRpcError::new(
                Some(id),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialized",
                ),
            )
            .into();
        }

        let Some(params) = params else {
            return JsonRpcError::invalid_params(id, "Missing initialize params").into();
        };
        let params: InitializeParams = match parse_params(Some(params)) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcError::invalid_params(id, format!("Invalid initialize params: {e}"))
                    .into();
            }
        };

        let version = negotiate_version(&params.protocol_version);
        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
            extra: crate::mcp::protocol::ExtraFields::new(),
        };
        let result = match serde_json::to_value(&result) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialise initialize result");
                return JsonRpcError::new(
                    Some(id),
                    HandlerError::from(e).into_error_data(self.expose_internal_errors),
                )
                .into();
            }
        };

        if let Err(e) = session.advance(LifecycleEvent::InitializeRequest) {
            return JsonRpcError::invalid_request_because(Some(id), &e.to_string()).into();
        }
        session
            .capabilities_mut()
            .record(&params, &self.capabilities, version);

        tracing::info!(
            session_id = %session.id(),
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            requested = %params.protocol_version,
            negotiated = %version,
            "Client initializing"
        );

        JsonRpcResponse::success(id, result).into()
    }

    fn handle_notification(&self, notif: JsonRpcNotification, session: &mut Session) {
        let JsonRpcNotification { method, params, .. } = notif;

        if !session.state().allows(&method) {
            tracing::warn!(method = %method, state = ?session.state(), "Dropping notification before initialization");
            return;
        }

        match LifecycleEvent::from_method(&method) {
            Some(LifecycleEvent::InitializeRequest) => {
                tracing::warn!("Ignoring initialize sent as a notification");
                return;
            }
            Some(event) => {
                match session.advance(event) {
                    Ok(_) => tracing::info!(session_id = %session.id(), "Session initialized"),
                    Err(e) => tracing::warn!(session_id = %session.id(), error = %e, "Ignoring initialized notification"),
                }
                return;
            }
            None => {}
        }

        match method.as_str() {
            methods::PING => return,
            methods::CANCELLED => {
                match parse_params::<CancelledNotificationParams>(params.clone()) {
                    Ok(cancelled) => {
                        tracing::debug!(
                            session_id = %session.id(),
                            request_id = %cancelled.request_id,
                            reason = cancelled.reason.as_deref().unwrap_or(""),
                            "Request cancelled by client"
                        );
                        session.record_cancelled(cancelled.request_id);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed cancellation notification");
                        return;
                    }
                }
            }
            _ => {}
        }

        let Some(handler) = self.handlers.get(&method) else {
            if method != methods::CANCELLED {
                tracing::debug!(method = %method, "No handler for notification");
            }
            return;
        };

        let mut ctx = RequestContext::new(session, None, &method, params.as_ref());
        if let Err(e) = call_handler(handler.as_ref(), params, &mut ctx) {
            tracing::warn!(method = %method, error = %e, "Notification handler failed");
        }
    }
}
