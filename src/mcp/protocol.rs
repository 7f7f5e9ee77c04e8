//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the wire envelope used by the Model Context Protocol.
//! All messages follow the JSON-RPC 2.0 specification with MCP-specific extensions.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id` and `method`)
//! - **Notification**: A one-way message (has `method`, no `id`)
//! - **Response**: A successful reply to a request (has `id` and `result`)
//! - **Error**: A failed reply to a request (has `id`, possibly `null`, and `error`)
//!
//! A JSON array of such objects is a batch.
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`, never `""`)
//! - Unrecognised members are kept in an ordered `extra` map and written back
//!   after the known members, so future protocol fields survive a round trip

use std::fmt;

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// The JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The newest MCP protocol version this implementation speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every MCP protocol version this implementation accepts, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Unrecognised members of a protocol object, in wire order.
pub type ExtraFields = IndexMap<String, Value>;

/// Method names with meaning to the engine itself.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake completion notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Bare alias of [`INITIALIZED`] accepted for older clients.
    pub const INITIALIZED_ALIAS: &str = "initialized";
    /// Liveness check, accepted as request or notification.
    pub const PING: &str = "ping";
    /// Client asks the server to stop voluntary work on a request.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress update for a long-running request.
    pub const PROGRESS: &str = "notifications/progress";
}

/// A domain-level field violation found by [`Validate::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    /// Creates a validation error with a human-readable cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the human-readable cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Structural and domain checks for protocol models.
pub trait Validate {
    /// Checks the model's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violated invariant.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// The `"jsonrpc": "2.0"` member.
///
/// Always serialised as `"2.0"`. On input the member may be absent; when it is
/// present, any other value is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!(
                "jsonrpc field must be \"{JSONRPC_VERSION}\", got \"{version}\""
            )))
        }
    }
}

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
/// Equality and hashing are by variant and value: `1` and `"1"` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Interprets a raw `id` member.
    ///
    /// # Errors
    ///
    /// Returns an error for `null`, non-integer numbers, empty strings and
    /// structured values.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let id = match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .ok_or_else(|| ValidationError::new("id must be an integer or a string"))?,
            Value::String(s) => Self::String(s.clone()),
            Value::Null => return Err(ValidationError::new("id must not be null")),
            _ => return Err(ValidationError::new("id must be an integer or a string")),
        };
        id.validate()?;
        Ok(id)
    }
}

impl Validate for RequestId {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::String(s) if s.is_empty() => Err(ValidationError::new("RequestId cannot be empty")),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Correlates progress notifications with the request that asked for them.
///
/// Supplied by the requester in `params._meta.progressToken`; opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// Numeric token.
    Number(i64),
    /// String token.
    String(String),
}

impl Validate for ProgressToken {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::String(s) if s.is_empty() => {
                Err(ValidationError::new("ProgressToken cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// Rejects extra members that would shadow a known member on output.
fn check_extra(extra: &ExtraFields, reserved: &[&str]) -> Result<(), ValidationError> {
    match reserved.iter().find(|key| extra.contains_key(**key)) {
        Some(key) => Err(ValidationError::new(format!(
            "extra field '{key}' collides with a protocol field"
        ))),
        None => Ok(()),
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect a response from the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0" on output.
    #[serde(default)]
    pub jsonrpc: JsonRpcVersion,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            method: method.into(),
            params,
            extra: ExtraFields::new(),
        }
    }
}

impl Validate for JsonRpcRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.id.validate()?;
        if self.method.is_empty() {
            return Err(ValidationError::new("method field cannot be empty"));
        }
        check_extra(&self.extra, &["jsonrpc", "id", "method", "params", "result", "error"])
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and never receive a response. Used in both
/// directions: client notifications are dispatched, server notifications are
/// queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0" on output.
    #[serde(default)]
    pub jsonrpc: JsonRpcVersion,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            extra: ExtraFields::new(),
        }
    }
}

impl Validate for JsonRpcNotification {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.method.is_empty() {
            return Err(ValidationError::new("method field cannot be empty"));
        }
        check_extra(&self.extra, &["jsonrpc", "id", "method", "params", "result", "error"])
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0" on output.
    #[serde(default)]
    pub jsonrpc: JsonRpcVersion,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            result,
            extra: ExtraFields::new(),
        }
    }
}

impl Validate for JsonRpcResponse {
    fn validate(&self) -> Result<(), ValidationError> {
        self.id.validate()?;
        check_extra(&self.extra, &["jsonrpc", "id", "method", "params", "result", "error"])
    }
}

/// Standard JSON-RPC 2.0 error codes plus the MCP application range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// The requested resource is unknown.
    ResourceNotFound,
    /// Server-defined error in the reserved -32000..=-32099 range.
    ServerError(i32),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ResourceNotFound => -32002,
            Self::ServerError(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ResourceNotFound => "Resource not found",
            Self::ServerError(_) => "Server error",
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32002 => Self::ResourceNotFound,
            other => Self::ServerError(other),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
            extra: ExtraFields::new(),
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC 2.0 error response.
///
/// `id` is written as `null` when the failing request's id could not be
/// determined, as JSON-RPC requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Always "2.0" on output.
    #[serde(default)]
    pub jsonrpc: JsonRpcVersion,

    /// The request ID this error corresponds to (if known).
    #[serde(default)]
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            error,
            extra: ExtraFields::new(),
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// Creates an invalid request error response naming what was wrong.
    #[must_use]
    pub fn invalid_request_because(id: Option<RequestId>, reason: &str) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(
                ErrorCode::InvalidRequest,
                format!("Invalid Request: {reason}"),
            ),
        )
    }

    /// Creates the error returned for traffic that arrives before the handshake.
    #[must_use]
    pub fn not_initialized(id: RequestId) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialized"),
        )
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }

    /// Returns the numeric error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.error.code
    }
}

impl Validate for JsonRpcError {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = &self.id {
            id.validate()?;
        }
        check_extra(&self.extra, &["jsonrpc", "id", "method", "params", "result", "error"])
    }
}

/// Any single JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
    /// A successful reply.
    Response(JsonRpcResponse),
    /// A failed reply.
    Error(JsonRpcError),
}

impl JsonRpcMessage {
    /// Classifies and decodes one envelope.
    ///
    /// The envelope shape decides the variant: `method` + `id` is a request,
    /// `method` alone a notification, `id` + `result` a response and `error` an
    /// error. The `id` of a malformed envelope is echoed in the returned error
    /// whenever it can be read.
    ///
    /// # Errors
    ///
    /// Returns an invalid request (`-32600`) error when the value is not an
    /// object or does not have exactly one valid envelope shape.
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        let Value::Object(obj) = value else {
            return Err(JsonRpcError::invalid_request_because(
                None,
                "message must be a JSON object",
            ));
        };

        let echo_id = obj.get("id").and_then(|raw| RequestId::from_value(raw).ok());
        let invalid = |reason: &str| JsonRpcError::invalid_request_because(echo_id.clone(), reason);

        match obj.get("jsonrpc") {
            None => {}
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => return Err(invalid("jsonrpc field must be \"2.0\"")),
        }

        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");

        if let Some(method) = obj.get("method") {
            if !method.as_str().is_some_and(|m| !m.is_empty()) {
                return Err(invalid("method must be a non-empty string"));
            }
            if has_result || has_error {
                return Err(invalid("a request cannot carry result or error"));
            }
            if !matches!(
                obj.get("params"),
                None | Some(Value::Object(_) | Value::Array(_) | Value::Null)
            ) {
                return Err(invalid("params must be an object or an array"));
            }

            return match obj.get("id") {
                None => decode(obj, &invalid).map(Self::Notification),
                Some(raw) => {
                    RequestId::from_value(raw).map_err(|e| invalid(e.message()))?;
                    decode(obj, &invalid).map(Self::Request)
                }
            };
        }

        match (has_result, has_error) {
            (true, false) => {
                let raw = obj.get("id").ok_or_else(|| invalid("response is missing id"))?;
                RequestId::from_value(raw).map_err(|e| invalid(e.message()))?;
                decode(obj, &invalid).map(Self::Response)
            }
            (false, true) => {
                if let Some(raw) = obj.get("id").filter(|raw| !raw.is_null()) {
                    RequestId::from_value(raw).map_err(|e| invalid(e.message()))?;
                }
                decode(obj, &invalid).map(Self::Error)
            }
            (true, true) => Err(invalid("a response cannot carry both result and error")),
            (false, false) => Err(invalid("missing method, result or error")),
        }
    }

    /// Like [`Self::from_value`], but records whether a rejected value was
    /// shaped like a notification.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::from_value`].
    pub fn classify(value: Value) -> Result<Self, InvalidEnvelope> {
        let notification = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("method") && !obj.contains_key("id"));
        Self::from_value(value).map_err(|error| {
            if notification {
                InvalidEnvelope::from_notification(error)
            } else {
                InvalidEnvelope::new(error)
            }
        })
    }

    /// Returns the method name of a request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns the parameters of a request or notification.
    #[must_use]
    pub const fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(req) => req.params.as_ref(),
            Self::Notification(notif) => notif.params.as_ref(),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns the request ID, if the envelope carries one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) => None,
        }
    }
}

impl Validate for JsonRpcMessage {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Request(req) => req.validate(),
            Self::Notification(notif) => notif.validate(),
            Self::Response(resp) => resp.validate(),
            Self::Error(err) => err.validate(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(|e| de::Error::custom(e.error.message))
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notif: JsonRpcNotification) -> Self {
        Self::Notification(notif)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(err: JsonRpcError) -> Self {
        Self::Error(err)
    }
}

fn decode<T: de::DeserializeOwned>(
    obj: Map<String, Value>,
    invalid: &impl Fn(&str) -> JsonRpcError,
) -> Result<T, JsonRpcError> {
    serde_json::from_value(Value::Object(obj)).map_err(|e| invalid(&e.to_string()))
}

/// A payload or batch element that is not a valid envelope.
///
/// Remembers whether the offending object was shaped like a notification
/// (`method` without `id`). Notifications are never answered, so such a
/// failure is only logged.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidEnvelope {
    error: JsonRpcError,
    notification: bool,
}

impl InvalidEnvelope {
    /// Wraps an error owed to the peer.
    #[must_use]
    pub const fn new(error: JsonRpcError) -> Self {
        Self {
            error,
            notification: false,
        }
    }

    /// Wraps an error raised by a notification-shaped object.
    #[must_use]
    pub const fn from_notification(error: JsonRpcError) -> Self {
        Self {
            error,
            notification: true,
        }
    }

    /// The JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.error.code()
    }

    /// The underlying error envelope.
    #[must_use]
    pub const fn error(&self) -> &JsonRpcError {
        &self.error
    }

    /// Whether the offending object was shaped like a notification.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.notification
    }

    /// The error envelope, regardless of origin.
    #[must_use]
    pub fn into_error(self) -> JsonRpcError {
        self.error
    }

    /// The error envelope to send back, or `None` for a notification.
    #[must_use]
    pub fn into_reply(self) -> Option<JsonRpcError> {
        (!self.notification).then_some(self.error)
    }
}

impl From<JsonRpcError> for InvalidEnvelope {
    fn from(error: JsonRpcError) -> Self {
        Self::new(error)
    }
}

/// One decoded transport payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A single envelope.
    Single(JsonRpcMessage),
    /// A non-empty batch; each element was validated on its own.
    Batch(Vec<Result<JsonRpcMessage, InvalidEnvelope>>),
}

impl Inbound {
    /// Number of envelopes a reply to this payload will hold: one per request
    /// and one per invalid element that is not a notification.
    #[must_use]
    pub fn expected_replies(&self) -> usize {
        let answered = |item: &Result<JsonRpcMessage, InvalidEnvelope>| match item {
            Ok(message) => matches!(message, JsonRpcMessage::Request(_)),
            Err(invalid) => !invalid.is_notification(),
        };
        match self {
            Self::Single(message) => usize::from(matches!(message, JsonRpcMessage::Request(_))),
            Self::Batch(items) => items.iter().filter(|&item| answered(item)).count(),
        }
    }
}

/// What goes back to the peer after dispatching an [`Inbound`] payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Reply to a single request.
    Single(JsonRpcMessage),
    /// Replies to the requests of a batch, correlated by id.
    Batch(Vec<JsonRpcMessage>),
}

impl Reply {
    /// Flattens the reply into its envelopes.
    #[must_use]
    pub fn into_messages(self) -> Vec<JsonRpcMessage> {
        match self {
            Self::Single(msg) => vec![msg],
            Self::Batch(msgs) => msgs,
        }
    }
}

/// Parses a raw transport payload into one envelope or a batch.
///
/// # Errors
///
/// Returns a parse error (`-32700`) for malformed JSON, and an invalid request
/// error (`-32600`) for an empty batch or a single envelope with the wrong shape.
pub fn parse(raw: &str) -> Result<Inbound, InvalidEnvelope> {
    let value: Value = serde_json::from_str(raw).map_err(|_| JsonRpcError::parse_error())?;

    match value {
        Value::Array(items) if items.is_empty() => Err(JsonRpcError::invalid_request_because(
            None,
            "batch must not be empty",
        )
        .into()),
        Value::Array(items) => Ok(Inbound::Batch(
            items.into_iter().map(JsonRpcMessage::classify).collect(),
        )),
        other => JsonRpcMessage::classify(other).map(Inbound::Single),
    }
}

/// Parses a JSON string into a single message.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the JSON is malformed, is a batch, or is not a
/// valid message.
pub fn parse_message(json: &str) -> Result<JsonRpcMessage, JsonRpcError> {
    match parse(json).map_err(InvalidEnvelope::into_error)? {
        Inbound::Single(msg) => Ok(msg),
        Inbound::Batch(_) => Err(JsonRpcError::invalid_request_because(
            None,
            "expected a single message, got a batch",
        )),
    }
}
