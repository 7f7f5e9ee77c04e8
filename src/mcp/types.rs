//! Protocol payload records the engine itself reads or writes.
//!
//! Every record keeps a flattened `extra` map so members added by newer
//! protocol revisions are carried through unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::capabilities::Capabilities;
use crate::mcp::protocol::{
    methods, ExtraFields, JsonRpcNotification, ProgressToken, RequestId, Validate,
    ValidationError,
};

/// Maximum number of values in one completion result.
pub const MAX_COMPLETION_VALUES: usize = 100;

/// The `_meta` member of request and notification params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// Token the requester wants progress reported against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<ProgressToken>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Meta {
    /// Reads `_meta` out of a params object, ignoring anything malformed.
    #[must_use]
    pub fn from_params(params: Option<&Value>) -> Option<Self> {
        let meta = params?.get("_meta")?;
        serde_json::from_value(meta.clone()).ok()
    }
}

impl Validate for Meta {
    fn validate(&self) -> Result<(), ValidationError> {
        self.progress_token.as_ref().map_or(Ok(()), Validate::validate)
    }
}

/// Name and version of a client or server implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,

    /// Implementation version.
    #[serde(default)]
    pub version: String,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Implementation {
    /// Creates an implementation record.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            extra: ExtraFields::new(),
        }
    }
}

impl Validate for Implementation {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("implementation name cannot be empty"));
        }
        Ok(())
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,

    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,

    /// Client information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Validate for InitializeParams {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.protocol_version.is_empty() {
            return Err(ValidationError::new("protocolVersion cannot be empty"));
        }
        self.client_info.as_ref().map_or(Ok(()), Validate::validate)
    }
}

/// Result of the initialize request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version.
    pub protocol_version: String,

    /// Server capabilities.
    pub capabilities: Capabilities,

    /// Server information.
    pub server_info: Implementation,

    /// Usage hints for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Params of `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParams {
    /// Token from the originating request.
    pub progress_token: ProgressToken,

    /// Progress so far.
    pub progress: f64,

    /// Total amount of work, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// Human-readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ProgressNotificationParams {
    /// Creates progress params.
    #[must_use]
    pub fn new(progress_token: ProgressToken, progress: f64, total: Option<f64>) -> Self {
        Self {
            progress_token,
            progress,
            total,
            message: None,
            extra: ExtraFields::new(),
        }
    }

    /// Attaches a status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Builds the validated `notifications/progress` envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the params fail validation.
    pub fn into_notification(self) -> Result<JsonRpcNotification, ValidationError> {
        self.validate()?;
        let params = serde_json::to_value(&self).map_err(|e| ValidationError::new(e.to_string()))?;
        Ok(JsonRpcNotification::new(methods::PROGRESS, Some(params)))
    }
}

impl Validate for ProgressNotificationParams {
    fn validate(&self) -> Result<(), ValidationError> {
        self.progress_token.validate()?;
        if !self.progress.is_finite() {
            return Err(ValidationError::new("progress must be a finite number"));
        }
        if let Some(total) = self.total {
            if total < self.progress {
                return Err(ValidationError::new(
                    "Total progress cannot be less than current progress",
                ));
            }
        }
        Ok(())
    }
}

/// Params of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    /// The request the client no longer wants answered.
    pub request_id: RequestId,

    /// Why the request was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Validate for CancelledNotificationParams {
    fn validate(&self) -> Result<(), ValidationError> {
        self.request_id.validate()
    }
}

/// The `completion` member of a completion result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionObject {
    /// Suggested values, at most [`MAX_COMPLETION_VALUES`].
    pub values: Vec<String>,

    /// Total number of matches, which may exceed `values.len()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    /// Whether more values exist beyond `values`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Validate for CompletionObject {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.values.len() > MAX_COMPLETION_VALUES {
            return Err(ValidationError::new(format!(
                "Completion values cannot exceed {MAX_COMPLETION_VALUES} items"
            )));
        }
        Ok(())
    }
}

/// An argument a prompt template accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the argument must be supplied.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

impl Validate for PromptArgument {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("Prompt argument name cannot be empty"));
        }
        Ok(())
    }
}

/// Speaker of a message in a prompt or sampling exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side.
    User,
    /// The model side.
    Assistant,
}

/// Kind tag of a [`ResourceReference`].
pub const RESOURCE_REFERENCE_TYPE: &str = "ref/resource";

/// Points a completion request at a resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    /// Always [`RESOURCE_REFERENCE_TYPE`] for a valid reference.
    #[serde(rename = "type", default = "resource_reference_type")]
    pub kind: String,

    /// The referenced URI or URI template.
    #[serde(default)]
    pub uri: String,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

fn resource_reference_type() -> String {
    RESOURCE_REFERENCE_TYPE.to_string()
}

impl ResourceReference {
    /// Creates a reference to `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            kind: resource_reference_type(),
            uri: uri.into(),
            extra: ExtraFields::new(),
        }
    }
}

impl Validate for ResourceReference {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.uri.is_empty() {
            return Err(ValidationError::new("Resource reference URI cannot be empty"));
        }
        if self.kind != RESOURCE_REFERENCE_TYPE {
            return Err(ValidationError::new(format!(
                "Resource reference type must be \"{RESOURCE_REFERENCE_TYPE}\""
            )));
        }
        Ok(())
    }
}
