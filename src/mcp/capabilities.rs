//! Capability records exchanged during the initialize handshake.
//!
//! The engine does not intersect capability sets. It stores what each peer
//! declared and offers read-only lookups so handlers and transports can adapt.
//! Capability names it does not recognise are kept verbatim, since an
//! intermediary may forward capabilities it does not understand.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::protocol::ExtraFields;
use crate::mcp::types::{Implementation, InitializeParams};

/// Declared feature set of one peer: capability name to descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(IndexMap<String, Value>);

impl Capabilities {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, descriptor: impl Into<Value>) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Adds or replaces a capability, returning the previous descriptor.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), descriptor.into())
    }

    /// Returns the raw descriptor for a capability.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Whether the peer declared a capability (present and not `null`/`false`).
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        !matches!(self.0.get(name), None | Some(Value::Null | Value::Bool(false)))
    }

    /// Reads a boolean sub-flag, e.g. `flag("tools", "listChanged")`.
    #[must_use]
    pub fn flag(&self, name: &str, flag: &str) -> bool {
        self.0
            .get(name)
            .and_then(|d| d.get(flag))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Decodes a capability into the common descriptor shape.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<CapabilityDescriptor> {
        serde_json::from_value(self.0.get(name)?.clone()).ok()
    }

    /// Iterates over declared capability names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of declared capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no capability was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The common shape of a capability descriptor, e.g. `{"listChanged": true}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Whether the peer emits list-changed notifications for this feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,

    /// Whether the peer supports subscriptions for this feature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,

    /// Unrecognised members.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl CapabilityDescriptor {
    /// A descriptor with only `listChanged` set.
    #[must_use]
    pub fn list_changed(list_changed: bool) -> Self {
        Self {
            list_changed: Some(list_changed),
            ..Self::default()
        }
    }
}

impl From<CapabilityDescriptor> for Value {
    fn from(descriptor: CapabilityDescriptor) -> Self {
        let mut map = Map::new();
        if let Some(list_changed) = descriptor.list_changed {
            map.insert("listChanged".to_string(), Self::Bool(list_changed));
        }
        if let Some(subscribe) = descriptor.subscribe {
            map.insert("subscribe".to_string(), Self::Bool(subscribe));
        }
        map.extend(descriptor.extra);
        Self::Object(map)
    }
}

/// Both sides of a completed (or in-progress) capability exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_info: Option<Implementation>,
    #[serde(default)]
    client: Capabilities,
    #[serde(default)]
    server: Capabilities,
}

impl NegotiatedCapabilities {
    /// Records the outcome of an initialize request.
    pub fn record(
        &mut self,
        params: &InitializeParams,
        server: &Capabilities,
        protocol_version: &str,
    ) {
        self.protocol_version = Some(protocol_version.to_string());
        self.client_info.clone_from(&params.client_info);
        self.client = params.capabilities.clone();
        self.server = server.clone();
    }

    /// Capabilities the client declared.
    #[must_use]
    pub const fn client(&self) -> &Capabilities {
        &self.client
    }

    /// Capabilities the server declared.
    #[must_use]
    pub const fn server(&self) -> &Capabilities {
        &self.server
    }

    /// The negotiated protocol version, once initialize has been handled.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// The client's self-description, if it sent one.
    #[must_use]
    pub const fn client_info(&self) -> Option<&Implementation> {
        self.client_info.as_ref()
    }
}
