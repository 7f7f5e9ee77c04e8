//! Model Context Protocol (MCP) engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          McpServer                           │
//! │                                                              │
//! │   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐    │
//! │   │  Transport  │────▶│ Dispatcher  │────▶│  Handlers   │    │
//! │   │ stdio / HTTP│     │ (state gate)│     │ (registered)│    │
//! │   └─────────────┘     └─────────────┘     └─────────────┘    │
//! │          │                   │                               │
//! │          ▼                   ▼                               │
//! │   ┌─────────────┐     ┌─────────────┐                        │
//! │   │   Session   │────▶│SessionStore │                        │
//! │   │   Manager   │     │ memory/file │                        │
//! │   └─────────────┘     └─────────────┘                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! Speaks MCP 2025-06-18 and accepts 2025-03-26 and 2024-11-05.

pub mod capabilities;
pub mod dispatcher;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;

pub use capabilities::{Capabilities, NegotiatedCapabilities};
pub use dispatcher::{parse_params, Dispatcher, Handler, HandlerError, RequestContext};
pub use protocol::{
    InvalidEnvelope, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Reply, RequestId, LATEST_PROTOCOL_VERSION,
};
pub use server::McpServer;
pub use session::{Session, SessionId, SessionManager, SessionSettings};
pub use state::InitializationState;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::StdioTransport;
