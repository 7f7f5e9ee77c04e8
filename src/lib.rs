//! mcp-engine: Model Context Protocol engine
//!
//! This library implements the protocol core an MCP server needs, leaving the
//! business methods (tools, prompts, resources) to the application.
//!
//! # Architecture
//!
//! - **Message model**: JSON-RPC 2.0 envelopes and batches with lossless
//!   unknown fields
//! - **Handshake**: a per-session state machine that gates traffic until
//!   `initialize` / `notifications/initialized` complete
//! - **Dispatcher**: method registry that turns handler outcomes into
//!   protocol-correct replies
//! - **Sessions**: bounded outbound queues, expiry and locked access over a
//!   pluggable store, so a request/response transport behaves like a
//!   connection
//! - **Transports**: newline-delimited stdio and HTTP (POST, GET with SSE
//!   or polling, DELETE)
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation

pub mod config;
pub mod error;
pub mod mcp;
