//! MCP server: configuration plus dispatcher, served over stdio or HTTP.
//!
//! The server lifecycle:
//!
//! 1. **Initialisation**: capability negotiation and version agreement,
//!    handled by the [`Dispatcher`]
//! 2. **Operation**: registered methods are dispatched per session
//! 3. **Shutdown**: end of input, SIGINT or SIGTERM (Ctrl+C on Windows)
//!
//! Over stdio the process is one connection, so a single in-memory session
//! lives for the whole run. Over HTTP sessions live in the configured store.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::config::Config;
use crate::mcp::capabilities::Capabilities;
use crate::mcp::dispatcher::{Dispatcher, Handler, HandlerError, RequestContext};
use crate::mcp::http::{self, HttpOptions, HttpState};
use crate::mcp::protocol::JsonRpcError;
use crate::mcp::session::{Session, SessionId, SessionManager, SessionSettings};
use crate::mcp::store::{FileSessionStore, MemorySessionStore, SessionStore};
use crate::mcp::transport::StdioTransport;
use crate::mcp::types::Implementation;

/// The MCP server.
#[derive(Debug)]
pub struct McpServer {
    dispatcher: Dispatcher,
    config: Config,
}

impl McpServer {
    /// Creates a server from configuration, with no methods registered.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let server_info = Implementation::new(config.server.name.clone(), env!("CARGO_PKG_VERSION"));
        let mut dispatcher =
            Dispatcher::new(server_info).expose_internal_errors(config.debug_enabled());
        if let Some(instructions) = &config.server.instructions {
            dispatcher = dispatcher.with_instructions(instructions.clone());
        }
        Self { dispatcher, config }
    }

    /// Sets the capabilities advertised during the handshake.
    #[must_use]
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        Self {
            dispatcher: self.dispatcher.with_capabilities(capabilities),
            config: self.config,
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The method dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers a handler. See [`Dispatcher::register_handler`].
    pub fn register_handler(
        &mut self,
        method: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> bool {
        self.dispatcher.register_handler(method, handler)
    }

    /// Registers a closure. See [`Dispatcher::register_fn`].
    pub fn register_fn<F>(&mut self, method: impl Into<String>, f: F) -> bool
    where
        F: Fn(Option<Value>, &mut RequestContext<'_>) -> Result<Value, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.dispatcher.register_fn(method, f)
    }

    /// Serves the process's stdin/stdout until EOF or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run_stdio(&self) -> io::Result<()> {
        let mut transport = StdioTransport::new();
        self.run_transport(&mut transport, shutdown_signal()).await
    }

    /// Serves one line-framed connection until EOF or `shutdown` resolves.
    ///
    /// Notifications queued by a handler are written before the reply to the
    /// request that queued them.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run_transport<R, W, S>(
        &self,
        transport: &mut StdioTransport<R, W>,
        shutdown: S,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut session = Session::new(SessionId::generate(), self.config.http.max_queue_size);
        tracing::debug!(session_id = %session.id(), "stdio session started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping stdio transport");
                    return Ok(());
                }

                frame = transport.read_frame() => {
                    let Some(frame) = frame? else {
                        tracing::info!("Input closed, stopping stdio transport");
                        return Ok(());
                    };
                    let Ok(line) = String::from_utf8(frame) else {
                        tracing::warn!("Received a line that is not UTF-8");
                        transport.write_message(&JsonRpcError::parse_error().into()).await?;
                        continue;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let reply = self.dispatcher.handle_raw(&line, &mut session);
                    for message in session.drain(usize::MAX) {
                        transport.write_message(&message).await?;
                    }
                    if let Some(reply) = reply {
                        transport.write_reply(&reply).await?;
                    }
                }
            }
        }
    }

    /// Builds the HTTP handler state, opening the configured session store.
    ///
    /// # Errors
    ///
    /// Returns an error if the session directory cannot be opened.
    pub async fn into_http_state(self) -> io::Result<HttpState> {
        let http = self.config.http.effective();
        let store: Arc<dyn SessionStore> = match &http.session_dir {
            Some(dir) => Arc::new(
                FileSessionStore::open(dir.clone())
                    .await
                    .map_err(io::Error::other)?,
            ),
            None => Arc::new(MemorySessionStore::new()),
        };
        let sessions = SessionManager::new(
            store,
            SessionSettings {
                timeout: http.session_timeout(),
                max_queue_size: http.max_queue_size,
            },
        );
        Ok(HttpState::new(
            Arc::new(self.dispatcher),
            sessions,
            HttpOptions::from_config(&http),
        ))
    }

    /// Serves HTTP until a shutdown signal. `bind` overrides the configured
    /// address.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, the address cannot be
    /// bound, or serving fails.
    pub async fn serve_http(self, bind: Option<SocketAddr>) -> io::Result<()> {
        let bind = bind.unwrap_or(self.config.http.bind);
        let state = self.into_http_state().await?;
        http::serve(state, bind, shutdown_signal()).await
    }
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::warn!("Failed to install signal handlers, shutdown only on EOF");
        return std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Resolves on Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("Failed to install Ctrl+C handler, shutdown only on EOF");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
}
