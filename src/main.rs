//! mcp-engine: Model Context Protocol server
//!
//! Serves the protocol engine over stdio or HTTP with a single demo method,
//! `echo`, that returns its params unchanged.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_engine::config;
use mcp_engine::mcp::server::McpServer;

/// Transport to serve on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// HTTP endpoint with sessions and SSE.
    Http,
}

/// Model Context Protocol server.
///
/// Speaks JSON-RPC 2.0 over stdio or HTTP, with handshake gating, sessions and
/// server-sent events.
#[derive(Parser, Debug)]
#[command(name = "mcp-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// Transport to serve on
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the HTTP transport (overrides the config file)
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. Logs go to stderr; stdout carries protocol traffic.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the mcp-engine server.
fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?args.transport,
        "Starting mcp-engine server"
    );
    if cfg.debug_enabled() {
        info!("Debug mode on: internal error detail is sent to clients");
    }

    let mut server = McpServer::new(cfg);
    server.register_fn("echo", |params, _ctx| Ok(params.unwrap_or(Value::Null)));

    let runtime = match args.transport {
        Transport::Stdio => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        Transport::Http => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build(),
    }
    .expect("Failed to create Tokio runtime");

    let result = match args.transport {
        Transport::Stdio => {
            info!("MCP server ready, waiting for client on stdin...");
            runtime.block_on(server.run_stdio())
        }
        Transport::Http => runtime.block_on(server.serve_http(args.bind)),
    };

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn cli_parses_transport_and_bind() {
        let args = Args::parse_from(["mcp-engine", "--transport", "http", "--bind", "0.0.0.0:9000", "-vv"]);
        assert_eq!(args.transport, Transport::Http);
        assert_eq!(args.bind.map(|b| b.port()), Some(9000));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn log_level_resolution() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "DEBUG"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(3, false, "warn"), Level::TRACE);
    }
}
