//! Toolgate MCP Server - Entry Point
//!
//! Provides both stdio (local) and HTTP transports.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use toolgate_mcp::config::{AuthMode, Config};
use toolgate_mcp::server::McpServer;

#[derive(Parser, Debug)]
#[command(name = "toolgate-mcp")]
#[command(about = "Multi-user MCP tool server with an embedded OAuth 2.1 authorization core")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// Authentication mode: local (single user, no tokens) or multiuser
    #[arg(long, default_value = "local", env = "TOOLGATE_MODE")]
    mode: Mode,

    /// Bind address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1", env = "TOOLGATE_HOST")]
    host: String,

    /// HTTP server port (only used with --transport http)
    #[arg(long, default_value = "8765", env = "TOOLGATE_PORT")]
    port: u16,

    /// Externally visible base URL (e.g., https://tools.example.com behind a proxy)
    #[arg(long, env = "TOOLGATE_PUBLIC_URL")]
    public_url: Option<String>,

    /// Username bound to every call in local mode
    #[arg(long, default_value = "local", env = "TOOLGATE_LOCAL_USER")]
    local_user: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output (for desktop MCP clients)
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events
    Http,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Mode {
    /// Single implicit user, no token checks
    #[default]
    Local,
    /// OAuth-authenticated users with isolated contexts
    Multiuser,
}

impl From<Mode> for AuthMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Local => Self::Local,
            Mode::Multiuser => Self::Multiuser,
        }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr: stdout is the protocol channel in stdio mode.
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        "Starting Toolgate MCP server"
    );

    let mut mode = AuthMode::from(cli.mode);
    if matches!(cli.transport, Transport::Stdio) && !mode.is_local() {
        // Stdio has no way to carry bearer tokens.
        tracing::warn!("Stdio transport cannot authenticate callers; forcing local mode");
        mode = AuthMode::Local;
    }

    let mut config = Config::new(mode);
    config.host = cli.host;
    config.port = cli.port;
    config.public_url = cli.public_url;
    config.local_user = cli.local_user;

    let server = McpServer::in_memory(config).await?;

    match cli.transport {
        Transport::Stdio => {
            tracing::info!("Running in stdio mode");
            server.run_stdio().await?;
        }
        Transport::Http => {
            tracing::info!(port = cli.port, "Running in HTTP mode");
            server.run_http().await?;
        }
    }

    Ok(())
}
