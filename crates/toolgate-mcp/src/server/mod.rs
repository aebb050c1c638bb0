//! MCP server implementation.
//!
//! Provides both stdio (local, tokenless) and HTTP transports over one
//! dispatcher, plus the OAuth endpoints the HTTP transport needs.
//!
//! ## Never-Failing Architecture
//!
//! The HTTP transport implements a robust "mailbox" pattern:
//! - Session-based message buffering with ring buffer
//! - Last-Event-ID support for reconnection recovery
//! - Broadcast channels for live event delivery
//! - Background cleanup of stale sessions

pub mod http;
pub mod rpc;
pub mod session;
pub mod stdio;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;

use crate::auth::datastore::Datastore;
use crate::auth::{MemoryDatastore, OAuthService, UserManager};
use crate::config::Config;
use crate::router::Dispatcher;
use crate::router::context::ContextRegistry;
use crate::tools;
use http::HttpState;
use rpc::RpcHandler;
use session::SessionManager;

/// MCP tool server with its embedded authorization core.
pub struct McpServer {
    config: Config,
    handler: RpcHandler,
    oauth: Arc<OAuthService>,
    users: UserManager,
    sessions: Arc<SessionManager>,
}

impl McpServer {
    /// Assemble a server over the given datastore.
    ///
    /// In local mode this resolves (creating on first run) the account
    /// every call binds to.
    ///
    /// # Errors
    ///
    /// Returns an error when the datastore is unreachable during local
    /// account bootstrap.
    pub async fn new(config: Config, store: Arc<dyn Datastore>) -> anyhow::Result<Self> {
        let oauth = Arc::new(OAuthService::new(Arc::clone(&store), config.clone()));
        let users = UserManager::new(store);

        let local_user = if config.auth_mode.is_local() {
            let user = users
                .ensure_user(&config.local_user)
                .await
                .with_context(|| format!("bootstrapping local user '{}'", config.local_user))?;
            tracing::info!(username = %user.username, "Local mode; all calls bind to this account");
            Some(user)
        } else {
            None
        };

        let contexts = Arc::new(ContextRegistry::new(config.context_idle_timeout));
        let dispatcher = Dispatcher::new(
            tools::register_all_tools(),
            Arc::clone(&oauth),
            users.clone(),
            contexts,
            local_user,
        );

        Ok(Self {
            config,
            handler: RpcHandler::new(Arc::new(dispatcher)),
            oauth,
            users,
            sessions: Arc::new(SessionManager::new()),
        })
    }

    /// Assemble a server over a fresh in-memory datastore.
    ///
    /// # Errors
    ///
    /// See [`McpServer::new`].
    pub async fn in_memory(config: Config) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryDatastore::new())).await
    }

    /// Build the HTTP router over this server's state.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        http::create_router(Arc::new(HttpState {
            handler: self.handler.clone(),
            sessions: Arc::clone(&self.sessions),
            oauth: Arc::clone(&self.oauth),
            users: self.users.clone(),
            config: self.config.clone(),
        }))
    }

    /// Run the server in stdio mode (for desktop MCP clients).
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, or when the server is
    /// configured for multiuser mode, which stdio cannot carry tokens
    /// for.
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        if !self.handler.dispatcher().is_local() {
            anyhow::bail!("stdio transport requires local mode");
        }

        tracing::info!("Starting MCP server in stdio mode");
        tracing::info!("Registered {} tools", self.handler.dispatcher().registrations().len());

        stdio::run_stdio(self.handler).await
    }

    /// Run the server in HTTP mode until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error on bind or serve failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        tracing::info!(
            "Starting MCP server in HTTP mode on {}:{}",
            self.config.host,
            self.config.port
        );
        tracing::info!("Registered {} tools", self.handler.dispatcher().registrations().len());

        // Background maintenance: expired-grant sweeps, idle-context
        // eviction, stale wire sessions.
        Arc::clone(&self.oauth).start_cleanup_task();
        Arc::clone(self.handler.dispatcher().contexts())
            .start_eviction_task(self.config.cleanup_interval);
        Arc::clone(&self.sessions).start_cleanup_task();

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| {
                format!("invalid listen address {}:{}", self.config.host, self.config.port)
            })?;
        let issuer = self.config.issuer();
        let router = self.router();

        tracing::info!("HTTP server listening on http://{}", addr);
        tracing::info!("Issuer URL: {}", issuer);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// The OAuth service backing this server.
    #[must_use]
    pub fn oauth(&self) -> &Arc<OAuthService> {
        &self.oauth
    }

    /// The user manager backing this server.
    #[must_use]
    pub fn users(&self) -> &UserManager {
        &self.users
    }

    /// The dispatcher serving tool calls.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.handler.dispatcher()
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("tools", &self.handler.dispatcher().registrations().len())
            .field("local", &self.handler.dispatcher().is_local())
            .finish()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
