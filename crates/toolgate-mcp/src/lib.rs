//! Toolgate MCP Server
//!
//! A multi-user Model Context Protocol (MCP) tool server with an
//! embedded OAuth 2.1 authorization core. Clients authenticate with
//! the authorization-code grant (PKCE required, S256 only), and every
//! validated call runs against the calling user's isolated context.
//!
//! # Features
//!
//! - **Two transports**: stdio for desktop clients, streamable HTTP
//!   with SSE replay for remote ones
//! - **OAuth 2.1**: dynamic client registration, refresh rotation with
//!   family revocation, RFC 9728/8414 discovery
//! - **Per-user isolation**: tool state lives in per-user contexts that
//!   no other user's calls can reach
//! - **Fail-closed**: authorization codes burn on first presentation,
//!   whatever happens afterwards
//!
//! # Example
//!
//! ```no_run
//! use toolgate_mcp::{config::Config, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = McpServer::in_memory(config).await?;
//!     server.run_http().await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod router;
pub mod server;
pub mod tools;

pub use auth::{Datastore, MemoryDatastore, OAuthService, UserManager};
pub use config::Config;
pub use error::{AuthError, DispatchError, StoreError, ToolError};
pub use server::McpServer;
