//! Embedded OAuth 2.1 authorization server.
//!
//! Self-contained authorization core for the MCP transports: user
//! accounts with argon2id passwords, the authorization-code grant with
//! mandatory PKCE, and rotating refresh tokens with family revocation.
//!
//! ## Supported Standards
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256 only)
//! - RFC 6749: Authorization Code Grant

pub mod datastore;
pub mod memory;
pub mod oauth;
pub mod pages;
pub mod password;
pub mod pkce;
pub mod redirect;
pub mod types;
pub mod users;

pub use datastore::Datastore;
pub use memory::MemoryDatastore;
pub use oauth::OAuthService;
pub use users::UserManager;
