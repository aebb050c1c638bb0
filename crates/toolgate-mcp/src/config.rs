//! Configuration for the toolgate MCP server.

use std::time::Duration;

use anyhow::Context as _;

/// OAuth lifetime and scope constants.
pub mod oauth {
    use std::time::Duration;

    /// Authorization code lifetime. Codes are single use and short lived.
    pub const AUTH_CODE_TTL: Duration = Duration::from_secs(120);

    /// Access token lifetime.
    pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

    /// Refresh token lifetime (30 days).
    pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Interval between expired-grant sweeps.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

    /// Scope granted to every token pair. Requested scopes are collapsed
    /// onto this single scope.
    pub const DEFAULT_SCOPE: &str = "tools";
}

/// Server defaults.
pub mod server {
    use std::time::Duration;

    /// Default bind address for the HTTP transport.
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default port for the HTTP transport.
    pub const DEFAULT_PORT: u16 = 8765;

    /// Username bound to every call when running in local mode.
    pub const DEFAULT_LOCAL_USER: &str = "local";

    /// Idle time after which a per-user context is evicted.
    pub const CONTEXT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
}

/// How callers are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Single-user mode: no tokens, every call runs as the local user.
    Local,
    /// Multi-user mode: gated tools require a valid bearer token.
    Multiuser,
}

impl AuthMode {
    /// Returns true when running without token checks.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Authentication mode.
    pub auth_mode: AuthMode,

    /// Bind address for the HTTP transport.
    pub host: String,

    /// Port for the HTTP transport.
    pub port: u16,

    /// Externally visible base URL (issuer). Defaults to the bind
    /// address when unset; set this behind a reverse proxy.
    pub public_url: Option<String>,

    /// Username bound to every call in local mode.
    pub local_user: String,

    /// Authorization code lifetime.
    pub auth_code_ttl: Duration,

    /// Access token lifetime.
    pub access_token_ttl: Duration,

    /// Refresh token lifetime.
    pub refresh_token_ttl: Duration,

    /// Interval between expired-grant sweeps.
    pub cleanup_interval: Duration,

    /// Idle time after which a per-user context is evicted.
    pub context_idle_timeout: Duration,
}

impl Config {
    /// Create a new configuration for the given auth mode with default
    /// lifetimes.
    #[must_use]
    pub fn new(auth_mode: AuthMode) -> Self {
        Self {
            auth_mode,
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            public_url: None,
            local_user: server::DEFAULT_LOCAL_USER.to_string(),
            auth_code_ttl: oauth::AUTH_CODE_TTL,
            access_token_ttl: oauth::ACCESS_TOKEN_TTL,
            refresh_token_ttl: oauth::REFRESH_TOKEN_TTL,
            cleanup_interval: oauth::CLEANUP_INTERVAL,
            context_idle_timeout: server::CONTEXT_IDLE_TIMEOUT,
        }
    }

    /// Create a test configuration with fast cleanup cycles.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            auth_mode: AuthMode::Multiuser,
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: Some("http://testserver".to_string()),
            local_user: server::DEFAULT_LOCAL_USER.to_string(),
            auth_code_ttl: oauth::AUTH_CODE_TTL,
            access_token_ttl: oauth::ACCESS_TOKEN_TTL,
            refresh_token_ttl: oauth::REFRESH_TOKEN_TTL,
            cleanup_interval: Duration::from_millis(10),
            context_idle_timeout: Duration::from_millis(50),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Recognized variables: `TOOLGATE_MODE` (`local` or `multiuser`),
    /// `TOOLGATE_HOST`, `TOOLGATE_PORT`, `TOOLGATE_PUBLIC_URL`,
    /// `TOOLGATE_LOCAL_USER`.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let auth_mode = match std::env::var("TOOLGATE_MODE").ok().as_deref() {
            None | Some("multiuser") => AuthMode::Multiuser,
            Some("local") => AuthMode::Local,
            Some(other) => {
                anyhow::bail!("invalid TOOLGATE_MODE '{other}' (expected 'local' or 'multiuser')")
            }
        };

        let mut config = Self::new(auth_mode);
        if let Ok(host) = std::env::var("TOOLGATE_HOST") {
            config.host = host;
        }
        if let Ok(raw) = std::env::var("TOOLGATE_PORT") {
            config.port = raw.parse().with_context(|| format!("invalid TOOLGATE_PORT '{raw}'"))?;
        }
        if let Ok(url) = std::env::var("TOOLGATE_PUBLIC_URL") {
            config.public_url = Some(url);
        }
        if let Ok(user) = std::env::var("TOOLGATE_LOCAL_USER") {
            config.local_user = user;
        }
        Ok(config)
    }

    /// Externally visible base URL, without a trailing slash.
    #[must_use]
    pub fn issuer(&self) -> String {
        self.public_url.as_ref().map_or_else(
            || format!("http://{}:{}", self.host, self.port),
            |url| url.trim_end_matches('/').to_string(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(AuthMode::Multiuser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.auth_mode, AuthMode::Multiuser);
        assert_eq!(config.port, server::DEFAULT_PORT);
        assert_eq!(config.auth_code_ttl, oauth::AUTH_CODE_TTL);
    }

    #[test]
    fn test_issuer_falls_back_to_bind_address() {
        let config = Config::new(AuthMode::Local);
        assert_eq!(config.issuer(), format!("http://127.0.0.1:{}", server::DEFAULT_PORT));
    }

    #[test]
    fn test_issuer_strips_trailing_slash() {
        let mut config = Config::default();
        config.public_url = Some("https://gate.example.com/".to_string());
        assert_eq!(config.issuer(), "https://gate.example.com");
    }

    #[test]
    fn test_local_mode() {
        assert!(AuthMode::Local.is_local());
        assert!(!AuthMode::Multiuser.is_local());
    }
}
