//! Error types for the toolgate MCP server.
//!
//! Uses `thiserror` for structured error handling, one enum per layer:
//! datastore, OAuth/authentication, tool logic, and the dispatch boundary.

/// Errors from the auth datastore layer.
///
/// Storage failures are deliberately separate from grant rejections: a
/// store outage must never be reported as "code already used".
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Backing store unreachable or failed mid-operation. Transient;
    /// callers may retry.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// Uniqueness constraint violated (client id, username, token value).
    #[error("duplicate {entity}")]
    Conflict {
        /// Entity kind whose unique key collided.
        entity: &'static str,
    },
}

impl StoreError {
    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a conflict error for the given entity kind.
    #[must_use]
    pub const fn conflict(entity: &'static str) -> Self {
        Self::Conflict { entity }
    }

    /// Returns true if the operation may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from the OAuth state machine and credential verification.
///
/// Display messages are generic on purpose: grant and authentication
/// failures must not reveal which check rejected the request. The precise
/// cause is logged at the rejection site, never echoed to the caller.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Client unknown or deactivated.
    #[error("invalid client")]
    InvalidClient,

    /// Redirect URI not registered for the client (exact match only).
    #[error("invalid redirect URI")]
    InvalidRedirectUri,

    /// Authorization code or refresh token absent, expired, spent,
    /// revoked, or bound to different parameters.
    #[error("invalid grant")]
    InvalidGrant,

    /// PKCE challenge missing, method unsupported, or verifier mismatch.
    #[error("PKCE verification failed")]
    InvalidPkce,

    /// Bearer access token absent, unknown, or expired.
    #[error("invalid or expired access token")]
    InvalidToken,

    /// Username/password combination rejected. Identical for unknown
    /// users and wrong passwords.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Username already registered (signup feedback; login paths never
    /// surface this).
    #[error("username already taken")]
    UsernameTaken,

    /// Signup input rejected before hashing (empty username, short
    /// password).
    #[error("invalid registration: {0}")]
    InvalidRegistration(&'static str),

    /// Authorization request asked for a response type other than `code`.
    #[error("unsupported response type")]
    UnsupportedResponseType,

    /// Underlying datastore failure. Kept distinct so a transient outage
    /// is retryable instead of looking like a spent grant.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// OAuth wire error code for token/authorize endpoint responses
    /// (RFC 6749 §5.2). Grant-family rejections share `invalid_grant`.
    #[must_use]
    pub const fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidClient => "invalid_client",
            Self::InvalidRedirectUri | Self::UsernameTaken | Self::InvalidRegistration(_) => {
                "invalid_request"
            }
            Self::InvalidGrant | Self::InvalidPkce => "invalid_grant",
            Self::InvalidToken => "invalid_token",
            Self::AuthenticationFailed => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::Store(_) => "temporarily_unavailable",
        }
    }

    /// Returns true if the failure is a transient store outage rather
    /// than a definitive rejection.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Errors from tool execution.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal tool logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert to a user-facing message for the RPC response.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

/// Errors surfaced at the dispatcher boundary.
///
/// Every fault inside a tool call is converted into one of these before
/// it reaches a transport; nothing propagates as a protocol fault.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    /// No tool registered under this name. Distinct from any
    /// authentication failure.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// A gated tool was called without a bearer token.
    #[error("authentication required")]
    AuthRequired,

    /// Bearer token validation rejected the call.
    #[error(transparent)]
    Auth(AuthError),

    /// The datastore was unreachable while validating the call.
    #[error("service temporarily unavailable")]
    Unavailable(#[from] StoreError),

    /// Tool logic returned an error or panicked.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        /// Tool that failed.
        tool: String,
        /// User-facing failure message.
        message: String,
    },
}

impl DispatchError {
    /// Wrap a tool failure.
    #[must_use]
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed { tool: tool.into(), message: message.into() }
    }

    /// Returns true if this is an authentication-side rejection (as
    /// opposed to unknown tool, outage, or tool fault).
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::Auth(_))
    }
}

impl From<AuthError> for DispatchError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(e) => Self::Unavailable(e),
            other => Self::Auth(other),
        }
    }
}

/// Result type alias for datastore operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for OAuth/credential operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_transient() {
        assert!(StoreError::unavailable("connection reset").is_transient());
        assert!(!StoreError::conflict("user").is_transient());
    }

    #[test]
    fn test_auth_error_oauth_codes() {
        assert_eq!(AuthError::InvalidGrant.oauth_code(), "invalid_grant");
        assert_eq!(AuthError::InvalidPkce.oauth_code(), "invalid_grant");
        assert_eq!(AuthError::InvalidClient.oauth_code(), "invalid_client");
        assert_eq!(
            AuthError::Store(StoreError::unavailable("down")).oauth_code(),
            "temporarily_unavailable"
        );
    }

    #[test]
    fn test_store_outage_stays_distinct_from_invalid_grant() {
        let err = AuthError::from(StoreError::unavailable("down"));
        assert!(err.is_transient());
        assert!(!matches!(err, AuthError::InvalidGrant));
    }

    #[test]
    fn test_generic_messages_leak_nothing() {
        assert!(!AuthError::InvalidGrant.to_string().contains("used"));
        assert!(!AuthError::InvalidGrant.to_string().contains("expired"));
        assert_eq!(AuthError::AuthenticationFailed.to_string(), "authentication failed");
    }

    #[test]
    fn test_dispatch_error_split() {
        let store: DispatchError = AuthError::Store(StoreError::unavailable("down")).into();
        assert!(matches!(store, DispatchError::Unavailable(_)));
        assert!(!store.is_auth_failure());

        let token: DispatchError = AuthError::InvalidToken.into();
        assert!(token.is_auth_failure());
    }

    #[test]
    fn test_tool_error_user_message() {
        let err = ToolError::validation("key", "cannot be empty");
        assert!(err.to_user_message().contains("key"));
        assert!(err.to_user_message().contains("cannot be empty"));
    }
}
