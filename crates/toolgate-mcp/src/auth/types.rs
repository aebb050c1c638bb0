//! Core records held by the auth datastore.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A registered OAuth client.
#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub client_name: Option<String>,
    /// Registered redirect URIs. Matching is exact string equality.
    pub redirect_uris: Vec<String>,
    /// Deactivated clients fail every authorization and grant check.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A registered user account.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: String,
    pub username: String,
    /// Argon2id hash in PHC string format. Never the plaintext.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// An authorization code issued after login approval.
///
/// Keyed by the code value in the store. Single use: `used` flips
/// exactly once, inside the store's critical section.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl AuthorizationCode {
    /// Check if the code has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// An access token bound to a user, client, and scope.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A refresh token. Rotation marks the old record revoked instead of
/// deleting it; presenting a revoked token is the theft signal that
/// revokes the whole family.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    /// Access token issued alongside this refresh token.
    pub access_token: String,
    /// All tokens descending from one authorization grant share this id.
    pub family_id: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Token pair handed to a client after redemption or refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub scope: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Claims extracted from a validated access token.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
}

/// Raw authorization request as received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// A validated authorization request, ready for login and code issuance.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub state: Option<String>,
}
