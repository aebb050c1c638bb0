//! Storage contract for auth state.
//!
//! Implementations must make the compound operations atomic: under
//! concurrent calls, `consume_auth_code` yields `Consumed` exactly once
//! per code, `rotate_refresh_token` yields `Rotated` exactly once per
//! live token, and `insert_token_grant` commits both halves or neither.
//!
//! Absent records are `Ok`-shaped outcomes; `Err` is reserved for the
//! store itself failing.

use async_trait::async_trait;

use crate::error::StoreResult;

use super::types::{AccessToken, AuthorizationCode, Client, RefreshToken, TokenGrant, User};

/// Outcome of consuming an authorization code.
#[derive(Debug)]
pub enum CodeConsumption {
    /// Code was live; it is now marked used and returned.
    Consumed(AuthorizationCode),
    /// Code exists but was already spent. Replay signal.
    AlreadyUsed,
    /// Code exists but its lifetime has passed.
    Expired,
    /// No such code.
    Missing,
}

/// Outcome of a refresh token rotation.
#[derive(Debug)]
pub enum RotationOutcome {
    /// Token was live: it is now revoked, its access token removed, and
    /// the replacement pair committed.
    Rotated(TokenGrant),
    /// Token exists but was already rotated or revoked. Reuse signal;
    /// the caller revokes the family.
    Reused {
        family_id: String,
    },
    /// Token exists but its lifetime has passed.
    Expired,
    /// Token is live but bound to a different client. Nothing changed.
    ClientMismatch,
    /// No such token.
    Missing,
}

/// Records removed by one cleanup sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepCounts {
    pub auth_codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
}

impl SweepCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.auth_codes + self.access_tokens + self.refresh_tokens
    }
}

/// Auth state storage.
#[async_trait]
pub trait Datastore: Send + Sync {
    // ─── Clients ─────────────────────────────────────────────────────────────

    /// Insert a client. Fails with `Conflict` if the id is taken.
    async fn put_client(&self, client: Client) -> StoreResult<()>;

    /// Look up a client by id.
    async fn get_client(&self, client_id: &str) -> StoreResult<Option<Client>>;

    /// Replace a client's redirect URI set. Returns false if unknown.
    async fn update_client_redirects(
        &self,
        client_id: &str,
        redirect_uris: Vec<String>,
    ) -> StoreResult<bool>;

    /// Clear a client's active flag. Returns false if unknown.
    async fn deactivate_client(&self, client_id: &str) -> StoreResult<bool>;

    // ─── Users ───────────────────────────────────────────────────────────────

    /// Insert a user. Fails with `Conflict` if the username is taken.
    async fn create_user(&self, user: User) -> StoreResult<()>;

    /// Look up a user by id.
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Look up a user by username.
    async fn get_user_by_name(&self, username: &str) -> StoreResult<Option<User>>;

    // ─── Authorization codes ─────────────────────────────────────────────────

    /// Insert an authorization code record under its code value.
    async fn put_auth_code(&self, code: String, record: AuthorizationCode) -> StoreResult<()>;

    /// Atomically check a code and mark it used. This is the
    /// linearization point of redemption: exactly one caller per code
    /// observes `Consumed`.
    async fn consume_auth_code(&self, code: &str) -> StoreResult<CodeConsumption>;

    // ─── Tokens ──────────────────────────────────────────────────────────────

    /// Commit an access/refresh pair. Both rows become visible together.
    async fn insert_token_grant(
        &self,
        access_token: String,
        access: AccessToken,
        refresh_token: String,
        refresh: RefreshToken,
    ) -> StoreResult<()>;

    /// Look up an access token. Expiry is the caller's concern.
    async fn get_access_token(&self, token: &str) -> StoreResult<Option<AccessToken>>;

    /// Atomically rotate a refresh token: if `token` is live and bound
    /// to `client_id`, mark it revoked, drop its paired access token,
    /// and commit a replacement pair under the supplied values, copying
    /// user, client, scope, and family bindings from the old record.
    /// Reuse of a revoked token is reported before the binding check.
    async fn rotate_refresh_token(
        &self,
        token: &str,
        client_id: Option<&str>,
        next_access_token: String,
        next_refresh_token: String,
        access_ttl: chrono::Duration,
        refresh_ttl: chrono::Duration,
    ) -> StoreResult<RotationOutcome>;

    /// Revoke every refresh token in a family and remove their paired
    /// access tokens. Returns the number of refresh tokens touched.
    async fn revoke_family(&self, family_id: &str) -> StoreResult<usize>;

    /// Revoke all grants belonging to a user (logout). Returns the
    /// number of tokens touched.
    async fn revoke_user_grants(&self, user_id: &str) -> StoreResult<usize>;

    /// Drop expired codes and tokens. Revoked refresh tokens are kept
    /// until expiry so reuse detection has a window to fire.
    async fn purge_expired(&self) -> StoreResult<SweepCounts>;
}
