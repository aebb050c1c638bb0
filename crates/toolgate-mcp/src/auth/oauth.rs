//! The OAuth 2.1 authorization core.
//!
//! Drives the authorization-code grant with mandatory PKCE and rotating
//! refresh tokens. Every rejection surfaces as a generic [`AuthError`];
//! the precise cause is logged here and nowhere else.

use std::sync::Arc;

use chrono::Utc;

use crate::config::{Config, oauth as oauth_config};
use crate::error::{AuthError, AuthResult};

use super::datastore::{CodeConsumption, Datastore, RotationOutcome};
use super::pkce;
use super::redirect;
use super::types::{
    AccessClaims, AccessToken, AuthorizationCode, AuthorizationRequest, AuthorizeRequest, Client,
    RefreshToken, TokenGrant,
};

/// Authorization-code state machine over a [`Datastore`].
pub struct OAuthService {
    store: Arc<dyn Datastore>,
    config: Config,
}

impl OAuthService {
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Register a client (RFC 7591 dynamic registration).
    ///
    /// # Errors
    ///
    /// `InvalidRedirectUri` if the URI list is empty or malformed,
    /// `Store` on datastore failure.
    pub async fn register_client(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> AuthResult<Client> {
        if redirect_uris.is_empty()
            || !redirect_uris.iter().all(|uri| redirect::is_valid_registration(uri))
        {
            return Err(AuthError::InvalidRedirectUri);
        }

        let client = Client {
            client_id: uuid::Uuid::new_v4().simple().to_string(),
            client_name,
            redirect_uris,
            active: true,
            created_at: Utc::now(),
        };
        self.store.put_client(client.clone()).await?;

        tracing::info!(client_id = %client.client_id, "Registered OAuth client");
        Ok(client)
    }

    /// Look up a client by id.
    ///
    /// # Errors
    ///
    /// `Store` on datastore failure.
    pub async fn get_client(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.store.get_client(client_id).await?)
    }

    /// Replace a client's registered redirect URIs. An administrative
    /// operation; clients are otherwise immutable.
    ///
    /// # Errors
    ///
    /// `InvalidRedirectUri` if the new list is empty or malformed,
    /// `InvalidClient` if unknown, `Store` on datastore failure.
    pub async fn update_redirect_uris(
        &self,
        client_id: &str,
        redirect_uris: Vec<String>,
    ) -> AuthResult<()> {
        if redirect_uris.is_empty()
            || !redirect_uris.iter().all(|uri| redirect::is_valid_registration(uri))
        {
            return Err(AuthError::InvalidRedirectUri);
        }
        if self.store.update_client_redirects(client_id, redirect_uris).await? {
            tracing::info!(client_id, "Updated client redirect URIs");
            Ok(())
        } else {
            Err(AuthError::InvalidClient)
        }
    }

    /// Deactivate a client. Its grants fail from the next check on.
    ///
    /// # Errors
    ///
    /// `InvalidClient` if unknown, `Store` on datastore failure.
    pub async fn deactivate_client(&self, client_id: &str) -> AuthResult<()> {
        if self.store.deactivate_client(client_id).await? {
            tracing::info!(client_id, "Deactivated OAuth client");
            Ok(())
        } else {
            Err(AuthError::InvalidClient)
        }
    }

    /// Validate an authorization request before showing any login UI.
    ///
    /// Checks, in order: client exists and is active, redirect URI is
    /// registered (exact match), `response_type` is `code`, and a PKCE
    /// challenge with method S256 is present. An absent method is
    /// rejected rather than defaulted, since RFC 7636's default is the
    /// unsupported `plain`.
    ///
    /// # Errors
    ///
    /// One of `InvalidClient`, `InvalidRedirectUri`,
    /// `UnsupportedResponseType`, `InvalidPkce`, or `Store`.
    pub async fn begin_authorization(
        &self,
        req: &AuthorizeRequest,
    ) -> AuthResult<AuthorizationRequest> {
        let Some(client_id) = req.client_id.as_deref() else {
            return Err(AuthError::InvalidClient);
        };
        let Some(client) = self.store.get_client(client_id).await? else {
            tracing::debug!(client_id, "Authorization for unknown client");
            return Err(AuthError::InvalidClient);
        };
        if !client.active {
            tracing::debug!(client_id, "Authorization for deactivated client");
            return Err(AuthError::InvalidClient);
        }

        let Some(redirect_uri) = req.redirect_uri.as_deref() else {
            return Err(AuthError::InvalidRedirectUri);
        };
        if !redirect::is_registered(&client.redirect_uris, redirect_uri) {
            tracing::debug!(client_id, redirect_uri, "Redirect URI not registered");
            return Err(AuthError::InvalidRedirectUri);
        }

        if req.response_type.as_deref() != Some("code") {
            return Err(AuthError::UnsupportedResponseType);
        }

        let challenge = req.code_challenge.as_deref().unwrap_or_default();
        if challenge.is_empty() {
            return Err(AuthError::InvalidPkce);
        }
        if !pkce::method_supported(req.code_challenge_method.as_deref().unwrap_or("plain")) {
            tracing::debug!(client_id, "Unsupported code challenge method");
            return Err(AuthError::InvalidPkce);
        }

        Ok(AuthorizationRequest {
            client_name: client.client_name.clone().unwrap_or_else(|| client.client_id.clone()),
            client_id: client.client_id,
            redirect_uri: redirect_uri.to_string(),
            code_challenge: challenge.to_string(),
            scope: normalize_scope(req.scope.as_deref()),
            state: req.state.clone(),
        })
    }

    /// Issue an authorization code after the user has logged in and
    /// approved the request.
    ///
    /// # Errors
    ///
    /// `Store` on datastore failure.
    pub async fn grant_code(
        &self,
        req: &AuthorizationRequest,
        user_id: &str,
    ) -> AuthResult<String> {
        let code = generate_token();
        let now = Utc::now();

        self.store
            .put_auth_code(
                code.clone(),
                AuthorizationCode {
                    client_id: req.client_id.clone(),
                    user_id: user_id.to_string(),
                    redirect_uri: req.redirect_uri.clone(),
                    code_challenge: req.code_challenge.clone(),
                    scope: req.scope.clone(),
                    created_at: now,
                    expires_at: now + chrono_ttl(self.config.auth_code_ttl),
                    used: false,
                },
            )
            .await?;

        tracing::info!(client_id = %req.client_id, "Issued authorization code");
        Ok(code)
    }

    /// Redeem an authorization code for a token pair.
    ///
    /// The atomic consume comes first, so a code is spent the moment it
    /// is presented: failures in the later binding and PKCE checks burn
    /// it rather than leaving it retryable.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for any code or binding rejection, `InvalidPkce`
    /// for a verifier mismatch, `Store` on datastore failure.
    pub async fn redeem_code(
        &self,
        code: &str,
        client_id: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: &str,
    ) -> AuthResult<TokenGrant> {
        let record = match self.store.consume_auth_code(code).await? {
            CodeConsumption::Consumed(record) => record,
            CodeConsumption::Missing => {
                tracing::debug!("Token request with unknown authorization code");
                return Err(AuthError::InvalidGrant);
            }
            CodeConsumption::Expired => {
                tracing::debug!("Token request with expired authorization code");
                return Err(AuthError::InvalidGrant);
            }
            CodeConsumption::AlreadyUsed => {
                tracing::warn!("Authorization code replayed");
                return Err(AuthError::InvalidGrant);
            }
        };

        if client_id != Some(record.client_id.as_str()) {
            tracing::warn!(bound = %record.client_id, "Authorization code client binding mismatch");
            return Err(AuthError::InvalidGrant);
        }
        if redirect_uri != Some(record.redirect_uri.as_str()) {
            tracing::warn!(client_id = %record.client_id, "Authorization code redirect binding mismatch");
            return Err(AuthError::InvalidGrant);
        }
        if !pkce::verify_s256(code_verifier, &record.code_challenge) {
            tracing::warn!(client_id = %record.client_id, "PKCE verification failed");
            return Err(AuthError::InvalidPkce);
        }

        self.issue_grant(&record.user_id, &record.client_id, &record.scope).await
    }

    /// Rotate a refresh token into a new pair.
    ///
    /// The token must be presented by the client it was issued to.
    /// Presenting an already-rotated token is treated as theft: the
    /// whole family is revoked before the request is rejected.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for any rejection, `Store` on datastore failure.
    pub async fn refresh_grant(
        &self,
        refresh_token: &str,
        client_id: Option<&str>,
    ) -> AuthResult<TokenGrant> {
        let outcome = self
            .store
            .rotate_refresh_token(
                refresh_token,
                client_id,
                generate_token(),
                generate_token(),
                chrono_ttl(self.config.access_token_ttl),
                chrono_ttl(self.config.refresh_token_ttl),
            )
            .await?;

        match outcome {
            RotationOutcome::Rotated(grant) => {
                tracing::info!(user_id = %grant.user_id, "Rotated refresh token");
                Ok(grant)
            }
            RotationOutcome::Missing => {
                tracing::debug!("Refresh request with unknown token");
                Err(AuthError::InvalidGrant)
            }
            RotationOutcome::Expired => {
                tracing::debug!("Refresh request with expired token");
                Err(AuthError::InvalidGrant)
            }
            RotationOutcome::ClientMismatch => {
                tracing::warn!("Refresh token client binding mismatch");
                Err(AuthError::InvalidGrant)
            }
            RotationOutcome::Reused { family_id } => {
                let revoked = self.store.revoke_family(&family_id).await?;
                tracing::warn!(revoked, "Refresh token reuse detected; revoked token family");
                Err(AuthError::InvalidGrant)
            }
        }
    }

    /// Validate a bearer access token. Read-only.
    ///
    /// The owning client must still be active: deactivating a client
    /// cuts off its outstanding tokens at the next check.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if absent, expired, or the owning client is gone
    /// or deactivated; `Store` on datastore failure.
    pub async fn validate_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let Some(access) = self.store.get_access_token(token).await? else {
            return Err(AuthError::InvalidToken);
        };
        if access.is_expired() {
            return Err(AuthError::InvalidToken);
        }
        match self.store.get_client(&access.client_id).await? {
            Some(client) if client.active => Ok(AccessClaims {
                user_id: access.user_id,
                client_id: access.client_id,
                scope: access.scope,
            }),
            _ => {
                tracing::debug!(client_id = %access.client_id, "Token presented for inactive client");
                Err(AuthError::InvalidToken)
            }
        }
    }

    /// Revoke every grant held by a user (logout). Returns the number of
    /// tokens touched.
    ///
    /// # Errors
    ///
    /// `Store` on datastore failure.
    pub async fn revoke_user(&self, user_id: &str) -> AuthResult<usize> {
        let revoked = self.store.revoke_user_grants(user_id).await?;
        tracing::info!(user_id, revoked, "Revoked user grants");
        Ok(revoked)
    }

    async fn issue_grant(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
    ) -> AuthResult<TokenGrant> {
        let access_token = generate_token();
        let refresh_token = generate_token();
        let family_id = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        self.store
            .insert_token_grant(
                access_token.clone(),
                AccessToken {
                    user_id: user_id.to_string(),
                    client_id: client_id.to_string(),
                    scope: scope.to_string(),
                    created_at: now,
                    expires_at: now + chrono_ttl(self.config.access_token_ttl),
                },
                refresh_token.clone(),
                RefreshToken {
                    user_id: user_id.to_string(),
                    client_id: client_id.to_string(),
                    scope: scope.to_string(),
                    access_token: access_token.clone(),
                    family_id,
                    revoked: false,
                    created_at: now,
                    expires_at: now + chrono_ttl(self.config.refresh_token_ttl),
                },
            )
            .await?;

        tracing::info!(client_id, "Issued token pair");
        Ok(TokenGrant {
            access_token,
            refresh_token,
            user_id: user_id.to_string(),
            scope: scope.to_string(),
            expires_in: self.config.access_token_ttl.as_secs(),
        })
    }

    /// Start the background sweep for expired codes and tokens.
    pub fn start_cleanup_task(self: Arc<Self>) {
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match self.store.purge_expired().await {
                    Ok(counts) if counts.total() > 0 => {
                        tracing::debug!(
                            auth_codes = counts.auth_codes,
                            access_tokens = counts.access_tokens,
                            refresh_tokens = counts.refresh_tokens,
                            "Cleaned up expired grants"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Grant cleanup failed"),
                }
            }
        });
    }
}

impl std::fmt::Debug for OAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthService").finish()
    }
}

/// Generate a random token using two UUIDs (256 bits).
fn generate_token() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

/// Collapse requested scopes onto the single supported scope.
fn normalize_scope(requested: Option<&str>) -> String {
    if let Some(requested) = requested {
        if requested != oauth_config::DEFAULT_SCOPE {
            tracing::debug!(requested, "Normalizing requested scope");
        }
    }
    oauth_config::DEFAULT_SCOPE.to_string()
}

fn chrono_ttl(ttl: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryDatastore;

    fn service() -> OAuthService {
        OAuthService::new(Arc::new(MemoryDatastore::new()), Config::for_testing())
    }

    fn authorize_request(client_id: &str, redirect_uri: &str) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: Some(client_id.to_string()),
            redirect_uri: Some(redirect_uri.to_string()),
            response_type: Some("code".to_string()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string()),
            code_challenge_method: Some("S256".to_string()),
            scope: Some("tools".to_string()),
            state: Some("xyz".to_string()),
        }
    }

    #[tokio::test]
    async fn test_begin_authorization_happy_path() {
        let oauth = service();
        let client = oauth
            .register_client(Some("Test App".to_string()), vec!["http://localhost/cb".to_string()])
            .await
            .unwrap();

        let validated = oauth
            .begin_authorization(&authorize_request(&client.client_id, "http://localhost/cb"))
            .await
            .unwrap();
        assert_eq!(validated.client_name, "Test App");
        assert_eq!(validated.scope, "tools");
        assert_eq!(validated.state.as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_begin_authorization_rejections() {
        let oauth = service();
        let client = oauth
            .register_client(None, vec!["http://localhost/cb".to_string()])
            .await
            .unwrap();

        // Unknown client.
        let err = oauth
            .begin_authorization(&authorize_request("nope", "http://localhost/cb"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient));

        // Unregistered redirect (exact match, trailing slash differs).
        let err = oauth
            .begin_authorization(&authorize_request(&client.client_id, "http://localhost/cb/"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRedirectUri));

        // Wrong response type.
        let mut req = authorize_request(&client.client_id, "http://localhost/cb");
        req.response_type = Some("token".to_string());
        assert!(matches!(
            oauth.begin_authorization(&req).await.unwrap_err(),
            AuthError::UnsupportedResponseType
        ));

        // Plain PKCE method.
        let mut req = authorize_request(&client.client_id, "http://localhost/cb");
        req.code_challenge_method = Some("plain".to_string());
        assert!(matches!(oauth.begin_authorization(&req).await.unwrap_err(), AuthError::InvalidPkce));

        // Absent method defaults to plain and is rejected too.
        let mut req = authorize_request(&client.client_id, "http://localhost/cb");
        req.code_challenge_method = None;
        assert!(matches!(oauth.begin_authorization(&req).await.unwrap_err(), AuthError::InvalidPkce));

        // Missing challenge.
        let mut req = authorize_request(&client.client_id, "http://localhost/cb");
        req.code_challenge = None;
        assert!(matches!(oauth.begin_authorization(&req).await.unwrap_err(), AuthError::InvalidPkce));
    }

    #[tokio::test]
    async fn test_deactivated_client_cannot_authorize() {
        let oauth = service();
        let client = oauth
            .register_client(None, vec!["http://localhost/cb".to_string()])
            .await
            .unwrap();
        oauth.deactivate_client(&client.client_id).await.unwrap();

        let err = oauth
            .begin_authorization(&authorize_request(&client.client_id, "http://localhost/cb"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient));
    }

    #[tokio::test]
    async fn test_register_client_requires_valid_redirects() {
        let oauth = service();
        assert!(matches!(
            oauth.register_client(None, vec![]).await.unwrap_err(),
            AuthError::InvalidRedirectUri
        ));
        assert!(matches!(
            oauth.register_client(None, vec!["no-scheme".to_string()]).await.unwrap_err(),
            AuthError::InvalidRedirectUri
        ));
    }

    #[tokio::test]
    async fn test_update_redirect_uris_swaps_the_registered_set() {
        let oauth = service();
        let client = oauth
            .register_client(None, vec!["http://localhost/cb".to_string()])
            .await
            .unwrap();

        oauth
            .update_redirect_uris(&client.client_id, vec!["https://app.example.com/cb".to_string()])
            .await
            .unwrap();

        // The new URI authorizes, the old one no longer does.
        let validated = oauth
            .begin_authorization(&authorize_request(&client.client_id, "https://app.example.com/cb"))
            .await
            .unwrap();
        assert_eq!(validated.redirect_uri, "https://app.example.com/cb");
        assert!(matches!(
            oauth
                .begin_authorization(&authorize_request(&client.client_id, "http://localhost/cb"))
                .await
                .unwrap_err(),
            AuthError::InvalidRedirectUri
        ));

        // The replacement list gets the same validation as registration.
        assert!(matches!(
            oauth.update_redirect_uris(&client.client_id, vec![]).await.unwrap_err(),
            AuthError::InvalidRedirectUri
        ));
        assert!(matches!(
            oauth
                .update_redirect_uris("nope", vec!["http://localhost/cb".to_string()])
                .await
                .unwrap_err(),
            AuthError::InvalidClient
        ));
    }

    #[tokio::test]
    async fn test_scope_is_normalized() {
        let oauth = service();
        let client = oauth
            .register_client(None, vec!["http://localhost/cb".to_string()])
            .await
            .unwrap();

        let mut req = authorize_request(&client.client_id, "http://localhost/cb");
        req.scope = Some("everything admin".to_string());
        let validated = oauth.begin_authorization(&req).await.unwrap();
        assert_eq!(validated.scope, "tools");

        req.scope = None;
        let validated = oauth.begin_authorization(&req).await.unwrap();
        assert_eq!(validated.scope, "tools");
    }
}
