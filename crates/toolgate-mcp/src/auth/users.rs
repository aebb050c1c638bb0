//! User accounts: registration and password authentication.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{AuthError, AuthResult, StoreError};

use super::datastore::Datastore;
use super::password;
use super::types::User;

/// Account registry backed by the auth datastore.
///
/// Hashing runs on the blocking pool; argon2id is deliberately too slow
/// for the async executor. Login failures collapse to one error: the
/// caller cannot tell an unknown username from a wrong password, and the
/// unknown-username path still performs a hash verification so the two
/// take comparable time.
#[derive(Clone)]
pub struct UserManager {
    store: Arc<dyn Datastore>,
}

impl UserManager {
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// `InvalidRegistration` for rejected input, `UsernameTaken` if the
    /// name exists, `Store` on datastore failure.
    pub async fn register(&self, username: &str, password: &str) -> AuthResult<User> {
        validate_registration(username, password)?;

        let password_owned = password.to_string();
        let password_hash =
            tokio::task::spawn_blocking(move || password::hash_password(&password_owned))
                .await
                .map_err(|_| StoreError::unavailable("password hashing task aborted"))?
                .map_err(|_| StoreError::unavailable("password hashing failed"))?;

        let user = User {
            user_id: uuid::Uuid::new_v4().simple().to_string(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        };

        match self.store.create_user(user.clone()).await {
            Ok(()) => {
                tracing::info!(username = %user.username, "Registered user");
                Ok(user)
            }
            Err(StoreError::Conflict { .. }) => Err(AuthError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a username/password pair.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` for any rejected credential, `Store` on
    /// datastore failure.
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthResult<User> {
        let password_owned = password.to_string();

        match self.store.get_user_by_name(username).await? {
            Some(user) => {
                let hash = user.password_hash.clone();
                let ok =
                    tokio::task::spawn_blocking(move || password::verify_password(&password_owned, &hash))
                        .await
                        .map_err(|_| StoreError::unavailable("password verification task aborted"))?;
                if ok {
                    Ok(user)
                } else {
                    tracing::debug!(username, "Password verification failed");
                    Err(AuthError::AuthenticationFailed)
                }
            }
            None => {
                // Burn the same hashing cost as the known-user path.
                let _ = tokio::task::spawn_blocking(move || {
                    password::verify_password(&password_owned, password::dummy_hash())
                })
                .await;
                tracing::debug!(username, "Unknown username");
                Err(AuthError::AuthenticationFailed)
            }
        }
    }

    /// Look up a user by id.
    ///
    /// # Errors
    ///
    /// `Store` on datastore failure.
    pub async fn get(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(self.store.get_user(user_id).await?)
    }

    /// Fetch or create the account every call binds to in local mode.
    ///
    /// The created account carries a sentinel hash that never verifies,
    /// so it has no password login.
    ///
    /// # Errors
    ///
    /// `Store` on datastore failure.
    pub async fn ensure_user(&self, username: &str) -> AuthResult<User> {
        if let Some(user) = self.store.get_user_by_name(username).await? {
            return Ok(user);
        }

        let user = User {
            user_id: uuid::Uuid::new_v4().simple().to_string(),
            username: username.to_string(),
            password_hash: "!".to_string(),
            created_at: Utc::now(),
        };

        match self.store.create_user(user.clone()).await {
            Ok(()) => {
                tracing::info!(username, "Created local user");
                Ok(user)
            }
            // Lost a creation race; the winner's row is the account.
            Err(StoreError::Conflict { .. }) => self
                .store
                .get_user_by_name(username)
                .await?
                .ok_or_else(|| StoreError::unavailable("user vanished during bootstrap").into()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for UserManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserManager").finish()
    }
}

fn validate_registration(username: &str, password: &str) -> AuthResult<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(AuthError::InvalidRegistration("username must be 1-64 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(AuthError::InvalidRegistration(
            "username may only contain letters, digits, '.', '_' and '-'",
        ));
    }
    if password.len() < 8 {
        return Err(AuthError::InvalidRegistration("password must be at least 8 characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryDatastore;

    fn manager() -> UserManager {
        UserManager::new(Arc::new(MemoryDatastore::new()))
    }

    #[tokio::test]
    async fn test_register_and_authenticate() {
        let users = manager();
        let created = users.register("alice", "hunter2hunter2").await.unwrap();
        assert_eq!(created.username, "alice");
        assert!(created.password_hash.starts_with("$argon2id$"));

        let authed = users.authenticate("alice", "hunter2hunter2").await.unwrap();
        assert_eq!(authed.user_id, created.user_id);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_identical() {
        let users = manager();
        users.register("alice", "hunter2hunter2").await.unwrap();

        let wrong = users.authenticate("alice", "wrong-password").await.unwrap_err();
        let unknown = users.authenticate("nobody", "wrong-password").await.unwrap_err();
        assert!(matches!(wrong, AuthError::AuthenticationFailed));
        assert!(matches!(unknown, AuthError::AuthenticationFailed));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let users = manager();
        users.register("alice", "hunter2hunter2").await.unwrap();
        let err = users.register("alice", "other-password").await.unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken));
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let users = manager();
        assert!(matches!(
            users.register("", "longenough").await.unwrap_err(),
            AuthError::InvalidRegistration(_)
        ));
        assert!(matches!(
            users.register("has space", "longenough").await.unwrap_err(),
            AuthError::InvalidRegistration(_)
        ));
        assert!(matches!(
            users.register("alice", "short").await.unwrap_err(),
            AuthError::InvalidRegistration(_)
        ));
    }

    #[tokio::test]
    async fn test_ensure_user_is_idempotent_and_locked() {
        let users = manager();
        let first = users.ensure_user("local").await.unwrap();
        let second = users.ensure_user("local").await.unwrap();
        assert_eq!(first.user_id, second.user_id);

        // No password authenticates against the sentinel hash.
        let err = users.authenticate("local", "anything-at-all").await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed));
    }
}
