//! In-memory datastore.
//!
//! All tables sit behind one `RwLock` so the compound operations
//! (consume, rotate, paired insert) are critical sections across tables,
//! not just within one map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

use super::datastore::{CodeConsumption, Datastore, RotationOutcome, SweepCounts};
use super::types::{AccessToken, AuthorizationCode, Client, RefreshToken, TokenGrant, User};

#[derive(Default)]
struct Tables {
    clients: HashMap<String, Client>,
    users: HashMap<String, User>,
    /// username -> user_id
    usernames: HashMap<String, String>,
    auth_codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessToken>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

/// In-memory auth state store.
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
}

impl MemoryDatastore {
    #[must_use]
    pub fn new() -> Self {
        Self { tables: RwLock::new(Tables::default()) }
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatastore").finish()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn put_client(&self, client: Client) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.clients.contains_key(&client.client_id) {
            return Err(StoreError::conflict("client"));
        }
        t.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> StoreResult<Option<Client>> {
        Ok(self.tables.read().await.clients.get(client_id).cloned())
    }

    async fn update_client_redirects(
        &self,
        client_id: &str,
        redirect_uris: Vec<String>,
    ) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        match t.clients.get_mut(client_id) {
            Some(client) => {
                client.redirect_uris = redirect_uris;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_client(&self, client_id: &str) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        match t.clients.get_mut(client_id) {
            Some(client) => {
                client.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_user(&self, user: User) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.usernames.contains_key(&user.username) {
            return Err(StoreError::conflict("username"));
        }
        t.usernames.insert(user.username.clone(), user.user_id.clone());
        t.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(user_id).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.usernames.get(username).and_then(|id| t.users.get(id)).cloned())
    }

    async fn put_auth_code(&self, code: String, record: AuthorizationCode) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.auth_codes.contains_key(&code) {
            return Err(StoreError::conflict("authorization code"));
        }
        t.auth_codes.insert(code, record);
        Ok(())
    }

    async fn consume_auth_code(&self, code: &str) -> StoreResult<CodeConsumption> {
        let mut t = self.tables.write().await;
        let Some(record) = t.auth_codes.get_mut(code) else {
            return Ok(CodeConsumption::Missing);
        };
        if record.is_expired() {
            return Ok(CodeConsumption::Expired);
        }
        if record.used {
            return Ok(CodeConsumption::AlreadyUsed);
        }
        record.used = true;
        Ok(CodeConsumption::Consumed(record.clone()))
    }

    async fn insert_token_grant(
        &self,
        access_token: String,
        access: AccessToken,
        refresh_token: String,
        refresh: RefreshToken,
    ) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.access_tokens.contains_key(&access_token) || t.refresh_tokens.contains_key(&refresh_token)
        {
            return Err(StoreError::conflict("token"));
        }
        t.access_tokens.insert(access_token, access);
        t.refresh_tokens.insert(refresh_token, refresh);
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> StoreResult<Option<AccessToken>> {
        Ok(self.tables.read().await.access_tokens.get(token).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token: &str,
        client_id: Option<&str>,
        next_access_token: String,
        next_refresh_token: String,
        access_ttl: chrono::Duration,
        refresh_ttl: chrono::Duration,
    ) -> StoreResult<RotationOutcome> {
        let mut t = self.tables.write().await;

        let (user_id, client_id, scope, family_id, paired_access) = {
            let Some(old) = t.refresh_tokens.get(token) else {
                return Ok(RotationOutcome::Missing);
            };
            if old.revoked {
                return Ok(RotationOutcome::Reused { family_id: old.family_id.clone() });
            }
            if old.is_expired() {
                return Ok(RotationOutcome::Expired);
            }
            if client_id != Some(old.client_id.as_str()) {
                return Ok(RotationOutcome::ClientMismatch);
            }
            (
                old.user_id.clone(),
                old.client_id.clone(),
                old.scope.clone(),
                old.family_id.clone(),
                old.access_token.clone(),
            )
        };

        if let Some(old) = t.refresh_tokens.get_mut(token) {
            old.revoked = true;
        }
        t.access_tokens.remove(&paired_access);

        let now = Utc::now();
        t.access_tokens.insert(
            next_access_token.clone(),
            AccessToken {
                user_id: user_id.clone(),
                client_id: client_id.clone(),
                scope: scope.clone(),
                created_at: now,
                expires_at: now + access_ttl,
            },
        );
        t.refresh_tokens.insert(
            next_refresh_token.clone(),
            RefreshToken {
                user_id: user_id.clone(),
                client_id,
                scope: scope.clone(),
                access_token: next_access_token.clone(),
                family_id,
                revoked: false,
                created_at: now,
                expires_at: now + refresh_ttl,
            },
        );

        Ok(RotationOutcome::Rotated(TokenGrant {
            access_token: next_access_token,
            refresh_token: next_refresh_token,
            user_id,
            scope,
            expires_in: access_ttl.num_seconds().max(0).unsigned_abs(),
        }))
    }

    async fn revoke_family(&self, family_id: &str) -> StoreResult<usize> {
        let mut t = self.tables.write().await;
        let live: Vec<(String, String)> = t
            .refresh_tokens
            .iter()
            .filter(|(_, r)| r.family_id == family_id && !r.revoked)
            .map(|(k, r)| (k.clone(), r.access_token.clone()))
            .collect();

        for (key, paired_access) in &live {
            if let Some(record) = t.refresh_tokens.get_mut(key) {
                record.revoked = true;
            }
            t.access_tokens.remove(paired_access);
        }
        Ok(live.len())
    }

    async fn revoke_user_grants(&self, user_id: &str) -> StoreResult<usize> {
        let mut t = self.tables.write().await;

        let refresh_keys: Vec<String> = t
            .refresh_tokens
            .iter()
            .filter(|(_, r)| r.user_id == user_id && !r.revoked)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &refresh_keys {
            if let Some(record) = t.refresh_tokens.get_mut(key) {
                record.revoked = true;
            }
        }

        let before = t.access_tokens.len();
        t.access_tokens.retain(|_, a| a.user_id != user_id);
        let removed_access = before - t.access_tokens.len();

        Ok(refresh_keys.len() + removed_access)
    }

    async fn purge_expired(&self) -> StoreResult<SweepCounts> {
        let mut t = self.tables.write().await;
        let mut counts = SweepCounts::default();

        let before = t.auth_codes.len();
        t.auth_codes.retain(|_, c| !c.is_expired());
        counts.auth_codes = before - t.auth_codes.len();

        let before = t.access_tokens.len();
        t.access_tokens.retain(|_, a| !a.is_expired());
        counts.access_tokens = before - t.access_tokens.len();

        // Revoked refresh tokens stay until expiry so reuse of a rotated
        // token is still recognized as reuse, not as an unknown token.
        let before = t.refresh_tokens.len();
        t.refresh_tokens.retain(|_, r| !r.is_expired());
        counts.refresh_tokens = before - t.refresh_tokens.len();

        Ok(counts)
    }
}
