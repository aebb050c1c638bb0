//! Tool-call dispatch: name lookup, credential checks, context binding,
//! and a panic boundary around tool execution.
//!
//! Every transport funnels `tools/call` through [`Dispatcher::dispatch`],
//! so access policy is enforced in exactly one place.

pub mod context;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::auth::types::User;
use crate::auth::{OAuthService, UserManager};
use crate::error::{DispatchError, DispatchResult};
use crate::tools::{ToolContext, ToolRegistration};
use context::ContextRegistry;

/// Routes validated tool calls to their implementations.
pub struct Dispatcher {
    tools: Vec<ToolRegistration>,
    contexts: Arc<ContextRegistry>,
    oauth: Arc<OAuthService>,
    users: UserManager,
    /// Identity bound to every call in local mode. None in multiuser mode.
    local_user: Option<User>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        tools: Vec<ToolRegistration>,
        oauth: Arc<OAuthService>,
        users: UserManager,
        contexts: Arc<ContextRegistry>,
        local_user: Option<User>,
    ) -> Self {
        Self { tools, contexts, oauth, users, local_user }
    }

    /// Execute one tool call.
    ///
    /// Rejection order: unknown tool first, then credentials. An
    /// unauthenticated caller probing for tool names learns nothing
    /// beyond what `tools/list` already reveals.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        bearer: Option<&str>,
    ) -> DispatchResult<String> {
        let Some(registration) = self.tools.iter().find(|r| r.tool().name() == tool_name) else {
            return Err(DispatchError::UnknownTool(tool_name.to_string()));
        };

        let ctx = match self.resolve_user(registration.requires_auth(), bearer).await? {
            Some((user_id, username)) => {
                let user = self.contexts.get_or_create(&user_id, &username).await;
                user.record_invocation();
                ToolContext::for_user(user)
            }
            None => ToolContext::anonymous(),
        };

        tracing::debug!(tool = tool_name, "Dispatching tool call");
        let outcome =
            AssertUnwindSafe(registration.tool().execute(&ctx, arguments)).catch_unwind().await;

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => {
                tracing::warn!(tool = tool_name, error = %err, "Tool returned an error");
                Err(DispatchError::tool_failed(tool_name, err.to_user_message()))
            }
            Err(_) => {
                tracing::error!(tool = tool_name, "Tool panicked during execution");
                Err(DispatchError::tool_failed(tool_name, "tool crashed during execution"))
            }
        }
    }

    /// Resolve the caller to a (user_id, username) pair, or None for an
    /// anonymous call to an open tool.
    ///
    /// Local mode binds every call to the configured local user and
    /// never inspects the token. Multiuser mode validates the bearer
    /// whenever the tool is gated, and also when an open-tool caller
    /// volunteers one.
    async fn resolve_user(
        &self,
        requires_auth: bool,
        bearer: Option<&str>,
    ) -> DispatchResult<Option<(String, String)>> {
        if let Some(local) = &self.local_user {
            return Ok(Some((local.user_id.clone(), local.username.clone())));
        }

        let Some(token) = bearer else {
            if requires_auth {
                return Err(DispatchError::AuthRequired);
            }
            return Ok(None);
        };

        let claims = self.oauth.validate_access(token).await?;
        let username = match self.users.get(&claims.user_id).await? {
            Some(user) => user.username,
            // Token outlived the account record; fall back to the id.
            None => claims.user_id.clone(),
        };
        Ok(Some((claims.user_id, username)))
    }

    #[must_use]
    pub fn registrations(&self) -> &[ToolRegistration] {
        &self.tools
    }

    #[must_use]
    pub fn contexts(&self) -> &Arc<ContextRegistry> {
        &self.contexts
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local_user.is_some()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools.len())
            .field("local", &self.is_local())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::auth::MemoryDatastore;
    use crate::config::Config;
    use crate::error::ToolResult;
    use crate::tools::{McpTool, register_all_tools};

    struct PanicTool;

    #[async_trait]
    impl McpTool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Panics on every call."
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
            panic!("boom");
        }
    }

    fn multiuser_dispatcher(extra: Vec<ToolRegistration>) -> (Dispatcher, Arc<OAuthService>) {
        let store = Arc::new(MemoryDatastore::new());
        let oauth = Arc::new(OAuthService::new(store.clone(), Config::for_testing()));
        let users = UserManager::new(store);
        let contexts = Arc::new(ContextRegistry::new(std::time::Duration::from_secs(60)));

        let mut tools = register_all_tools();
        tools.extend(extra);
        (Dispatcher::new(tools, oauth.clone(), users, contexts, None), oauth)
    }

    async fn local_dispatcher() -> Dispatcher {
        let store = Arc::new(MemoryDatastore::new());
        let oauth = Arc::new(OAuthService::new(store.clone(), Config::for_testing()));
        let users = UserManager::new(store);
        let local = users.ensure_user("local").await.unwrap();
        let contexts = Arc::new(ContextRegistry::new(std::time::Duration::from_secs(60)));
        Dispatcher::new(register_all_tools(), oauth, users, contexts, Some(local))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_an_auth_error() {
        let (dispatcher, _) = multiuser_dispatcher(Vec::new());
        let err = dispatcher.dispatch("no_such_tool", json!({}), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTool(ref name) if name == "no_such_tool"));
        assert!(!err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_gated_tool_without_token_requires_auth() {
        let (dispatcher, _) = multiuser_dispatcher(Vec::new());
        let err = dispatcher.dispatch("whoami", json!({}), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::AuthRequired));
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_open_tool_runs_without_token() {
        let (dispatcher, _) = multiuser_dispatcher(Vec::new());
        let out = dispatcher.dispatch("ping", json!({}), None).await.unwrap();
        assert_eq!(out, "pong");
        assert_eq!(dispatcher.contexts().count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_even_for_open_tools() {
        let (dispatcher, _) = multiuser_dispatcher(Vec::new());
        let err = dispatcher.dispatch("ping", json!({}), Some("bogus")).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_local_mode_binds_without_token() {
        let dispatcher = local_dispatcher().await;
        let out = dispatcher.dispatch("whoami", json!({}), None).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["username"], "local");
        assert_eq!(dispatcher.contexts().count().await, 1);
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let (dispatcher, _) =
            multiuser_dispatcher(vec![ToolRegistration::open(PanicTool)]);
        let err = dispatcher.dispatch("explode", json!({}), None).await.unwrap_err();
        assert!(matches!(err, DispatchError::ToolFailed { ref tool, .. } if tool == "explode"));

        // The dispatcher survives and keeps serving.
        let out = dispatcher.dispatch("ping", json!({}), None).await.unwrap();
        assert_eq!(out, "pong");
    }

    #[tokio::test]
    async fn test_tool_validation_error_becomes_tool_failed() {
        let dispatcher = local_dispatcher().await;
        let err = dispatcher
            .dispatch("store_set", json!({"key": "", "value": "v"}), None)
            .await
            .unwrap_err();
        match err {
            DispatchError::ToolFailed { tool, message } => {
                assert_eq!(tool, "store_set");
                assert!(message.contains("key"));
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }
}
