//! Tool trait and the built-in tool registry.
//!
//! A tool declares its name, description, and JSON Schema, and executes
//! against a [`ToolContext`]. Registration decides whether the tool is
//! open to anonymous callers or gated behind a valid access token.

pub mod builtin;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ToolError, ToolResult};
use crate::router::context::UserContext;

/// Everything a tool may touch during one call.
///
/// Gated tools always receive the calling user's context. Open tools
/// run anonymously unless the caller happened to present a token.
#[derive(Debug, Clone)]
pub struct ToolContext {
    user: Option<Arc<UserContext>>,
}

impl ToolContext {
    #[must_use]
    pub fn for_user(user: Arc<UserContext>) -> Self {
        Self { user: Some(user) }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    #[must_use]
    pub fn user(&self) -> Option<&Arc<UserContext>> {
        self.user.as_ref()
    }

    /// The calling user's context.
    ///
    /// Gated tools can rely on this; the dispatcher rejects anonymous
    /// calls before execution. Failing here means a registration bug.
    pub fn require_user(&self) -> ToolResult<&Arc<UserContext>> {
        self.user
            .as_ref()
            .ok_or_else(|| ToolError::internal("tool executed without an authenticated user"))
    }
}

/// Trait that all MCP tools must implement.
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name as exposed in `tools/list`.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, context: &ToolContext, arguments: Value) -> ToolResult<String>;
}

/// A tool plus its access policy.
pub struct ToolRegistration {
    tool: Box<dyn McpTool>,
    requires_auth: bool,
}

impl ToolRegistration {
    /// Register a tool callable without credentials.
    #[must_use]
    pub fn open(tool: impl McpTool + 'static) -> Self {
        Self { tool: Box::new(tool), requires_auth: false }
    }

    /// Register a tool that demands a valid access token.
    #[must_use]
    pub fn gated(tool: impl McpTool + 'static) -> Self {
        Self { tool: Box::new(tool), requires_auth: true }
    }

    #[must_use]
    pub fn tool(&self) -> &dyn McpTool {
        self.tool.as_ref()
    }

    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("name", &self.tool.name())
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

/// Register all built-in tools in listing order.
#[must_use]
pub fn register_all_tools() -> Vec<ToolRegistration> {
    vec![
        ToolRegistration::open(builtin::PingTool),
        ToolRegistration::open(builtin::EchoTool),
        ToolRegistration::gated(builtin::WhoamiTool),
        ToolRegistration::gated(builtin::CounterTool),
        ToolRegistration::gated(builtin::StoreSetTool),
        ToolRegistration::gated(builtin::StoreGetTool),
        ToolRegistration::gated(builtin::StoreDeleteTool),
        ToolRegistration::gated(builtin::StoreKeysTool),
    ]
}
