//! Built-in tools: ping, echo, whoami, counter, store_set, store_get, store_delete, store_keys.

use serde::Deserialize;
use serde_json::json;

use super::{McpTool, ToolContext};
use crate::error::{ToolError, ToolResult};

const MAX_KEY_LEN: usize = 128;
const MAX_VALUE_LEN: usize = 64 * 1024;

fn validate_key(key: &str) -> ToolResult<()> {
    if key.is_empty() {
        return Err(ToolError::validation("key", "must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ToolError::validation(
            "key",
            format!("must be at most {MAX_KEY_LEN} characters"),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(ToolError::validation("key", "must not contain control characters"));
    }
    Ok(())
}

/// Liveness probe tool.
pub struct PingTool;

#[async_trait::async_trait]
impl McpTool for PingTool {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Check that the server is alive. Takes no arguments and returns 'pong'."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        Ok("pong".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct EchoInput {
    message: String,
}

/// Echo tool, returns its input unchanged.
pub struct EchoTool;

#[async_trait::async_trait]
impl McpTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the provided message unchanged."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: EchoInput = serde_json::from_value(input)?;
        Ok(params.message)
    }
}

/// Reports the calling user's identity and usage.
pub struct WhoamiTool;

#[async_trait::async_trait]
impl McpTool for WhoamiTool {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "Show the authenticated user's id, username, and call count."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        let user = ctx.require_user()?;
        let payload = json!({
            "user_id": user.user_id,
            "username": user.username,
            "invocations": user.invocation_count(),
        });
        Ok(serde_json::to_string_pretty(&payload)?)
    }
}

#[derive(Debug, Deserialize)]
struct CounterInput {
    amount: Option<i64>,
}

/// Per-user monotonic counter.
pub struct CounterTool;

#[async_trait::async_trait]
impl McpTool for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Add to the calling user's private counter and return the new value. \
         Defaults to adding 1; negative amounts subtract."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "amount": {
                    "type": "integer",
                    "default": 1,
                    "description": "Amount to add (may be negative)"
                }
            }
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: CounterInput = serde_json::from_value(input)?;
        let user = ctx.require_user()?;
        let value = user.increment_counter(params.amount.unwrap_or(1));
        Ok(serde_json::to_string_pretty(&json!({ "value": value }))?)
    }
}

#[derive(Debug, Deserialize)]
struct StoreSetInput {
    key: String,
    value: String,
}

/// Write a value into the calling user's key-value store.
pub struct StoreSetTool;

#[async_trait::async_trait]
impl McpTool for StoreSetTool {
    fn name(&self) -> &str {
        "store_set"
    }

    fn description(&self) -> &str {
        "Store a string value under a key in the calling user's private store. \
         Returns the previous value if the key existed."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Key to store under (1-128 characters)"
                },
                "value": {
                    "type": "string",
                    "description": "Value to store (at most 64 KiB)"
                }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: StoreSetInput = serde_json::from_value(input)?;
        validate_key(&params.key)?;
        if params.value.len() > MAX_VALUE_LEN {
            return Err(ToolError::validation(
                "value",
                format!("must be at most {MAX_VALUE_LEN} bytes"),
            ));
        }

        let user = ctx.require_user()?;
        let previous = user.kv_set(params.key.clone(), params.value).await;
        Ok(serde_json::to_string_pretty(&json!({
            "key": params.key,
            "previous": previous,
        }))?)
    }
}

#[derive(Debug, Deserialize)]
struct StoreKeyInput {
    key: String,
}

/// Read a value from the calling user's key-value store.
pub struct StoreGetTool;

#[async_trait::async_trait]
impl McpTool for StoreGetTool {
    fn name(&self) -> &str {
        "store_get"
    }

    fn description(&self) -> &str {
        "Fetch the value stored under a key in the calling user's private store."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Key to look up"
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: StoreKeyInput = serde_json::from_value(input)?;
        validate_key(&params.key)?;

        let user = ctx.require_user()?;
        let value = user.kv_get(&params.key).await;
        Ok(serde_json::to_string_pretty(&json!({
            "key": params.key,
            "found": value.is_some(),
            "value": value,
        }))?)
    }
}

/// Delete a key from the calling user's key-value store.
pub struct StoreDeleteTool;

#[async_trait::async_trait]
impl McpTool for StoreDeleteTool {
    fn name(&self) -> &str {
        "store_delete"
    }

    fn description(&self) -> &str {
        "Delete a key from the calling user's private store."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Key to delete"
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String> {
        let params: StoreKeyInput = serde_json::from_value(input)?;
        validate_key(&params.key)?;

        let user = ctx.require_user()?;
        let deleted = user.kv_delete(&params.key).await;
        Ok(serde_json::to_string_pretty(&json!({
            "key": params.key,
            "deleted": deleted,
        }))?)
    }
}

/// List all keys in the calling user's key-value store.
pub struct StoreKeysTool;

#[async_trait::async_trait]
impl McpTool for StoreKeysTool {
    fn name(&self) -> &str {
        "store_keys"
    }

    fn description(&self) -> &str {
        "List all keys in the calling user's private store, sorted alphabetically."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, ctx: &ToolContext, _input: serde_json::Value) -> ToolResult<String> {
        let user = ctx.require_user()?;
        let keys = user.kv_keys().await;
        Ok(serde_json::to_string_pretty(&json!({
            "count": keys.len(),
            "keys": keys,
        }))?)
    }
}
