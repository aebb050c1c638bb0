//! JSON-RPC 2.0 message types and the transport-agnostic MCP method
//! handler.
//!
//! Both transports parse bytes into [`JsonRpcRequest`] and hand them to
//! [`RpcHandler::handle`]; the reply tells the transport whether there
//! is a message to send or the request was a consumed notification.

use std::borrow::Cow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DispatchError;
use crate::router::Dispatcher;

/// Protocol version offered when the client does not request one.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes used by this server.
pub mod codes {
    /// Malformed JSON payload.
    pub const PARSE_ERROR: i32 = -32700;
    /// Unknown JSON-RPC method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Bad parameters, including unknown tool names.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Tool returned an error or crashed.
    pub const TOOL_ERROR: i32 = -32000;
    /// Authentication missing or rejected.
    pub const AUTH_ERROR: i32 = -32001;
    /// Backing store temporarily unreachable.
    pub const UNAVAILABLE: i32 = -32002;
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// JSON-RPC version constant.
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    /// Error code carried by this response, if it is an error.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Outcome of handling one JSON-RPC message.
#[derive(Debug)]
pub enum RpcReply {
    /// A response to send back to the caller.
    Message(JsonRpcResponse),
    /// The message was a notification; there is nothing to send.
    Accepted,
}

/// Handles MCP methods independently of transport.
#[derive(Debug, Clone)]
pub struct RpcHandler {
    dispatcher: Arc<Dispatcher>,
}

impl RpcHandler {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handle one request. `bearer` is the access token presented by
    /// the transport, if any.
    pub async fn handle(&self, req: JsonRpcRequest, bearer: Option<&str>) -> RpcReply {
        let is_notification = req.id.is_none();

        match req.method.as_str() {
            "initialize" => {
                RpcReply::Message(JsonRpcResponse::success(req.id, initialize_result(&req.params)))
            }
            "notifications/initialized" | "initialized" | "notifications/cancelled" => {
                if is_notification {
                    RpcReply::Accepted
                } else {
                    RpcReply::Message(JsonRpcResponse::success(req.id, json!({})))
                }
            }
            "ping" => RpcReply::Message(JsonRpcResponse::success(req.id, json!({}))),
            "tools/list" => RpcReply::Message(self.tools_list(req.id)),
            "tools/call" => {
                RpcReply::Message(self.tools_call(req.id, &req.params, bearer).await)
            }
            _ => {
                if is_notification {
                    RpcReply::Accepted
                } else {
                    RpcReply::Message(JsonRpcResponse::error(
                        req.id,
                        codes::METHOD_NOT_FOUND,
                        format!("Method not found: {}", req.method),
                    ))
                }
            }
        }
    }

    fn tools_list(&self, id: Option<serde_json::Value>) -> JsonRpcResponse {
        let tools: Vec<McpToolInfo> = self
            .dispatcher
            .registrations()
            .iter()
            .map(|r| McpToolInfo {
                name: r.tool().name().to_string(),
                description: r.tool().description().to_string(),
                input_schema: r.tool().input_schema(),
            })
            .collect();

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn tools_call(
        &self,
        id: Option<serde_json::Value>,
        params: &serde_json::Value,
        bearer: Option<&str>,
    ) -> JsonRpcResponse {
        let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "Missing 'name' parameter");
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.dispatcher.dispatch(tool_name, arguments, bearer).await {
            Ok(output) => JsonRpcResponse::success(
                id,
                json!({
                    "content": [{
                        "type": "text",
                        "text": output
                    }]
                }),
            ),
            Err(err) => dispatch_error_response(id, &err),
        }
    }
}

fn initialize_result(params: &serde_json::Value) -> serde_json::Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or(PROTOCOL_VERSION);

    tracing::info!("MCP initialize: protocol version {}", protocol_version);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": "toolgate-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Map a dispatch failure onto the wire.
///
/// Unknown tools are a parameter fault, never an auth fault, so probing
/// with and without credentials yields the same code.
fn dispatch_error_response(id: Option<serde_json::Value>, err: &DispatchError) -> JsonRpcResponse {
    let code = match err {
        DispatchError::UnknownTool(_) => codes::INVALID_PARAMS,
        DispatchError::AuthRequired | DispatchError::Auth(_) => codes::AUTH_ERROR,
        DispatchError::Unavailable(_) => codes::UNAVAILABLE,
        DispatchError::ToolFailed { .. } => codes::TOOL_ERROR,
    };
    JsonRpcResponse::error(id, code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryDatastore, OAuthService, UserManager};
    use crate::config::Config;
    use crate::router::context::ContextRegistry;
    use crate::tools::register_all_tools;

    fn request(method: &str, params: serde_json::Value, id: Option<serde_json::Value>) -> JsonRpcRequest {
        JsonRpcRequest { jsonrpc: "2.0".to_string(), method: method.to_string(), params, id }
    }

    fn handler() -> RpcHandler {
        let store = Arc::new(MemoryDatastore::new());
        let oauth = Arc::new(OAuthService::new(store.clone(), Config::for_testing()));
        let users = UserManager::new(store);
        let contexts = Arc::new(ContextRegistry::new(std::time::Duration::from_secs(60)));
        let dispatcher =
            Dispatcher::new(register_all_tools(), oauth, users, contexts, None);
        RpcHandler::new(Arc::new(dispatcher))
    }

    fn expect_message(reply: RpcReply) -> JsonRpcResponse {
        match reply {
            RpcReply::Message(response) => response,
            RpcReply::Accepted => panic!("expected a message reply"),
        }
    }

    #[tokio::test]
    async fn test_initialize_echoes_protocol_version() {
        let handler = handler();
        let reply = handler
            .handle(request("initialize", json!({"protocolVersion": "2025-03-26"}), Some(json!(1))), None)
            .await;

        let response = expect_message(reply);
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "toolgate-mcp");
    }

    #[tokio::test]
    async fn test_tools_list_exposes_schemas() {
        let handler = handler();
        let reply = handler.handle(request("tools/list", json!({}), Some(json!(2))), None).await;

        let response = expect_message(reply);
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert!(tools.iter().any(|t| t["name"] == "ping"));
        assert!(tools.iter().any(|t| t["name"] == "whoami"));
        for tool in &tools {
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_tools_call_open_tool() {
        let handler = handler();
        let params = json!({"name": "ping", "arguments": {}});
        let reply = handler.handle(request("tools/call", params, Some(json!(3))), None).await;

        let response = expect_message(reply);
        assert_eq!(response.result.unwrap()["content"][0]["text"], "pong");
    }

    #[tokio::test]
    async fn test_tools_call_missing_name() {
        let handler = handler();
        let reply = handler
            .handle(request("tools/call", json!({"arguments": {}}), Some(json!(4))), None)
            .await;

        let response = expect_message(reply);
        assert_eq!(response.error_code(), Some(codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_tools_call_unknown_tool_uses_invalid_params() {
        let handler = handler();
        let params = json!({"name": "not_a_tool", "arguments": {}});
        let reply = handler.handle(request("tools/call", params, Some(json!(5))), None).await;

        let response = expect_message(reply);
        assert_eq!(response.error_code(), Some(codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_tools_call_gated_without_token_uses_auth_code() {
        let handler = handler();
        let params = json!({"name": "whoami", "arguments": {}});
        let reply = handler.handle(request("tools/call", params, Some(json!(6))), None).await;

        let response = expect_message(reply);
        assert_eq!(response.error_code(), Some(codes::AUTH_ERROR));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let handler = handler();
        let reply = handler.handle(request("bogus/method", json!({}), Some(json!(7))), None).await;
        let response = expect_message(reply);
        assert_eq!(response.error_code(), Some(codes::METHOD_NOT_FOUND));

        // Same method as a notification is silently accepted.
        let reply = handler.handle(request("bogus/method", json!({}), None), None).await;
        assert!(matches!(reply, RpcReply::Accepted));
    }

    #[tokio::test]
    async fn test_initialized_notification_accepted() {
        let handler = handler();
        let reply = handler
            .handle(request("notifications/initialized", json!({}), None), None)
            .await;
        assert!(matches!(reply, RpcReply::Accepted));
    }
}
