//! MCP Protocol Types
//!
//! MCP is JSON-RPC 2.0 with specific method names and schemas. Every reply
//! the server produces is an [`McpResponse`]: it carries either a `result` or
//! an `error`, never both.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version we support (streamable HTTP transport)
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

// ============================================================================
// Core Message Types
// ============================================================================

/// Incoming message from an MCP client.
///
/// Messages without an `id` are notifications and never get a response.
#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Response to MCP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpErrorResponse>,
}

impl McpResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Request ID can be string or number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Error Codes (JSON-RPC + MCP specific)
// ============================================================================

/// MCP error types
#[derive(Debug, Clone, PartialEq)]
pub enum McpError {
    // JSON-RPC standard errors
    ParseError(String),
    InvalidRequest(String),
    MethodNotFound(String),
    InvalidParams(String),
    InternalError(String),

    // Server specific errors
    SessionNotFound(String),
    UnknownOperation(String),
    ToolExecutionFailed(String),
    RequestTimeout { timeout_secs: u64 },
}

impl McpError {
    pub fn code(&self) -> i32 {
        match self {
            McpError::ParseError(_) => -32700,
            McpError::InvalidRequest(_) => -32600,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            McpError::InternalError(_) => -32603,
            McpError::SessionNotFound(_) => -32001,
            // Unknown tools are reported like unknown methods
            McpError::UnknownOperation(_) => -32601,
            McpError::ToolExecutionFailed(_) => -32005,
            McpError::RequestTimeout { .. } => -32006,
        }
    }

    pub fn message(&self) -> String {
        match self {
            McpError::ParseError(msg) => format!("Parse error: {}", msg),
            McpError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            McpError::MethodNotFound(method) => format!("Method not found: {}", method),
            McpError::InvalidParams(msg) => format!("Invalid params: {}", msg),
            McpError::InternalError(msg) => format!("Internal error: {}", msg),
            McpError::SessionNotFound(id) => format!("Session not found: {}", id),
            McpError::UnknownOperation(name) => format!("Unknown tool: {}", name),
            McpError::ToolExecutionFailed(msg) => format!("Tool execution failed: {}", msg),
            McpError::RequestTimeout { timeout_secs } => {
                format!("Request timed out after {} seconds", timeout_secs)
            }
        }
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl From<McpError> for McpErrorResponse {
    fn from(err: McpError) -> Self {
        let data = match &err {
            McpError::RequestTimeout { timeout_secs } => {
                Some(serde_json::json!({ "timeout_secs": timeout_secs }))
            }
            McpError::UnknownOperation(name) => Some(serde_json::json!({ "tool": name })),
            _ => None,
        };

        McpErrorResponse {
            code: err.code(),
            message: err.message(),
            data,
        }
    }
}

// ============================================================================
// MCP Method Names
// ============================================================================

pub mod methods {
    // Lifecycle
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";

    // Tools
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";

    // Ping
    pub const PING: &str = "ping";
}

// ============================================================================
// Initialize Messages
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

// ============================================================================
// Tools Messages
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultContent {
    Text { text: String },
}

impl ToolsCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text { text: text.into() }],
            structured_content: None,
            is_error: None,
        }
    }

    /// Wraps a collaborator result: pretty JSON as text content, and the
    /// value itself as structured content when it is an object.
    pub fn structured(value: Value) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string_pretty(&value)?;
        let mut result = Self::text(text);
        if value.is_object() {
            result.structured_content = Some(value);
        }
        Ok(result)
    }
}

// ============================================================================
// Ping
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PingResult {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_deserialize_string() {
        let json = r#""test-id""#;
        let id: RequestId = serde_json::from_str(json).unwrap();
        assert_eq!(id, RequestId::String("test-id".to_string()));
    }

    #[test]
    fn test_request_id_deserialize_number() {
        let json = "42";
        let id: RequestId = serde_json::from_str(json).unwrap();
        assert_eq!(id, RequestId::Number(42));
    }

    #[test]
    fn test_notification_has_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let request: McpRequest = serde_json::from_str(json).unwrap();
        assert!(request.id.is_none());
    }

    #[test]
    fn test_mcp_response_success() {
        let resp = McpResponse::success(RequestId::Number(1), serde_json::json!({"ok": true}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_mcp_response_error() {
        let resp = McpResponse::error(
            Some(RequestId::Number(1)),
            McpError::UnknownOperation("nope".to_string()),
        );
        assert!(resp.result.is_none());
        let error = resp.error.as_ref().unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Unknown tool: nope");
        assert_eq!(error.data, Some(serde_json::json!({"tool": "nope"})));
    }

    #[test]
    fn test_success_and_error_share_shape() {
        let ok = serde_json::to_value(McpResponse::success(
            RequestId::Number(1),
            serde_json::json!({}),
        ))
        .unwrap();
        let err = serde_json::to_value(McpResponse::error(
            Some(RequestId::Number(1)),
            McpError::InternalError("x".to_string()),
        ))
        .unwrap();

        assert_eq!(ok["jsonrpc"], "2.0");
        assert_eq!(err["jsonrpc"], "2.0");
        assert!(ok.get("error").is_none());
        assert!(err.get("result").is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(McpError::ParseError("".to_string()).code(), -32700);
        assert_eq!(McpError::InvalidRequest("".to_string()).code(), -32600);
        assert_eq!(McpError::MethodNotFound("".to_string()).code(), -32601);
        assert_eq!(McpError::InvalidParams("".to_string()).code(), -32602);
        assert_eq!(McpError::InternalError("".to_string()).code(), -32603);
        assert_eq!(McpError::SessionNotFound("".to_string()).code(), -32001);
        assert_eq!(McpError::ToolExecutionFailed("".to_string()).code(), -32005);
        assert_eq!(McpError::RequestTimeout { timeout_secs: 5 }.code(), -32006);
    }

    #[test]
    fn test_tools_call_result_structured() {
        let result = ToolsCallResult::structured(serde_json::json!({"bmi": 24.69})).unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(
            result.structured_content,
            Some(serde_json::json!({"bmi": 24.69}))
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["structuredContent"]["bmi"], 24.69);
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn test_tools_call_result_non_object_is_text_only() {
        let result = ToolsCallResult::structured(serde_json::json!([1, 2])).unwrap();
        assert!(result.structured_content.is_none());
    }
}
