//! JSON-RPC 2.0 envelope and the slice of the Model-Context-Protocol wire
//! format this gateway understands: `initialize`, `notifications/initialized`,
//! `tools/list`, `tools/call`, plus the `ping`/`notifications/cancelled`
//! lifecycle messages every MCP transport is expected to tolerate.
//!
//! Kept free-standing (no dependency on the upstream `rmcp` SDK): the
//! canonical method set this gateway proxies is a small, fixed subset of the
//! full protocol, and spec'ing it directly keeps the wire types exactly as
//! small as the contract requires. See DESIGN.md for the tradeoff.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SERVER_NAME: &str = "mcp-gateway";

/// A JSON-RPC request id. Absent on the wire (`id: null` is NOT equivalent;
/// a genuinely missing field means "notification", see [`JsonRpcRequest::is_notification`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request with no `id` is a notification: no reply is ever sent.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The standard JSON-RPC 2.0 error codes, plus two gateway-domain codes for
/// backend timeout/connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ConnectionClosed,
    RequestTimeout,
}

impl JsonRpcErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => -32700,
            JsonRpcErrorCode::InvalidRequest => -32600,
            JsonRpcErrorCode::MethodNotFound => -32601,
            JsonRpcErrorCode::InvalidParams => -32602,
            JsonRpcErrorCode::InternalError => -32603,
            // Domain codes, outside the JSON-RPC reserved range.
            JsonRpcErrorCode::ConnectionClosed => -32000,
            JsonRpcErrorCode::RequestTimeout => -32001,
        }
    }

    pub fn error(self, message: impl Into<String>) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// The canonical method set. Anything else is `MethodNotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Initialize,
    NotificationsInitialized,
    ToolsList,
    ToolsCall,
    Ping,
    NotificationsCancelled,
    Other(String),
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "initialize" => Method::Initialize,
            "notifications/initialized" => Method::NotificationsInitialized,
            "tools/list" => Method::ToolsList,
            "tools/call" => Method::ToolsCall,
            "ping" => Method::Ping,
            "notifications/cancelled" => Method::NotificationsCancelled,
            other => Method::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl CallToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

impl InitializeResult {
    pub fn new() -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: gateway_core::version::BuildInfo::new().version.to_string(),
            },
        }
    }
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_id_is_a_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn request_with_id_is_not_a_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(!req.is_notification());
        assert_eq!(req.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn unknown_method_parses_as_other() {
        assert_eq!(Method::from("foo/bar"), Method::Other("foo/bar".to_string()));
    }
}
