//! Wire frames exchanged with the agent
//!
//! The gateway speaks MCP as JSON-RPC 2.0 over an external transport. These
//! types cover exactly the frames probegate needs: the request/response pair,
//! the tool and resource descriptors advertised in listings, and the tool
//! output block that carries the gateway's `{ok, result, error}` envelope as
//! text content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision the gateway answers `initialize` with.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Error codes from the JSON-RPC 2.0 specification.
pub mod rpc_code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// One request frame from the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a call frame. Transports normally deserialize these off the
    /// wire; tests and in-process callers construct them directly.
    pub fn call(method: impl Into<String>, id: impl Into<Value>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }
}

/// One response frame back to the agent; exactly one of `result` and
/// `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFailure>,
}

impl RpcResponse {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(RpcFailure {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Protocol-level failure attached to a response frame. Tool-level failures
/// never use this; they travel inside the tool envelope instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFailure {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool advertised to the agent in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource advertised to the agent in `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Parameters of a `tools/call` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters of a `resources/read` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub uri: String,
}

/// What a tool call hands back: content blocks plus an error flag.
///
/// probegate tools serialise their whole response envelope into a single
/// text block, so `is_error` mirrors the envelope's `ok` field for
/// transports that only look at the flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// The first text block, where probegate tools put their envelope.
    pub fn first_text(&self) -> Option<&str> {
        self.content
            .first()
            .map(|ContentBlock::Text { text }| text.as_str())
    }
}

/// Content block inside a tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_request_call_frame_parses() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "http_request",
                "arguments": { "url": "https://api.example.com/v1/ping" }
            }
        }"#;
        let frame: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.method, "tools/call");

        let invocation: ToolInvocation =
            serde_json::from_value(frame.params.unwrap()).unwrap();
        assert_eq!(invocation.name, "http_request");
        assert_eq!(
            invocation.arguments["url"],
            "https://api.example.com/v1/ping"
        );
    }

    #[test]
    fn test_frame_without_id_or_params_is_accepted() {
        let frame: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "method": "tools/list"}"#).unwrap();
        assert!(frame.id.is_none());
        assert!(frame.params.is_none());
    }

    #[test]
    fn test_response_frames_are_exclusive() {
        let ok = RpcResponse::result(Some(1.into()), json!({ "tools": [] }));
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let failed = RpcResponse::failure(Some(1.into()), rpc_code::INVALID_PARAMS, "bad frame");
        assert!(!failed.is_success());
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().code, rpc_code::INVALID_PARAMS);
    }

    #[test]
    fn test_tool_output_carries_envelope_text() {
        let envelope = r#"{"ok":true,"result":{"status":200}}"#;
        let output = ToolOutput::text(envelope);
        assert!(!output.is_error);
        assert_eq!(output.first_text(), Some(envelope));

        // A successful output omits the flag on the wire entirely.
        let wire = serde_json::to_value(&output).unwrap();
        assert!(wire.get("isError").is_none());
        assert_eq!(wire["content"][0]["type"], "text");

        let failed = ToolOutput::error(r#"{"ok":false}"#);
        let wire = serde_json::to_value(&failed).unwrap();
        assert_eq!(wire["isError"], true);
    }

    #[test]
    fn test_descriptors_use_camel_case_keys() {
        let tool = ToolDescriptor {
            name: "create_target".into(),
            description: "Register a target endpoint".into(),
            input_schema: json!({ "type": "object" }),
        };
        let wire = serde_json::to_value(&tool).unwrap();
        assert!(wire.get("inputSchema").is_some());

        let resource = ResourceDescriptor {
            uri: "cookie-session://admin".into(),
            name: "Cookie Session: admin".into(),
            description: "admin session".into(),
            mime_type: "application/json".into(),
        };
        let wire = serde_json::to_value(&resource).unwrap();
        assert!(wire.get("mimeType").is_some());
    }
}
