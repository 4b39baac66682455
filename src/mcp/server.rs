//! Per-connection request routing
//!
//! One [`McpRouter`] serves one agent connection: it owns that connection's
//! registered tools and resource providers and turns request frames into
//! response frames. Tool handlers fold their own failures into the
//! `{ok, error: {kind, ...}}` envelope; a handler that still returns `Err`
//! gets the same envelope built for it here, so protocol-level failures stay
//! reserved for malformed frames and unknown names.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::protocol::{
    rpc_code, ResourceDescriptor, ResourceRequest, RpcRequest, RpcResponse, ToolDescriptor,
    ToolInvocation, ToolOutput, PROTOCOL_VERSION,
};
use crate::{Error, Result};

/// A named gateway operation callable by the agent.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Stable snake_case name the tool is registered under.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the parameters, documenting the lenient forms.
    fn input_schema(&self) -> Value;

    /// Run the tool. The returned output carries the response envelope;
    /// implementations are expected not to fail.
    async fn execute(&self, arguments: Value) -> Result<ToolOutput>;
}

/// A read-only resource family, keyed by URI scheme.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// URI scheme this provider answers for, e.g. `cookie-session`.
    fn scheme(&self) -> &str;

    /// Declared resources currently available.
    async fn list(&self) -> Vec<ResourceDescriptor>;

    /// Read one resource by full URI.
    async fn read(&self, uri: &str) -> Result<Value>;
}

/// Routes one connection's frames to its tools and resources.
pub struct McpRouter {
    name: String,
    version: String,
    tools: RwLock<BTreeMap<String, Arc<dyn ToolHandler>>>,
    resources: RwLock<Vec<Arc<dyn ResourceProvider>>>,
}

impl McpRouter {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(Vec::new()),
        }
    }

    /// Register a tool under its own name; a later registration with the
    /// same name replaces the earlier one.
    pub fn register_tool(&self, tool: Arc<dyn ToolHandler>) {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        tools.insert(tool.name().to_string(), tool);
    }

    /// Register a resource provider for its URI scheme.
    pub fn register_resources(&self, provider: Arc<dyn ResourceProvider>) {
        let mut resources = self.resources.write().unwrap_or_else(|e| e.into_inner());
        resources.push(provider);
    }

    /// Turn one request frame into a response frame.
    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            id, method, params, ..
        } = request;
        match method.as_str() {
            "initialize" => self.describe(id),
            "notifications/initialized" | "initialized" => RpcResponse::result(id, json!({})),
            "tools/list" => self.list_tools(id),
            "tools/call" => self.call_tool(id, params).await,
            "resources/list" => self.list_resources(id).await,
            "resources/read" => self.read_resource(id, params).await,
            other => RpcResponse::failure(
                id,
                rpc_code::METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            ),
        }
    }

    fn describe(&self, id: Option<Value>) -> RpcResponse {
        RpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": self.name,
                    "version": self.version
                }
            }),
        )
    }

    fn list_tools(&self, id: Option<Value>) -> RpcResponse {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        // BTreeMap iteration keeps the listing in name order.
        let listed: Vec<ToolDescriptor> = tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        RpcResponse::result(id, json!({ "tools": listed }))
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> RpcResponse {
        let invocation: ToolInvocation = match params.map(serde_json::from_value).transpose() {
            Ok(Some(invocation)) => invocation,
            Ok(None) => {
                return RpcResponse::failure(
                    id,
                    rpc_code::INVALID_PARAMS,
                    "tools/call requires parameters",
                )
            }
            Err(e) => {
                return RpcResponse::failure(
                    id,
                    rpc_code::INVALID_PARAMS,
                    format!("malformed tools/call parameters: {e}"),
                )
            }
        };

        let handler = {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            tools.get(&invocation.name).cloned()
        };
        let Some(handler) = handler else {
            return RpcResponse::failure(
                id,
                rpc_code::METHOD_NOT_FOUND,
                format!("no such tool: {}", invocation.name),
            );
        };

        let output = handler
            .execute(invocation.arguments)
            .await
            .unwrap_or_else(|e| fault_output(&e));
        match serde_json::to_value(&output) {
            Ok(value) => RpcResponse::result(id, value),
            Err(e) => RpcResponse::failure(
                id,
                rpc_code::INTERNAL_ERROR,
                format!("tool output serialisation failed: {e}"),
            ),
        }
    }

    async fn list_resources(&self, id: Option<Value>) -> RpcResponse {
        let providers: Vec<Arc<dyn ResourceProvider>> = {
            let resources = self.resources.read().unwrap_or_else(|e| e.into_inner());
            resources.clone()
        };
        let mut listed: Vec<ResourceDescriptor> = Vec::new();
        for provider in providers {
            listed.extend(provider.list().await);
        }
        listed.sort_by(|a, b| a.uri.cmp(&b.uri));
        RpcResponse::result(id, json!({ "resources": listed }))
    }

    async fn read_resource(&self, id: Option<Value>, params: Option<Value>) -> RpcResponse {
        let Some(request) = params.and_then(|p| serde_json::from_value::<ResourceRequest>(p).ok())
        else {
            return RpcResponse::failure(
                id,
                rpc_code::INVALID_PARAMS,
                "resources/read requires a uri parameter",
            );
        };

        let scheme = request
            .uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .unwrap_or_default();
        let provider = {
            let resources = self.resources.read().unwrap_or_else(|e| e.into_inner());
            resources.iter().find(|p| p.scheme() == scheme).cloned()
        };
        let Some(provider) = provider else {
            return RpcResponse::failure(
                id,
                rpc_code::METHOD_NOT_FOUND,
                format!("no resource provider for scheme: {scheme}"),
            );
        };

        match provider.read(&request.uri).await {
            Ok(document) => RpcResponse::result(
                id,
                json!({
                    "contents": [{
                        "uri": request.uri,
                        "mimeType": "application/json",
                        "text": document.to_string()
                    }]
                }),
            ),
            Err(e) => {
                RpcResponse::failure(id, rpc_code::INTERNAL_ERROR, format!("{}: {e}", e.kind()))
            }
        }
    }
}

/// Fold a stray handler error into the standard response envelope, so the
/// agent sees the same `{ok: false, error: {kind, message}}` shape
/// everywhere.
fn fault_output(err: &Error) -> ToolOutput {
    ToolOutput::error(
        json!({
            "ok": false,
            "error": { "kind": err.kind(), "message": err.to_string() }
        })
        .to_string(),
    )
}
