//! JSON-RPC 2.0 router shared by the HTTP and stdio transports.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::tools::{ToolError, ToolName, Toolbox, tool_definitions};

pub const MCP_PROTOCOL_VERSION: &str = "2024-09";
pub const MCP_SERVER_NAME: &str = "mcp-orchestrator";

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const PARSE_ERROR: i64 = -32700;
pub const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn invalid_request(detail: Option<&str>) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "Invalid Request".to_string(),
            data: detail.map(|detail| json!({ "detail": detail })),
        }
    }

    pub fn missing_content_length() -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "Missing Content-Length".to_string(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    fn unknown_tool(name: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Method not found: {name}"),
            data: Some(json!({ "name": name })),
        }
    }

    fn unknown_method(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("Unknown method: {method}"),
            data: None,
        }
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let detail = err.to_string();
        let data = match err.http_status() {
            Some(status) => json!({ "status": status, "detail": detail }),
            None => json!({ "detail": detail }),
        };
        Self {
            code: SERVER_ERROR,
            message: "Internal MCP error".to_string(),
            data: Some(data),
        }
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// An object whose `id` is absent or null. Dispatched but never answered.
pub fn is_notification(message: &Value) -> bool {
    message
        .as_object()
        .is_some_and(|obj| obj.get("id").is_none_or(Value::is_null))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcMethod {
    Initialize,
    ToolsList,
    ToolsCall,
}

impl RpcMethod {
    fn parse(method: &str) -> Option<Self> {
        match method {
            "initialize" => Some(RpcMethod::Initialize),
            "tools/list" => Some(RpcMethod::ToolsList),
            "tools/call" => Some(RpcMethod::ToolsCall),
            _ => None,
        }
    }
}

pub struct McpServer {
    toolbox: Arc<Toolbox>,
}

impl McpServer {
    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }

    pub fn toolbox(&self) -> &Arc<Toolbox> {
        &self.toolbox
    }

    /// Decode a raw body and route it. Undecodable input yields a parse error.
    pub async fn handle_bytes(&self, body: &[u8]) -> Value {
        match serde_json::from_slice::<Value>(body) {
            Ok(message) => self.handle(message).await,
            Err(err) => {
                tracing::debug!(event = "rpc_parse_error", error = %err);
                error_response(Value::Null, RpcError::parse_error())
            }
        }
    }

    /// Route one decoded message. Never fails; every outcome is an envelope.
    pub async fn handle(&self, incoming: Value) -> Value {
        let Some(obj) = incoming.as_object() else {
            return error_response(
                Value::Null,
                RpcError::invalid_request(Some("Request must be a JSON object")),
            );
        };

        let id = obj.get("id").cloned().unwrap_or(Value::Null);
        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return error_response(id, RpcError::invalid_request(Some("jsonrpc must be '2.0'")));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            return error_response(
                id,
                RpcError::invalid_request(Some("method must be a string")),
            );
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match self.handle_request(method, params).await {
            Ok(result) => success_response(id, result),
            Err(err) => error_response(id, err),
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match RpcMethod::parse(method) {
            Some(RpcMethod::Initialize) => Ok(self.initialize_payload()),
            Some(RpcMethod::ToolsList) => Ok(self.tools_list_payload()),
            Some(RpcMethod::ToolsCall) => self.handle_tools_call(params).await,
            None => Err(RpcError::unknown_method(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": true, "resources": false, "prompts": false },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_request(Some("tools/call requires string field 'name'")))?;

        let args = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(RpcError::invalid_request(Some(
                    "tools/call arguments must be an object",
                )));
            }
        };

        let Some(tool) = ToolName::parse(name) else {
            return Err(RpcError::unknown_tool(name));
        };

        match self.toolbox.call(tool, &args).await {
            Ok(result) => {
                tracing::info!(event = "tool_call", tool = tool.as_str(), ok = true);
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(event = "tool_call", tool = tool.as_str(), ok = false, error = %err);
                Err(err.into())
            }
        }
    }
}
