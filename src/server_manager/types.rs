//! Shared types for the server manager.
//!
//! JSON-RPC 2.0 message types, MCP list payloads, and server configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{ManagerError, ServerFailure};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Payloads ────────────────────────────────────────────────────────────

/// A tool entry in a `tools/list` result. Only the name is used for routing.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolEntry {
    pub name: String,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

/// A resource entry in a `resources/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub uri: String,
}

/// `resources/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResourcesResult {
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

/// Identity sent to process backends in the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientIdentity {
    pub name: String,
    pub version: String,
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// `host:port` a spawned server listens on for JSON-RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A locally spawned server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Working directory for the child process.
    pub cwd: Option<String>,
    /// TCP endpoint the process listens on. `None` means JSON-RPC over the
    /// child's stdin/stdout.
    pub endpoint: Option<RpcEndpoint>,
}

/// A remote HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// How to reach a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    Process(ProcessConfig),
    Http(HttpConfig),
}

/// Declarative description of one backend server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub transport: ServerTransport,
}

impl ServerConfig {
    /// A process backend speaking JSON-RPC over its stdio.
    pub fn process(name: &str, command: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            transport: ServerTransport::Process(ProcessConfig {
                command: command.to_string(),
                args,
                env: HashMap::new(),
                cwd: None,
                endpoint: None,
            }),
        }
    }

    /// An HTTP backend.
    pub fn http(name: &str, url: &str, api_key: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            transport: ServerTransport::Http(HttpConfig {
                url: url.to_string(),
                api_key: api_key.map(str::to_string),
            }),
        }
    }

    /// Set an environment variable (process backends only).
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        if let ServerTransport::Process(process) = &mut self.transport {
            process.env.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Make the process backend reachable over TCP instead of stdio.
    pub fn with_endpoint(mut self, host: &str, port: u16) -> Self {
        if let ServerTransport::Process(process) = &mut self.transport {
            process.endpoint = Some(RpcEndpoint {
                host: host.to_string(),
                port,
            });
        }
        self
    }

    pub fn is_http(&self) -> bool {
        matches!(self.transport, ServerTransport::Http(_))
    }

    /// Check that there is something to connect to.
    pub fn validate(&self) -> Result<(), ManagerError> {
        let missing = match &self.transport {
            ServerTransport::Process(p) => p.command.trim().is_empty(),
            ServerTransport::Http(h) => h.url.trim().is_empty(),
        };
        if missing {
            return Err(ManagerError::ConfigInvalid {
                name: self.name.clone(),
                reason: "neither a command nor a URL is configured".into(),
            });
        }
        Ok(())
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Result of a tool call execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub server: String,
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Content fetched from a resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContent {
    pub uri: String,
    pub server: String,
    pub mime_type: String,
    pub content: serde_json::Value,
}

/// Outcome of a bulk connect that reached at least one server.
#[derive(Debug, Clone, Default)]
pub struct ConnectSummary {
    /// Servers connected after the call, including ones already connected.
    pub connected: usize,
    /// Servers that could not be connected, in slot order.
    pub failed: Vec<ServerFailure>,
}

impl ConnectSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_manager::errors::ErrorKind;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_list_payloads_ignore_extra_fields() {
        let tools: ListToolsResult = serde_json::from_str(
            r#"{"tools": [{"name": "echo", "description": "Echo", "inputSchema": {}}]}"#,
        )
        .unwrap();
        assert_eq!(tools.tools[0].name, "echo");

        let resources: ListResourcesResult =
            serde_json::from_str(r#"{"resources": [{"uri": "file:///tmp", "name": "tmp"}]}"#)
                .unwrap();
        assert_eq!(resources.resources[0].uri, "file:///tmp");
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::process("fs", "node", vec!["server.js".into()])
            .with_env("DEBUG", "1")
            .with_endpoint("127.0.0.1", 8080);
        assert!(!config.is_http());
        match &config.transport {
            ServerTransport::Process(p) => {
                assert_eq!(p.env.get("DEBUG").map(String::as_str), Some("1"));
                assert_eq!(p.endpoint.as_ref().unwrap().to_string(), "127.0.0.1:8080");
            }
            ServerTransport::Http(_) => panic!("expected process transport"),
        }

        let config = ServerConfig::http("remote", "http://localhost:9000", Some("key"));
        assert!(config.is_http());
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        let err = ServerConfig::process("fs", "  ", vec![]).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = ServerConfig::http("remote", "", None).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        assert!(ServerConfig::process("fs", "node", vec![]).validate().is_ok());
    }
}
