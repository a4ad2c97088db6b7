//! JSON-RPC client for process backends.
//!
//! Wraps a [`JsonRpcTransport`] with the MCP method set and per-request
//! timeouts.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::errors::ManagerError;
use super::transport::{extract_result, JsonRpcTransport};
use super::types::{ClientIdentity, ListResourcesResult, ListToolsResult};

/// Protocol revision announced in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct RpcClient {
    transport: JsonRpcTransport,
    identity: ClientIdentity,
}

impl RpcClient {
    pub fn new(transport: JsonRpcTransport, identity: ClientIdentity) -> Self {
        Self {
            transport,
            identity,
        }
    }

    pub fn server_name(&self) -> &str {
        self.transport.server_name()
    }

    /// Send a request and unwrap its result, bounded by `timeout`.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        let response = tokio::time::timeout(timeout, self.transport.request(method, params))
            .await
            .map_err(|_| ManagerError::Timeout {
                server: self.server_name().to_string(),
                operation: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;
        extract_result(response)
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<T, ManagerError> {
        let value = self.call(method, None, timeout).await?;
        serde_json::from_value(value).map_err(|e| ManagerError::InvalidResponse {
            server: self.server_name().to_string(),
            reason: format!("failed to parse {method} result: {e}"),
        })
    }

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self, timeout: Duration) -> Result<serde_json::Value, ManagerError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.identity.name,
                "version": self.identity.version,
            },
        });
        let result = self.call("initialize", Some(params), timeout).await?;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(result)
    }

    /// Names of the tools the server advertises.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        let result: ListToolsResult = self.call_typed("tools/list", timeout).await?;
        Ok(result.tools.into_iter().map(|t| t.name).collect())
    }

    /// URIs of the resources the server advertises.
    pub async fn list_resources(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        let result: ListResourcesResult = self.call_typed("resources/list", timeout).await?;
        Ok(result.resources.into_iter().map(|r| r.uri).collect())
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.call("tools/call", Some(params), timeout).await
    }

    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        let params = serde_json::json!({ "uri": uri });
        self.call("resources/read", Some(params), timeout).await
    }

    pub async fn ping(&self, timeout: Duration) -> Result<(), ManagerError> {
        self.call("ping", None, timeout).await.map(|_| ())
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// In-memory server answering the MCP method set. `ping` never answers.
    fn spawn_client() -> RpcClient {
        let (client, server) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: serde_json::Value = serde_json::from_str(&line).unwrap();
                let Some(id) = req.get("id").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let reply = match req["method"].as_str().unwrap_or_default() {
                    "initialize" => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "client": req["params"]["clientInfo"]["name"],
                    }}),
                    "tools/list" => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {
                        "tools": [{"name": "echo", "inputSchema": {}}, {"name": "sum"}]
                    }}),
                    "resources/list" => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {
                        "resources": "not a list"
                    }}),
                    "tools/call" => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {
                        "echo": req["params"]["arguments"]
                    }}),
                    "ping" => continue,
                    _ => serde_json::json!({"jsonrpc": "2.0", "id": id, "error": {
                        "code": -32601, "message": "Method not found"
                    }}),
                };
                let out = format!("{reply}\n");
                if server_write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let transport = JsonRpcTransport::new("mem", client_read, client_write);
        RpcClient::new(
            transport,
            ClientIdentity {
                name: "conductor-test".into(),
                version: "0.0.1".into(),
            },
        )
    }

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_initialize_sends_identity() {
        let client = spawn_client();
        let result = client.initialize(TIMEOUT).await.unwrap();
        assert_eq!(result["client"], "conductor-test");
    }

    #[tokio::test]
    async fn test_list_tools_returns_names() {
        let client = spawn_client();
        let tools = client.list_tools(TIMEOUT).await.unwrap();
        assert_eq!(tools, vec!["echo", "sum"]);
    }

    #[tokio::test]
    async fn test_malformed_list_is_invalid_response() {
        let client = spawn_client();
        let err = client.list_resources(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_call_tool_and_remote_error() {
        let client = spawn_client();
        let result = client
            .call_tool("echo", serde_json::json!({"text": "hi"}), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result["echo"]["text"], "hi");

        let err = client.read_resource("file:///x", TIMEOUT).await.unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_unanswered_ping_times_out() {
        let client = spawn_client();
        let err = client.ping(Duration::from_millis(50)).await.unwrap_err();
        match err {
            ManagerError::Timeout { operation, timeout_ms, .. } => {
                assert_eq!(operation, "ping");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
