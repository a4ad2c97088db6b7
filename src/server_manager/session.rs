//! Live backend sessions.
//!
//! A connected slot holds exactly one session: a spawned process with its
//! JSON-RPC client, or an HTTP client. The manager shares sessions as
//! `Arc<dyn BackendSession>` so calls and probes can run without holding
//! the manager lock.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::ManagerError;
use super::http_client::HttpClient;
use super::process::ChildProcess;
use super::rpc_client::RpcClient;

/// Which protocol a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Process,
    Http,
}

/// Resource payload returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBody {
    pub mime_type: String,
    pub content: serde_json::Value,
}

#[async_trait]
pub trait BackendSession: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<String>, ManagerError>;

    async fn list_resources(&self, timeout: Duration) -> Result<Vec<String>, ManagerError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError>;

    async fn read_resource(&self, uri: &str, timeout: Duration) -> Result<ResourceBody, ManagerError>;

    /// Lightweight reachability check.
    async fn ping(&self, timeout: Duration) -> Result<(), ManagerError>;

    /// Release the session's handles. Safe to call more than once.
    async fn close(&self);
}

// ─── Process ─────────────────────────────────────────────────────────────────

/// A spawned server and the JSON-RPC client talking to it.
pub struct ProcessSession {
    process: ChildProcess,
    client: RpcClient,
    /// Time the process gets to exit after its transport closes.
    shutdown_grace: Duration,
}

impl ProcessSession {
    pub fn new(process: ChildProcess, client: RpcClient, shutdown_grace: Duration) -> Self {
        Self {
            process,
            client,
            shutdown_grace,
        }
    }
}

#[async_trait]
impl BackendSession for ProcessSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.client.list_tools(timeout).await
    }

    async fn list_resources(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.client.list_resources(timeout).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        self.client.call_tool(name, arguments, timeout).await
    }

    async fn read_resource(&self, uri: &str, timeout: Duration) -> Result<ResourceBody, ManagerError> {
        let content = self.client.read_resource(uri, timeout).await?;
        let mime_type = content
            .get("contents")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("mimeType"))
            .and_then(|m| m.as_str())
            .unwrap_or("application/json")
            .to_string();
        Ok(ResourceBody { mime_type, content })
    }

    async fn ping(&self, timeout: Duration) -> Result<(), ManagerError> {
        if !self.process.is_running().await {
            return Err(ManagerError::ProcessExited {
                name: self.client.server_name().to_string(),
                code: self.process.exit_code().await,
                stderr: String::new(),
            });
        }
        self.client.ping(timeout).await
    }

    /// Close the RPC client and transport first, then stop the process.
    async fn close(&self) {
        self.client.close().await;
        self.process.terminate(self.shutdown_grace).await;
    }
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

pub struct HttpSession {
    client: HttpClient,
}

impl HttpSession {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackendSession for HttpSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.client.list_tools(timeout).await
    }

    async fn list_resources(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.client.list_resources(timeout).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        self.client.call_tool(name, &arguments, timeout).await
    }

    async fn read_resource(&self, uri: &str, timeout: Duration) -> Result<ResourceBody, ManagerError> {
        let (content_type, content) = self.client.get_resource(uri, timeout).await?;
        let mime_type = content_type.unwrap_or_else(|| {
            if content.is_string() {
                "text/plain".to_string()
            } else {
                "application/json".to_string()
            }
        });
        Ok(ResourceBody { mime_type, content })
    }

    async fn ping(&self, timeout: Duration) -> Result<(), ManagerError> {
        self.client.ping(timeout).await
    }

    async fn close(&self) {
        tracing::debug!(url = %self.client.base_url(), "closing http session");
    }
}
