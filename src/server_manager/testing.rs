//! In-process connector and session fakes for manager tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::errors::ManagerError;
use super::lifecycle::Connector;
use super::session::{BackendKind, BackendSession, ResourceBody};
use super::settings::ManagerSettings;
use super::types::ServerConfig;

/// Tool name that makes a mock session answer with a protocol-level error.
pub const REMOTE_ERROR_TOOL: &str = "fail_remote";
/// Tool name that makes a mock session fail at the transport.
pub const TRANSPORT_ERROR_TOOL: &str = "fail_transport";

/// How a mock server responds.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// `None` makes the listing fail.
    pub tools: Option<Vec<String>>,
    pub resources: Option<Vec<String>>,
    /// Every open fails.
    pub always_fail: bool,
    /// The first N opens fail.
    pub fail_first: usize,
}

impl MockBehavior {
    pub fn serving(tools: &[&str], resources: &[&str]) -> Self {
        Self {
            tools: Some(tools.iter().map(|s| s.to_string()).collect()),
            resources: Some(resources.iter().map(|s| s.to_string()).collect()),
            always_fail: false,
            fail_first: 0,
        }
    }

    /// Opens fine but never answers capability queries.
    pub fn silent() -> Self {
        Self {
            tools: None,
            resources: None,
            always_fail: false,
            fail_first: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::serving(&[], &[])
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

struct MockServer {
    behavior: MockBehavior,
    attempts: usize,
    ping_ok: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MockServer {
    fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            attempts: 0,
            ping_ok: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Connector whose servers are described by [`MockBehavior`]. Unknown
/// names serve no capabilities.
#[derive(Default)]
pub struct MockConnector {
    servers: Mutex<HashMap<String, MockServer>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_server<T>(&self, name: &str, f: impl FnOnce(&mut MockServer) -> T) -> T {
        let mut servers = self.servers.lock().unwrap();
        let server = servers
            .entry(name.to_string())
            .or_insert_with(|| MockServer::new(MockBehavior::serving(&[], &[])));
        f(server)
    }

    pub fn set(&self, name: &str, behavior: MockBehavior) {
        self.with_server(name, |s| s.behavior = behavior);
    }

    /// Number of `open` calls for `name`.
    pub fn attempts(&self, name: &str) -> usize {
        self.with_server(name, |s| s.attempts)
    }

    /// Number of session closes for `name`.
    pub fn closed(&self, name: &str) -> usize {
        self.with_server(name, |s| s.closed.load(Ordering::SeqCst))
    }

    /// Number of tool calls and resource reads served for `name`.
    pub fn calls(&self, name: &str) -> usize {
        self.with_server(name, |s| s.calls.load(Ordering::SeqCst))
    }

    /// Make pings for `name` succeed or fail, including on open sessions.
    pub fn set_ping(&self, name: &str, ok: bool) {
        self.with_server(name, |s| s.ping_ok.store(ok, Ordering::SeqCst));
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        config: &ServerConfig,
        _settings: &ManagerSettings,
    ) -> Result<Arc<dyn BackendSession>, ManagerError> {
        self.with_server(&config.name, |server| {
            server.attempts += 1;
            let fail = server.behavior.always_fail || server.attempts <= server.behavior.fail_first;
            if fail {
                return Err(if config.is_http() {
                    ManagerError::ConnectionFailed {
                        name: config.name.clone(),
                        reason: "mock refused".into(),
                    }
                } else {
                    ManagerError::ProcessExited {
                        name: config.name.clone(),
                        code: Some(1),
                        stderr: String::new(),
                    }
                });
            }
            let session: Arc<dyn BackendSession> = Arc::new(MockSession {
                name: config.name.clone(),
                kind: if config.is_http() {
                    BackendKind::Http
                } else {
                    BackendKind::Process
                },
                tools: server.behavior.tools.clone(),
                resources: server.behavior.resources.clone(),
                ping_ok: server.ping_ok.clone(),
                closed: server.closed.clone(),
                calls: server.calls.clone(),
            });
            Ok(session)
        })
    }
}

pub struct MockSession {
    name: String,
    kind: BackendKind,
    tools: Option<Vec<String>>,
    resources: Option<Vec<String>>,
    ping_ok: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl MockSession {
    fn unreachable(&self, what: &str) -> ManagerError {
        ManagerError::TransportError {
            server: self.name.clone(),
            reason: format!("mock {what} unavailable"),
        }
    }
}

#[async_trait]
impl BackendSession for MockSession {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn list_tools(&self, _timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.tools.clone().ok_or_else(|| self.unreachable("tools"))
    }

    async fn list_resources(&self, _timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.resources.clone().ok_or_else(|| self.unreachable("resources"))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match name {
            REMOTE_ERROR_TOOL => Err(ManagerError::RpcError {
                code: -32000,
                message: "tool failed".into(),
                data: None,
            }),
            TRANSPORT_ERROR_TOOL => Err(self.unreachable("transport")),
            _ => Ok(serde_json::json!({
                "server": self.name,
                "tool": name,
                "arguments": arguments,
            })),
        }
    }

    async fn read_resource(&self, uri: &str, _timeout: Duration) -> Result<ResourceBody, ManagerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResourceBody {
            mime_type: "text/plain".into(),
            content: serde_json::Value::String(format!("{}:{uri}", self.name)),
        })
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), ManagerError> {
        if self.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.unreachable("ping"))
        }
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
