//! Connection lifecycle: open a backend, learn its capabilities, tear it down.
//!
//! Opening is behind the [`Connector`] trait so the manager can be driven
//! against in-process fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::connection::ServerConnection;
use super::errors::ManagerError;
use super::http_client::HttpClient;
use super::process::{self, ChildProcess};
use super::rpc_client::RpcClient;
use super::session::{BackendSession, HttpSession, ProcessSession};
use super::settings::ManagerSettings;
use super::transport::JsonRpcTransport;
use super::types::{HttpConfig, ProcessConfig, ServerConfig, ServerTransport};

// ─── Connector ───────────────────────────────────────────────────────────────

/// Opens a session for a validated server config.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        config: &ServerConfig,
        settings: &ManagerSettings,
    ) -> Result<Arc<dyn BackendSession>, ManagerError>;
}

/// Spawns processes and builds HTTP clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendConnector;

#[async_trait]
impl Connector for BackendConnector {
    async fn open(
        &self,
        config: &ServerConfig,
        settings: &ManagerSettings,
    ) -> Result<Arc<dyn BackendSession>, ManagerError> {
        match &config.transport {
            ServerTransport::Http(http) => open_http(&config.name, http, settings),
            ServerTransport::Process(process) => {
                open_process(&config.name, process, settings).await
            }
        }
    }
}

fn open_http(
    name: &str,
    config: &HttpConfig,
    settings: &ManagerSettings,
) -> Result<Arc<dyn BackendSession>, ManagerError> {
    let client = HttpClient::new(
        name,
        &config.url,
        config.api_key.as_deref(),
        Duration::from_millis(settings.connect_timeout_ms),
    )?;
    tracing::info!(server = name, url = %config.url, "http client ready");
    Ok(Arc::new(HttpSession::new(client)))
}

/// Spawn, survive the grace period, open the transport, then handshake.
async fn open_process(
    name: &str,
    config: &ProcessConfig,
    settings: &ManagerSettings,
) -> Result<Arc<dyn BackendSession>, ManagerError> {
    let (child, stdio) = ChildProcess::spawn(name, config)?;

    let grace = Duration::from_millis(settings.spawn_grace_period_ms);
    if child.wait(grace).await {
        let stderr = process::read_stderr_on_failure(stdio.stderr).await;
        let code = child.exit_code().await;
        tracing::error!(server = name, exit_code = ?code, stderr = %stderr.trim(), "server exited during startup");
        return Err(ManagerError::ProcessExited {
            name: name.to_string(),
            code,
            stderr: process::format_stderr_suffix(&stderr),
        });
    }
    process::drain_stderr(name, stdio.stderr);

    let transport = match &config.endpoint {
        Some(endpoint) => {
            JsonRpcTransport::dial_tcp(name, endpoint, Duration::from_millis(settings.connect_timeout_ms))
                .await
        }
        None => match (stdio.stdin, stdio.stdout) {
            (Some(stdin), Some(stdout)) => Ok(JsonRpcTransport::from_stdio(name, stdin, stdout)),
            _ => Err(ManagerError::ConnectionFailed {
                name: name.to_string(),
                reason: "failed to capture stdio".into(),
            }),
        },
    };
    let transport = match transport {
        Ok(transport) => transport,
        Err(e) => {
            child.terminate(Duration::ZERO).await;
            return Err(e);
        }
    };

    let client = RpcClient::new(transport, settings.client_identity());
    if let Err(e) = client
        .initialize(Duration::from_millis(settings.capability_timeout_ms))
        .await
    {
        tracing::warn!(server = name, error = %e, "initialize handshake failed, continuing");
    }

    let shutdown_grace = if config.endpoint.is_some() {
        Duration::ZERO
    } else {
        Duration::from_millis(settings.shutdown_timeout_ms)
    };
    Ok(Arc::new(ProcessSession::new(child, client, shutdown_grace)))
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Capability lists learned during connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub tools: Vec<String>,
    pub resources: Vec<String>,
    /// Whether either list came from the fallback defaults.
    pub used_fallback: bool,
}

/// Query tools and resources, substituting the fallback list for whichever
/// query fails.
pub async fn query_capabilities(
    name: &str,
    session: &dyn BackendSession,
    is_http: bool,
    settings: &ManagerSettings,
) -> Capabilities {
    let timeout = Duration::from_millis(settings.capability_timeout_ms);
    let fallback = settings.fallback_for(is_http);
    let mut used_fallback = false;

    let tools = match session.list_tools(timeout).await {
        Ok(tools) => tools,
        Err(e) => {
            tracing::warn!(server = name, error = %e, "tool listing failed, using default tools");
            used_fallback = true;
            fallback.tools.clone()
        }
    };
    let resources = match session.list_resources(timeout).await {
        Ok(resources) => resources,
        Err(e) => {
            tracing::warn!(server = name, error = %e, "resource listing failed, using default resources");
            used_fallback = true;
            fallback.resources.clone()
        }
    };

    Capabilities {
        tools,
        resources,
        used_fallback,
    }
}

// ─── Slot Operations ─────────────────────────────────────────────────────────

/// Connect one slot. A connected slot is left untouched.
pub async fn connect_one(
    slot: &mut ServerConnection,
    connector: &dyn Connector,
    settings: &ManagerSettings,
) -> Result<(), ManagerError> {
    if slot.is_connected {
        return Ok(());
    }
    slot.config.validate()?;

    let name = slot.config.name.clone();
    let session = connector.open(&slot.config, settings).await?;
    let caps = query_capabilities(&name, session.as_ref(), slot.config.is_http(), settings).await;

    tracing::info!(
        server = %name,
        tools = caps.tools.len(),
        resources = caps.resources.len(),
        fallback = caps.used_fallback,
        "server connected"
    );
    slot.attach(session, caps.tools, caps.resources);
    Ok(())
}

/// Close a slot's session, if any, and mark it disconnected.
pub async fn teardown(slot: &mut ServerConnection) {
    if let Some(session) = slot.detach() {
        session.close().await;
        tracing::info!(server = %slot.config.name, "server disconnected");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
