//! Server Connection Manager: owns the connection slots, routes capability
//! lookups, and drives connect/reconnect and health checking.
//!
//! All state lives behind one async mutex. Connect and reconnect do their
//! I/O while holding it. Tool calls, resource reads and health probes clone
//! the slot's session handle and release the lock before talking to the
//! backend.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;

use super::access::ToolAccessControl;
use super::config;
use super::connection::{ConnectionInfo, ServerConnection};
use super::errors::{ManagerError, ServerFailure};
use super::health::{HealthReport, MonitorConfig, MonitorHandle};
use super::lifecycle::{self, BackendConnector, Connector};
use super::routing::RoutingIndex;
use super::session::BackendSession;
use super::settings::ManagerSettings;
use super::types::{ConnectSummary, ResourceContent, ServerConfig, ToolCallResult};

// ─── State ───────────────────────────────────────────────────────────────────

pub(crate) struct ManagerState {
    slots: Vec<ServerConnection>,
    routing: RoutingIndex,
    monitor: Option<MonitorHandle>,
    settings: ManagerSettings,
    access: ToolAccessControl,
}

impl ManagerState {
    fn find_mut(&mut self, name: &str) -> Option<&mut ServerConnection> {
        self.slots.iter_mut().find(|slot| slot.name() == name)
    }
}

pub(crate) struct ManagerInner {
    state: Mutex<ManagerState>,
    connector: Arc<dyn Connector>,
}

// ─── ServerConnectionManager ─────────────────────────────────────────────────

/// Handle to a set of backend servers. Cloning shares the same manager.
#[derive(Clone)]
pub struct ServerConnectionManager {
    inner: Arc<ManagerInner>,
}

impl Default for ServerConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConnectionManager {
    pub fn new() -> Self {
        Self::with_settings(ManagerSettings::default())
    }

    pub fn with_settings(settings: ManagerSettings) -> Self {
        Self::with_connector(settings, Arc::new(BackendConnector))
    }

    /// Use a custom connector for opening sessions.
    pub fn with_connector(settings: ManagerSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ManagerState {
                    slots: Vec::new(),
                    routing: RoutingIndex::new(),
                    monitor: None,
                    settings,
                    access: ToolAccessControl::default(),
                }),
                connector,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub async fn settings(&self) -> ManagerSettings {
        self.inner.state.lock().await.settings.clone()
    }

    // ─── Configuration ───────────────────────────────────────────────────

    /// Add every server from a config file. Partial success is success;
    /// a file yielding no servers is an error and leaves the client
    /// settings and tool access untouched.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<usize, ManagerError> {
        let path = path.as_ref();
        let parsed = config::parse_config_file(path)?;

        let mut added = 0;
        for server in &parsed.servers {
            match self.add(server).await {
                Ok(()) => added += 1,
                Err(e) => tracing::warn!(server = %server.name, error = %e, "skipping server"),
            }
        }

        if added == 0 {
            return Err(ManagerError::ServerNotFound {
                target: format!("any usable server in {}", path.display()),
            });
        }

        {
            let mut state = self.inner.state.lock().await;
            state.settings.apply_client_config(&parsed.client);
            if let Some(access) = parsed.tool_access {
                state.access = access;
            }
        }

        tracing::info!(
            path = %path.display(),
            added,
            skipped = parsed.skipped.len(),
            "loaded server config"
        );
        Ok(added)
    }

    /// Copy a config into a new, unconnected slot.
    pub async fn add(&self, config: &ServerConfig) -> Result<(), ManagerError> {
        if config.name.trim().is_empty() {
            return Err(ManagerError::InvalidParameter {
                reason: "server name is empty".into(),
            });
        }

        let mut state = self.inner.state.lock().await;
        if state.slots.iter().any(|slot| slot.name() == config.name) {
            return Err(ManagerError::InvalidParameter {
                reason: format!("server '{}' already exists", config.name),
            });
        }
        state.slots.push(ServerConnection::new(config.clone()));
        tracing::debug!(server = %config.name, index = state.slots.len() - 1, "server added");
        Ok(())
    }

    /// Remove a server by name, disconnecting it first.
    pub async fn remove(&self, name: &str) -> Result<(), ManagerError> {
        let mut state = self.inner.state.lock().await;
        let index = state
            .slots
            .iter()
            .position(|slot| slot.name() == name)
            .ok_or_else(|| ManagerError::ServerNotFound {
                target: name.to_string(),
            })?;

        let mut slot = state.slots.remove(index);
        state.routing.invalidate();
        lifecycle::teardown(&mut slot).await;
        tracing::info!(server = name, index, "server removed");
        Ok(())
    }

    pub async fn get_config(&self, name: &str) -> Result<ServerConfig, ManagerError> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.config.clone())
            .ok_or_else(|| ManagerError::ServerNotFound {
                target: name.to_string(),
            })
    }

    pub async fn get_config_by_index(&self, index: usize) -> Result<ServerConfig, ManagerError> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .get(index)
            .map(|slot| slot.config.clone())
            .ok_or_else(|| ManagerError::ServerNotFound {
                target: format!("index {index}"),
            })
    }

    pub async fn set_tool_access(&self, access: ToolAccessControl) {
        self.inner.state.lock().await.access = access;
    }

    pub async fn tool_access(&self) -> ToolAccessControl {
        self.inner.state.lock().await.access.clone()
    }

    // ─── Connections ─────────────────────────────────────────────────────

    /// Connect every unconnected server. Fails only if nothing ends up
    /// connected; individual failures are reported in the summary.
    pub async fn connect(&self) -> Result<ConnectSummary, ManagerError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let mut summary = ConnectSummary::default();
        if state.slots.is_empty() {
            return Ok(summary);
        }

        for slot in state.slots.iter_mut() {
            if slot.is_connected {
                summary.connected += 1;
                continue;
            }
            match lifecycle::connect_one(slot, self.inner.connector.as_ref(), &state.settings).await {
                Ok(()) => summary.connected += 1,
                Err(e) => {
                    tracing::warn!(server = %slot.name(), kind = ?e.kind(), error = %e, "failed to connect server");
                    let failure = ServerFailure::from_error(slot.name(), &e);
                    slot.last_error = Some(failure.clone());
                    summary.failed.push(failure);
                }
            }
        }
        state.routing.invalidate();

        if summary.connected == 0 {
            return Err(ManagerError::AllConnectionsFailed {
                failures: summary.failed,
            });
        }
        tracing::info!(
            connected = summary.connected,
            failed = summary.failed.len(),
            "connect finished"
        );
        Ok(summary)
    }

    /// Disconnect every server. Returns how many were connected.
    pub async fn disconnect(&self) -> Result<usize, ManagerError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let mut disconnected = 0;
        for slot in state.slots.iter_mut() {
            if slot.is_connected {
                disconnected += 1;
            }
            lifecycle::teardown(slot).await;
        }
        state.routing.invalidate();
        Ok(disconnected)
    }

    pub async fn count(&self) -> usize {
        self.inner.state.lock().await.slots.len()
    }

    pub async fn get_connection(&self, index: usize) -> Result<ConnectionInfo, ManagerError> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .get(index)
            .map(ServerConnection::snapshot)
            .ok_or_else(|| ManagerError::ServerNotFound {
                target: format!("index {index}"),
            })
    }

    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.inner.state.lock().await;
        state.slots.iter().map(ServerConnection::snapshot).collect()
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Index of the server providing `tool`, preferring connected servers.
    pub async fn select_server_for_tool(&self, tool: &str) -> Option<usize> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.routing.select_tool(tool, &state.slots)
    }

    /// Index of the server whose resource prefix matches `uri`.
    pub async fn select_server_for_resource(&self, uri: &str) -> Option<usize> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.routing.select_resource(uri, &state.slots)
    }

    /// Route and execute a tool call.
    ///
    /// Errors reported by the backend come back as an unsuccessful
    /// [`ToolCallResult`]; transport failures are returned as `Err`.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, ManagerError> {
        let (server, session, timeout) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            if !state.access.is_allowed(tool) {
                tracing::warn!(tool, "tool call blocked by access control");
                return Err(ManagerError::AccessDenied {
                    tool: tool.to_string(),
                });
            }
            let index = state
                .routing
                .select_tool(tool, &state.slots)
                .ok_or_else(|| ManagerError::UnknownTool {
                    name: tool.to_string(),
                })?;
            let (server, session) = live_session(&state.slots, index)?;
            (
                server,
                session,
                Duration::from_millis(state.settings.request_timeout_ms),
            )
        };

        let start = Instant::now();
        let outcome = session.call_tool(tool, arguments, timeout).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::debug!(server = %server, tool, execution_time_ms, "tool call succeeded");
                Ok(ToolCallResult {
                    tool_name: tool.to_string(),
                    server,
                    success: true,
                    result: Some(result),
                    error: None,
                    execution_time_ms,
                })
            }
            Err(e) if e.is_remote() => {
                tracing::debug!(server = %server, tool, error = %e, "tool call returned an error");
                Ok(ToolCallResult {
                    tool_name: tool.to_string(),
                    server,
                    success: false,
                    result: None,
                    error: Some(remote_error_message(&e)),
                    execution_time_ms,
                })
            }
            Err(e) => {
                tracing::warn!(server = %server, tool, error = %e, "tool call failed");
                Err(e)
            }
        }
    }

    /// Route and fetch a resource by URI prefix.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ManagerError> {
        let (server, session, timeout) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let index = state
                .routing
                .select_resource(uri, &state.slots)
                .ok_or_else(|| ManagerError::UnknownResource {
                    uri: uri.to_string(),
                })?;
            let (server, session) = live_session(&state.slots, index)?;
            (
                server,
                session,
                Duration::from_millis(state.settings.request_timeout_ms),
            )
        };

        let body = session.read_resource(uri, timeout).await?;
        Ok(ResourceContent {
            uri: uri.to_string(),
            server,
            mime_type: body.mime_type,
            content: body.content,
        })
    }

    // ─── Reconnection ────────────────────────────────────────────────────

    /// Reconnect one server. `max_attempts == 0` retries forever.
    pub async fn reconnect(
        &self,
        index: usize,
        max_attempts: u32,
        retry_interval_ms: u64,
    ) -> Result<(), ManagerError> {
        let name = {
            let state = self.inner.state.lock().await;
            let slot = state.slots.get(index).ok_or_else(|| ManagerError::ServerNotFound {
                target: format!("index {index}"),
            })?;
            if slot.is_connected {
                return Ok(());
            }
            slot.name().to_string()
        };
        self.reconnect_named(&name, max_attempts, retry_interval_ms)
            .await
    }

    /// Reconnect every disconnected server, one at a time.
    pub async fn reconnect_all(
        &self,
        max_attempts: u32,
        retry_interval_ms: u64,
    ) -> Result<(), ManagerError> {
        let names: Vec<String> = {
            let state = self.inner.state.lock().await;
            state
                .slots
                .iter()
                .filter(|slot| !slot.is_connected)
                .map(|slot| slot.name().to_string())
                .collect()
        };
        if names.is_empty() {
            return Ok(());
        }

        let mut failed = Vec::new();
        for name in &names {
            if let Err(e) = self
                .reconnect_named(name, max_attempts, retry_interval_ms)
                .await
            {
                tracing::warn!(server = %name, error = %e, "reconnect failed");
                failed.push(name.clone());
            }
        }

        if failed.is_empty() {
            tracing::info!(servers = names.len(), "all servers reconnected");
            Ok(())
        } else {
            Err(ManagerError::ReconnectIncomplete {
                attempted: names.len(),
                failed,
            })
        }
    }

    /// Reconnect loop. The slot is looked up by name on every attempt and
    /// the lock is released while sleeping between attempts.
    async fn reconnect_named(
        &self,
        name: &str,
        max_attempts: u32,
        retry_interval_ms: u64,
    ) -> Result<(), ManagerError> {
        let retry_interval = Duration::from_millis(retry_interval_ms);
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(retry_interval).await;
            }
            attempt += 1;

            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let slot = state
                .slots
                .iter_mut()
                .find(|slot| slot.name() == name)
                .ok_or_else(|| ManagerError::ServerNotFound {
                    target: name.to_string(),
                })?;
            if slot.is_connected {
                return Ok(());
            }

            lifecycle::teardown(slot).await;
            slot.clear_capabilities();
            state.routing.invalidate();

            match lifecycle::connect_one(slot, self.inner.connector.as_ref(), &state.settings).await {
                Ok(()) => {
                    tracing::info!(server = name, attempt, "server reconnected");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(server = name, attempt, max_attempts, error = %e, "reconnect attempt failed");
                    slot.last_error = Some(ServerFailure::from_error(name, &e));
                }
            }
            drop(guard);

            if max_attempts != 0 && attempt >= max_attempts {
                tracing::error!(server = name, attempts = attempt, "giving up on reconnect");
                return Err(ManagerError::ReconnectExhausted {
                    name: name.to_string(),
                    attempts: attempt,
                });
            }
        }
    }

    // ─── Health ──────────────────────────────────────────────────────────

    /// Probe every server once, tear down servers that keep failing, and
    /// try to reconnect the ones that are down.
    ///
    /// `max_attempts` is per server; `0` is treated as 1 so a pass always ends.
    pub async fn check_health(&self, max_attempts: u32, retry_interval_ms: u64) -> HealthReport {
        let mut report = HealthReport::new();

        let (targets, probe_timeout) = {
            let state = self.inner.state.lock().await;
            let targets: Vec<(String, Option<Arc<dyn BackendSession>>)> = state
                .slots
                .iter()
                .map(|slot| {
                    let session = if slot.is_connected {
                        slot.session.clone()
                    } else {
                        None
                    };
                    (slot.name().to_string(), session)
                })
                .collect();
            (targets, Duration::from_millis(state.settings.probe_timeout_ms))
        };
        report.checked = targets.len();

        let probes = targets.into_iter().map(|(name, session)| async move {
            let outcome = match &session {
                Some(session) => session.ping(probe_timeout).await,
                None => Err(ManagerError::NotConnected { name: name.clone() }),
            };
            (name, session, outcome)
        });
        let outcomes = futures::future::join_all(probes).await;

        let mut closing = Vec::new();
        let mut to_reconnect = Vec::new();
        {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let threshold = state.settings.unhealthy_threshold.max(1);
            let now = Utc::now();
            let mut topology_changed = false;

            for (name, probed, outcome) in outcomes {
                let Some(slot) = state.find_mut(&name) else {
                    continue;
                };
                // Skip slots that were reconnected or torn down mid-probe.
                let unchanged = match (&probed, &slot.session) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b) && slot.is_connected,
                    (None, _) => !slot.is_connected,
                    (Some(_), None) => false,
                };
                if !unchanged {
                    continue;
                }

                match outcome {
                    Ok(()) => {
                        slot.record_probe_success(now);
                        report.healthy.push(name);
                    }
                    Err(e) => {
                        slot.record_probe_failure();
                        tracing::warn!(
                            server = %name,
                            failures = slot.consecutive_health_failures,
                            error = %e,
                            "server unhealthy"
                        );
                        if slot.is_connected && slot.consecutive_health_failures >= threshold {
                            if let Some(session) = slot.detach() {
                                closing.push(session);
                            }
                            topology_changed = true;
                            report.torn_down.push(name.clone());
                        }
                        if !slot.is_connected {
                            to_reconnect.push(name.clone());
                        }
                        report.unhealthy.push(name);
                    }
                }
            }

            if topology_changed {
                state.routing.invalidate();
            }
        }

        for session in closing {
            session.close().await;
        }

        let max_attempts = max_attempts.max(1);
        for name in to_reconnect {
            match self
                .reconnect_named(&name, max_attempts, retry_interval_ms)
                .await
            {
                Ok(()) => {
                    // A fresh session that just answered its capability
                    // queries counts as a successful probe.
                    let mut state = self.inner.state.lock().await;
                    if let Some(slot) = state.find_mut(&name).filter(|slot| slot.is_connected) {
                        slot.record_probe_success(Utc::now());
                    }
                    report.reconnected.push(name);
                }
                Err(e) => {
                    tracing::debug!(server = %name, error = %e, "health reconnect failed");
                    report.reconnect_failed.push(name);
                }
            }
        }

        report
    }

    /// Start the background monitor. A running monitor is left as is.
    pub async fn start_health_check(
        &self,
        interval_ms: u64,
        max_attempts: u32,
        retry_interval_ms: u64,
    ) -> Result<(), ManagerError> {
        if interval_ms == 0 {
            return Err(ManagerError::InvalidParameter {
                reason: "health check interval must be positive".into(),
            });
        }
        tokio::runtime::Handle::try_current().map_err(|e| ManagerError::MonitorStart {
            reason: e.to_string(),
        })?;

        let mut state = self.inner.state.lock().await;
        if state.monitor.as_ref().is_some_and(MonitorHandle::is_running) {
            tracing::debug!("health monitor already running");
            return Ok(());
        }

        let max_attempts = if max_attempts == 0 {
            tracing::warn!("health monitor max_attempts of 0 would never finish a pass, using 1");
            1
        } else {
            max_attempts
        };
        let config = MonitorConfig {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
            retry_interval: Duration::from_millis(retry_interval_ms),
        };
        state.monitor = Some(MonitorHandle::spawn(Arc::downgrade(&self.inner), config));
        Ok(())
    }

    /// Stop the background monitor and wait for it to exit.
    pub async fn stop_health_check(&self) {
        let handle = self.inner.state.lock().await.monitor.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_health_check_running(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.monitor.as_ref().is_some_and(MonitorHandle::is_running)
    }

    pub async fn health_check_config(&self) -> Option<MonitorConfig> {
        let state = self.inner.state.lock().await;
        state.monitor.as_ref().map(MonitorHandle::config)
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Stop the monitor, disconnect everything and drop all slots.
    pub async fn destroy(&self) {
        self.stop_health_check().await;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        for slot in state.slots.iter_mut() {
            lifecycle::teardown(slot).await;
        }
        let dropped = state.slots.len();
        state.slots.clear();
        state.routing.invalidate();
        if dropped > 0 {
            tracing::info!(servers = dropped, "connection manager destroyed");
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Name and session of a routed slot, if it is connected.
fn live_session(
    slots: &[ServerConnection],
    index: usize,
) -> Result<(String, Arc<dyn BackendSession>), ManagerError> {
    let slot = slots.get(index).ok_or_else(|| ManagerError::Internal {
        reason: format!("routing returned out-of-range index {index}"),
    })?;
    match (&slot.session, slot.is_connected) {
        (Some(session), true) => Ok((slot.name().to_string(), session.clone())),
        _ => Err(ManagerError::NotConnected {
            name: slot.name().to_string(),
        }),
    }
}

fn remote_error_message(err: &ManagerError) -> String {
    match err {
        ManagerError::RpcError { code, message, .. } => format!("[{code}] {message}"),
        ManagerError::HttpStatus { status, body, .. } => format!("HTTP {status}: {body}"),
        other => other.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
