//! Per-server connection slots.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::errors::ServerFailure;
use super::session::BackendSession;
use super::types::ServerConfig;

/// The manager's record for one backend.
///
/// `is_connected` implies `session` is present and both capability lists
/// have been populated (from the backend or from fallback defaults).
pub struct ServerConnection {
    pub(crate) config: ServerConfig,
    pub(crate) is_connected: bool,
    pub(crate) is_healthy: bool,
    pub(crate) consecutive_health_failures: u32,
    pub(crate) last_health_check: Option<DateTime<Utc>>,
    pub(crate) supported_tools: Vec<String>,
    pub(crate) supported_resources: Vec<String>,
    pub(crate) session: Option<Arc<dyn BackendSession>>,
    /// Most recent connect failure, cleared on success.
    pub(crate) last_error: Option<ServerFailure>,
}

impl ServerConnection {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self {
            config,
            is_connected: false,
            is_healthy: false,
            consecutive_health_failures: 0,
            last_health_check: None,
            supported_tools: Vec::new(),
            supported_resources: Vec::new(),
            session: None,
            last_error: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn provides_tool(&self, tool: &str) -> bool {
        self.supported_tools.iter().any(|t| t == tool)
    }

    /// Whether `uri` starts with one of the advertised resource prefixes.
    pub(crate) fn provides_resource(&self, uri: &str) -> bool {
        self.supported_resources
            .iter()
            .any(|prefix| uri.starts_with(prefix.as_str()))
    }

    /// Install a freshly opened session.
    pub(crate) fn attach(
        &mut self,
        session: Arc<dyn BackendSession>,
        tools: Vec<String>,
        resources: Vec<String>,
    ) {
        self.session = Some(session);
        self.supported_tools = tools;
        self.supported_resources = resources;
        self.consecutive_health_failures = 0;
        self.last_error = None;
        self.is_connected = true;
    }

    /// Take the session out of the slot and mark it disconnected. Capability
    /// lists are left in place.
    pub(crate) fn detach(&mut self) -> Option<Arc<dyn BackendSession>> {
        self.is_connected = false;
        self.is_healthy = false;
        self.session.take()
    }

    pub(crate) fn clear_capabilities(&mut self) {
        self.supported_tools.clear();
        self.supported_resources.clear();
    }

    pub(crate) fn record_probe_success(&mut self, at: DateTime<Utc>) {
        self.is_healthy = true;
        self.consecutive_health_failures = 0;
        self.last_health_check = Some(at);
    }

    pub(crate) fn record_probe_failure(&mut self) {
        self.is_healthy = false;
        self.consecutive_health_failures = self.consecutive_health_failures.saturating_add(1);
    }

    pub(crate) fn snapshot(&self) -> ConnectionInfo {
        ConnectionInfo {
            name: self.config.name.clone(),
            is_http: self.config.is_http(),
            is_connected: self.is_connected,
            is_healthy: self.is_healthy,
            consecutive_health_failures: self.consecutive_health_failures,
            last_health_check: self.last_health_check,
            supported_tools: self.supported_tools.clone(),
            supported_resources: self.supported_resources.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of a connection slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub name: String,
    pub is_http: bool,
    pub is_connected: bool,
    pub is_healthy: bool,
    pub consecutive_health_failures: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub supported_tools: Vec<String>,
    pub supported_resources: Vec<String>,
    pub last_error: Option<ServerFailure>,
}
