//! Runtime settings for the connection manager.
//!
//! Loaded from an optional YAML file (`MCP_CONDUCTOR_SETTINGS`). Every field
//! has a default, so an empty file or no file at all is a valid setup.

use std::path::Path;

use serde::Deserialize;

use super::config::{interpolate_env_vars, ClientConfig};
use super::errors::ManagerError;
use super::types::ClientIdentity;

/// Environment variable naming the settings file.
pub const SETTINGS_ENV_VAR: &str = "MCP_CONDUCTOR_SETTINGS";

/// Capability lists assumed when a backend cannot be queried.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FallbackCapabilities {
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Health monitor parameters used by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_health_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_health_interval_ms(),
            max_attempts: default_health_max_attempts(),
            retry_interval_ms: default_health_retry_interval_ms(),
        }
    }
}

/// Manager-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManagerSettings {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Timeout for tool calls and resource reads.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for capability queries during connect. Kept short so a silent
    /// backend falls back to the default lists quickly.
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    /// How long a freshly spawned process must stay alive.
    #[serde(default = "default_spawn_grace_period_ms")]
    pub spawn_grace_period_ms: u64,
    /// TCP dial and HTTP connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for a single health probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Grace period between closing a process's transport and killing it.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Consecutive failed probes after which a connected slot is torn down.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_process_fallback")]
    pub process_fallback: FallbackCapabilities,
    #[serde(default = "default_http_fallback")]
    pub http_fallback: FallbackCapabilities,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_capability_timeout_ms() -> u64 {
    5_000
}
fn default_spawn_grace_period_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_shutdown_timeout_ms() -> u64 {
    2_000
}
fn default_unhealthy_threshold() -> u32 {
    3
}
fn default_health_interval_ms() -> u64 {
    30_000
}
fn default_health_max_attempts() -> u32 {
    3
}
fn default_health_retry_interval_ms() -> u64 {
    1_000
}

fn default_process_fallback() -> FallbackCapabilities {
    FallbackCapabilities {
        tools: vec!["echo".into(), "ping".into()],
        resources: vec!["example://hello".into(), "example://data".into()],
    }
}

fn default_http_fallback() -> FallbackCapabilities {
    FallbackCapabilities {
        tools: vec!["echo".into(), "ping".into(), "http_tool".into()],
        resources: vec![
            "http://example".into(),
            "http://data".into(),
            "http://image".into(),
        ],
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            client_version: default_client_version(),
            request_timeout_ms: default_request_timeout_ms(),
            capability_timeout_ms: default_capability_timeout_ms(),
            spawn_grace_period_ms: default_spawn_grace_period_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            process_fallback: default_process_fallback(),
            http_fallback: default_http_fallback(),
            health_check: HealthCheckSettings::default(),
        }
    }
}

impl ManagerSettings {
    /// Parse settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ManagerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ManagerError::ConfigFile {
            path: path.display().to_string(),
            reason: format!("failed to read: {e}"),
        })?;
        Self::from_yaml(&raw).map_err(|reason| ManagerError::ConfigFile {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Load from `MCP_CONDUCTOR_SETTINGS` if set, otherwise use defaults.
    pub fn from_env() -> Result<Self, ManagerError> {
        match std::env::var(SETTINGS_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    fn from_yaml(raw: &str) -> Result<Self, String> {
        let interpolated = interpolate_env_vars(raw);
        if interpolated.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&interpolated).map_err(|e| format!("failed to parse settings: {e}"))
    }

    /// Overlay the `clientConfig` section of a server config file.
    pub fn apply_client_config(&mut self, client: &ClientConfig) {
        if let Some(name) = &client.client_name {
            self.client_name = name.clone();
        }
        if let Some(version) = &client.client_version {
            self.client_version = version.clone();
        }
        if let Some(timeout) = client.request_timeout_ms {
            self.request_timeout_ms = timeout;
        }
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
        }
    }

    pub fn fallback_for(&self, is_http: bool) -> &FallbackCapabilities {
        if is_http {
            &self.http_fallback
        } else {
            &self.process_fallback
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
