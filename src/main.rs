//! mcp-conductor: connect to the configured servers and keep them healthy
//! until interrupted.
//!
//! Usage: `mcp-conductor [servers.json]` (or set `MCP_CONDUCTOR_CONFIG`).
//! Runtime settings come from the YAML file named by `MCP_CONDUCTOR_SETTINGS`.
//! Logs go to `MCP_CONDUCTOR_LOG_DIR` or the platform data directory.

use std::path::PathBuf;

use anyhow::{bail, Context};
use mcp_conductor::server_manager::{ManagerSettings, ServerConnectionManager};

const CONFIG_ENV_VAR: &str = "MCP_CONDUCTOR_CONFIG";
const LOG_DIR_ENV_VAR: &str = "MCP_CONDUCTOR_LOG_DIR";

fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Ok(PathBuf::from(arg));
    }
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => bail!("no config file given (pass a path or set {CONFIG_ENV_VAR})"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config_path()?;
    let settings = ManagerSettings::from_env().context("failed to load settings")?;

    let log_dir = std::env::var_os(LOG_DIR_ENV_VAR).map(PathBuf::from);
    let log_path = mcp_conductor::init_tracing(log_dir.as_deref()).context("failed to initialize logging")?;
    eprintln!("logging to {}", log_path.display());

    let health = settings.health_check.clone();
    let manager = ServerConnectionManager::with_settings(settings);

    let added = manager
        .load(&config)
        .await
        .with_context(|| format!("failed to load {}", config.display()))?;

    match manager.connect().await {
        Ok(summary) => {
            for failure in &summary.failed {
                tracing::warn!(server = %failure.name, kind = ?failure.kind, reason = %failure.reason, "server unavailable");
            }
            eprintln!("connected {} of {added} servers", summary.connected);
        }
        Err(e) => {
            // Keep running: the monitor may bring servers up later.
            tracing::error!(error = %e, "no server could be connected");
            eprintln!("warning: {e}");
        }
    }

    for info in manager.connections().await {
        tracing::info!(
            server = %info.name,
            connected = info.is_connected,
            tools = ?info.supported_tools,
            resources = ?info.supported_resources,
            "routing table entry"
        );
    }

    if health.enabled {
        manager
            .start_health_check(health.interval_ms, health.max_attempts, health.retry_interval_ms)
            .await
            .context("failed to start health monitor")?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    manager.destroy().await;
    Ok(())
}
