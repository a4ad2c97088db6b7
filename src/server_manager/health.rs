//! Background health monitor.
//!
//! One task per manager. It sleeps for the interval, runs a health pass,
//! and repeats until told to stop. The task only holds a weak reference to
//! the manager, so dropping every manager handle also ends it.

use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::manager::{ManagerInner, ServerConnectionManager};

/// Parameters of a running monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Reconnect attempts per failed server per pass. Always at least 1.
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

/// Outcome of one health pass.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    pub checked: usize,
    pub healthy: Vec<String>,
    pub unhealthy: Vec<String>,
    /// Connected servers torn down after too many failed probes.
    pub torn_down: Vec<String>,
    pub reconnected: Vec<String>,
    pub reconnect_failed: Vec<String>,
}

impl HealthReport {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Utc::now(),
            checked: 0,
            healthy: Vec::new(),
            unhealthy: Vec::new(),
            torn_down: Vec::new(),
            reconnected: Vec::new(),
            reconnect_failed: Vec::new(),
        }
    }

    /// Every checked server was healthy or came back.
    pub fn all_healthy(&self) -> bool {
        self.healthy.len() + self.reconnected.len() == self.checked
    }

    pub fn log(&self) {
        if self.checked == 0 {
            tracing::debug!("health check: no servers");
        } else if self.all_healthy() {
            tracing::info!(servers = self.checked, reconnected = ?self.reconnected, "health check: all servers healthy");
        } else {
            tracing::warn!(
                servers = self.checked,
                healthy = self.healthy.len(),
                unhealthy = ?self.unhealthy,
                torn_down = ?self.torn_down,
                reconnected = ?self.reconnected,
                reconnect_failed = ?self.reconnect_failed,
                "health check: degraded"
            );
        }
    }
}

// ─── Monitor Task ────────────────────────────────────────────────────────────

pub(crate) struct MonitorHandle {
    config: MonitorConfig,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn spawn(inner: Weak<ManagerInner>, config: MonitorConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(inner, config, stop_rx));
        tracing::info!(
            interval_ms = config.interval.as_millis() as u64,
            max_attempts = config.max_attempts,
            retry_interval_ms = config.retry_interval.as_millis() as u64,
            "health monitor started"
        );
        Self {
            config,
            stop_tx,
            task,
        }
    }

    pub(crate) fn config(&self) -> MonitorConfig {
        self.config
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the task and wait for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(()) => tracing::info!("health monitor stopped"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!(error = %e, "health monitor task failed"),
        }
    }
}

async fn run(inner: Weak<ManagerInner>, config: MonitorConfig, mut stop_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            changed = stop_rx.changed() => {
                // Sender dropped counts as a stop request too.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        }
        if *stop_rx.borrow() {
            break;
        }

        let Some(inner) = inner.upgrade() else {
            tracing::debug!("manager dropped, health monitor exiting");
            break;
        };
        let manager = ServerConnectionManager::from_inner(inner);
        let report = manager
            .check_health(config.max_attempts, config.retry_interval.as_millis() as u64)
            .await;
        report.log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_all_healthy() {
        let mut report = HealthReport::new();
        assert!(report.all_healthy());

        report.checked = 2;
        report.healthy.push("a".into());
        report.unhealthy.push("b".into());
        assert!(!report.all_healthy());

        report.reconnected.push("b".into());
        assert!(report.all_healthy());
    }
}
