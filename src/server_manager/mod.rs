//! Server Connection Manager: routes tool calls and resource reads across
//! local process servers and remote HTTP servers.
//!
//! This module handles:
//! - Loading server definitions from a JSON config file
//! - Spawning process servers and speaking line-delimited JSON-RPC to them
//! - Talking to HTTP servers over a small REST surface
//! - Routing capability lookups to the first server that provides them
//! - Reconnecting failed servers and background health checking

pub mod access;
pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod http_client;
pub mod lifecycle;
pub mod manager;
pub mod process;
pub mod routing;
pub mod rpc_client;
pub mod session;
pub mod settings;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use access::ToolAccessControl;
pub use connection::ConnectionInfo;
pub use errors::{ErrorKind, ManagerError, ServerFailure};
pub use health::{HealthReport, MonitorConfig};
pub use lifecycle::{BackendConnector, Connector};
pub use manager::ServerConnectionManager;
pub use session::{BackendKind, BackendSession, ResourceBody};
pub use settings::ManagerSettings;
pub use types::{ConnectSummary, ResourceContent, ServerConfig, ServerTransport, ToolCallResult};
