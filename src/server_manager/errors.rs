//! Server manager error types.

use thiserror::Error;

/// Coarse error categories surfaced to callers.
///
/// Every [`ManagerError`] maps to exactly one kind via [`ManagerError::kind`].
/// Callers that only care about "what class of failure was this" should
/// match on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required argument was empty or out of range.
    InvalidParameter,
    /// Allocation failure. Rust aborts on OOM, so this is never produced;
    /// it exists so the category set stays closed and stable.
    MemoryAllocation,
    /// The configuration parsed but is semantically incomplete.
    ConfigInvalid,
    /// Transport, HTTP, or client construction failed.
    ConnectionFailed,
    /// The server process failed to spawn or exited prematurely.
    ProcessFailed,
    /// A name, index, tool, or resource lookup missed.
    ServerNotFound,
    /// The background health monitor could not be started.
    ThreadCreation,
    /// The tool is blocked by the access control policy.
    PermissionDenied,
    /// Invariant violation or unexpected remote state.
    Internal,
}

/// Per-server failure recorded during a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub name: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl ServerFailure {
    pub fn from_error(name: &str, err: &ManagerError) -> Self {
        Self {
            name: name.to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Errors that can occur during server manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A required argument was missing, empty, or out of range.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        reason: String,
    },

    /// A server configuration cannot be connected as written.
    #[error("invalid config for server '{name}': {reason}")]
    ConfigInvalid {
        name: String,
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("config file '{path}': {reason}")]
    ConfigFile {
        path: String,
        reason: String,
    },

    /// The server process could not be spawned.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The server process exited during the startup grace period.
    #[error("server '{name}' exited prematurely (exit code {code:?}){stderr}")]
    ProcessExited {
        name: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Transport, HTTP client, or RPC client construction failed.
    #[error("connection to server '{name}' failed: {reason}")]
    ConnectionFailed {
        name: String,
        reason: String,
    },

    /// I/O or framing error on an established transport.
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// A request did not complete within its timeout.
    #[error("{operation} on server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    RpcError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// HTTP backend returned a non-success status.
    #[error("server '{server}' returned HTTP {status}: {body}")]
    HttpStatus {
        server: String,
        status: u16,
        body: String,
    },

    /// Response payload did not have the expected shape.
    #[error("unexpected response from server '{server}': {reason}")]
    InvalidResponse {
        server: String,
        reason: String,
    },

    /// No server slot matches the given name or index.
    #[error("server not found: {target}")]
    ServerNotFound {
        target: String,
    },

    /// No server advertises the tool.
    #[error("no server provides tool '{name}'")]
    UnknownTool {
        name: String,
    },

    /// No server advertises a prefix of the resource URI.
    #[error("no server provides resource '{uri}'")]
    UnknownResource {
        uri: String,
    },

    /// The routed server has no live session.
    #[error("server '{name}' is not connected")]
    NotConnected {
        name: String,
    },

    /// Bulk connect produced zero successes.
    #[error("failed to connect to any of {} servers", failures.len())]
    AllConnectionsFailed {
        failures: Vec<ServerFailure>,
    },

    /// All reconnect attempts for a server were exhausted.
    #[error("server '{name}' failed to reconnect after {attempts} attempts")]
    ReconnectExhausted {
        name: String,
        attempts: u32,
    },

    /// Some disconnected servers could not be recovered.
    #[error("reconnected {} of {attempted} servers (failed: {})", attempted - failed.len(), failed.join(", "))]
    ReconnectIncomplete {
        attempted: usize,
        failed: Vec<String>,
    },

    /// Tool blocked by the access control policy.
    #[error("access to tool '{tool}' is denied")]
    AccessDenied {
        tool: String,
    },

    /// The health monitor task could not be started.
    #[error("failed to start health monitor: {reason}")]
    MonitorStart {
        reason: String,
    },

    /// Invariant violation.
    #[error("internal error: {reason}")]
    Internal {
        reason: String,
    },
}

impl ManagerError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::ConfigInvalid { .. } | Self::ConfigFile { .. } => ErrorKind::ConfigInvalid,
            Self::SpawnFailed { .. } | Self::ProcessExited { .. } => ErrorKind::ProcessFailed,
            Self::ConnectionFailed { .. }
            | Self::TransportError { .. }
            | Self::Timeout { .. }
            | Self::NotConnected { .. }
            | Self::AllConnectionsFailed { .. }
            | Self::ReconnectExhausted { .. }
            | Self::ReconnectIncomplete { .. } => ErrorKind::ConnectionFailed,
            Self::ServerNotFound { .. }
            | Self::UnknownTool { .. }
            | Self::UnknownResource { .. } => ErrorKind::ServerNotFound,
            Self::AccessDenied { .. } => ErrorKind::PermissionDenied,
            Self::MonitorStart { .. } => ErrorKind::ThreadCreation,
            Self::RpcError { .. }
            | Self::HttpStatus { .. }
            | Self::InvalidResponse { .. }
            | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the backend answered, but with an error payload.
    ///
    /// Remote errors leave the connection usable; everything else about a
    /// failed call points at the transport or at the caller.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RpcError { .. } | Self::HttpStatus { .. })
    }
}
