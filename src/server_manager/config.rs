//! Server configuration file loading.
//!
//! Reads a JSON file with an `mcpServers` map (plus optional `clientConfig`
//! and `toolAccessControl` sections) and resolves environment variables.
//! A malformed server entry is skipped with a warning; only an unreadable
//! file or a missing `mcpServers` map fails the whole load.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::access::ToolAccessControl;
use super::errors::ManagerError;
use super::types::{HttpConfig, ProcessConfig, RpcEndpoint, ServerConfig, ServerTransport};

const DEFAULT_ENDPOINT_HOST: &str = "127.0.0.1";

// ─── Public Types ────────────────────────────────────────────────────────────

/// `clientConfig` section. Absent fields leave the active settings unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_version: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Everything parsed out of one config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Valid server entries, in file order.
    pub servers: Vec<ServerConfig>,
    /// Names of entries that were skipped as malformed.
    pub skipped: Vec<String>,
    pub client: ClientConfig,
    pub tool_access: Option<ToolAccessControl>,
}

// ─── Raw File Shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerEntry {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolAccess {
    #[serde(default = "default_allow")]
    default_allow: bool,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    disallowed_tools: Vec<String>,
}

fn default_allow() -> bool {
    true
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load and parse a server configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn parse_config_file(path: &Path) -> Result<ConfigFile, ManagerError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ManagerError::ConfigFile {
        path: path.display().to_string(),
        reason: format!("failed to read: {e}"),
    })?;
    parse_config_str(&raw, &path.display().to_string())
}

/// Parse config text. `origin` is only used in error messages.
pub fn parse_config_str(raw: &str, origin: &str) -> Result<ConfigFile, ManagerError> {
    let file_error = |reason: String| ManagerError::ConfigFile {
        path: origin.to_string(),
        reason,
    };

    let interpolated = interpolate_env_vars(raw);
    let root: Value = serde_json::from_str(&interpolated)
        .map_err(|e| file_error(format!("invalid JSON: {e}")))?;

    let servers = root
        .get("mcpServers")
        .ok_or_else(|| file_error("mcpServers not found".into()))?
        .as_object()
        .ok_or_else(|| file_error("mcpServers is not an object".into()))?;

    let mut parsed = ConfigFile::default();
    for (name, entry) in servers {
        match parse_server_entry(name, entry) {
            Ok(config) => {
                tracing::debug!(server = %name, http = config.is_http(), "parsed server entry");
                parsed.servers.push(config);
            }
            Err(reason) => {
                tracing::warn!(server = %name, reason = %reason, "skipping malformed server entry");
                parsed.skipped.push(name.clone());
            }
        }
    }

    if let Some(client) = root.get("clientConfig") {
        match ClientConfig::deserialize(client) {
            Ok(client) => parsed.client = client,
            Err(e) => tracing::warn!(error = %e, "ignoring malformed clientConfig"),
        }
    }

    if let Some(access) = root.get("toolAccessControl") {
        match RawToolAccess::deserialize(access) {
            Ok(raw) => {
                tracing::info!(
                    default_allow = raw.default_allow,
                    allowed = raw.allowed_tools.len(),
                    disallowed = raw.disallowed_tools.len(),
                    "loaded tool access control"
                );
                parsed.tool_access = Some(ToolAccessControl::from_lists(
                    raw.default_allow,
                    &raw.allowed_tools,
                    &raw.disallowed_tools,
                ));
            }
            Err(e) => tracing::warn!(error = %e, "ignoring malformed toolAccessControl"),
        }
    }

    Ok(parsed)
}

/// Convert one `mcpServers` entry. `url` wins over `command`.
fn parse_server_entry(name: &str, entry: &Value) -> Result<ServerConfig, String> {
    if name.trim().is_empty() {
        return Err("empty server name".into());
    }
    if !entry.is_object() {
        return Err("entry is not an object".into());
    }
    let raw = RawServerEntry::deserialize(entry).map_err(|e| e.to_string())?;

    let transport = match (raw.url, raw.command) {
        (Some(url), _) if !url.trim().is_empty() => ServerTransport::Http(HttpConfig {
            url,
            api_key: raw.api_key.filter(|k| !k.is_empty()),
        }),
        (_, Some(command)) if !command.trim().is_empty() => {
            let endpoint = match (raw.host, raw.port) {
                (host, Some(port)) => Some(RpcEndpoint {
                    host: host.unwrap_or_else(|| DEFAULT_ENDPOINT_HOST.to_string()),
                    port,
                }),
                (Some(_), None) => return Err("host given without port".into()),
                (None, None) => None,
            };
            ServerTransport::Process(ProcessConfig {
                command,
                args: raw.args,
                env: raw.env,
                cwd: raw.cwd,
                endpoint,
            })
        }
        _ => return Err("neither url nor command is set".into()),
    };

    Ok(ServerConfig {
        name: name.to_string(),
        transport,
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
pub(crate) fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
