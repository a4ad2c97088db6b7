pub mod server_manager;

use std::path::{Path, PathBuf};

pub use server_manager::{ManagerError, ManagerSettings, ServerConfig, ServerConnectionManager};

/// Log file name inside the log directory.
const LOG_FILE_NAME: &str = "conductor.log";

/// Rotated log files kept next to the current one.
const LOG_KEEP: u32 = 3;

/// Return the platform-standard data directory for mcp-conductor.
///
/// - macOS: `~/Library/Application Support/mcp-conductor/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-conductor\`
/// - Linux: `$XDG_DATA_HOME/mcp-conductor/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-conductor/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-conductor");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-conductor")
}

/// Initialize the tracing subscriber, writing to `conductor.log` in `log_dir`
/// (the data directory when `None`).
///
/// Rotates existing logs first (conductor.log → .1 → .2 → .3) and flushes
/// every line. Returns the log file path.
pub fn init_tracing(log_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(data_dir);
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, LOG_KEEP);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_conductor=info,warn"));

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
    if installed.is_err() {
        return Err(std::io::Error::other("a global tracing subscriber is already set"));
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== mcp-conductor starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `conductor.log` → `conductor.log.1` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// log lines reach disk even if the process is killed.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
