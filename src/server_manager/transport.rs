//! Line-delimited JSON-RPC transport.
//!
//! One JSON object per line, over either a TCP stream or a child process's
//! stdin/stdout. Concurrent callers are served one round trip at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex};

use super::errors::ManagerError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse, RpcEndpoint};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Bi-directional JSON-RPC transport.
///
/// The reader lock is held for a request's whole round trip, so responses
/// are never consumed by another caller. The writer lock is only held while
/// a line is written, which lets `close` shut the write side down while a
/// request is still waiting for its response.
pub struct JsonRpcTransport {
    server_name: String,
    writer: Mutex<BoxedWriter>,
    reader: Mutex<BoxedReader>,
    closed: watch::Sender<bool>,
}

impl JsonRpcTransport {
    /// Wrap an arbitrary reader/writer pair.
    pub fn new<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let (closed, _) = watch::channel(false);
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Box::new(writer)),
            reader: Mutex::new(BufReader::new(reader)),
            closed,
        }
    }

    /// Transport over a child process's stdin/stdout.
    pub fn from_stdio(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(server_name, stdout, stdin)
    }

    /// Dial a TCP endpoint.
    pub async fn dial_tcp(
        server_name: &str,
        endpoint: &RpcEndpoint,
        timeout: Duration,
    ) -> Result<Self, ManagerError> {
        let addr = endpoint.to_string();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ManagerError::ConnectionFailed {
                name: server_name.to_string(),
                reason: format!("timed out dialing {addr}"),
            })?
            .map_err(|e| ManagerError::ConnectionFailed {
                name: server_name.to_string(),
                reason: format!("failed to dial {addr}: {e}"),
            })?;
        let _ = stream.set_nodelay(true);

        tracing::debug!(server = server_name, addr = %addr, "tcp transport connected");

        let (read_half, write_half) = stream.into_split();
        Ok(Self::new(server_name, read_half, write_half))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn transport_error(&self, reason: String) -> ManagerError {
        ManagerError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn closed_error(&self) -> ManagerError {
        self.transport_error("transport is closed".into())
    }

    async fn write_line(&self, line: &str) -> Result<(), ManagerError> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(self.closed_error());
        }
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush: {e}")))
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Lines that are not a response to this request (server log output,
    /// late responses to abandoned requests) are skipped. Closing the
    /// transport fails a pending request immediately.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, ManagerError> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow_and_update() {
            return Err(self.closed_error());
        }

        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let mut json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        let round_trip = async {
            let mut reader = self.reader.lock().await;
            self.write_line(&json).await?;
            self.read_response(&mut reader, id).await
        };

        tokio::select! {
            result = round_trip => result,
            _ = closed_rx.wait_for(|closed| *closed) => {
                tracing::debug!(server = %self.server_name, method, "request cancelled by close");
                Err(self.closed_error())
            }
        }
    }

    async fn read_response(
        &self,
        reader: &mut BoxedReader,
        id: u64,
    ) -> Result<JsonRpcResponse, ManagerError> {
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error("connection closed by server".into()));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(resp) => {
                    tracing::debug!(
                        server = %self.server_name,
                        expected = id,
                        got = resp.id,
                        "skipping response for another request"
                    );
                }
                Err(_) => {
                    tracing::trace!(server = %self.server_name, line = trimmed, "skipping non-response line");
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ManagerError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let mut json = serde_json::to_string(&notification)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        json.push('\n');

        self.write_line(&json).await
    }

    /// Fail pending requests and shut down the write side. Later requests
    /// fail immediately.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(server = %self.server_name, error = %e, "transport shutdown error");
        }
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `ManagerError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, ManagerError> {
    if let Some(err) = response.error {
        return Err(ManagerError::RpcError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(ManagerError::RpcError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_manager::types::JsonRpcError;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_success() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: Some(serde_json::json!({"text": "hello"})),
            error: None,
        };
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            ManagerError::RpcError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected RpcError, got {other:?}"),
        }
    }

    /// Echo server over an in-memory duplex: replies `{"ok": method}` after
    /// first emitting a log line and a response with a foreign id.
    fn spawn_duplex_server() -> JsonRpcTransport {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: serde_json::Value = serde_json::from_str(&line).unwrap();
                let Some(id) = req.get("id").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let noise = "server starting up\n{\"jsonrpc\":\"2.0\",\"id\":0,\"result\":{}}\n";
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"ok": req["method"]},
                });
                let out = format!("{noise}{reply}\n");
                if server_write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        JsonRpcTransport::new("duplex", client_read, client_write)
    }

    #[tokio::test]
    async fn test_request_skips_noise() {
        let transport = spawn_duplex_server();
        let resp = transport.request("ping", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["ok"], "ping");

        // Notifications produce no reply; the next request still matches.
        transport.notify("notifications/initialized", None).await.unwrap();
        let resp = transport.request("tools/list", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["ok"], "tools/list");
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let transport = spawn_duplex_server();
        transport.close().await;
        assert!(transport.is_closed());
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, ManagerError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_request() {
        // The peer stays open but never answers.
        let (client, _server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = std::sync::Arc::new(JsonRpcTransport::new("silent", client_read, client_write));

        let pending = tokio::spawn({
            let transport = transport.clone();
            async move { transport.request("tools/call", None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), transport.close())
            .await
            .expect("close must not wait for the pending request");
        let err = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("pending request must end on close")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ManagerError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_eof_is_transport_error() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        drop(server);
        let transport = JsonRpcTransport::new("gone", client_read, client_write);
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, ManagerError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = RpcEndpoint {
            host: "127.0.0.1".into(),
            port,
        };
        let result = JsonRpcTransport::dial_tcp("closed", &endpoint, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ManagerError::ConnectionFailed { .. })));
    }
}
