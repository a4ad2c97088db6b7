#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use mcp_conductor::server_manager::ManagerSettings;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Settings with short timeouts so failing paths finish quickly.
pub fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        request_timeout_ms: 2_000,
        capability_timeout_ms: 1_000,
        spawn_grace_period_ms: 200,
        connect_timeout_ms: 1_000,
        probe_timeout_ms: 500,
        shutdown_timeout_ms: 500,
        ..ManagerSettings::default()
    }
}

/// A localhost port with nothing listening on it.
pub async fn closed_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

// ─── JSON-RPC over TCP ───────────────────────────────────────────────────────

/// Tool name the mock RPC server answers with a JSON-RPC error.
pub const RPC_ERROR_TOOL: &str = "explode";

/// Line-delimited JSON-RPC server on localhost.
pub struct MockRpcServer {
    pub port: u16,
    pub connections: Arc<AtomicUsize>,
    pub answer_pings: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Drop for MockRpcServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockRpcServer {
    pub async fn start(tools: &[&str], resources: &[&str]) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("bind rpc listener")?;
        let port = listener.local_addr()?.port();
        let connections = Arc::new(AtomicUsize::new(0));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let tools: Vec<String> = tools.iter().map(|s| s.to_string()).collect();
        let resources: Vec<String> = resources.iter().map(|s| s.to_string()).collect();

        let task = {
            let connections = connections.clone();
            let answer_pings = answer_pings.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_rpc(
                        stream,
                        tools.clone(),
                        resources.clone(),
                        answer_pings.clone(),
                    ));
                }
            })
        };

        Ok(Self {
            port,
            connections,
            answer_pings,
            task,
        })
    }
}

async fn serve_rpc(
    stream: TcpStream,
    tools: Vec<String>,
    resources: Vec<String>,
    answer_pings: Arc<AtomicBool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(req) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let Some(id) = req.get("id").cloned() else {
            continue;
        };
        let params = req.get("params").cloned().unwrap_or_default();
        let result = match req["method"].as_str().unwrap_or_default() {
            "initialize" => Ok(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "mock", "version": "0.0.0"},
                "capabilities": {},
            })),
            "tools/list" => Ok(serde_json::json!({
                "tools": tools.iter().map(|t| serde_json::json!({"name": t})).collect::<Vec<_>>(),
            })),
            "resources/list" => Ok(serde_json::json!({
                "resources": resources.iter().map(|r| serde_json::json!({"uri": r})).collect::<Vec<_>>(),
            })),
            "tools/call" if params["name"] == RPC_ERROR_TOOL => Err((-32000, "tool exploded")),
            "tools/call" => Ok(serde_json::json!({
                "content": [{"type": "text", "text": format!("called {}", params["name"].as_str().unwrap_or_default())}],
                "arguments": params["arguments"],
            })),
            "resources/read" => Ok(serde_json::json!({
                "contents": [{"uri": params["uri"], "mimeType": "text/plain", "text": "hello"}],
            })),
            "ping" if answer_pings.load(Ordering::SeqCst) => Ok(serde_json::json!({})),
            "ping" => continue,
            _ => Err((-32601, "Method not found")),
        };
        let reply = match result {
            Ok(result) => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => serde_json::json!({
                "jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message},
            }),
        };
        if write_half.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// A request as seen by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// `(status, content type, body)`
pub type MockResponse = (u16, &'static str, String);

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

/// Minimal HTTP/1.1 server answering one request per connection.
pub struct MockHttpServer {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockHttpServer {
    pub async fn start<F>(handler: F) -> anyhow::Result<Self>
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("bind http listener")?;
        let port = listener.local_addr()?.port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let task = {
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let requests = requests.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _ = serve_http(stream, requests, handler).await;
                    });
                }
            })
        };

        Ok(Self {
            port,
            requests,
            task,
        })
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_http(
    stream: TcpStream,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handler: Handler,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let request = RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let (status, content_type, body) = handler(&request);
    requests.lock().unwrap().push(request);

    let response = format!(
        "HTTP/1.1 {status} Mock\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    write_half.write_all(response.as_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}
