//! REST client for HTTP backends.
//!
//! Paths are resolved relative to the configured base URL:
//! `GET tools`, `GET resources`, `POST tools/{name}`, `GET resources/{uri}`
//! and `GET ping`. Path parameters are percent-encoded as single segments.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};

use super::errors::ManagerError;

/// Raw HTTP exchange result.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON, or as a JSON string if it does not parse.
    pub fn json_or_text(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body.clone()))
    }
}

pub struct HttpClient {
    server_name: String,
    base: Url,
    api_key: Option<String>,
    http: Client,
}

impl HttpClient {
    /// Validate the base URL and build the underlying client.
    pub fn new(
        server_name: &str,
        url: &str,
        api_key: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self, ManagerError> {
        let connection_failed = |reason: String| ManagerError::ConnectionFailed {
            name: server_name.to_string(),
            reason,
        };

        let base = Url::parse(url).map_err(|e| connection_failed(format!("invalid URL '{url}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(connection_failed(format!("unsupported URL '{url}'")));
        }

        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| connection_failed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            server_name: server_name.to_string(),
            base,
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Append path segments to the base URL.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ManagerError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| ManagerError::Internal {
                reason: format!("base URL '{}' cannot take a path", self.base),
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Perform one request and return status and body, whatever the status.
    pub async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<HttpResponse, ManagerError> {
        let url = self.endpoint(segments)?;
        let operation = format!("{method} {}", segments.join("/"));

        let mut request = self.http.request(method, url).timeout(timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.request_error(&operation, timeout, e))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(&operation, timeout, e))?;

        tracing::trace!(server = %self.server_name, operation = %operation, status, "http exchange");

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    fn request_error(&self, operation: &str, timeout: Duration, e: reqwest::Error) -> ManagerError {
        if e.is_timeout() {
            ManagerError::Timeout {
                server: self.server_name.clone(),
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            ManagerError::TransportError {
                server: self.server_name.clone(),
                reason: format!("{operation}: {e}"),
            }
        }
    }

    fn require_success(&self, response: HttpResponse) -> Result<HttpResponse, ManagerError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ManagerError::HttpStatus {
                server: self.server_name.clone(),
                status: response.status,
                body: response.body,
            })
        }
    }

    async fn get_list(&self, segment: &str, key: &str, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        let response = self.send(Method::GET, &[segment], None, timeout).await?;
        let response = self.require_success(response)?;
        parse_name_list(&response.body, key).ok_or_else(|| ManagerError::InvalidResponse {
            server: self.server_name.clone(),
            reason: format!("GET {segment} did not return a list"),
        })
    }

    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.get_list("tools", "name", timeout).await
    }

    pub async fn list_resources(&self, timeout: Duration) -> Result<Vec<String>, ManagerError> {
        self.get_list("resources", "uri", timeout).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ManagerError> {
        let response = self
            .send(Method::POST, &["tools", name], Some(params), timeout)
            .await?;
        Ok(self.require_success(response)?.json_or_text())
    }

    /// Fetch a resource. Returns the content type (if any) and the body.
    pub async fn get_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<(Option<String>, serde_json::Value), ManagerError> {
        let response = self
            .send(Method::GET, &["resources", uri], None, timeout)
            .await?;
        let response = self.require_success(response)?;
        let content = response.json_or_text();
        Ok((response.content_type, content))
    }

    /// Healthy only on exactly 200.
    pub async fn ping(&self, timeout: Duration) -> Result<(), ManagerError> {
        let response = self.send(Method::GET, &["ping"], None, timeout).await?;
        if response.status == StatusCode::OK.as_u16() {
            Ok(())
        } else {
            Err(ManagerError::HttpStatus {
                server: self.server_name.clone(),
                status: response.status,
                body: response.body,
            })
        }
    }
}

/// Accept `["a", "b"]` or `[{"<key>": "a"}, ...]`, optionally wrapped as
/// `{"tools": [...]}` / `{"resources": [...]}`.
fn parse_name_list(body: &str, key: &str) -> Option<Vec<String>> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let items = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.values().find_map(|v| v.as_array())?,
        _ => return None,
    };
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Object(obj) => {
                    obj.get(key).and_then(|v| v.as_str()).map(str::to_string)
                }
                _ => None,
            })
            .collect(),
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────
