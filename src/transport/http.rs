//! HTTP/SSE transport for MCP upstream servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, header};
use serde_json::Value;
use tracing::{debug, warn};

use super::Transport;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId};
use crate::{Error, Result};

/// HTTP transport for MCP servers, speaking either streamable-HTTP or SSE.
pub struct HttpTransport {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    request_id: AtomicU64,
    connected: AtomicBool,
}

impl HttpTransport {
    /// Create a transport targeting `url`, with static `headers` applied to
    /// every request and `timeout` bounding each HTTP round trip.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the underlying HTTP client cannot be built.
    pub fn new(url: &str, headers: HashMap<String, String>, timeout: Duration) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("building upstream HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            headers,
            session_id: RwLock::new(None),
            request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }))
    }

    /// Build the `initialize` request body used at handshake time.
    #[must_use]
    pub fn initialize_request(client_name: &str, client_version: &str) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            method: "initialize".to_string(),
            params: Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": client_name,
                    "version": client_version,
                }
            })),
        }
    }

    /// Mark the transport connected. Callers that drive the handshake
    /// themselves (e.g. the Health Monitor, which needs per-step failure
    /// classification) call this once `initialize` + `notifications/initialized`
    /// both succeed.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        debug!(url = %self.url, "HTTP transport initialized");
    }

    /// The upstream-assigned `mcp-session-id`, if the handshake has completed.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::ACCEPT, "application/json, text/event-stream".parse().unwrap());
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());

        if let Some(ref session_id) = *self.session_id.read() {
            headers.insert("mcp-session-id", session_id.parse().unwrap());
        }

        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            }
        }

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                *self.session_id.write() = Some(id.to_string());
            }
        }

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(Error::AuthFailed(format!("upstream {} rejected credentials", self.url)));
        }
        if !status.is_success() {
            return Err(Error::Upstream(format!("HTTP {status} from {}", self.url)));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if content_type.contains("text/event-stream") {
            self.parse_sse_response(response).await
        } else {
            response.json().await.map_err(|e| Error::Upstream(e.to_string()))
        }
    }

    async fn parse_sse_response(&self, response: reqwest::Response) -> Result<JsonRpcResponse> {
        let text = response.text().await.map_err(|e| Error::Upstream(e.to_string()))?;
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                return serde_json::from_str(data).map_err(|e| Error::Protocol(e.to_string()));
            }
        }
        Err(Error::Protocol("no data line in SSE response".to_string()))
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::Relaxed) as i64)
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::UpstreamTimeout(e.to_string())
    } else {
        Error::Upstream(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params,
        };
        self.send_request(&request).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());
        if let Some(ref session_id) = *self.session_id.read() {
            headers.insert("mcp-session-id", session_id.parse().unwrap());
        }

        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                key.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            }
        }

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&notification)
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %self.url, "notification failed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        let session_id = self.session_id.read().clone();
        if let Some(id) = session_id {
            let _ = self.client.delete(&self.url).header("mcp-session-id", id).send().await;
        }
        Ok(())
    }
}
