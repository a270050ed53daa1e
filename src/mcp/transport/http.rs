//! Request/response HTTP transport for MCP (descriptor `httpUrl`)
//!
//! Every outbound JSON-RPC message is sent as an HTTP POST. The server may
//! reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- a short event stream carrying one or more
//!   JSON-RPC messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! When a response carries an `Mcp-Session-Id` header, the value is stored
//! and attached to every subsequent POST. On [`Transport::close`] an active
//! session is terminated with a best-effort HTTP DELETE.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{BridgeError, Result};
use crate::mcp::transport::sse::{is_ping, SseDecoder};
use crate::mcp::transport::{build_http_client, channel_stream, Transport};
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// Header carrying the server-assigned session identifier.
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Request/response HTTP transport.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use url::Url;
/// use mcp_bridge::mcp::transport::http::HttpTransport;
///
/// let transport = HttpTransport::new(
///     Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    /// MCP endpoint URL (POST target).
    endpoint: url::Url,
    /// Active session ID, populated from the first response that carries one.
    session_id: Arc<RwLock<Option<String>>>,
    /// Static headers attached verbatim to every request.
    headers: HashMap<String, String>,
    /// Sender for inbound messages; `None` after close.
    response_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// here.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client: build_http_client(connect_timeout)?,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx: std::sync::Mutex::new(Some(response_tx)),
            response_rx: Arc::new(Mutex::new(response_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The session identifier assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn inbound_sender(&self) -> Result<mpsc::UnboundedSender<String>> {
        self.response_tx
            .lock()
            .ok()
            .and_then(|tx| tx.clone())
            .ok_or_else(|| BridgeError::Transport("HTTP transport is closed".into()).into())
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    /// There is no long-lived connection to open; this only arms the
    /// transport so that `send` is accepted.
    async fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("HTTP transport is closed".into()).into());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Transport("HTTP transport already started".into()).into());
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("HTTP transport is not running".into()).into());
        }
        let response_tx = self.inbound_sender()?;

        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION)
            .body(message);

        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, id);
        }
        req = self.apply_headers(req);

        let response = req.send().await.map_err(|e| {
            let message = format!("HTTP POST to {} failed: {}", self.endpoint, e);
            anyhow::Error::new(e).context(BridgeError::Transport(message))
        })?;

        let status = response.status();

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(BridgeError::Transport(format!(
                "HTTP POST to {} returned status {}",
                self.endpoint, status
            ))
            .into());
        }

        if let Some(new_session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let mut sid = self.session_id.write().await;
            if sid.as_deref() != Some(new_session_id.as_str()) {
                tracing::debug!(endpoint = %self.endpoint, session = %new_session_id, "MCP session assigned");
                *sid = Some(new_session_id);
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let byte_stream = response.bytes_stream();
            let error_tx = self.error_tx.clone();
            tokio::spawn(async move {
                tokio::pin!(byte_stream);
                let mut decoder = SseDecoder::default();
                while let Some(chunk) = byte_stream.next().await {
                    let bytes = match chunk {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            let _ = error_tx.send(format!("response stream failed: {}", e));
                            break;
                        }
                    };
                    for event in decoder.push(&bytes) {
                        if event.kind() == "message" && !is_ping(&event) {
                            let _ = response_tx.send(event.data);
                        }
                    }
                }
                if let Some(event) = decoder.finish() {
                    if event.kind() == "message" && !is_ping(&event) {
                        let _ = response_tx.send(event.data);
                    }
                }
            });
        } else {
            let body = response.text().await.map_err(|e| {
                let message = format!("failed to read response body: {}", e);
                anyhow::Error::new(e).context(BridgeError::Transport(message))
            })?;
            let body = body.trim();
            if !body.is_empty() {
                let _ = response_tx.send(body.to_string());
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.response_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.error_rx))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut tx) = self.response_tx.lock() {
            tx.take();
        }

        let session = self.session_id.write().await.take();
        if let Some(sid) = session {
            let req = self
                .http_client
                .delete(self.endpoint.as_str())
                .header(SESSION_HEADER, sid.as_str())
                .timeout(Duration::from_secs(5));
            if let Err(e) = self.apply_headers(req).send().await {
                tracing::debug!(endpoint = %self.endpoint, "MCP session DELETE failed: {}", e);
            }
        }
        Ok(())
    }
}
