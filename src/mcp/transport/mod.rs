//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all MCP transport
//! implementations satisfy, and the [`TransportFactory`] that turns a server
//! descriptor into a bound transport. Concrete implementations live in
//! submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`sse::SseTransport`] -- long-lived `text/event-stream` GET connection;
//!   outbound messages are POSTed to the endpoint the server announces.
//! - [`http::HttpTransport`] -- request/response HTTP; each message is a
//!   POST whose reply is JSON or a short event stream.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Lifecycle
//!
//! Construction performs no I/O. [`Transport::start`] spawns the process or
//! opens the stream, [`Transport::close`] releases it. Callers `send` a
//! serialized JSON-RPC string and `receive` a stream of serialized JSON-RPC
//! strings. The receive stream ends when the peer goes away; the client
//! treats that as an asynchronous fault.
//!
//! The `receive_err` stream carries transport-level diagnostics (e.g. stderr
//! output from a child process). Diagnostic output is never an error
//! condition.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::error::{BridgeError, Result};
use crate::mcp::config::{McpServerConfig, TransportKind};

pub mod http;
pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`; each
/// [`crate::mcp::client::McpClient`] exclusively owns one.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open the underlying process or connection.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the process cannot be spawned,
    /// the connection is refused, or the transport was already started.
    async fn start(&self) -> Result<()>;

    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport is responsible for framing (a trailing newline for
    /// stdio, an HTTP POST for the HTTP forms).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the transport is not running or
    /// the underlying I/O fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the remote peer
    /// disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries the child's stderr lines. For the
    /// HTTP forms it carries stream-level warnings.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Release the process or connection. Calling it twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Builds a bound, not-yet-started transport for a server descriptor.
///
/// The seam exists so the connection orchestrator can be driven by
/// in-process fakes in tests.
pub trait TransportFactory: Send + Sync {
    /// Create the transport selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the descriptor names no transport
    /// or carries a URL that does not parse.
    fn create(&self, server_name: &str, config: &McpServerConfig) -> Result<Arc<dyn Transport>>;
}

/// Factory for the real stdio, SSE, and HTTP transports.
///
/// Selection precedence is `url` (SSE), then `httpUrl` (HTTP), then
/// `command` (stdio).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mcp_bridge::mcp::config::McpServerConfig;
/// use mcp_bridge::mcp::transport::{DefaultTransportFactory, TransportFactory};
///
/// let factory = DefaultTransportFactory::new(Duration::from_secs(30));
/// let config = McpServerConfig {
///     command: Some("my-server".to_string()),
///     ..Default::default()
/// };
/// assert!(factory.create("local", &config).is_ok());
/// assert!(factory.create("empty", &McpServerConfig::default()).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    connect_timeout: Duration,
}

impl DefaultTransportFactory {
    /// Create a factory whose HTTP transports use `connect_timeout` for TCP
    /// connection setup unless the descriptor overrides it.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, server_name: &str, config: &McpServerConfig) -> Result<Arc<dyn Transport>> {
        let connect_timeout = config
            .connect_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);

        let kind = config.transport_kind().ok_or_else(|| {
            BridgeError::Config(format!(
                "MCP server '{}' has no transport: set one of `url`, `httpUrl`, or `command`",
                server_name
            ))
        })?;

        tracing::debug!(server = %server_name, transport = %kind, "Creating MCP transport");

        let transport: Arc<dyn Transport> = match kind {
            TransportKind::Sse(raw) => Arc::new(sse::SseTransport::new(
                parse_url(server_name, raw)?,
                config.headers.clone(),
                connect_timeout,
            )?),
            TransportKind::Http(raw) => Arc::new(http::HttpTransport::new(
                parse_url(server_name, raw)?,
                config.headers.clone(),
                connect_timeout,
            )?),
            TransportKind::Stdio(command) => Arc::new(stdio::StdioTransport::new(
                command.to_string(),
                config.args.clone(),
                config.env.clone(),
                config.cwd.clone(),
            )),
        };

        Ok(transport)
    }
}

fn parse_url(server_name: &str, raw: &str) -> Result<url::Url> {
    url::Url::parse(raw).map_err(|e| {
        BridgeError::Config(format!(
            "MCP server '{}' has an invalid URL '{}': {}",
            server_name, raw, e
        ))
        .into()
    })
}

/// Build a reqwest client shared by the HTTP transport forms.
///
/// No overall request timeout is set: the long-lived event stream must stay
/// open, and per-call deadlines are enforced by the client.
pub(crate) fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| BridgeError::Config(format!("failed to build HTTP client: {}", e)).into())
}

/// Turn a shared channel receiver into the pinned stream shape the
/// [`Transport`] trait returns.
pub(crate) fn channel_stream(
    rx: Arc<tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>>,
) -> Pin<Box<dyn Stream<Item = String> + Send + 'static>> {
    Box::pin(futures::stream::unfold(rx, |rx| async move {
        let mut guard = rx.lock().await;
        let item = guard.recv().await?;
        drop(guard);
        Some((item, rx))
    }))
}
