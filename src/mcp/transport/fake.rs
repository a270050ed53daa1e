//! In-process fake transport for MCP unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. The transport goes into the code under test; the test keeps the
//! handle to read what the client sent (`handle.outbound_rx`) and inject
//! what the server says (`handle.inbound_tx`). Dropping `inbound_tx` ends
//! the client's inbound stream, which simulates the server going away.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -------------------> inbound_rx  (client receive())
//! ```
//!
//! [`serve`] runs a scripted server on a handle so tests only describe how
//! each request is answered.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{channel_stream, Transport};

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    diagnostics_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    start_error: Option<(std::io::ErrorKind, String)>,
    started: AtomicBool,
    closed: Arc<AtomicBool>,
}

/// Test-side half of a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages to deliver to the client.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl FakeTransportHandle {
    /// Whether the client closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The close flag, for tests that hand the handle to [`serve`].
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (_diagnostics_tx, diagnostics_rx) = mpsc::unbounded_channel::<String>();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            diagnostics_rx: Arc::new(Mutex::new(diagnostics_rx)),
            start_error: None,
            started: AtomicBool::new(false),
            closed: Arc::clone(&closed),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            closed,
        };
        (transport, handle)
    }

    /// A transport whose `start` fails with the given I/O error kind, the
    /// way a refused connection or missing executable would.
    pub fn failing(kind: std::io::ErrorKind, message: &str) -> (Self, FakeTransportHandle) {
        let (mut transport, handle) = Self::new();
        transport.start_error = Some((kind, message.to_string()));
        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn start(&self) -> Result<()> {
        if let Some((kind, message)) = &self.start_error {
            let io = std::io::Error::new(*kind, message.clone());
            return Err(anyhow::Error::new(io)
                .context(BridgeError::Transport(format!("fake start failed: {}", message))));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Transport("fake transport already started".into()).into());
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("fake transport is closed".into()).into());
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| BridgeError::Transport("fake outbound channel closed".into()).into())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.inbound_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.diagnostics_rx))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// How a scripted server answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send `{"result": value}`.
    Result(Value),
    /// Send a JSON-RPC error object.
    Error(i64, String),
    /// Never answer.
    Silence,
}

/// Run a scripted server on `handle` in a background task.
///
/// `respond` is called with the method and params of every request (not
/// notifications). The task ends when the client side hangs up, which also
/// drops `inbound_tx` and ends the client's inbound stream.
pub fn serve<F>(handle: FakeTransportHandle, respond: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(&str, &Value) -> Reply + Send + 'static,
{
    let FakeTransportHandle {
        mut outbound_rx,
        inbound_tx,
        ..
    } = handle;

    tokio::spawn(async move {
        while let Some(raw) = outbound_rx.recv().await {
            let Ok(msg) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let method = msg["method"].as_str().unwrap_or_default().to_string();
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            let response = match respond(&method, &params) {
                Reply::Result(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                Reply::Error(code, message) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": code, "message": message }
                }),
                Reply::Silence => continue,
            };
            if inbound_tx.send(response.to_string()).is_err() {
                break;
            }
        }
    })
}

/// The `initialize` result a well-behaved server returns.
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": crate::mcp::types::LATEST_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "fake", "version": "0.0.1" }
    })
}

/// A responder that completes the handshake and lists `tools`.
pub fn tool_server(tools: Value) -> impl Fn(&str, &Value) -> Reply + Send + 'static {
    move |method: &str, _params: &Value| match method {
        "initialize" => Reply::Result(initialize_result()),
        "tools/list" => Reply::Result(json!({ "tools": tools.clone() })),
        _ => Reply::Error(-32601, format!("Method not found: {}", method)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_dropping_inbound_tx_ends_stream() {
        let (transport, handle) = FakeTransport::new();
        handle.inbound_tx.send("one".to_string()).unwrap();
        drop(handle);
        let mut stream = transport.receive();
        assert_eq!(stream.next().await.as_deref(), Some("one"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_failing_start_keeps_io_kind() {
        let (transport, _handle) =
            FakeTransport::failing(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = transport.start().await.unwrap_err();
        let io = err
            .chain()
            .find_map(|c| c.downcast_ref::<std::io::Error>())
            .unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_close_is_visible_on_handle() {
        let (transport, handle) = FakeTransport::new();
        assert!(!handle.is_closed());
        transport.close().await.unwrap();
        assert!(handle.is_closed());
        assert!(transport.send("x".into()).await.is_err());
    }
}
