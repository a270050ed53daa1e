//! Capability client: one MCP session over one transport
//!
//! [`McpClient`] owns a [`Transport`], runs a background read loop that
//! correlates JSON-RPC responses with in-flight requests, and exposes the
//! narrow [`CapabilityClient`] interface the bridge needs: list the
//! server's operations and invoke one.
//!
//! # Design
//!
//! - In-flight requests are tracked in a `pending` map keyed by `u64`
//!   request ID. Each entry is a `oneshot::Sender` that receives the
//!   `result` or `error` value when the matching response arrives. The slot
//!   is registered before the request is sent.
//! - Every request carries its own deadline; the send and the wait are
//!   bounded together.
//! - A [`CancellationToken`] stops the read loop on [`McpClient::close`].
//! - When the inbound stream ends while the client is still open (child
//!   exited, connection dropped) every pending request fails and the
//!   registered fault hook runs once. The client never reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CallToolParams, CallToolResponse, ClientCapabilities, Implementation, InitializeParams,
    InitializeResponse, JsonRpcError, JsonRpcRequest, PaginatedParams, LATEST_PROTOCOL_VERSION,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<u64, oneshot::Sender<std::result::Result<Value, JsonRpcError>>>;

/// Callback invoked with a description of an asynchronous transport fault.
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// The narrow interface the bridge needs from a connected server.
///
/// [`McpClient`] implements it for every transport kind; tests substitute
/// in-memory implementations.
#[async_trait::async_trait]
pub trait CapabilityClient: Send + Sync {
    /// The configured name of the server behind this client.
    fn server_name(&self) -> &str;

    /// Fetch every raw operation descriptor the server advertises.
    async fn list_operations(&self, timeout: Duration) -> Result<Vec<Value>>;

    /// Invoke one operation with a hard deadline.
    async fn invoke(
        &self,
        operation: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResponse>;
}

/// State shared between the client and its read loop.
///
/// The read loop holds this rather than the client so that dropping the
/// last `Arc<McpClient>` still tears everything down.
struct Shared {
    server_name: String,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
    connection_lost: AtomicBool,
    error_handler: std::sync::Mutex<Option<ErrorHandler>>,
}

/// A connected MCP session.
///
/// Create one with [`McpClient::connect`].
pub struct McpClient {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    cancellation: CancellationToken,
    initialize: OnceLock<InitializeResponse>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.shared.server_name)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Start `transport` and complete the MCP handshake within `timeout`.
    ///
    /// Identifies itself as this crate. Use [`McpClient::connect_with_info`]
    /// to supply a different client identity.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] if the transport fails to start,
    /// the handshake fails, or it does not finish in time. The transport is
    /// closed before the error is returned.
    pub async fn connect(
        server_name: &str,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Result<Arc<Self>> {
        let info = Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        Self::connect_with_info(server_name, transport, timeout, info).await
    }

    /// Like [`McpClient::connect`] with an explicit client identity.
    pub async fn connect_with_info(
        server_name: &str,
        transport: Arc<dyn Transport>,
        timeout: Duration,
        client_info: Implementation,
    ) -> Result<Arc<Self>> {
        let client = Arc::new(Self {
            shared: Arc::new(Shared {
                server_name: server_name.to_string(),
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                connection_lost: AtomicBool::new(false),
                error_handler: std::sync::Mutex::new(None),
            }),
            transport,
            next_id: AtomicU64::new(1),
            cancellation: CancellationToken::new(),
            initialize: OnceLock::new(),
        });

        let handshake = async {
            client.transport.start().await?;
            client.start_read_loop();
            client.handshake(client_info, timeout).await
        };

        let outcome = tokio::time::timeout(timeout, handshake).await;
        let error = match outcome {
            Ok(Ok(response)) => {
                tracing::debug!(
                    server = %server_name,
                    protocol = %response.protocol_version,
                    peer = %response.server_info.name,
                    "MCP handshake complete"
                );
                let _ = client.initialize.set(response);
                return Ok(client);
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                e.context(BridgeError::Connection {
                    server: server_name.to_string(),
                    message,
                })
            }
            Err(_) => BridgeError::Connection {
                server: server_name.to_string(),
                message: format!(
                    "handshake did not complete within {} ms",
                    timeout.as_millis()
                ),
            }
            .into(),
        };

        if let Err(e) = client.close().await {
            tracing::debug!(server = %server_name, "Error closing transport after failed connect: {}", e);
        }
        Err(error)
    }

    async fn handshake(
        &self,
        client_info: Implementation,
        timeout: Duration,
    ) -> Result<InitializeResponse> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        };
        let raw = self
            .request(
                METHOD_INITIALIZE,
                METHOD_INITIALIZE,
                serde_json::to_value(params)?,
                timeout,
            )
            .await?;
        let response: InitializeResponse = serde_json::from_value(raw)?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(BridgeError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version.clone(),
            }
            .into());
        }

        self.notify(METHOD_INITIALIZED, None).await?;
        Ok(response)
    }

    /// The handshake result, available once `connect` has returned.
    pub fn server_info(&self) -> Option<&InitializeResponse> {
        self.initialize.get()
    }

    /// Whether [`McpClient::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether the inbound stream ended while the client was open.
    pub fn is_connection_lost(&self) -> bool {
        self.shared.connection_lost.load(Ordering::SeqCst)
    }

    /// Register the asynchronous fault hook, replacing any previous one.
    ///
    /// The hook runs at most once, from the read loop, when the server goes
    /// away without the client having been closed.
    pub fn on_error(&self, handler: impl Fn(String) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.shared.error_handler.lock() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Invoke a tool with a hard per-call deadline.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::CallTimeout`] when no response arrives in time.
    /// - [`BridgeError::Remote`] when the server answers with a JSON-RPC
    ///   error.
    /// - [`BridgeError::Transport`] when the client is closed or the
    ///   connection is lost mid-call.
    pub async fn call(
        &self,
        operation: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResponse> {
        let params = CallToolParams {
            name: operation.to_string(),
            arguments: Some(arguments),
        };
        let raw = self
            .request(
                METHOD_TOOLS_CALL,
                operation,
                serde_json::to_value(params)?,
                timeout,
            )
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Fetch every tool descriptor, following `nextCursor` pagination.
    ///
    /// Descriptors are returned unvalidated so that discovery can skip bad
    /// entries individually.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Discovery`] when a page has no `tools` array,
    /// plus the request errors of [`McpClient::call`].
    pub async fn list_operations(&self, timeout: Duration) -> Result<Vec<Value>> {
        let mut operations = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = PaginatedParams {
                cursor: cursor.clone(),
            };
            let page = self
                .request(
                    METHOD_TOOLS_LIST,
                    METHOD_TOOLS_LIST,
                    serde_json::to_value(params)?,
                    timeout,
                )
                .await?;

            match page.get("tools") {
                Some(Value::Array(tools)) => operations.extend(tools.iter().cloned()),
                _ => {
                    return Err(BridgeError::Discovery {
                        server: self.shared.server_name.clone(),
                        message: "tools/list result has no `tools` array".to_string(),
                    }
                    .into())
                }
            }

            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next) => {
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }

        Ok(operations)
    }

    /// Stop the read loop, fail in-flight requests, and close the transport.
    /// Calling it twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancellation.cancel();
        self.shared.pending.lock().await.clear();
        self.transport.close().await
    }

    /// Send a request and wait for its result value.
    ///
    /// `operation` names the request in timeout errors (the tool name for
    /// `tools/call`, the method otherwise).
    async fn request(
        &self,
        method: &str,
        operation: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            // Checked under the lock: stream end and close flip their flag
            // before clearing `pending`, so a late insert is never stranded.
            let mut pending = self.shared.pending.lock().await;
            self.ensure_usable()?;
            pending.insert(id, tx);
        }

        let message = serde_json::to_string(&JsonRpcRequest::new(Some(id), method, Some(params)))?;
        let server = &self.shared.server_name;

        let exchange = async {
            self.transport.send(message).await?;
            rx.await.map_err(|_| {
                anyhow::Error::from(BridgeError::Transport(format!(
                    "connection to MCP server '{}' closed before '{}' was answered",
                    server, operation
                )))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc_error))) => Err(BridgeError::Remote {
                server: server.clone(),
                message: rpc_error.to_string(),
            }
            .into()),
            Ok(Err(e)) => {
                self.shared.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(BridgeError::CallTimeout {
                    server: server.clone(),
                    operation: operation.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_usable()?;
        let message = serde_json::to_string(&JsonRpcRequest::new(None, method, params))?;
        self.transport.send(message).await
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Transport(format!(
                "client for MCP server '{}' is closed",
                self.shared.server_name
            ))
            .into());
        }
        if self.is_connection_lost() {
            return Err(BridgeError::Transport(format!(
                "connection to MCP server '{}' was lost",
                self.shared.server_name
            ))
            .into());
        }
        Ok(())
    }

    fn start_read_loop(&self) {
        let transport = Arc::clone(&self.transport);
        let shared = Arc::clone(&self.shared);
        let cancellation = self.cancellation.clone();

        tokio::spawn(async move {
            let mut inbound = transport.receive();
            loop {
                tokio::select! {
                    biased;

                    _ = cancellation.cancelled() => break,

                    maybe_msg = inbound.next() => match maybe_msg {
                        Some(raw) => dispatch_message(&raw, &shared, transport.as_ref()).await,
                        None => {
                            handle_stream_end(&shared).await;
                            break;
                        }
                    }
                }
            }
        });

        let transport = Arc::clone(&self.transport);
        let server = self.shared.server_name.clone();
        let cancellation = self.cancellation.clone();
        tokio::spawn(async move {
            let mut diagnostics = transport.receive_err();
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => break,
                    line = diagnostics.next() => match line {
                        Some(line) => tracing::debug!(server = %server, "transport diagnostic: {}", line),
                        None => break,
                    }
                }
            }
        });
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // Stops the read loop, which releases its transport handle.
        self.cancellation.cancel();
    }
}

#[async_trait::async_trait]
impl CapabilityClient for McpClient {
    fn server_name(&self) -> &str {
        &self.shared.server_name
    }

    async fn list_operations(&self, timeout: Duration) -> Result<Vec<Value>> {
        McpClient::list_operations(self, timeout).await
    }

    async fn invoke(
        &self,
        operation: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResponse> {
        self.call(operation, arguments, timeout).await
    }
}

async fn handle_stream_end(shared: &Shared) {
    {
        let mut pending = shared.pending.lock().await;
        if !shared.closed.load(Ordering::SeqCst) {
            shared.connection_lost.store(true, Ordering::SeqCst);
        }
        pending.clear();
    }
    if shared.closed.load(Ordering::SeqCst) {
        return;
    }
    let message = format!("connection to MCP server '{}' was lost", shared.server_name);
    tracing::warn!(server = %shared.server_name, "MCP server connection lost");

    let handler = shared
        .error_handler
        .lock()
        .ok()
        .and_then(|slot| slot.as_ref().map(Arc::clone));
    if let Some(handler) = handler {
        handler(message);
    }
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, shared: &Shared, transport: &dyn Transport) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(server = %shared.server_name, "MCP read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, shared).await;
    } else if has_id && has_method {
        // The bridge offers no client-side capabilities, so every
        // server-initiated request is answered with "method not found".
        let reply = serde_json::json!({
            "jsonrpc": "2.0",
            "id": value["id"],
            "error": { "code": -32601, "message": format!("Method not found: {}", value["method"]) }
        });
        if let Err(e) = transport.send(reply.to_string()).await {
            tracing::debug!(server = %shared.server_name, "failed to reject server request: {}", e);
        }
    } else if has_method {
        tracing::debug!(server = %shared.server_name, method = %value["method"], "Ignoring MCP notification");
    } else {
        tracing::debug!(
            server = %shared.server_name,
            "MCP read loop: received unclassifiable message; ignoring"
        );
    }
}

/// Resolve a pending request sender with the response value or error.
async fn handle_response(value: Value, shared: &Shared) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!(server = %shared.server_name, "MCP read loop: response has non-integer id: {id_val}");
            return;
        }
    };

    let Some(sender) = shared.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %shared.server_name, id, "MCP read loop: response for unknown or expired request");
        return;
    };

    let outcome = match value.get("error") {
        Some(err) => Err(serde_json::from_value::<JsonRpcError>(err.clone()).unwrap_or_else(
            |_| JsonRpcError {
                code: -32603,
                message: err.to_string(),
                data: None,
            },
        )),
        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = sender.send(outcome);
}
