//! Long-lived event-stream transport (descriptor `url`)
//!
//! [`SseTransport`] opens a GET `text/event-stream` connection on
//! [`Transport::start`]. The server's first `endpoint` event names the URL
//! (relative to the stream URL) that every outbound message is POSTed to.
//! Responses arrive back on the stream as `message` events.
//!
//! The stream ending, or failing mid-flight, ends the inbound message stream;
//! the client surfaces that as an asynchronous fault.
//!
//! This module also hosts [`SseDecoder`], the incremental event-stream
//! parser shared with [`super::http::HttpTransport`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{build_http_client, channel_stream, Transport};

/// A single decoded event-stream event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
}

impl SseEvent {
    /// The effective event type (`message` when unset).
    pub fn kind(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental event-stream decoder.
///
/// Feed raw body chunks with [`SseDecoder::push`]; complete events are
/// returned as soon as their terminating blank line arrives. Chunks are
/// buffered as bytes, so a UTF-8 sequence or a `\r\n` pair split across
/// chunks is reassembled before decoding. Comment lines and `retry:` fields
/// are ignored.
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::transport::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::default();
/// assert!(decoder.push(b"event: endpoint\ndata: /mes").is_empty());
/// let events = decoder.push(b"sages?session=1\n\n");
/// assert_eq!(events[0].kind(), "endpoint");
/// assert_eq!(events[0].data, "/messages?session=1");
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Append a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = block_end(&self.buffer) {
            let block = self.buffer.split_to(end);
            if let Some(event) = parse_event_block(&decode_block(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(mut self) -> Option<SseEvent> {
        let rest = self.buffer.split();
        parse_event_block(&decode_block(&rest))
    }
}

/// Offset just past the first blank line (`\n\n` or `\r\n\r\n`).
fn block_end(buffer: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, byte) in buffer.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buffer[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some(i + 1);
        }
        line_start = i + 1;
    }
    None
}

fn decode_block(block: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(block) {
        Ok(text) => Cow::Borrowed(text),
        Err(e) => {
            tracing::debug!("event-stream block is not valid UTF-8: {}", e);
            String::from_utf8_lossy(block)
        }
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = SseEvent::default();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.event.is_none() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

/// Whether an event is a keep-alive that carries no message.
pub(crate) fn is_ping(event: &SseEvent) -> bool {
    event.kind().eq_ignore_ascii_case("ping")
        || event.data.eq_ignore_ascii_case("[ping]")
        || event.data.trim().is_empty()
}

type StreamSenders = (
    mpsc::UnboundedSender<String>,
    watch::Sender<Option<url::Url>>,
);

/// Event-stream MCP transport.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use mcp_bridge::mcp::transport::sse::SseTransport;
///
/// let transport = SseTransport::new(
///     url::Url::parse("http://localhost:3000/sse").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(30),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    url: url::Url,
    headers: HashMap<String, String>,
    /// POST target announced by the server's `endpoint` event.
    endpoint_rx: watch::Receiver<Option<url::Url>>,
    /// Senders parked until `start` hands them to the stream task. When that
    /// task ends they drop, which ends the inbound stream.
    parked: std::sync::Mutex<Option<StreamSenders>>,
    message_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    error_tx: mpsc::UnboundedSender<String>,
    error_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl SseTransport {
    /// Bind a transport to an event-stream URL. No network I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the HTTP client cannot be built.
    pub fn new(
        url: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client: build_http_client(connect_timeout)?,
            url,
            headers,
            endpoint_rx,
            parked: std::sync::Mutex::new(Some((message_tx, endpoint_tx))),
            message_rx: Arc::new(Mutex::new(message_rx)),
            error_tx,
            error_rx: Arc::new(Mutex::new(error_rx)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("event-stream transport is closed".into()).into());
        }
        let (message_tx, endpoint_tx) = self
            .parked
            .lock()
            .map_err(|_| BridgeError::Transport("event-stream state poisoned".into()))?
            .take()
            .ok_or_else(|| BridgeError::Transport("event-stream transport already started".into()))?;

        let req = self
            .http_client
            .get(self.url.as_str())
            .header("Accept", "text/event-stream");
        let response = self.apply_headers(req).send().await.map_err(|e| {
            let message = format!("event-stream GET to {} failed: {}", self.url, e);
            anyhow::Error::new(e).context(BridgeError::Transport(message))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Transport(format!(
                "event-stream GET to {} returned HTTP {}",
                self.url, status
            ))
            .into());
        }

        let base = self.url.clone();
        let error_tx = self.error_tx.clone();
        let cancel = self.cancel.clone();
        let byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            tokio::pin!(byte_stream);
            let mut decoder = SseDecoder::default();
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    chunk = byte_stream.next() => chunk,
                };
                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = error_tx.send(format!("event stream failed: {}", e));
                        break;
                    }
                    None => break,
                };
                for event in decoder.push(&bytes) {
                    match event.kind() {
                        "endpoint" => match base.join(event.data.trim()) {
                            Ok(endpoint) => {
                                tracing::debug!(%endpoint, "Received MCP message endpoint");
                                endpoint_tx.send_replace(Some(endpoint));
                            }
                            Err(e) => {
                                let _ = error_tx
                                    .send(format!("invalid endpoint '{}': {}", event.data, e));
                            }
                        },
                        "message" if !is_ping(&event) => {
                            if message_tx.send(event.data).is_err() {
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }
            tracing::debug!(url = %base, "Event stream ended");
        });

        let mut endpoint_rx = self.endpoint_rx.clone();
        while endpoint_rx.borrow_and_update().is_none() {
            if endpoint_rx.changed().await.is_err() {
                break;
            }
        }
        if endpoint_rx.borrow().is_none() {
            return Err(BridgeError::Transport(format!(
                "event stream at {} closed before announcing an endpoint",
                self.url
            ))
            .into());
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("event-stream transport is closed".into()).into());
        }
        let endpoint = self
            .endpoint_rx
            .borrow()
            .clone()
            .ok_or_else(|| BridgeError::Transport("no message endpoint announced yet".into()))?;

        let req = self
            .http_client
            .post(endpoint.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        let response = self.apply_headers(req).send().await.map_err(|e| {
            let message = format!("POST to {} failed: {}", endpoint, e);
            anyhow::Error::new(e).context(BridgeError::Transport(message))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Transport(format!(
                "POST to {} returned HTTP {}",
                endpoint, status
            ))
            .into());
        }
        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.message_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.error_rx))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        if let Ok(mut parked) = self.parked.lock() {
            parked.take();
        }
        Ok(())
    }
}
