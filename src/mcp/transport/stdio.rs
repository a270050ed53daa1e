//! Stdio transport for MCP child-process servers
//!
//! [`StdioTransport`] spawns a child process on [`Transport::start`] and
//! talks to it over stdin/stdout using newline-delimited JSON.
//!
//! - Outbound messages are written to the child's stdin followed by `\n`.
//! - Inbound messages are read from the child's stdout, one JSON object per
//!   line.
//! - The child's stderr is forwarded to a diagnostic stream and logged at
//!   debug level. It is never treated as an error.
//!
//! The child inherits the parent environment; descriptor variables are
//! layered on top and win on conflict. When stdout reaches end-of-file the
//! inbound stream ends, which the client reports as a fault.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::{BridgeError, Result};
use crate::mcp::transport::{channel_stream, Transport};

/// How long `close` waits for the child to exit after SIGTERM.
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_bridge::mcp::transport::stdio::StdioTransport;
/// use mcp_bridge::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::new(
///     "npx".into(),
///     vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     HashMap::new(),
///     None,
/// );
/// transport.start().await?;
/// transport.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    /// Sender side of the stdin channel; `None` before start and after close.
    stdin_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Inbound senders parked until `start` hands them to the reader tasks.
    /// Dropping them (on close) ends the receive streams.
    parked: std::sync::Mutex<Option<(mpsc::UnboundedSender<String>, mpsc::UnboundedSender<String>)>>,
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Bind a transport to a command line. Nothing is spawned until
    /// [`Transport::start`].
    ///
    /// # Arguments
    ///
    /// * `command` - Executable name or path.
    /// * `args` - Command-line arguments.
    /// * `env` - Variables layered over the inherited environment.
    /// * `cwd` - Optional working directory for the child.
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();

        Self {
            command,
            args,
            env,
            cwd,
            stdin_tx: std::sync::Mutex::new(None),
            parked: std::sync::Mutex::new(Some((stdout_tx, stderr_tx))),
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            child: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn transport_error(message: String) -> anyhow::Error {
        BridgeError::Transport(message).into()
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Self::transport_error("stdio transport is closed".into()));
        }

        let (stdout_tx, stderr_tx) = self
            .parked
            .lock()
            .map_err(|_| Self::transport_error("stdio transport state poisoned".into()))?
            .take()
            .ok_or_else(|| Self::transport_error("stdio transport already started".into()))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            let message = format!("failed to spawn MCP server `{}`: {}", self.command, e);
            anyhow::Error::new(e).context(BridgeError::Transport(message))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Self::transport_error("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::transport_error("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Self::transport_error("child stderr unavailable after spawn".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{}\n", msg);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        let command = self.command.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(command = %command, "mcp server stderr: {}", line);
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(command = %self.command, pid = ?child.id(), "Spawned MCP server process");

        if let Ok(mut slot) = self.stdin_tx.lock() {
            *slot = Some(stdin_tx);
        }
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let guard = self
            .stdin_tx
            .lock()
            .map_err(|_| Self::transport_error("stdio transport state poisoned".into()))?;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Self::transport_error("stdio transport is not running".into()))?;
        tx.send(message)
            .map_err(|_| Self::transport_error("stdin channel closed".into()))
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stdout_rx))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        channel_stream(Arc::clone(&self.stderr_rx))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing stdin lets well-behaved servers exit on EOF.
        if let Ok(mut slot) = self.stdin_tx.lock() {
            slot.take();
        }
        if let Ok(mut parked) = self.parked.lock() {
            parked.take();
        }

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }

            match tokio::time::timeout(EXIT_GRACE_PERIOD, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(command = %self.command, %status, "MCP server process exited");
                }
                _ => {
                    tracing::debug!(command = %self.command, "MCP server did not exit; killing");
                    let _ = child.start_kill();
                }
            }
        }

        Ok(())
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination when the transport is dropped without
    /// `close`. Must not block.
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                #[cfg(unix)]
                {
                    if let Some(pid) = child.id() {
                        // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
        }
    }
}
