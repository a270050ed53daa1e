//! Connection orchestrator
//!
//! [`McpManager::discover_all`] runs one pipeline per configured server:
//!
//! ```text
//! Connecting -> transport + handshake -> Connected -> tools/list -> register
//!      \                  |                                |
//!       `-- Disconnected <'------------ Disconnected <-----'
//! ```
//!
//! Pipelines run concurrently on the caller's task and are isolated from
//! each other: a failing or hung server never prevents the others from
//! registering their tools. Servers that make it through discovery keep
//! their client alive in the manager; the registered tools only hold weak
//! references to it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::client::{CapabilityClient, McpClient};
use crate::mcp::config::{apply_adhoc_command, McpServerConfig, ServerMap};
use crate::mcp::discovery::discover_tools;
use crate::mcp::status::{McpDiscoveryState, McpServerStatus, ServerStatusRegistry};
use crate::mcp::transport::{DefaultTransportFactory, TransportFactory};
use crate::mcp::types::Implementation;
use crate::tools::ToolRegistry;

/// Sets the discovery phase to `Completed` when dropped, so the phase is
/// settled on every exit path.
struct CompleteOnDrop<'a>(&'a ServerStatusRegistry);

impl Drop for CompleteOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_discovery_state(McpDiscoveryState::Completed);
    }
}

/// Owns the live client of every successfully discovered server.
pub struct McpManager {
    status: Arc<ServerStatusRegistry>,
    factory: Arc<dyn TransportFactory>,
    connect_timeout: Duration,
    client_info: Implementation,
    max_output_size: Option<usize>,
    clients: Mutex<BTreeMap<String, Arc<McpClient>>>,
}

impl std::fmt::Debug for McpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpManager")
            .field("connect_timeout", &self.connect_timeout)
            .field("client_info", &self.client_info)
            .field("clients", &self.clients().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl McpManager {
    /// Create a manager.
    ///
    /// `connect_timeout` bounds each handshake unless a descriptor sets its
    /// own `connectTimeout`.
    pub fn new(
        status: Arc<ServerStatusRegistry>,
        factory: Arc<dyn TransportFactory>,
        connect_timeout: Duration,
        client_info: Implementation,
    ) -> Self {
        Self {
            status,
            factory,
            connect_timeout,
            client_info,
            max_output_size: None,
            clients: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create a manager with the real transports and the application
    /// settings in `config`.
    pub fn from_config(config: &Config, status: Arc<ServerStatusRegistry>) -> Self {
        let connect_timeout = config.mcp.connect_timeout();
        let client_info = Implementation {
            name: config.mcp.client_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        Self::new(
            status,
            Arc::new(DefaultTransportFactory::new(connect_timeout)),
            connect_timeout,
            client_info,
        )
        .with_max_output_size(config.tools.max_output_size)
    }

    /// Truncate proxy tool output longer than `max` bytes.
    pub fn with_max_output_size(mut self, max: usize) -> Self {
        self.max_output_size = Some(max);
        self
    }

    /// The status registry this manager publishes to
    pub fn status(&self) -> &Arc<ServerStatusRegistry> {
        &self.status
    }

    /// Connect to every server, discover its tools, and register them.
    ///
    /// `adhoc_command`, when given, is tokenized and added as the server
    /// named `mcp`, replacing any configured entry of that name. Returns
    /// once every pipeline has settled.
    ///
    /// # Errors
    ///
    /// Fails only when `adhoc_command` cannot be tokenized, before any
    /// pipeline starts. Per-server failures are reported through the status
    /// registry and the log.
    pub async fn discover_all(
        &self,
        servers: &ServerMap,
        adhoc_command: Option<&str>,
        registry: &ToolRegistry,
    ) -> Result<()> {
        let mut servers = servers.clone();
        if let Some(command) = adhoc_command {
            apply_adhoc_command(&mut servers, command)?;
        }

        self.status
            .set_discovery_state(McpDiscoveryState::InProgress);
        let _complete = CompleteOnDrop(&self.status);

        if servers.is_empty() {
            tracing::debug!("No MCP servers configured");
            return Ok(());
        }
        tracing::info!(count = servers.len(), "Discovering MCP servers");

        let pipelines = servers
            .iter()
            .map(|(name, config)| self.connect_and_discover(name, config, registry));
        let connected = join_all(pipelines).await.into_iter().flatten().count();

        tracing::info!(
            connected,
            total = servers.len(),
            tools = registry.len(),
            "MCP discovery finished"
        );
        Ok(())
    }

    /// One server's pipeline. Returns `Some(())` when tools were registered.
    async fn connect_and_discover(
        &self,
        name: &str,
        config: &McpServerConfig,
        registry: &ToolRegistry,
    ) -> Option<()> {
        self.status.set(name, McpServerStatus::Connecting);

        let client = match self.connect(name, config).await {
            Ok(client) => client,
            Err(e) => {
                self.status.set(name, McpServerStatus::Disconnected);
                if is_unreachable(&e) {
                    tracing::warn!(server = %name, "MCP server is unreachable: {:#}", e);
                } else {
                    tracing::warn!(server = %name, "Failed to connect to MCP server: {:#}", e);
                }
                return None;
            }
        };

        self.status.set(name, McpServerStatus::Connected);
        let status = Arc::clone(&self.status);
        let server = name.to_string();
        client.on_error(move |message| {
            tracing::warn!(server = %server, "MCP server connection lost: {}", message);
            status.set(&server, McpServerStatus::Disconnected);
        });

        let capability: Arc<dyn CapabilityClient> = client.clone();
        let tools = match discover_tools(&capability, name, config).await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    tracing::debug!(server = %name, "Error closing MCP client: {:#}", close_err);
                }
                self.status.set(name, McpServerStatus::Disconnected);
                tracing::warn!(server = %name, "MCP tool discovery failed: {:#}", e);
                return None;
            }
        };

        let count = tools.len();
        for tool in tools {
            let tool = match self.max_output_size {
                Some(max) => tool.with_max_output_size(max),
                None => tool,
            };
            registry.register(tool.name().to_string(), Arc::new(tool));
        }
        tracing::info!(server = %name, tools = count, "Registered MCP tools");

        self.retain(name, client).await;
        Some(())
    }

    async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<Arc<McpClient>> {
        let transport = self.factory.create(name, config)?;
        let timeout = config
            .connect_timeout
            .map(Duration::from_millis)
            .unwrap_or(self.connect_timeout);
        McpClient::connect_with_info(name, transport, timeout, self.client_info.clone()).await
    }

    async fn retain(&self, name: &str, client: Arc<McpClient>) {
        let previous = match self.clients.lock() {
            Ok(mut clients) => clients.insert(name.to_string(), client),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::debug!(server = %name, "Error closing replaced MCP client: {:#}", e);
            }
        }
    }

    /// Snapshot of the retained clients, keyed by server name.
    pub fn clients(&self) -> BTreeMap<String, Arc<McpClient>> {
        self.clients
            .lock()
            .map(|clients| clients.clone())
            .unwrap_or_default()
    }

    /// The retained client for `name`, if its discovery succeeded.
    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.lock().ok()?.get(name).cloned()
    }

    /// Close every retained client and mark its server `Disconnected`.
    ///
    /// Tools registered from those servers fail from now on.
    pub async fn shutdown(&self) {
        let clients = match self.clients.lock() {
            Ok(mut clients) => std::mem::take(&mut *clients),
            Err(_) => BTreeMap::new(),
        };
        for (name, client) in clients {
            if let Err(e) = client.close().await {
                tracing::debug!(server = %name, "Error closing MCP client: {:#}", e);
            }
            self.status.set(&name, McpServerStatus::Disconnected);
        }
    }
}

/// Whether a connect failure means the server could not be reached at all
/// (refused connection, failed name resolution, missing executable).
pub fn is_unreachable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::AddrNotAvailable
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::NotFound
            );
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_connect();
        }
        false
    })
}
