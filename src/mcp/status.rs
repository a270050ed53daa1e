//! Per-server connection health and the overall discovery phase
//!
//! [`ServerStatusRegistry`] is shared (behind an `Arc`) by every discovery
//! pipeline and by whoever renders status, such as the CLI. Listeners are
//! notified synchronously, in subscription order, on every status update.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Connection status of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum McpServerStatus {
    /// Not connected: never tried, failed, or lost
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake complete
    Connected,
}

impl fmt::Display for McpServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            McpServerStatus::Disconnected => "disconnected",
            McpServerStatus::Connecting => "connecting",
            McpServerStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Progress of a whole discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpDiscoveryState {
    /// No run has started
    #[default]
    NotStarted,
    /// A run is in flight
    InProgress,
    /// Every pipeline of the last run has settled
    Completed,
}

impl fmt::Display for McpDiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            McpDiscoveryState::NotStarted => "not started",
            McpDiscoveryState::InProgress => "in progress",
            McpDiscoveryState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Handle returned by [`ServerStatusRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Status-change callback: `(server_name, new_status)`.
pub type StatusListener = Arc<dyn Fn(&str, McpServerStatus) + Send + Sync + 'static>;

/// Shared record of server statuses with change notification.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use mcp_bridge::mcp::status::{McpServerStatus, ServerStatusRegistry};
///
/// let registry = ServerStatusRegistry::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// registry.subscribe(move |name, status| sink.lock().unwrap().push((name.to_string(), status)));
///
/// registry.set("github", McpServerStatus::Connecting);
/// assert_eq!(registry.get("github"), McpServerStatus::Connecting);
/// assert_eq!(registry.get("unknown"), McpServerStatus::Disconnected);
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// ```
#[derive(Default)]
pub struct ServerStatusRegistry {
    statuses: RwLock<HashMap<String, McpServerStatus>>,
    listeners: RwLock<Vec<(ListenerId, StatusListener)>>,
    discovery: RwLock<McpDiscoveryState>,
    next_listener: AtomicU64,
}

impl fmt::Debug for ServerStatusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStatusRegistry")
            .field("statuses", &self.get_all())
            .field("discovery", &self.discovery_state())
            .finish_non_exhaustive()
    }
}

impl ServerStatusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of `server_name`; unknown servers are `Disconnected`.
    pub fn get(&self, server_name: &str) -> McpServerStatus {
        self.statuses
            .read()
            .ok()
            .and_then(|map| map.get(server_name).copied())
            .unwrap_or_default()
    }

    /// Snapshot of every known status.
    pub fn get_all(&self) -> HashMap<String, McpServerStatus> {
        self.statuses
            .read()
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    /// Record a status and notify every listener, in subscription order,
    /// before returning.
    ///
    /// Listeners run outside the registry's locks, so they may read the
    /// registry.
    pub fn set(&self, server_name: &str, status: McpServerStatus) {
        if let Ok(mut map) = self.statuses.write() {
            map.insert(server_name.to_string(), status);
        }
        tracing::debug!(server = %server_name, %status, "MCP server status changed");

        let listeners: Vec<StatusListener> = self
            .listeners
            .read()
            .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(server_name, status);
        }
    }

    /// Register a status-change listener.
    pub fn subscribe(
        &self,
        listener: impl Fn(&str, McpServerStatus) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut ls) = self.listeners.write() {
            ls.push((id, Arc::new(listener)));
        }
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        match self.listeners.write() {
            Ok(mut ls) => {
                let before = ls.len();
                ls.retain(|(lid, _)| *lid != id);
                ls.len() != before
            }
            Err(_) => false,
        }
    }

    /// Current discovery phase.
    pub fn discovery_state(&self) -> McpDiscoveryState {
        self.discovery.read().map(|s| *s).unwrap_or_default()
    }

    /// Update the discovery phase.
    pub fn set_discovery_state(&self, state: McpDiscoveryState) {
        if let Ok(mut s) = self.discovery.write() {
            *s = state;
        }
        tracing::debug!(%state, "MCP discovery state changed");
    }
}
