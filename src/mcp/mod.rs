//! MCP capability-server discovery and bridging
//!
//! Connects to externally configured MCP servers over stdio, SSE, or
//! streamable HTTP, discovers the tools each exposes, and registers them as
//! [`crate::tools::ToolExecutor`]s.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC 2.0 primitives and the MCP lifecycle/tool messages
//! - `transport` -- `Transport` trait, `TransportFactory`, stdio/SSE/HTTP
//! - `client`    -- `McpClient`: one session, request correlation, timeouts
//! - `config`    -- server descriptors and the layered `McpConfigResolver`
//! - `status`    -- `ServerStatusRegistry` and discovery phase
//! - `discovery` -- `tools/list` validation and filtering
//! - `tool`      -- `McpProxyTool`, the registered tool wrapper
//! - `manager`   -- `McpManager`, the per-server connection pipelines

pub mod client;
pub mod config;
pub mod discovery;
pub mod manager;
pub mod status;
pub mod tool;
pub mod transport;
pub mod types;

pub use client::{CapabilityClient, McpClient};
pub use config::{McpConfigResolver, McpServerConfig, ServerMap};
pub use manager::McpManager;
pub use status::{McpDiscoveryState, McpServerStatus, ServerStatusRegistry};
pub use tool::McpProxyTool;
