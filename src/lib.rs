//! mcp-bridge - MCP capability-server discovery and bridging
//!
//! This library connects to externally configured MCP servers, discovers the
//! tools each one exposes, and registers them as uniform callable tools for a
//! conversation engine.
//!
//! # Architecture
//!
//! - `mcp`: transports, the capability client, discovery, the connection
//!   orchestrator, server status, and server configuration
//! - `tools`: the tool registry discovered tools are registered into
//! - `config`: application settings and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: the command-line front end
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_bridge::mcp::{McpConfigResolver, McpManager, ServerStatusRegistry};
//! use mcp_bridge::tools::ToolRegistry;
//! use mcp_bridge::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml")?;
//!     config.validate()?;
//!
//!     let servers = McpConfigResolver::from_settings(&config.mcp).resolve(None)?;
//!     let manager = McpManager::from_config(&config, Arc::new(ServerStatusRegistry::new()));
//!     let registry = ToolRegistry::new();
//!     manager.discover_all(&servers, None, &registry).await?;
//!
//!     println!("{} tools available", registry.len());
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result};
