//! Proxy tool: one discovered server operation behind [`ToolExecutor`]

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{BridgeError, Result};
use crate::mcp::client::CapabilityClient;
use crate::tools::{ToolExecutor, ToolResult};

/// A remote operation exposed as a local tool.
///
/// Holds only a weak reference to its client; the manager owns the client.
/// Once the client is closed or dropped, every invocation fails with a
/// transport error.
#[derive(Clone)]
pub struct McpProxyTool {
    server_name: String,
    name: String,
    description: String,
    parameters: Value,
    timeout: Duration,
    max_output_size: Option<usize>,
    client: Weak<dyn CapabilityClient>,
}

impl std::fmt::Debug for McpProxyTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpProxyTool")
            .field("server_name", &self.server_name)
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("client_alive", &(self.client.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

impl McpProxyTool {
    /// Wrap operation `name` of `server_name`.
    ///
    /// `parameters` is the operation's input JSON Schema.
    pub fn new(
        server_name: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        timeout: Duration,
        client: &Arc<dyn CapabilityClient>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            name: name.into(),
            description: description.into(),
            parameters,
            timeout,
            max_output_size: None,
            client: Arc::downgrade(client),
        }
    }

    /// Truncate successful output longer than `max` bytes.
    pub fn with_max_output_size(mut self, max: usize) -> Self {
        self.max_output_size = Some(max);
        self
    }

    /// Name of the server that backs this tool
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Operation name as reported by the server
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Input JSON Schema
    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ToolExecutor for McpProxyTool {
    fn tool_definition(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let client = self.client.upgrade().ok_or_else(|| {
            BridgeError::Transport(format!(
                "connection to MCP server '{}' is closed",
                self.server_name
            ))
        })?;

        let arguments = if args.is_null() { json!({}) } else { args };

        tracing::debug!(server = %self.server_name, tool = %self.name, "Invoking MCP tool");
        let response = client
            .invoke(&self.name, arguments, self.timeout)
            .await
            .with_context(|| {
                format!(
                    "MCP tool '{}' on server '{}' failed",
                    self.name, self.server_name
                )
            })?;

        let text = response.text();
        let result = if response.is_error() {
            tracing::debug!(server = %self.server_name, tool = %self.name, "MCP tool reported an error");
            let message = if text.is_empty() {
                format!("MCP tool '{}' reported an error", self.name)
            } else {
                text
            };
            ToolResult::error(message)
        } else {
            let result = ToolResult::success(text);
            match self.max_output_size {
                Some(max) => result.truncate_if_needed(max),
                None => result,
            }
        };

        Ok(result
            .with_metadata("mcp_server", self.server_name.as_str())
            .with_metadata("mcp_tool", self.name.as_str()))
    }
}
