//! Tool registration interface for the conversation engine
//!
//! Discovered MCP operations are wrapped as [`ToolExecutor`]s and registered
//! into a shared [`ToolRegistry`]. The conversation engine (or the CLI
//! `call` command) looks tools up by name and executes them; it never sees
//! which server backs a tool.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Result of one tool execution
///
/// A failed call the tool itself reported (as opposed to a transport or
/// protocol failure) is a `ToolResult` with `success == false`, not an
/// `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Error message if execution failed
    pub error: Option<String>,
    /// Whether the output was truncated
    pub truncated: bool,
    /// Additional metadata about the execution
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful tool result
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a failed tool result
    pub fn error(error: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            truncated: false,
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the result
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Truncate output to at most `max_size` bytes, on a character boundary
    pub fn truncate_if_needed(mut self, max_size: usize) -> Self {
        if self.output.len() > max_size {
            let mut cut = max_size;
            while !self.output.is_char_boundary(cut) {
                cut -= 1;
            }
            self.output.truncate(cut);
            self.output.push_str("\n... (truncated)");
            self.truncated = true;
        }
        self
    }

    /// Convert to a message string for the conversation
    pub fn to_message(&self) -> String {
        if self.success {
            if self.truncated {
                format!("{}\n(Output truncated to fit context window)", self.output)
            } else {
                self.output.clone()
            }
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            )
        }
    }
}

/// A callable tool
///
/// # Examples
///
/// ```
/// use mcp_bridge::tools::{ToolExecutor, ToolResult};
/// use mcp_bridge::error::Result;
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct Clock;
///
/// #[async_trait]
/// impl ToolExecutor for Clock {
///     fn tool_definition(&self) -> Value {
///         serde_json::json!({
///             "name": "clock",
///             "description": "Returns a fixed time",
///             "parameters": { "type": "object", "properties": {} }
///         })
///     }
///
///     async fn execute(&self, _args: Value) -> Result<ToolResult> {
///         Ok(ToolResult::success("12:00".to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool definition as a JSON value:
    /// `{"name", "description", "parameters"}` with a JSON Schema under
    /// `parameters`.
    fn tool_definition(&self) -> serde_json::Value;

    /// Executes the tool with the given arguments
    ///
    /// # Errors
    ///
    /// Returns an error when the tool could not be run at all (timeout,
    /// lost connection, protocol error).
    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// Thread-safe name-to-tool registry
///
/// Registration takes `&self` so concurrent discovery pipelines can share
/// one registry. Registering an existing name replaces the previous tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn ToolExecutor>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool executor under `name`
    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        let name = name.into();
        if let Ok(mut tools) = self.tools.write() {
            if tools.insert(name.clone(), executor).is_some() {
                tracing::debug!(tool = %name, "Replaced previously registered tool");
            }
        }
    }

    /// Get a tool executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.read().ok()?.get(name).cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .map(|tools| tools.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// All tool definitions, sorted by tool name
    pub fn all_definitions(&self) -> Vec<serde_json::Value> {
        let Ok(tools) = self.tools.read() else {
            return Vec::new();
        };
        let mut entries: Vec<(&String, &Arc<dyn ToolExecutor>)> = tools.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(_, executor)| executor.tool_definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
