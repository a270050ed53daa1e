//! Error types for mcp-bridge
//!
//! This module defines the error taxonomy shared by the configuration
//! resolver, the transports, the capability client, and tool discovery,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcp-bridge operations
///
/// Per-server variants (`Config`, `Connection`, `Discovery`) are caught at
/// the orchestrator boundary and turned into a status update plus a log
/// line. Per-invocation variants (`CallTimeout`, `Transport`, `Remote`)
/// propagate to whoever invoked the tool.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed or incomplete server descriptor or application setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration source exists but could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Handshake or network failure while connecting to a server
    #[error("MCP connection error ({server}): {message}")]
    Connection {
        /// Name of the server that failed to connect
        server: String,
        /// Human-readable failure description
        message: String,
    },

    /// A request did not receive a response within its deadline
    #[error("MCP timeout: server '{server}' did not answer '{operation}' within {timeout_ms} ms")]
    CallTimeout {
        /// Name of the server the request was sent to
        server: String,
        /// The JSON-RPC method or tool name that timed out
        operation: String,
        /// The deadline that expired, in milliseconds
        timeout_ms: u64,
    },

    /// The connection was lost or the transport rejected a message
    #[error("MCP transport error: {0}")]
    Transport(String),

    /// The server reported an application-level failure
    #[error("MCP server '{server}' returned an error: {message}")]
    Remote {
        /// Name of the server that reported the error
        server: String,
        /// Error message reported by the server
        message: String,
    },

    /// The tool list was malformed or filtered down to nothing
    #[error("MCP discovery error ({server}): {message}")]
    Discovery {
        /// Name of the server whose tool list was rejected
        server: String,
        /// Why the tool list was rejected
        message: String,
    },

    /// The server negotiated a protocol revision this client does not speak
    #[error("MCP protocol version mismatch: expected one of {expected:?}, got {got}")]
    ProtocolVersion {
        /// Revisions this client accepts
        expected: Vec<String>,
        /// Revision the server selected
        got: String,
    },

    /// Tool execution errors
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for mcp-bridge operations
///
/// Uses `anyhow::Error` so that context can be layered onto a
/// [`BridgeError`]; callers recover the variant with
/// `err.downcast_ref::<BridgeError>()`.
pub type Result<T> = anyhow::Result<T>;
