//! Application configuration for mcp-bridge
//!
//! This module loads the bridge's own settings from YAML, applies
//! `MCP_BRIDGE_*` environment overrides, and validates the result. MCP server
//! descriptors are not configured here; see [`crate::mcp::config`].

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for mcp-bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Capability-server discovery settings
    #[serde(default)]
    pub mcp: McpSettings,
    /// Tool output settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Capability-server discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSettings {
    /// Handshake timeout applied when a descriptor sets no `connectTimeout`
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Override for the user-level server file; defaults to the platform
    /// config directory
    #[serde(default)]
    pub user_config_path: Option<PathBuf>,

    /// Project-level server file, relative to the working directory
    #[serde(default = "default_project_config_path")]
    pub project_config_path: PathBuf,

    /// Prefix of the environment variables that declare servers
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Client name sent in the `initialize` handshake
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_connect_timeout_seconds() -> u64 {
    30
}

fn default_project_config_path() -> PathBuf {
    PathBuf::from("mcp-config.json")
}

fn default_env_prefix() -> String {
    "MCP_SERVER_".to_string()
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout_seconds(),
            user_config_path: None,
            project_config_path: default_project_config_path(),
            env_prefix: default_env_prefix(),
            client_name: default_client_name(),
        }
    }
}

impl McpSettings {
    /// The handshake timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Tool output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Maximum tool output size in bytes before truncation
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
}

fn default_max_output_size() -> usize {
    1_048_576
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_output_size: default_max_output_size(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, then apply environment overrides.
    ///
    /// A missing file is not an error; defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(timeout) = std::env::var("MCP_BRIDGE_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.mcp.connect_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid MCP_BRIDGE_CONNECT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(path) = std::env::var("MCP_BRIDGE_USER_CONFIG") {
            self.mcp.user_config_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("MCP_BRIDGE_PROJECT_CONFIG") {
            self.mcp.project_config_path = PathBuf::from(path);
        }

        if let Ok(prefix) = std::env::var("MCP_BRIDGE_ENV_PREFIX") {
            self.mcp.env_prefix = prefix;
        }

        if let Ok(name) = std::env::var("MCP_BRIDGE_CLIENT_NAME") {
            self.mcp.client_name = name;
        }

        if let Ok(size) = std::env::var("MCP_BRIDGE_MAX_OUTPUT_SIZE") {
            if let Ok(value) = size.parse() {
                self.tools.max_output_size = value;
            } else {
                tracing::warn!("Invalid MCP_BRIDGE_MAX_OUTPUT_SIZE: {}", size);
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.mcp.connect_timeout_seconds == 0 {
            return Err(BridgeError::Config(
                "mcp.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.mcp.connect_timeout_seconds > 3600 {
            return Err(BridgeError::Config(
                "mcp.connect_timeout_seconds must be less than or equal to 3600".to_string(),
            )
            .into());
        }

        if self.mcp.env_prefix.is_empty() {
            return Err(
                BridgeError::Config("mcp.env_prefix cannot be empty".to_string()).into(),
            );
        }

        if self.mcp.client_name.trim().is_empty() {
            return Err(
                BridgeError::Config("mcp.client_name cannot be empty".to_string()).into(),
            );
        }

        if self.tools.max_output_size == 0 {
            return Err(BridgeError::Config(
                "tools.max_output_size must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
