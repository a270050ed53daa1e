//! MCP server descriptors and the configuration resolver
//!
//! A [`ServerMap`] maps server names to [`McpServerConfig`] descriptors. The
//! [`McpConfigResolver`] builds one from four sources, later sources
//! replacing whole entries from earlier ones:
//!
//! 1. environment variables `MCP_SERVER_<NAME>_<FIELD>`
//! 2. the user-level file (`<config dir>/mcp-bridge/mcp-config.json`)
//! 3. the project-level file (`./mcp-config.json`)
//! 4. an ad-hoc command line registered as the server `mcp`
//!
//! Both files share one JSON shape:
//!
//! ```json
//! {
//!   "servers": {
//!     "filesystem": { "command": "npx", "args": ["-y", "server-fs", "."] },
//!     "search": { "httpUrl": "https://example.com/mcp", "timeout": 30000 }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::McpSettings;
use crate::error::{BridgeError, Result};

/// Per-call timeout applied when a descriptor sets none (10 minutes).
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 600_000;

/// Server name reserved for the ad-hoc command override.
pub const ADHOC_SERVER_NAME: &str = "mcp";

/// File name of both the user-level and project-level server files.
pub const CONFIG_FILE_NAME: &str = "mcp-config.json";

/// Server name to descriptor, iterated in name order.
pub type ServerMap = BTreeMap<String, McpServerConfig>;

/// One configured capability server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Executable for the stdio transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments for `command`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Variables layered over the inherited environment of the child
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory of the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Event-stream URL (long-lived GET, messages POSTed back)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Request/response HTTP URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,

    /// Headers attached to every HTTP request
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-call timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Handshake timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Only these operations are exposed (`name` or `name(...)`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tools: Option<Vec<String>>,

    /// These operations are never exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tools: Option<Vec<String>>,

    /// Free-text description shown by `mcp list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The transport a descriptor selects, with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind<'a> {
    /// Event-stream transport at this URL
    Sse(&'a str),
    /// Request/response HTTP transport at this URL
    Http(&'a str),
    /// Child process running this command
    Stdio(&'a str),
}

impl TransportKind<'_> {
    /// Short label: `sse`, `http`, or `stdio`.
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Sse(_) => "sse",
            TransportKind::Http(_) => "http",
            TransportKind::Stdio(_) => "stdio",
        }
    }

    /// The URL or command the transport targets.
    pub fn target(&self) -> &str {
        match self {
            TransportKind::Sse(t) | TransportKind::Http(t) | TransportKind::Stdio(t) => t,
        }
    }
}

impl fmt::Display for TransportKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl McpServerConfig {
    /// The selected transport: `url`, then `httpUrl`, then `command`.
    /// Blank values do not count.
    pub fn transport_kind(&self) -> Option<TransportKind<'_>> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        present(&self.url)
            .map(TransportKind::Sse)
            .or_else(|| present(&self.http_url).map(TransportKind::Http))
            .or_else(|| present(&self.command).map(TransportKind::Stdio))
    }

    /// The per-call timeout, defaulting to ten minutes.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT_MS))
    }
}

#[derive(Debug, Default, Deserialize)]
struct McpConfigFile {
    #[serde(default, alias = "mcpServers")]
    servers: ServerMap,
}

/// The user-level server file under the platform config directory.
pub fn default_user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "mcp-bridge").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Shell-tokenize `command` and register it as the server `mcp`,
/// replacing any existing entry of that name.
///
/// # Errors
///
/// Returns [`BridgeError::ConfigParse`] when the command has unbalanced
/// quotes or tokenizes to nothing.
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::config::{apply_adhoc_command, ServerMap};
///
/// let mut servers = ServerMap::new();
/// apply_adhoc_command(&mut servers, "my-server --root 'My Docs'").unwrap();
/// let entry = &servers["mcp"];
/// assert_eq!(entry.command.as_deref(), Some("my-server"));
/// assert_eq!(entry.args, vec!["--root", "My Docs"]);
/// ```
pub fn apply_adhoc_command(servers: &mut ServerMap, command: &str) -> Result<()> {
    let mut tokens = shlex::split(command)
        .ok_or_else(|| {
            BridgeError::ConfigParse(format!(
                "cannot tokenize MCP server command '{}': unbalanced quotes or trailing escape",
                command
            ))
        })?
        .into_iter();
    let program = tokens
        .next()
        .ok_or_else(|| BridgeError::ConfigParse("MCP server command is empty".to_string()))?;

    if servers.contains_key(ADHOC_SERVER_NAME) {
        tracing::debug!("Ad-hoc command replaces configured server '{}'", ADHOC_SERVER_NAME);
    }
    servers.insert(
        ADHOC_SERVER_NAME.to_string(),
        McpServerConfig {
            command: Some(program),
            args: tokens.collect(),
            ..Default::default()
        },
    );
    Ok(())
}

/// Environment field suffixes, longest first so `_HTTP_URL` is never read
/// as `_URL` and `_INCLUDE_TOOLS` never as a server named `..._include`.
const ENV_FIELDS: &[&str] = &[
    "INCLUDE_TOOLS",
    "EXCLUDE_TOOLS",
    "HTTP_URL",
    "COMMAND",
    "TIMEOUT",
    "ARGS",
    "URL",
];

/// Merges server descriptors from every configuration source.
#[derive(Debug, Clone)]
pub struct McpConfigResolver {
    env_prefix: String,
    user_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
}

impl Default for McpConfigResolver {
    fn default() -> Self {
        Self::from_settings(&McpSettings::default())
    }
}

impl McpConfigResolver {
    /// Build a resolver from the application settings.
    pub fn from_settings(settings: &McpSettings) -> Self {
        Self {
            env_prefix: settings.env_prefix.clone(),
            user_config_path: settings
                .user_config_path
                .clone()
                .or_else(default_user_config_path),
            project_config_path: Some(settings.project_config_path.clone()),
        }
    }

    /// Override the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Override (or disable, with `None`) the user-level file.
    pub fn with_user_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.user_config_path = path;
        self
    }

    /// Override (or disable, with `None`) the project-level file.
    pub fn with_project_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.project_config_path = path;
        self
    }

    /// The user-level file this resolver reads, if any.
    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    /// The project-level file this resolver reads, if any.
    pub fn project_config_path(&self) -> Option<&Path> {
        self.project_config_path.as_deref()
    }

    /// Merge every source into one map.
    ///
    /// Unparseable files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConfigParse`] only when `adhoc_command` cannot
    /// be tokenized.
    pub fn resolve(&self, adhoc_command: Option<&str>) -> Result<ServerMap> {
        let mut servers = self.servers_from_env();

        for path in [&self.user_config_path, &self.project_config_path]
            .into_iter()
            .flatten()
        {
            match load_server_file(path) {
                Ok(Some(file_servers)) => {
                    tracing::debug!(
                        path = %path.display(),
                        count = file_servers.len(),
                        "Loaded MCP server file"
                    );
                    servers.extend(file_servers);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping MCP server file: {}", e),
            }
        }

        if let Some(command) = adhoc_command {
            apply_adhoc_command(&mut servers, command)?;
        }

        Ok(servers)
    }

    /// Servers declared in the process environment.
    pub fn servers_from_env(&self) -> ServerMap {
        self.servers_from_vars(std::env::vars())
    }

    /// Servers declared by `vars`, interpreted as environment variables.
    ///
    /// List fields are comma-separated. `ARGS` is shell-tokenized instead
    /// when it contains quotes. Unparseable values are logged and ignored.
    pub fn servers_from_vars(&self, vars: impl IntoIterator<Item = (String, String)>) -> ServerMap {
        let mut servers = ServerMap::new();

        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(&self.env_prefix) else {
                continue;
            };
            let Some((name, field)) = split_env_key(rest) else {
                tracing::debug!("Ignoring unrecognized MCP variable {}", key);
                continue;
            };
            let entry = servers.entry(name).or_default();
            match field {
                "COMMAND" => entry.command = Some(value),
                "URL" => entry.url = Some(value),
                "HTTP_URL" => entry.http_url = Some(value),
                "ARGS" => entry.args = parse_env_args(&key, &value),
                "TIMEOUT" => match value.trim().parse() {
                    Ok(ms) => entry.timeout = Some(ms),
                    Err(_) => tracing::warn!("Invalid {}: {}", key, value),
                },
                "INCLUDE_TOOLS" => entry.include_tools = Some(split_list(&value)),
                "EXCLUDE_TOOLS" => entry.exclude_tools = Some(split_list(&value)),
                _ => {}
            }
        }

        servers
    }
}

/// Split `<NAME>_<FIELD>` into a lower-cased server name and its field.
fn split_env_key(rest: &str) -> Option<(String, &'static str)> {
    ENV_FIELDS.iter().find_map(|field| {
        let name = rest.strip_suffix(field)?.strip_suffix('_')?;
        (!name.is_empty()).then(|| (name.to_lowercase(), *field))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env_args(key: &str, value: &str) -> Vec<String> {
    if value.contains('"') || value.contains('\'') {
        match shlex::split(value) {
            Some(args) => return args,
            None => tracing::warn!("Cannot tokenize {}; falling back to commas", key),
        }
    }
    split_list(value)
}

/// Read one server file. A missing file yields `Ok(None)`.
///
/// # Errors
///
/// Returns [`BridgeError::ConfigParse`] if the file exists but cannot be
/// read or is not valid JSON of the expected shape.
pub fn load_server_file(path: &Path) -> Result<Option<ServerMap>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::ConfigParse(format!("failed to read {}: {}", path.display(), e))
    })?;
    let file: McpConfigFile = serde_json::from_str(&contents).map_err(|e| {
        BridgeError::ConfigParse(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(Some(file.servers))
}
