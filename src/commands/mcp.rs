//! MCP subcommand handler
//!
//! Every subcommand resolves the configured servers, runs one discovery
//! pass, does its work against the populated tool registry, and shuts the
//! connections down again.

use std::sync::Arc;

use colored::{ColoredString, Colorize};
use prettytable::{format, row, Table};
use serde_json::Value;

use crate::cli::McpCommand;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::mcp::config::{apply_adhoc_command, McpConfigResolver, ServerMap};
use crate::mcp::{McpManager, McpServerStatus, ServerStatusRegistry};
use crate::tools::ToolRegistry;

/// Handle MCP subcommands
///
/// # Errors
///
/// Returns an error when the ad-hoc command cannot be tokenized, when
/// `tools --server` names an unknown server, or when `call` fails.
///
/// # Examples
///
/// ```no_run
/// use mcp_bridge::cli::McpCommand;
/// use mcp_bridge::commands::mcp::handle_mcp;
/// use mcp_bridge::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     handle_mcp(McpCommand::List, Config::default(), None).await
/// }
/// ```
pub async fn handle_mcp(
    command: McpCommand,
    config: Config,
    adhoc_command: Option<String>,
) -> Result<()> {
    let mut servers = McpConfigResolver::from_settings(&config.mcp).resolve(None)?;
    if let Some(command) = adhoc_command.as_deref() {
        // Applied here so `mcp list` shows the entry.
        apply_adhoc_command(&mut servers, command)?;
    }

    if let McpCommand::Tools {
        server: Some(name),
    } = &command
    {
        servers = select_server(servers, name)?;
    }

    let status = Arc::new(ServerStatusRegistry::new());
    let manager = McpManager::from_config(&config, Arc::clone(&status));
    let registry = ToolRegistry::new();
    manager.discover_all(&servers, None, &registry).await?;

    let outcome = match command {
        McpCommand::List => {
            print_servers(&servers, &status);
            Ok(())
        }
        McpCommand::Tools { .. } => {
            print_tools(&registry);
            Ok(())
        }
        McpCommand::Call { tool, args } => call_tool(&registry, &tool, &args).await,
    };

    manager.shutdown().await;
    outcome
}

fn select_server(mut servers: ServerMap, name: &str) -> Result<ServerMap> {
    match servers.remove_entry(name) {
        Some((name, config)) => Ok(ServerMap::from([(name, config)])),
        None => Err(BridgeError::Config(format!(
            "unknown MCP server '{}' (configured: {})",
            name,
            join_or_none(servers.keys())
        ))
        .into()),
    }
}

fn print_servers(servers: &ServerMap, status: &ServerStatusRegistry) {
    if servers.is_empty() {
        println!("{}", "No MCP servers configured.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row![
        "Server".bold(),
        "Transport".bold(),
        "Target".bold(),
        "Status".bold(),
        "Description".bold()
    ]);

    for (name, config) in servers {
        let (transport, target) = match config.transport_kind() {
            Some(kind) => (kind.label().to_string(), kind.target().to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        table.add_row(row![
            name.cyan(),
            transport,
            shorten(&target, 48),
            colored_status(status.get(name)),
            shorten(config.description.as_deref().unwrap_or(""), 40)
        ]);
    }

    println!("\nMCP servers:");
    table.printstd();
    println!();
}

fn print_tools(registry: &ToolRegistry) {
    if registry.is_empty() {
        println!("{}", "No MCP tools discovered.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Tool".bold(), "Description".bold()]);
    for definition in registry.all_definitions() {
        let name = definition["name"].as_str().unwrap_or_default();
        let description = definition["description"].as_str().unwrap_or_default();
        table.add_row(row![name.cyan(), shorten(description, 72)]);
    }

    println!("\nDiscovered tools ({}):", registry.len());
    table.printstd();
    println!();
}

async fn call_tool(registry: &ToolRegistry, tool: &str, raw_args: &str) -> Result<()> {
    let args = parse_arguments(raw_args)?;
    let executor = registry.get(tool).ok_or_else(|| {
        BridgeError::Tool(format!(
            "unknown tool '{}' (available: {})",
            tool,
            join_or_none(registry.names().iter())
        ))
    })?;

    let result = executor.execute(args).await?;
    if result.success {
        println!("{}", result.to_message());
        Ok(())
    } else {
        eprintln!("{}", result.to_message().red());
        Err(BridgeError::Tool(format!("tool '{}' reported a failure", tool)).into())
    }
}

/// Parse `--args`; it must be a JSON object.
fn parse_arguments(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| BridgeError::Tool(format!("--args is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(BridgeError::Tool("--args must be a JSON object".to_string()).into());
    }
    Ok(value)
}

fn colored_status(status: McpServerStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        McpServerStatus::Connected => label.green(),
        McpServerStatus::Connecting => label.yellow(),
        McpServerStatus::Disconnected => label.red(),
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

fn join_or_none<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let joined = names.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpServerConfig;
    use serial_test::serial;

    /// A config that finds no servers anywhere.
    fn isolated_config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.mcp.user_config_path = Some(dir.path().join("user.json"));
        config.mcp.project_config_path = dir.path().join("project.json");
        config.mcp.env_prefix = "MCP_BRIDGE_CMD_TEST_".to_string();
        config
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(parse_arguments("[1,2]").is_err());
        assert!(parse_arguments("{oops").is_err());
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("abcdefghijkl", 8), "abcde...");
        assert_eq!(shorten("ééééééé", 5), "éé...");
    }

    #[test]
    fn test_select_server() {
        let servers = ServerMap::from([
            ("a".to_string(), McpServerConfig::default()),
            ("b".to_string(), McpServerConfig::default()),
        ]);
        let selected = select_server(servers.clone(), "b").unwrap();
        assert_eq!(selected.keys().collect::<Vec<_>>(), vec!["b"]);

        let err = select_server(servers, "c").unwrap_err();
        assert!(err.to_string().contains("a, b"));
    }

    #[tokio::test]
    #[serial]
    async fn test_list_with_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let result = handle_mcp(McpCommand::List, isolated_config(&dir), None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_call_unknown_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle_mcp(
            McpCommand::Call {
                tool: "nope".to_string(),
                args: "{}".to_string(),
            },
            isolated_config(&dir),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Tool(_))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_bad_adhoc_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = handle_mcp(
            McpCommand::List,
            isolated_config(&dir),
            Some("broken 'quote".to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::ConfigParse(_))
        ));
    }
}
