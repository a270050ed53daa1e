//! Command-line interface definition for mcp-bridge
//!
//! This module defines the CLI structure using clap's derive API. The only
//! command group is `mcp`, which lists configured servers, shows the tools
//! they expose, and invokes a tool directly.

use clap::{Parser, Subcommand};

/// mcp-bridge - discover and call tools on MCP capability servers
///
/// Servers are declared in `mcp-config.json` files, `MCP_SERVER_*`
/// environment variables, or ad hoc with `--mcp-command`.
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "MCP_BRIDGE_CONFIG",
        default_value = "config/config.yaml"
    )]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Launch an extra stdio server from a shell-style command line,
    /// registered under the name `mcp`
    #[arg(long, global = true, value_name = "COMMAND")]
    pub mcp_command: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Work with MCP servers and their tools
    Mcp {
        /// MCP subcommand
        #[command(subcommand)]
        command: McpCommand,
    },
}

/// MCP subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum McpCommand {
    /// Connect to every configured server and show its status
    List,

    /// List the tools discovered on connected servers
    Tools {
        /// Only show tools from this server
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Invoke a discovered tool and print its result
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
