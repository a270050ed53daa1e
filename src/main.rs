//! mcp-bridge - MCP capability-server discovery CLI
//!
//! Main entry point: sets up logging, loads configuration, and dispatches
//! the requested command.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_bridge::cli::{Cli, Commands};
use mcp_bridge::commands;
use mcp_bridge::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Mcp { command } => {
            tracing::debug!(?command, "Running mcp command");
            commands::mcp::handle_mcp(command, config, cli.mcp_command).await
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins when set; otherwise `-v` selects debug output. Logs go to
/// stderr so command output on stdout stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "mcp_bridge=debug"
    } else {
        "mcp_bridge=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
