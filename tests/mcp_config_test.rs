//! Configuration resolution across every source: environment, user file,
//! project file, and the ad-hoc command.

use std::fs;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::TempDir;

use mcp_bridge::config::Config;
use mcp_bridge::mcp::config::{McpConfigResolver, ADHOC_SERVER_NAME};
use mcp_bridge::BridgeError;

const PREFIX: &str = "MCP_BRIDGE_IT_SERVER_";

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("failed to write config file");
    path
}

fn resolver(user: Option<PathBuf>, project: Option<PathBuf>) -> McpConfigResolver {
    McpConfigResolver::default()
        .with_env_prefix(PREFIX)
        .with_user_config_path(user)
        .with_project_config_path(project)
}

#[test]
#[serial]
fn test_later_sources_replace_whole_entries() {
    std::env::set_var(format!("{}SHARED_COMMAND", PREFIX), "from-env");
    std::env::set_var(format!("{}SHARED_TIMEOUT", PREFIX), "1234");
    std::env::set_var(format!("{}ENVONLY_URL", PREFIX), "http://localhost:9/sse");

    let dir = TempDir::new().unwrap();
    let user = write(
        &dir,
        "user.json",
        r#"{ "servers": {
            "shared": { "command": "from-user", "args": ["--user"] },
            "useronly": { "httpUrl": "http://localhost:9/mcp" }
        } }"#,
    );
    let project = write(
        &dir,
        "project.json",
        r#"{ "servers": { "shared": { "command": "from-project" } } }"#,
    );

    let servers = resolver(Some(user), Some(project)).resolve(None);

    std::env::remove_var(format!("{}SHARED_COMMAND", PREFIX));
    std::env::remove_var(format!("{}SHARED_TIMEOUT", PREFIX));
    std::env::remove_var(format!("{}ENVONLY_URL", PREFIX));

    let servers = servers.unwrap();
    assert_eq!(
        servers.keys().collect::<Vec<_>>(),
        vec!["envonly", "shared", "useronly"]
    );

    let shared = &servers["shared"];
    assert_eq!(shared.command.as_deref(), Some("from-project"));
    // Whole-entry replacement: nothing leaks from the env or user entries.
    assert!(shared.args.is_empty());
    assert_eq!(shared.timeout, None);

    assert_eq!(
        servers["envonly"].url.as_deref(),
        Some("http://localhost:9/sse")
    );
}

#[test]
#[serial]
fn test_broken_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let user = write(&dir, "user.json", "{ not json");
    let project = write(
        &dir,
        "project.json",
        r#"{ "servers": { "ok": { "command": "srv" } } }"#,
    );

    let servers = resolver(Some(user), Some(project)).resolve(None).unwrap();
    assert_eq!(servers.keys().collect::<Vec<_>>(), vec!["ok"]);
}

#[test]
#[serial]
fn test_adhoc_command_replaces_reserved_entry() {
    let dir = TempDir::new().unwrap();
    let project = write(
        &dir,
        "project.json",
        r#"{ "mcpServers": { "mcp": { "url": "http://localhost:9/sse" } } }"#,
    );

    let servers = resolver(None, Some(project))
        .resolve(Some(r#"python -m server --name "My Server""#))
        .unwrap();

    let adhoc = &servers[ADHOC_SERVER_NAME];
    assert_eq!(adhoc.command.as_deref(), Some("python"));
    assert_eq!(adhoc.args, vec!["-m", "server", "--name", "My Server"]);
    assert_eq!(adhoc.url, None);
}

#[test]
#[serial]
fn test_untokenizable_adhoc_command_is_parse_error() {
    let err = resolver(None, None)
        .resolve(Some("server 'unterminated"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::ConfigParse(_))
    ));

    let err = resolver(None, None).resolve(Some("   ")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::ConfigParse(_))
    ));
}

#[test]
#[serial]
fn test_resolver_follows_application_settings() {
    let dir = TempDir::new().unwrap();
    let project = write(
        &dir,
        "servers.json",
        r#"{ "servers": { "from-settings": { "command": "srv" } } }"#,
    );
    let yaml = write(
        &dir,
        "config.yaml",
        &format!(
            "mcp:\n  env_prefix: {}\n  user_config_path: {}\n  project_config_path: {}\n",
            PREFIX,
            dir.path().join("missing.json").display(),
            project.display()
        ),
    );

    let config = Config::load(yaml.to_str().unwrap()).unwrap();
    config.validate().unwrap();

    let servers = McpConfigResolver::from_settings(&config.mcp)
        .resolve(None)
        .unwrap();
    assert!(servers.contains_key("from-settings"));
}
