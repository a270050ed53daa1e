//! End-to-end stdio tests: discovery pipelines against the `mcp_test_server`
//! helper binary, spawned through the real transport factory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_bridge::mcp::config::{McpServerConfig, ServerMap};
use mcp_bridge::mcp::transport::DefaultTransportFactory;
use mcp_bridge::mcp::types::Implementation;
use mcp_bridge::mcp::{McpDiscoveryState, McpManager, McpServerStatus, ServerStatusRegistry};
use mcp_bridge::tools::ToolRegistry;
use mcp_bridge::BridgeError;

fn test_server() -> McpServerConfig {
    McpServerConfig {
        command: Some(env!("CARGO_BIN_EXE_mcp_test_server").to_string()),
        timeout: Some(5_000),
        ..Default::default()
    }
}

fn manager() -> McpManager {
    McpManager::new(
        Arc::new(ServerStatusRegistry::new()),
        Arc::new(DefaultTransportFactory::new(Duration::from_secs(10))),
        Duration::from_secs(10),
        Implementation {
            name: "mcp-bridge-tests".to_string(),
            version: "0.0.0".to_string(),
        },
    )
}

async fn discover(servers: ServerMap) -> (McpManager, ToolRegistry) {
    let manager = manager();
    let registry = ToolRegistry::new();
    manager
        .discover_all(&servers, None, &registry)
        .await
        .expect("discovery should not fail as a whole");
    (manager, registry)
}

#[tokio::test]
async fn test_discovers_all_pages_and_calls_echo() {
    let (manager, registry) = discover(ServerMap::from([("local".to_string(), test_server())])).await;

    assert_eq!(registry.names(), vec!["echo", "env", "exit", "fail", "slow"]);
    assert_eq!(manager.status().get("local"), McpServerStatus::Connected);
    assert_eq!(
        manager.status().discovery_state(),
        McpDiscoveryState::Completed
    );

    let info = manager.client("local").unwrap();
    assert_eq!(
        info.server_info().unwrap().server_info.name,
        "mcp-test-server"
    );

    let result = registry
        .get("echo")
        .unwrap()
        .execute(json!({ "message": "hello over stdio" }))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, "hello over stdio");
    assert_eq!(result.metadata["mcp_server"], "local");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_filters_and_nameless_entries() {
    let mut config = test_server();
    config.env = HashMap::from([("MCP_TEST_SERVER_NAMELESS".to_string(), "1".to_string())]);
    config.include_tools = Some(vec!["echo(message)".to_string(), "fail".to_string()]);
    config.exclude_tools = Some(vec!["fail".to_string()]);

    let (manager, registry) = discover(ServerMap::from([("local".to_string(), config)])).await;

    assert_eq!(registry.names(), vec!["echo"]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_descriptor_env_overlays_parent_environment() {
    let mut config = test_server();
    config.env = HashMap::from([(
        "MCP_BRIDGE_STDIO_VALUE".to_string(),
        "from-descriptor".to_string(),
    )]);

    let (manager, registry) = discover(ServerMap::from([("local".to_string(), config)])).await;
    let env_tool = registry.get("env").unwrap();

    let overlaid = env_tool
        .execute(json!({ "name": "MCP_BRIDGE_STDIO_VALUE" }))
        .await
        .unwrap();
    assert_eq!(overlaid.output, "from-descriptor");

    // PATH comes from the parent process.
    let inherited = env_tool.execute(json!({ "name": "PATH" })).await.unwrap();
    assert!(!inherited.output.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_call_timeout_is_enforced() {
    let mut config = test_server();
    config.timeout = Some(300);

    let (manager, registry) = discover(ServerMap::from([("local".to_string(), config)])).await;

    let err = registry
        .get("slow")
        .unwrap()
        .execute(json!({ "millis": 3000 }))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::CallTimeout { timeout_ms: 300, .. })
    ));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_tool_reported_error_is_failed_result() {
    let (manager, registry) = discover(ServerMap::from([("local".to_string(), test_server())])).await;

    let result = registry.get("fail").unwrap().execute(json!({})).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("failure requested"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_server_exit_marks_disconnected() {
    let (manager, registry) = discover(ServerMap::from([("local".to_string(), test_server())])).await;

    let err = registry.get("exit").unwrap().execute(json!({})).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::Transport(_))
    ));

    let mut disconnected = false;
    for _ in 0..100 {
        if manager.status().get("local") == McpServerStatus::Disconnected {
            disconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(disconnected, "fault hook should publish Disconnected");

    let err = registry
        .get("echo")
        .unwrap()
        .execute(json!({ "message": "anyone?" }))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::Transport(_))
    ));
}

#[tokio::test]
async fn test_missing_executable_does_not_block_other_servers() {
    let missing = McpServerConfig {
        command: Some("/nonexistent/mcp-bridge/no-such-server".to_string()),
        ..Default::default()
    };
    let servers = ServerMap::from([
        ("broken".to_string(), missing),
        ("local".to_string(), test_server()),
    ]);

    let (manager, registry) = discover(servers).await;

    assert_eq!(manager.status().get("broken"), McpServerStatus::Disconnected);
    assert_eq!(manager.status().get("local"), McpServerStatus::Connected);
    assert!(registry.get("echo").is_some());
    assert!(manager.client("broken").is_none());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_adhoc_command_runs_as_mcp_server() {
    let manager = manager();
    let registry = ToolRegistry::new();
    let command = format!("'{}'", env!("CARGO_BIN_EXE_mcp_test_server"));

    manager
        .discover_all(&ServerMap::new(), Some(&command), &registry)
        .await
        .unwrap();

    assert_eq!(manager.status().get("mcp"), McpServerStatus::Connected);
    assert!(registry.get("echo").is_some());
    manager.shutdown().await;
}
