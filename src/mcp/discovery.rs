//! Tool discovery: list a server's operations, filter them, wrap them
//!
//! One `tools/list` exchange per server. Entries without a string `name`
//! are skipped with a warning rather than failing the server. The
//! `includeTools` / `excludeTools` filters are applied next, with exclusion
//! always winning.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{BridgeError, Result};
use crate::mcp::client::CapabilityClient;
use crate::mcp::config::McpServerConfig;
use crate::mcp::tool::McpProxyTool;

/// Whether operation `name` passes the descriptor's filters.
///
/// `excludeTools` matches exactly. `includeTools` matches either the exact
/// name or an entry written as `name(...)`; only the text before the first
/// `(` is compared in that form.
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::config::McpServerConfig;
/// use mcp_bridge::mcp::discovery::is_tool_enabled;
///
/// let config = McpServerConfig {
///     include_tools: Some(vec!["read_file(path)".to_string(), "write".to_string()]),
///     exclude_tools: Some(vec!["write".to_string()]),
///     ..Default::default()
/// };
/// assert!(is_tool_enabled("read_file", &config));
/// assert!(!is_tool_enabled("write", &config));
/// assert!(!is_tool_enabled("delete", &config));
/// ```
pub fn is_tool_enabled(name: &str, config: &McpServerConfig) -> bool {
    if let Some(exclude) = &config.exclude_tools {
        if exclude.iter().any(|e| e == name) {
            return false;
        }
    }

    match &config.include_tools {
        None => true,
        Some(include) => include.iter().any(|entry| {
            entry == name
                || entry
                    .split_once('(')
                    .is_some_and(|(prefix, _)| prefix.trim() == name)
        }),
    }
}

/// Discover the operations of one connected server as proxy tools.
///
/// Server-reported order is preserved. The listing is bounded by the
/// descriptor's call timeout.
///
/// # Errors
///
/// Returns [`BridgeError::Discovery`] when the listing is malformed or when
/// no tool survives filtering, and propagates request failures from the
/// client.
pub async fn discover_tools(
    client: &Arc<dyn CapabilityClient>,
    server_name: &str,
    config: &McpServerConfig,
) -> Result<Vec<McpProxyTool>> {
    let timeout = config.call_timeout();
    let operations = client.list_operations(timeout).await?;
    let advertised = operations.len();

    let mut tools = Vec::new();
    for operation in operations {
        let Some(name) = operation.get("name").and_then(Value::as_str) else {
            tracing::warn!(server = %server_name, "Skipping MCP tool entry without a name");
            continue;
        };

        if !is_tool_enabled(name, config) {
            tracing::debug!(server = %server_name, tool = %name, "MCP tool filtered out");
            continue;
        }

        let description = operation
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = operation
            .get("inputSchema")
            .filter(|schema| schema.is_object())
            .cloned()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));

        tools.push(McpProxyTool::new(
            server_name,
            name,
            description,
            parameters,
            timeout,
            client,
        ));
    }

    if tools.is_empty() {
        return Err(BridgeError::Discovery {
            server: server_name.to_string(),
            message: format!(
                "no usable tools ({} advertised, none passed validation and filtering)",
                advertised
            ),
        }
        .into());
    }

    tracing::debug!(server = %server_name, count = tools.len(), "Discovered MCP tools");
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::DEFAULT_TOOL_TIMEOUT_MS;
    use crate::mcp::tool::tests::ScriptedClient;
    use std::time::Duration;

    fn client_with(operations: Vec<Value>) -> Arc<dyn CapabilityClient> {
        let mut scripted = ScriptedClient::new("srv");
        scripted.operations = Ok(operations);
        Arc::new(scripted)
    }

    fn names(tools: &[McpProxyTool]) -> Vec<&str> {
        tools.iter().map(McpProxyTool::name).collect()
    }

    #[test]
    fn test_no_filters_enables_everything() {
        assert!(is_tool_enabled("anything", &McpServerConfig::default()));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let config = McpServerConfig {
            include_tools: Some(vec!["a".to_string()]),
            exclude_tools: Some(vec!["a".to_string()]),
            ..Default::default()
        };
        assert!(!is_tool_enabled("a", &config));
    }

    #[test]
    fn test_include_call_form_matches_prefix_only() {
        let config = McpServerConfig {
            include_tools: Some(vec!["search(query, limit)".to_string()]),
            ..Default::default()
        };
        assert!(is_tool_enabled("search", &config));
        assert!(!is_tool_enabled("search_all", &config));
        assert!(!is_tool_enabled("search(query, limit)x", &config));
    }

    #[test]
    fn test_exclude_is_exact_match() {
        let config = McpServerConfig {
            exclude_tools: Some(vec!["run(cmd)".to_string()]),
            ..Default::default()
        };
        assert!(is_tool_enabled("run", &config));
    }

    #[tokio::test]
    async fn test_discovery_preserves_order_and_defaults() {
        let client = client_with(vec![
            json!({ "name": "zeta", "description": "last letter" }),
            json!({ "name": "alpha", "inputSchema": { "type": "object", "required": ["x"] } }),
        ]);

        let tools = discover_tools(&client, "srv", &McpServerConfig::default())
            .await
            .unwrap();

        assert_eq!(names(&tools), vec!["zeta", "alpha"]);
        assert_eq!(tools[0].description(), "last letter");
        assert_eq!(
            tools[0].parameters(),
            &json!({ "type": "object", "properties": {} })
        );
        assert_eq!(tools[1].parameters()["required"][0], "x");
        assert_eq!(
            tools[0].timeout(),
            Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS)
        );
        assert_eq!(tools[0].server_name(), "srv");
    }

    #[tokio::test]
    async fn test_descriptor_timeout_applies() {
        let client = client_with(vec![json!({ "name": "a" })]);
        let config = McpServerConfig {
            timeout: Some(1500),
            ..Default::default()
        };
        let tools = discover_tools(&client, "srv", &config).await.unwrap();
        assert_eq!(tools[0].timeout(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_nameless_entries_are_skipped() {
        let client = client_with(vec![
            json!({ "description": "no name" }),
            json!({ "name": 42 }),
            json!({ "name": "ok" }),
        ]);
        let tools = discover_tools(&client, "srv", &McpServerConfig::default())
            .await
            .unwrap();
        assert_eq!(names(&tools), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_filters_applied() {
        let client = client_with(vec![
            json!({ "name": "read" }),
            json!({ "name": "write" }),
            json!({ "name": "delete" }),
        ]);
        let config = McpServerConfig {
            include_tools: Some(vec!["read".to_string(), "write(path)".to_string()]),
            exclude_tools: Some(vec!["write".to_string()]),
            ..Default::default()
        };
        let tools = discover_tools(&client, "srv", &config).await.unwrap();
        assert_eq!(names(&tools), vec!["read"]);
    }

    #[tokio::test]
    async fn test_empty_after_filtering_is_discovery_error() {
        let client = client_with(vec![json!({ "name": "read" })]);
        let config = McpServerConfig {
            exclude_tools: Some(vec!["read".to_string()]),
            ..Default::default()
        };
        let err = discover_tools(&client, "srv", &config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Discovery { server, .. }) if server == "srv"
        ));
    }

    #[tokio::test]
    async fn test_empty_listing_is_discovery_error() {
        let client = client_with(Vec::new());
        let err = discover_tools(&client, "srv", &McpServerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::Discovery { .. })
        ));
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let mut scripted = ScriptedClient::new("srv");
        scripted.operations = Err("tools/list result has no `tools` array".to_string());
        let client: Arc<dyn CapabilityClient> = Arc::new(scripted);

        let err = discover_tools(&client, "srv", &McpServerConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("srv"));
    }
}
