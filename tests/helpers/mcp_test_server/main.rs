//! Scripted MCP server for integration tests
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout, the stdio transport
//! framing. Each line read is one message; each response is one line.
//!
//! Tools:
//!
//! - `echo {message}` -- returns `message` as text
//! - `slow {millis}` -- sleeps, then answers `done`
//! - `fail` -- answers with `isError: true`
//! - `env {name}` -- returns the value of environment variable `name`
//! - `exit` -- exits the process without answering
//!
//! `tools/list` is split into two pages to exercise `nextCursor`. Setting
//! `MCP_TEST_SERVER_NAMELESS=1` adds an entry without a `name`. Every
//! request is also logged to stderr.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let _ = send(&mut out, &make_error(&Value::Null, -32700, "Parse error"));
                continue;
            }
        };

        let method = request["method"].as_str().unwrap_or_default().to_string();
        eprintln!("mcp_test_server: {}", method);

        // Notifications carry no id and get no answer.
        let Some(id) = request.get("id").cloned() else {
            continue;
        };

        let params = request.get("params").cloned().unwrap_or(Value::Null);
        let response = match method.as_str() {
            "initialize" => result(
                &id,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
                }),
            ),
            "tools/list" => result(&id, tools_page(params["cursor"].as_str())),
            "tools/call" => match call_tool(&params) {
                Some(value) => result(&id, value),
                None => std::process::exit(0),
            },
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if send(&mut out, &response).is_err() {
            break;
        }
    }
}

fn send(out: &mut impl Write, message: &Value) -> io::Result<()> {
    writeln!(out, "{}", message)?;
    out.flush()
}

fn tools_page(cursor: Option<&str>) -> Value {
    let schema = |prop: &str, ty: &str| {
        json!({ "type": "object", "properties": { prop: { "type": ty } } })
    };

    match cursor {
        None => {
            let mut tools = vec![
                json!({ "name": "echo", "description": "Echoes input", "inputSchema": schema("message", "string") }),
                json!({ "name": "slow", "description": "Sleeps before answering", "inputSchema": schema("millis", "integer") }),
            ];
            if std::env::var("MCP_TEST_SERVER_NAMELESS").is_ok() {
                tools.push(json!({ "description": "entry without a name" }));
            }
            json!({ "tools": tools, "nextCursor": "page-2" })
        }
        Some(_) => json!({
            "tools": [
                { "name": "fail", "description": "Always reports an error" },
                { "name": "env", "description": "Reads an environment variable", "inputSchema": schema("name", "string") },
                { "name": "exit", "description": "Terminates the server" }
            ]
        }),
    }
}

/// Result of one `tools/call`; `None` means the server should exit.
fn call_tool(params: &Value) -> Option<Value> {
    let args = &params["arguments"];
    let text = |t: String| json!({ "content": [{ "type": "text", "text": t }] });

    let value = match params["name"].as_str().unwrap_or_default() {
        "echo" => text(args["message"].as_str().unwrap_or_default().to_string()),
        "slow" => {
            std::thread::sleep(Duration::from_millis(args["millis"].as_u64().unwrap_or(1000)));
            text("done".to_string())
        }
        "fail" => json!({
            "content": [{ "type": "text", "text": "failure requested" }],
            "isError": true
        }),
        "env" => {
            let name = args["name"].as_str().unwrap_or_default();
            text(std::env::var(name).unwrap_or_default())
        }
        "exit" => return None,
        other => json!({
            "content": [{ "type": "text", "text": format!("unknown tool: {}", other) }],
            "isError": true
        }),
    };
    Some(value)
}

fn result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
