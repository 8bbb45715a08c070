//! MCP server: stdio JSON-RPC dispatch over a registry of tool handlers.
//!
//! Stdout carries protocol frames only; all diagnostics go to stderr via
//! tracing. A failing handler never takes down the session — its error is
//! folded into a normal `tools/call` result with `isError` set.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::mcp::{
    rpc_error, rpc_result, RpcRequest, ToolDescriptor, INVALID_PARAMS, METHOD_NOT_FOUND,
    PARSE_ERROR, PROTOCOL_VERSION,
};

/// One tool exposed over the protocol: a descriptor and a request/response
/// function. Implementations must not panic; errors are rendered as text.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    async fn call(&self, arguments: Value) -> Result<String>;
}

/// Stdio MCP server endpoint.
pub struct McpServer {
    name: String,
    version: String,
    tools: BTreeMap<String, Box<dyn ToolHandler>>,
}

impl McpServer {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ToolHandler>) {
        let name = handler.descriptor().name;
        self.tools.insert(name, handler);
    }

    /// Serve newline-delimited JSON-RPC on stdin/stdout until EOF.
    pub async fn run_stdio(self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        info!(name = %self.name, tools = self.tools.len(), "MCP server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            stdout.write_all(&out).await?;
            stdout.flush().await?;
        }

        info!("stdin closed, shutting down");
        Ok(())
    }

    /// Parse one input line and dispatch it. Returns `None` for notifications
    /// and for lines whose id cannot be recovered.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                // Recover the id when the line is valid JSON but not a
                // well-formed request, so the peer sees a parse error.
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())?;
                Some(rpc_error(&id, PARSE_ERROR, &format!("invalid request: {e}")))
            }
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> Option<Value> {
        debug!(method = %request.method, "dispatching");
        match request.method.as_str() {
            "notifications/initialized" => None,
            method => {
                let id = request.id?;
                Some(match method {
                    "initialize" => rpc_result(
                        &id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": self.name, "version": self.version},
                        }),
                    ),
                    "tools/list" => {
                        let tools: Vec<Value> = self
                            .tools
                            .values()
                            .map(|h| {
                                serde_json::to_value(h.descriptor()).unwrap_or_else(|_| json!({}))
                            })
                            .collect();
                        rpc_result(&id, json!({"tools": tools}))
                    }
                    "tools/call" => self.call_tool(&id, &request.params).await,
                    other => {
                        rpc_error(&id, METHOD_NOT_FOUND, &format!("unknown method: {other}"))
                    }
                })
            }
        }
    }

    async fn call_tool(&self, id: &Value, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return rpc_error(id, INVALID_PARAMS, "tools/call requires a name");
        };
        let Some(handler) = self.tools.get(name) else {
            return rpc_error(id, INVALID_PARAMS, &format!("unknown tool: {name}"));
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        if let Err(reason) = validate_arguments(&handler.descriptor().input_schema, &arguments) {
            warn!(tool = name, %reason, "rejecting call before dispatch");
            return rpc_error(id, INVALID_PARAMS, &reason);
        }

        // Handler failures stay inside the tool result; only malformed
        // requests become protocol errors.
        match handler.call(arguments).await {
            Ok(text) => rpc_result(
                id,
                json!({"content": [{"type": "text", "text": text}]}),
            ),
            Err(e) => {
                warn!(tool = name, error = %e, "tool handler failed");
                rpc_result(
                    id,
                    json!({
                        "isError": true,
                        "content": [{"type": "text", "text": format!("Tool {name} failed: {e}")}],
                    }),
                )
            }
        }
    }
}

/// Check call arguments against the tool's input schema before the handler
/// runs: required properties must be present, numbers must sit inside any
/// declared minimum/maximum, strings must satisfy any declared
/// minLength/maxLength.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if arguments.get(name).is_none() {
                return Err(format!("missing required argument: {name}"));
            }
        }
    }

    let (Some(properties), Some(given)) = (
        schema.get("properties").and_then(Value::as_object),
        arguments.as_object(),
    ) else {
        return Ok(());
    };

    for (name, value) in given {
        let Some(property) = properties.get(name) else {
            continue;
        };
        match property.get("type").and_then(Value::as_str) {
            Some("number") => {
                let Some(number) = value.as_f64() else {
                    return Err(format!("argument {name} must be a number"));
                };
                if let Some(min) = property.get("minimum").and_then(Value::as_f64) {
                    if number < min {
                        return Err(format!("argument {name} below minimum {min}: {number}"));
                    }
                }
                if let Some(max) = property.get("maximum").and_then(Value::as_f64) {
                    if number > max {
                        return Err(format!("argument {name} above maximum {max}: {number}"));
                    }
                }
            }
            Some("string") => {
                let Some(text) = value.as_str() else {
                    return Err(format!("argument {name} must be a string"));
                };
                let length = text.chars().count() as u64;
                if let Some(min) = property.get("minLength").and_then(Value::as_u64) {
                    if length < min {
                        return Err(format!(
                            "argument {name} shorter than {min} characters: {text:?}"
                        ));
                    }
                }
                if let Some(max) = property.get("maxLength").and_then(Value::as_u64) {
                    if length > max {
                        return Err(format!(
                            "argument {name} longer than {max} characters: {text:?}"
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}
