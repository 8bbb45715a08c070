//! MCP client: initialize handshake, tool listing, tool invocation.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::transport::{self, ConnectionMode, Transport};
use crate::mcp::{flatten_content, rpc_notification, rpc_request, ToolDescriptor, PROTOCOL_VERSION};

/// How long to wait for a response to any single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client end of one MCP session. Holds the single transport for the process
/// lifetime; the tool catalog is fetched once and never re-listed mid-session.
pub struct McpClient {
    transport: Box<dyn Transport>,
    next_id: u64,
}

impl McpClient {
    /// Construct the transport for `mode` and run the initialize handshake.
    pub async fn connect(mode: &ConnectionMode) -> Result<Self> {
        let transport = transport::connect(mode).await?;
        let mut client = Self {
            transport,
            next_id: 0,
        };

        let init = client
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await
            .map_err(|e| Error::ConnectionFailed(format!("initialize handshake: {e}")))?;
        debug!(server = ?init.get("serverInfo"), "MCP session initialized");

        client
            .transport
            .send(&rpc_notification("notifications/initialized"))
            .await?;

        Ok(client)
    }

    /// Fetch the server's tool list. One descriptor per tool, names preserved
    /// exactly; a malformed entry fails the whole call.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Protocol("tools/list result missing tools array".to_string()))?;

        tools
            .iter()
            .map(|tool| {
                serde_json::from_value(tool.clone())
                    .map_err(|e| Error::Protocol(format!("malformed tool entry: {e}")))
            })
            .collect()
    }

    /// Invoke a tool and return its result content flattened to one string.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
            .map_err(|e| Error::ToolInvocation {
                tool: name.to_string(),
                message: e.to_string(),
            })?;

        let content = flatten_content(result.get("content").unwrap_or(&Value::Null));
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(Error::ToolInvocation {
                tool: name.to_string(),
                message: content,
            });
        }
        Ok(content)
    }

    /// Release the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Send one request and wait for the response bearing its id.
    ///
    /// Server notifications and responses to other ids are skipped; a missing
    /// response surfaces as a timeout.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        self.transport.send(&rpc_request(id, method, params)).await?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, async {
            loop {
                let frame = self.transport.recv().await?;
                if frame.get("id").and_then(Value::as_u64) == Some(id) {
                    return Ok::<Value, Error>(frame);
                }
                warn!(method = ?frame.get("method"), "ignoring unsolicited frame");
            }
        })
        .await
        .map_err(|_| Error::Protocol(format!("timed out waiting for {method} response")))??;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::Protocol(format!("{method}: {message}")));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}
