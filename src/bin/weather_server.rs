//! Weather MCP server entry point: stdio protocol endpoint, no arguments.

use std::sync::Arc;

use toolchat::apps::InstalledAppsTool;
use toolchat::config::{self, LogLevel};
use toolchat::mcp::server::McpServer;
use toolchat::weather::{AlertsTool, ForecastTool, NwsClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing(LogLevel::from_env());

    let nws = Arc::new(NwsClient::new()?);

    let mut server = McpServer::new("toolchat-weather", env!("CARGO_PKG_VERSION"));
    server.register(Box::new(AlertsTool::new(nws.clone())));
    server.register(Box::new(ForecastTool::new(nws)));
    server.register(Box::new(InstalledAppsTool));

    server.run_stdio().await?;
    Ok(())
}
