//! MCP chat client entry point.

use anyhow::Context;
use clap::{ArgGroup, CommandFactory, Parser};
use std::path::PathBuf;
use tracing::info;

use toolchat::config::{self, Config};
use toolchat::llm::DeepSeekClient;
use toolchat::mcp::client::McpClient;
use toolchat::mcp::transport::ConnectionMode;
use toolchat::repl;

#[derive(Parser)]
#[command(
    name = "toolchat",
    about = "Chat client that relays model tool calls to an MCP server",
    group = ArgGroup::new("target").args(["script", "ws", "sse"]).multiple(false)
)]
struct Cli {
    /// Path to a local MCP server script (.js, .mjs, or .py)
    script: Option<PathBuf>,

    /// Connect to a remote MCP server over WebSocket
    #[arg(long, visible_alias = "websocket", value_name = "URL")]
    ws: Option<String>,

    /// Connect to a remote MCP server over SSE
    #[arg(long, value_name = "URL")]
    sse: Option<String>,
}

impl Cli {
    /// Resolve the connection target; with no argument, fall back to
    /// `MCP_SERVER_URL`, whose scheme must name a supported remote mode
    /// (ws/wss for WebSocket).
    fn mode(&self, config: &Config) -> toolchat::error::Result<Option<ConnectionMode>> {
        if let Some(script) = &self.script {
            return Ok(Some(ConnectionMode::LocalScript(script.clone())));
        }
        if let Some(url) = &self.ws {
            return Ok(Some(ConnectionMode::WebSocket(url.clone())));
        }
        if let Some(url) = &self.sse {
            return Ok(Some(ConnectionMode::Sse(url.clone())));
        }
        match &config.server_url {
            Some(url) => {
                let scheme = url.split("://").next().unwrap_or_default();
                ConnectionMode::remote(scheme, url).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env().context("loading configuration")?;
    config::init_tracing(config.log_level);

    let Some(mode) = cli.mode(&config).context("resolving connection target")? else {
        Cli::command().print_help()?;
        std::process::exit(2);
    };

    let mut client = McpClient::connect(&mode)
        .await
        .context("connecting to MCP server")?;

    let catalog = client.list_tools().await.context("listing tools")?;
    info!(tools = catalog.len(), "connected to MCP server");
    for tool in &catalog {
        println!("  tool: {} - {}", tool.name, tool.description);
    }

    let provider = DeepSeekClient::new(&config);
    let result = repl::run(&provider, &mut client, &catalog).await;

    client.close().await.ok();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use toolchat::config::LogLevel;
    use toolchat::error::Error;

    fn bare_cli() -> Cli {
        Cli {
            script: None,
            ws: None,
            sse: None,
        }
    }

    fn config_with(server_url: Option<&str>) -> Config {
        Config {
            api_key: SecretString::from("test-key".to_string()),
            api_base: toolchat::config::DEFAULT_API_BASE.to_string(),
            model: toolchat::config::DEFAULT_MODEL.to_string(),
            server_url: server_url.map(str::to_string),
            log_level: LogLevel::Info,
        }
    }

    #[test]
    fn env_fallback_resolves_to_websocket() {
        let mode = bare_cli()
            .mode(&config_with(Some("ws://localhost:3000/mcp")))
            .unwrap();
        assert!(matches!(mode, Some(ConnectionMode::WebSocket(_))));

        let mode = bare_cli()
            .mode(&config_with(Some("wss://example.com/mcp")))
            .unwrap();
        assert!(matches!(mode, Some(ConnectionMode::WebSocket(_))));
    }

    #[test]
    fn env_fallback_rejects_unsupported_scheme() {
        let err = bare_cli()
            .mode(&config_with(Some("http://localhost:3000/mcp")))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConnectionMode(_)));
    }

    #[test]
    fn no_target_resolves_to_none() {
        assert!(bare_cli().mode(&config_with(None)).unwrap().is_none());
    }

    #[test]
    fn explicit_flags_win_over_env() {
        let cli = Cli {
            script: None,
            ws: None,
            sse: Some("http://localhost:3000/sse".to_string()),
        };
        let mode = cli
            .mode(&config_with(Some("ws://localhost:3000/mcp")))
            .unwrap();
        assert!(matches!(mode, Some(ConnectionMode::Sse(_))));
    }
}
