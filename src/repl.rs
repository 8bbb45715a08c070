//! Interactive loop: read a line, dispatch it, print the result.
//!
//! `quit` (any casing) ends the session. `tool:<name> [json-args]` is a debug
//! escape hatch that invokes a tool directly, bypassing the model. Everything
//! else goes through the query orchestrator. Errors inside one iteration are
//! printed and the loop keeps going.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

use crate::llm::ChatProvider;
use crate::mcp::client::McpClient;
use crate::mcp::ToolDescriptor;
use crate::orchestrator::{self, new_conversation};

const PROMPT: &str = "query> ";
const HISTORY_FILE: &str = ".toolchat_history";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand<'a> {
    Quit,
    Empty,
    DirectTool { name: &'a str, args: &'a str },
    Query(&'a str),
}

/// Classify an input line. Direct-tool syntax is `tool:<name> [json-args]`.
pub fn parse_line(line: &str) -> ReplCommand<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    if trimmed.eq_ignore_ascii_case("quit") {
        return ReplCommand::Quit;
    }
    if let Some(rest) = trimmed.strip_prefix("tool:") {
        let rest = rest.trim_start();
        let (name, args) = match rest.find(char::is_whitespace) {
            Some(split) => (&rest[..split], rest[split..].trim()),
            None => (rest, ""),
        };
        return ReplCommand::DirectTool { name, args };
    }
    ReplCommand::Query(trimmed)
}

fn history_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(HISTORY_FILE))
}

/// Run the interactive loop until `quit` or end of input.
pub async fn run(
    provider: &dyn ChatProvider,
    client: &mut McpClient,
    catalog: &[ToolDescriptor],
) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    println!("Type a question, `tool:<name> [json-args]`, or `quit`.");

    loop {
        let line = match tokio::task::block_in_place(|| editor.readline(PROMPT)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match parse_line(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::DirectTool { name, args } => {
                let _ = editor.add_history_entry(&line);
                match direct_tool_call(client, name, args).await {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("[Error] {e}"),
                }
            }
            ReplCommand::Query(query) => {
                let _ = editor.add_history_entry(&line);
                debug!(query, "running query");
                let mut conversation = new_conversation();
                match orchestrator::run_query(provider, client, catalog, &mut conversation, query)
                    .await
                {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("[Error] {e}"),
                }
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
    Ok(())
}

async fn direct_tool_call(client: &mut McpClient, name: &str, args: &str) -> Result<String> {
    let arguments: Value = if args.is_empty() {
        json!({})
    } else {
        serde_json::from_str(args)?
    };
    Ok(client.call_tool(name, arguments).await?)
}
