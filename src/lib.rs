//! toolchat: a thin MCP chat client and a weather tool server.
//!
//! The `toolchat` binary connects to one MCP server (local script, WebSocket,
//! or SSE), lists its tools, and runs an interactive chat loop against a
//! DeepSeek-compatible chat-completions endpoint, relaying tool calls the
//! model requests. The `toolchat-weather` binary is a stdio MCP server
//! exposing weather alert/forecast lookups and installed-application listing.

pub mod apps;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod repl;
pub mod weather;
