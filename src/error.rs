//! Error taxonomy shared by the client and server binaries.
//!
//! Startup-time failures (bad CLI input, failed initial connection) are fatal;
//! per-query and per-tool-call failures are recovered locally and rendered as
//! text in the interactive loop.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport could not be established or the handshake failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Local server script has an extension we cannot map to an interpreter.
    #[error("unsupported script type: {0} (expected .js, .mjs, or .py)")]
    UnsupportedScriptType(String),

    /// Remote connection mode was neither websocket nor sse.
    #[error("invalid connection mode: {0} (expected ws or sse)")]
    InvalidConnectionMode(String),

    /// Upstream HTTP service returned a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Upstream kept answering 429 past the retry budget.
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimitExceeded { url: String, attempts: u32 },

    /// Model-supplied tool arguments were not valid JSON.
    #[error("tool {tool}: invalid arguments: {message}")]
    ToolArguments { tool: String, message: String },

    /// The tool itself reported failure.
    #[error("tool {tool} failed: {message}")]
    ToolInvocation { tool: String, message: String },

    /// Chat-completions endpoint returned a non-success status.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    /// Malformed frame, missing response, or request timeout on the MCP link.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing or unusable environment configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
