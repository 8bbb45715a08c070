//! Runtime configuration from the environment.
//!
//! Both binaries call `dotenvy::dotenv().ok()` before reading anything here,
//! so a local `.env` file works the same as real environment variables.

use secrecy::SecretString;
use std::io::IsTerminal;

use crate::error::{Error, Result};

/// Default chat-completions base URL (DeepSeek's OpenAI-compatible endpoint).
pub const DEFAULT_API_BASE: &str = "https://api.deepseek.com";

/// Default model requested from the provider.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Log verbosity, settable via `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Read `LOG_LEVEL`, falling back to `Info` when unset or unrecognized.
    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Self::from_str(&v))
            .unwrap_or_default()
    }
}

/// Client-side configuration: provider credentials plus the optional default
/// remote server target.
#[derive(Debug)]
pub struct Config {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
    pub server_url: Option<String>,
    pub log_level: LogLevel,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY is not set".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(Error::Config("OPENAI_API_KEY is empty".to_string()));
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: std::env::var("DEEPSEEK_API_BASE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: std::env::var("DEEPSEEK_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            server_url: std::env::var("MCP_SERVER_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            log_level: LogLevel::from_env(),
        })
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when present so per-module filtering stays available;
/// otherwise the `LOG_LEVEL` value applies crate-wide. Output goes to stderr
/// because the server binary owns stdout for the protocol stream.
pub fn init_tracing(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parsing() {
        assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("verbose"), None);
    }

    #[test]
    fn log_level_round_trip() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert_eq!(LogLevel::from_str(level.as_str()), Some(level));
        }
    }
}
