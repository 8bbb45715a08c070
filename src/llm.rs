//! Chat-completions provider client (DeepSeek / OpenAI-compatible).
//!
//! Messages and tool calls are explicit tagged types validated at the
//! boundary where the provider response is parsed, rather than loose JSON.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Response token budget for every completion request.
pub const MAX_TOKENS: u32 = 1000;

/// One conversation entry, serialized to the provider's wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

/// Model-issued request to invoke one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON string as emitted by the model; parsed at execution time.
    #[serde(default)]
    pub arguments: String,
}

/// `choices[0].message` of a completion response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

/// Seam between the orchestrator and the hosted model, so tests can script
/// responses without a network.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One non-streaming completion call. `tools` carries function-calling
    /// schemas when the model may request tool invocations.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<ChatResponse>;
}

/// HTTP client for a DeepSeek-style chat-completions endpoint.
pub struct DeepSeekClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl DeepSeekClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: SecretString::from(config.api_key.expose_secret().to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for DeepSeekClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
    ) -> Result<ChatResponse> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages,
            tools,
        };
        debug!(
            model = %self.model,
            messages = messages.len(),
            with_tools = tools.is_some(),
            "requesting completion"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider {
                status: 0,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::Provider {
                status: status.as_u16(),
                message: snippet,
            });
        }

        response.json().await.map_err(|e| Error::Provider {
            status: status.as_u16(),
            message: format!("malformed completion response: {e}"),
        })
    }
}
