//! Query orchestration: one user utterance in, final display text out,
//! with at most one round of tool calls in between.
//!
//! Capping tool-call chaining at one round keeps this a two-phase pipeline
//! (initial call, then one sequential batch of tool calls with a follow-up
//! call each) instead of a recursive planner. The follow-up calls carry no
//! tool catalog, so the model cannot request further tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatProvider, ToolCall};
use crate::mcp::ToolDescriptor;

/// Opening message of every per-query conversation.
pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when a question \
     needs live data, and answer directly otherwise.";

/// Seam over `McpClient::call_tool` so tests can record invocations.
#[async_trait]
pub trait ToolExecutor: Send {
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String>;
}

#[async_trait]
impl ToolExecutor for crate::mcp::client::McpClient {
    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
        crate::mcp::client::McpClient::call_tool(self, name, arguments).await
    }
}

/// Fresh single-message conversation for one query.
pub fn new_conversation() -> Vec<ChatMessage> {
    vec![ChatMessage::System {
        content: SYSTEM_PROMPT.to_string(),
    }]
}

/// Run one query through the model, executing at most one round of tool
/// calls, and return the joined output text.
///
/// A failure inside one tool call becomes an `[Error]` line in the output;
/// the remaining calls in the batch still run.
pub async fn run_query(
    provider: &dyn ChatProvider,
    executor: &mut dyn ToolExecutor,
    catalog: &[ToolDescriptor],
    conversation: &mut Vec<ChatMessage>,
    query: &str,
) -> Result<String> {
    conversation.push(ChatMessage::User {
        content: query.to_string(),
    });

    let schemas: Vec<Value> = catalog.iter().map(ToolDescriptor::to_openai_schema).collect();
    let tools = (!schemas.is_empty()).then_some(schemas.as_slice());

    let response = provider.complete(conversation, tools).await?;
    let Some(choice) = response.choices.into_iter().next() else {
        debug!("completion returned no choices");
        return Ok(String::new());
    };
    let message = choice.message;

    let mut output: Vec<String> = Vec::new();
    if let Some(text) = &message.content {
        output.push(text.clone());
    }

    if !message.tool_calls.is_empty() {
        // The assistant's tool-call-bearing message must precede the tool
        // results for the follow-up request to be well-formed.
        conversation.push(ChatMessage::Assistant {
            content: message.content.clone(),
            tool_calls: Some(message.tool_calls.clone()),
        });

        for call in &message.tool_calls {
            match run_tool_call(provider, executor, conversation, call).await {
                Ok(Some(text)) => output.push(text),
                Ok(None) => {}
                Err(e) => {
                    warn!(tool = %call.function.name, error = %e, "tool call failed");
                    output.push(format!("[Error] tool {} failed: {e}", call.function.name));
                }
            }
        }
    }

    Ok(output.join("\n"))
}

/// Execute one tool call and the follow-up completion for it. Returns the
/// follow-up's text content, if any.
///
/// The call's tool slot is always answered: on failure the tool-role message
/// carries the error text instead of a result, so later completions in the
/// batch never go out with a dangling `tool_call_id`.
async fn run_tool_call(
    provider: &dyn ChatProvider,
    executor: &mut dyn ToolExecutor,
    conversation: &mut Vec<ChatMessage>,
    call: &ToolCall,
) -> Result<Option<String>> {
    let name = &call.function.name;

    let invocation = match parse_arguments(name, &call.function.arguments) {
        Ok(arguments) => {
            debug!(tool = %name, "invoking tool");
            executor.call_tool(name, arguments).await
        }
        Err(e) => Err(e),
    };

    let (content, failure) = match invocation {
        Ok(result) => (result, None),
        Err(e) => (format!("[Error] tool {name} failed: {e}"), Some(e)),
    };
    conversation.push(ChatMessage::Tool {
        tool_call_id: call.id.clone(),
        name: name.clone(),
        content,
    });
    if let Some(e) = failure {
        return Err(e);
    }

    // Follow-up turn: no tool catalog, so this is a leaf call.
    let follow_up = provider.complete(conversation, None).await?;
    let Some(choice) = follow_up.choices.into_iter().next() else {
        return Ok(None);
    };
    if !choice.message.tool_calls.is_empty() {
        warn!(tool = %name, "follow-up requested tools; ignoring");
    }
    Ok(choice.message.content)
}

/// Parse a tool call's argument payload, defaulting to an empty object when
/// the model sent nothing.
fn parse_arguments(tool: &str, raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw).map_err(|e| Error::ToolArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, Choice, FunctionCall, ResponseMessage};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted provider: pops one canned response per call and records
    /// whether a tool catalog was attached plus the conversation it saw.
    struct FakeProvider {
        responses: Mutex<VecDeque<ChatResponse>>,
        tools_seen: Mutex<Vec<bool>>,
        conversations: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeProvider {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                tools_seen: Mutex::new(Vec::new()),
                conversations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for FakeProvider {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: Option<&[Value]>,
        ) -> Result<ChatResponse> {
            self.tools_seen.lock().unwrap().push(tools.is_some());
            self.conversations.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Provider {
                    status: 0,
                    message: "no scripted response".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        calls: Vec<(String, Value)>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ToolExecutor for FakeExecutor {
        async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
            self.calls.push((name.to_string(), arguments));
            if self.fail_on.as_deref() == Some(name) {
                return Err(Error::ToolInvocation {
                    tool: name.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(format!("result of {name}"))
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: Some(text.to_string()),
                    tool_calls: Vec::new(),
                },
            }],
        }
    }

    fn tool_response(content: Option<&str>, calls: Vec<(&str, &str, &str)>) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: content.map(str::to_string),
                    tool_calls: calls
                        .into_iter()
                        .map(|(id, name, args)| ToolCall {
                            id: id.to_string(),
                            call_type: "function".to_string(),
                            function: FunctionCall {
                                name: name.to_string(),
                                arguments: args.to_string(),
                            },
                        })
                        .collect(),
                },
            }],
        }
    }

    fn catalog() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "echo".to_string(),
            description: "Echo".to_string(),
            input_schema: json!({"type": "object"}),
        }]
    }

    #[tokio::test]
    async fn text_only_response_passes_through_verbatim() {
        let provider = FakeProvider::new(vec![text_response("hello")]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        let output = run_query(&provider, &mut executor, &catalog(), &mut conversation, "hi")
            .await
            .unwrap();

        assert_eq!(output, "hello");
        assert!(executor.calls.is_empty());
    }

    #[tokio::test]
    async fn empty_choices_produce_empty_output() {
        let provider = FakeProvider::new(vec![ChatResponse::default()]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        let output = run_query(&provider, &mut executor, &catalog(), &mut conversation, "hi")
            .await
            .unwrap();

        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn one_tool_call_orders_conversation_correctly() {
        let provider = FakeProvider::new(vec![
            tool_response(None, vec![("call_1", "echo", r#"{"x":1}"#)]),
            text_response("done"),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        let output = run_query(
            &provider,
            &mut executor,
            &catalog(),
            &mut conversation,
            "run echo",
        )
        .await
        .unwrap();

        assert_eq!(output, "done");
        assert_eq!(executor.calls, vec![("echo".to_string(), json!({"x": 1}))]);

        // system, user, assistant-with-call, tool-result
        assert_eq!(conversation.len(), 4);
        match &conversation[2] {
            ChatMessage::Assistant { tool_calls, .. } => {
                assert_eq!(tool_calls.as_ref().unwrap()[0].id, "call_1");
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
        match &conversation[3] {
            ChatMessage::Tool {
                tool_call_id,
                name,
                content,
            } => {
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(name, "echo");
                assert_eq!(content, "result of echo");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn free_text_precedes_tool_output() {
        let provider = FakeProvider::new(vec![
            tool_response(Some("Let me check."), vec![("call_1", "echo", "{}")]),
            text_response("Checked."),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        let output = run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        assert_eq!(output, "Let me check.\nChecked.");
    }

    #[tokio::test]
    async fn argument_parse_failure_does_not_abort_batch() {
        let provider = FakeProvider::new(vec![
            tool_response(
                None,
                vec![
                    ("call_1", "echo", "{not json"),
                    ("call_2", "echo", r#"{"ok":true}"#),
                ],
            ),
            text_response("second worked"),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        let output = run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert!(lines[0].starts_with("[Error] tool echo failed:"));
        assert_eq!(lines[1], "second worked");
        // Only the well-formed call reached the executor.
        assert_eq!(executor.calls.len(), 1);
        assert_eq!(executor.calls[0].1, json!({"ok": true}));
    }

    #[tokio::test]
    async fn failed_calls_still_answer_their_tool_slot() {
        let provider = FakeProvider::new(vec![
            tool_response(
                None,
                vec![("call_1", "echo", "{not json"), ("call_2", "echo", "{}")],
            ),
            text_response("second done"),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        // The follow-up completion for call_2 must see every id the
        // assistant requested answered by a tool message, in order.
        let snapshots = provider.conversations.lock().unwrap();
        let follow_up = &snapshots[1];

        let requested: Vec<&str> = follow_up
            .iter()
            .filter_map(|m| match m {
                ChatMessage::Assistant {
                    tool_calls: Some(calls),
                    ..
                } => Some(calls.iter().map(|c| c.id.as_str())),
                _ => None,
            })
            .flatten()
            .collect();
        let answered: Vec<&str> = follow_up
            .iter()
            .filter_map(|m| match m {
                ChatMessage::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec!["call_1", "call_2"]);
        assert_eq!(requested, answered);

        // The failed call's slot carries the error text.
        let failed_slot = follow_up.iter().find_map(|m| match m {
            ChatMessage::Tool {
                tool_call_id,
                content,
                ..
            } if tool_call_id == "call_1" => Some(content.as_str()),
            _ => None,
        });
        assert!(failed_slot.unwrap().starts_with("[Error] tool echo failed:"));
    }

    #[tokio::test]
    async fn tool_failure_is_reported_and_batch_continues() {
        let provider = FakeProvider::new(vec![
            tool_response(
                None,
                vec![("call_1", "broken", "{}"), ("call_2", "echo", "{}")],
            ),
            text_response("echo done"),
        ]);
        let mut executor = FakeExecutor {
            fail_on: Some("broken".to_string()),
            ..Default::default()
        };
        let mut conversation = new_conversation();

        let output = run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        assert!(output.contains("[Error] tool broken failed:"));
        assert!(output.contains("echo done"));
        assert_eq!(executor.calls.len(), 2);
    }

    #[tokio::test]
    async fn missing_arguments_default_to_empty_object() {
        let provider = FakeProvider::new(vec![
            tool_response(None, vec![("call_1", "echo", "")]),
            text_response("ok"),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        assert_eq!(executor.calls[0].1, json!({}));
    }

    #[tokio::test]
    async fn follow_up_call_carries_no_tools() {
        let provider = FakeProvider::new(vec![
            tool_response(None, vec![("call_1", "echo", "{}")]),
            text_response("ok"),
        ]);
        let mut executor = FakeExecutor::default();
        let mut conversation = new_conversation();

        run_query(&provider, &mut executor, &catalog(), &mut conversation, "go")
            .await
            .unwrap();

        assert_eq!(*provider.tools_seen.lock().unwrap(), vec![true, false]);
    }
}
