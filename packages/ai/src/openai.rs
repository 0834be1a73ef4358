// ABOUTME: OpenAI-compatible chat completions client with function tool calling
// ABOUTME: Maps HTTP failures onto classified ModelErrors and reports token usage

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::model::{
    ChatMessage, ChatModel, ChatRequest, ModelError, ModelResponse, ModelResult, ToolCall, Usage,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireCalledFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCalledFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn to_wire(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(WireMessage {
        role: "system",
        content: Some(system.to_string()),
        tool_calls: None,
        tool_call_id: None,
    });

    for message in messages {
        wire.push(match message {
            ChatMessage::User { content } => WireMessage {
                role: "user",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: function_kind(),
                            function: WireCalledFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
                ..
            } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        });
    }
    wire
}

/// Chat model speaking the OpenAI `chat/completions` protocol
pub struct OpenAiChatModel {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> ModelResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ModelError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let model = model.into();
        if api_key.is_none() {
            info!("OPENAI_API_KEY not set - model '{}' will fail on first use", model);
        }

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Same endpoint and credential, different model
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model(&self) -> &str {
        &self.model
    }

    fn check_credentials(&self) -> ModelResult<()> {
        self.api_key.as_ref().map(|_| ()).ok_or(ModelError::NoApiKey)
    }

    async fn complete(&self, request: &ChatRequest) -> ModelResult<ModelResponse> {
        let api_key = self.api_key.as_ref().ok_or(ModelError::NoApiKey)?;

        let body = CompletionRequest {
            model: &self.model,
            messages: to_wire(&request.system, &request.messages),
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            temperature: request.temperature,
        };

        debug!(
            "Making chat completion request: model={}, messages={}, tools={}",
            self.model,
            body.messages.len(),
            body.tools.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Chat completion request timed out");
                    ModelError::Transport("Request timed out. The model service may be overloaded or unavailable.".to_string())
                } else if e.is_connect() {
                    error!("Failed to connect to model provider: {}", e);
                    ModelError::Transport(format!("Connection failed: {}", e))
                } else {
                    error!("Chat completion request failed: {}", e);
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Model API error: {} - {}", status, error_text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ModelError::Unauthorized(error_text)
                }
                StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
                    ModelError::Transport(format!("API returned {}: {}", status, error_text))
                }
                s if s.is_server_error() => {
                    ModelError::Transport(format!("API returned {}: {}", status, error_text))
                }
                s => ModelError::Api {
                    status: s.as_u16(),
                    body: error_text,
                },
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices returned".to_string()))?;

        let usage = completion
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            model = %self.model,
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tool_calls = choice.message.tool_calls.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Chat completion received"
        );

        Ok(ModelResponse {
            text: choice.message.content.filter(|text| !text.is_empty()),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_start_with_system() {
        let call = ToolCall {
            id: "c1".into(),
            name: "terminal".into(),
            arguments: "{}".into(),
        };
        let wire = to_wire(
            "be helpful",
            &[
                ChatMessage::user("hi"),
                ChatMessage::Assistant {
                    content: None,
                    tool_calls: vec![call.clone()],
                },
                ChatMessage::tool_result(&call, "done"),
            ],
        );

        let roles: Vec<&str> = wire.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire[2].tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_with_model_keeps_endpoint() {
        let base = OpenAiChatModel::new(
            Some("k".into()),
            "http://localhost:1234/v1/",
            "gpt-4.1",
            Duration::from_secs(5),
        )
        .unwrap();
        let summary = base.with_model("gpt-4o");
        assert_eq!(summary.model(), "gpt-4o");
        assert_eq!(summary.endpoint(), "http://localhost:1234/v1/chat/completions");
    }
}
