// ABOUTME: Provider-neutral chat model boundary: requests, responses, tool calls and errors
// ABOUTME: Agents and the workflow depend on the ChatModel trait, never on a concrete client

use async_trait::async_trait;
use kiln_core::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("OPENAI_API_KEY is not set in environment variables. Please add it to your .env file.")]
    NoApiKey,

    #[error("Model provider rejected the credentials: {0}")]
    Unauthorized(String),

    /// Timeouts, connection failures, rate limits and 5xx responses.
    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl Classify for ModelError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NoApiKey | Self::Unauthorized(_) => ErrorClass::Configuration,
            Self::Transport(_) => ErrorClass::Transient,
            Self::Api { .. } | Self::Parse(_) | Self::InvalidResponse(_) => ErrorClass::Internal,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string exactly as the model produced it
    pub arguments: String,
}

/// Declared callable tool: name, description and a JSON Schema for its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
        }
    }

    /// Text carried by the message, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { content } | Self::Tool { content, .. } => Some(content),
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            ..Default::default()
        }
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One model turn: optional text plus zero or more tool calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    /// The assistant message to append to the conversation for this turn
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::Assistant {
            content: self.text.clone(),
            tool_calls: self.tool_calls.clone(),
        }
    }
}

/// Black-box chat capability: system prompt, history and tools in, text and tool calls out
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier used in logs
    fn model(&self) -> &str;

    /// Fail fast when the model cannot be called at all, before any request is sent
    fn check_credentials(&self) -> ModelResult<()> {
        Ok(())
    }

    async fn complete(&self, request: &ChatRequest) -> ModelResult<ModelResponse>;
}
