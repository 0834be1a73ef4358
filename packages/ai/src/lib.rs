// ABOUTME: Chat model integration for Kiln agents
// ABOUTME: ChatModel trait, OpenAI-compatible client and a scripted model for tests

pub mod model;
pub mod openai;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use model::{
    ChatMessage, ChatModel, ChatRequest, ModelError, ModelResponse, ModelResult, ToolCall,
    ToolSpec, Usage,
};
pub use openai::OpenAiChatModel;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedModel;
