// ABOUTME: Single-turn generators turning a task summary into a title and a user-facing reply
// ABOUTME: Neither call touches agent state

use kiln_ai::{ChatMessage, ChatModel, ChatRequest, ModelResponse, ModelResult, Usage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompts::{FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT};

/// Fallback text when a generator answers with no text
pub const DEFAULT_OUTPUT: &str = "Here you go";

/// Text of a single-turn response, or the fallback when the model produced none
pub fn parse_agent_output(response: &ModelResponse) -> String {
    response
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_OUTPUT.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleAndResponse {
    pub title: String,
    pub response: String,
    #[serde(default)]
    pub usage: Usage,
}

async fn single_turn(model: &dyn ChatModel, system: &str, input: &str) -> ModelResult<ModelResponse> {
    let request = ChatRequest::new(system).message(ChatMessage::user(input));
    model.complete(&request).await
}

/// Two independent stateless calls over the summary
pub async fn derive_title_and_response(
    model: &dyn ChatModel,
    summary: &str,
) -> ModelResult<TitleAndResponse> {
    let title = single_turn(model, FRAGMENT_TITLE_PROMPT, summary).await?;
    let response = single_turn(model, RESPONSE_PROMPT, summary).await?;

    let mut usage = title.usage;
    usage += response.usage;

    let derived = TitleAndResponse {
        title: parse_agent_output(&title),
        response: parse_agent_output(&response),
        usage,
    };
    debug!(model = model.model(), title = %derived.title, "Derived fragment title");
    Ok(derived)
}
