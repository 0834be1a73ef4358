// ABOUTME: Scripted chat model test double replaying queued responses
// ABOUTME: Records every request so tests can assert on what the model was shown

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{ChatModel, ChatRequest, ModelError, ModelResponse, ModelResult};

#[derive(Debug, Default)]
pub struct ScriptedModel {
    name: String,
    queue: Mutex<VecDeque<ModelResult<ModelResponse>>>,
    fallback: Option<ModelResponse>,
    requests: Mutex<Vec<ChatRequest>>,
    missing_credentials: bool,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            name: "scripted".to_string(),
            queue: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// Answer every call with the same response once the queue is empty
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            name: "scripted".to_string(),
            fallback: Some(response),
            ..Default::default()
        }
    }

    /// A model whose credential check fails with `NoApiKey`
    pub fn without_credentials() -> Self {
        Self {
            name: "scripted".to_string(),
            missing_credentials: true,
            ..Default::default()
        }
    }

    pub fn push(&self, response: ModelResponse) -> &Self {
        self.queue_guard().push_back(Ok(response));
        self
    }

    pub fn push_error(&self, error: ModelError) -> &Self {
        self.queue_guard().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests_guard().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests_guard().clone()
    }

    fn queue_guard(&self) -> std::sync::MutexGuard<'_, VecDeque<ModelResult<ModelResponse>>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn requests_guard(&self) -> std::sync::MutexGuard<'_, Vec<ChatRequest>> {
        self.requests.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model(&self) -> &str {
        &self.name
    }

    fn check_credentials(&self) -> ModelResult<()> {
        if self.missing_credentials {
            Err(ModelError::NoApiKey)
        } else {
            Ok(())
        }
    }

    async fn complete(&self, request: &ChatRequest) -> ModelResult<ModelResponse> {
        self.requests_guard().push(request.clone());

        match self.queue_guard().pop_front() {
            Some(next) => next,
            None => self.fallback.clone().ok_or_else(|| {
                ModelError::InvalidResponse("scripted model has no responses left".to_string())
            }),
        }
    }
}
