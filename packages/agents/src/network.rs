// ABOUTME: Bounded agent iteration engine: model turn, tool dispatch, completion hook, routing
// ABOUTME: One network run owns one AgentState and stops on a recorded summary or the iteration cap

use std::collections::HashMap;
use std::sync::Arc;

use kiln_ai::{ChatMessage, ChatModel, ChatRequest, Usage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::{CompletionDetector, MarkerDetector};
use crate::error::{AgentError, Result};
use crate::router::{RouteDecision, Router, SummaryRouter};
use crate::state::AgentState;
use crate::tools::ToolRegistry;

/// System prompt, model and tool set able to take one turn
pub struct Agent {
    name: String,
    system_prompt: String,
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    detector: Arc<dyn CompletionDetector>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            tools,
            detector: Arc::new(MarkerDetector::default()),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn CompletionDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Outcome of a network run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRun {
    pub state: AgentState,
    /// Number of model calls made
    pub iterations: u32,
    pub usage: Usage,
    /// Whether the loop ended because a summary was recorded
    pub completed: bool,
    pub transcript: Vec<ChatMessage>,
}

pub struct AgentNetwork {
    name: String,
    agents: HashMap<String, Agent>,
    router: Box<dyn Router>,
    max_iterations: u32,
}

impl AgentNetwork {
    pub fn new(name: impl Into<String>, router: Box<dyn Router>, max_iterations: u32) -> Self {
        Self {
            name: name.into(),
            agents: HashMap::new(),
            router,
            max_iterations,
        }
    }

    /// A network of one agent that is re-selected until it records a summary
    pub fn single(name: impl Into<String>, agent: Agent, max_iterations: u32) -> Self {
        let router = SummaryRouter::new(agent.name());
        Self::new(name, Box::new(router), max_iterations).with_agent(agent)
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.insert(agent.name.clone(), agent);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drive the loop from `history` plus the new `input` until the router stops it
    /// or `max_iterations` model calls have been made.
    ///
    /// Tool failures are fed back to the model; a model error aborts the run.
    pub async fn run(
        &self,
        input: &str,
        history: Vec<ChatMessage>,
        mut state: AgentState,
    ) -> Result<NetworkRun> {
        if self.agents.is_empty() {
            return Err(AgentError::NoAgents);
        }

        let mut transcript = history;
        transcript.push(ChatMessage::user(input));

        let mut usage = Usage::default();
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let agent_name = match self.router.route(&state, iterations) {
                RouteDecision::Stop => break,
                RouteDecision::Continue(name) => name,
            };
            let agent = self
                .agents
                .get(&agent_name)
                .ok_or_else(|| AgentError::UnknownAgent(agent_name.clone()))?;

            iterations += 1;
            debug!(network = %self.name, agent = %agent.name, iteration = iterations, "Invoking model");

            let request = ChatRequest {
                system: agent.system_prompt.clone(),
                messages: transcript.clone(),
                tools: agent.tools.specs(),
                temperature: None,
            };
            let response = agent.model.complete(&request).await.map_err(|e| {
                warn!(network = %self.name, agent = %agent.name, iteration = iterations, "Model call failed: {}", e);
                AgentError::from(e)
            })?;
            usage += response.usage;
            transcript.push(response.to_message());

            if let Some(summary) = response
                .text
                .as_deref()
                .and_then(|text| agent.detector.detect(text))
            {
                if state.complete(summary) {
                    info!(network = %self.name, iteration = iterations, "Completion signal received");
                }
            }

            for call in &response.tool_calls {
                let outcome = agent.tools.dispatch(call, &mut state).await;
                transcript.push(ChatMessage::tool_result(call, outcome.content));
            }
        }

        let completed = state.is_complete();
        if completed {
            info!(
                network = %self.name,
                iterations,
                files = state.files.len(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Agent network finished"
            );
        } else {
            warn!(
                network = %self.name,
                iterations,
                files = state.files.len(),
                "Agent network stopped at the iteration cap without a summary"
            );
        }

        Ok(NetworkRun {
            state,
            iterations,
            usage,
            completed,
            transcript,
        })
    }
}
