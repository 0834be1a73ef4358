// ABOUTME: The code-agent workflow: sandbox, environment, context, agent loop, summary, URL, persistence
// ABOUTME: Every run ends with exactly one assistant message, whichever way it finishes

use std::sync::Arc;

use kiln_agents::{
    derive_title_and_response, prompts::CODE_AGENT_PROMPT, sandbox_tools, Agent, AgentNetwork,
    AgentState, SandboxContext, TitleAndResponse,
};
use kiln_ai::{ChatMessage, ChatModel};
use kiln_config::Settings;
use kiln_core::{Classify, FragmentData, MessageKind, MessageRole, SortOrder};
use kiln_sandbox::SandboxManager;
use kiln_storage::{MessageStore, NewMessage, NewRun, StepStore};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Result, WorkflowError};
use crate::outcome::{RunOutcome, INCOMPLETE_MESSAGE};
use crate::prepare::{prepare_environment, PrepareConfig, PrepareReport};
use crate::retry::RetryPolicy;
use crate::runner::StepRunner;

pub const CREATE_SANDBOX: &str = "create-sandbox";
pub const PREPARE_ENVIRONMENT: &str = "prepare-environment";
pub const FETCH_CONTEXT: &str = "fetch-context";
pub const RUN_AGENT: &str = "run-agent";
pub const DERIVE_TITLE_AND_RESPONSE: &str = "derive-title-and-response";
pub const RESOLVE_URL: &str = "resolve-url";
pub const PERSIST_OUTCOME: &str = "persist-outcome";
pub const PERSIST_ERROR: &str = "persist-error";

const AGENT_NAME: &str = "code-agent";
const NETWORK_NAME: &str = "coding-agent-network";

/// Trigger for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub run_id: String,
    pub project_id: String,
    pub request_text: String,
}

impl WorkflowEvent {
    /// New event with a fresh run id
    pub fn new(project_id: impl Into<String>, request_text: impl Into<String>) -> Self {
        Self {
            run_id: kiln_core::generate_id("run"),
            project_id: project_id.into(),
            request_text: request_text.into(),
        }
    }

    /// Id of the one assistant message this run may write
    pub fn message_id(&self) -> String {
        format!("msg_{}", self.run_id)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub template_id: String,
    pub preview_port: u16,
    pub max_iterations: u32,
    pub context_messages: u32,
    pub retry: RetryPolicy,
    pub prepare: PrepareConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            template_id: "base".to_string(),
            preview_port: 3000,
            max_iterations: 15,
            context_messages: 5,
            retry: RetryPolicy::default(),
            prepare: PrepareConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            template_id: settings.sandbox.template_id.clone(),
            preview_port: settings.sandbox.preview_port,
            max_iterations: settings.agent.max_iterations,
            context_messages: settings.agent.context_messages,
            retry: RetryPolicy::from_settings(settings),
            prepare: PrepareConfig::from_settings(settings),
        }
    }
}

pub struct CodeAgentWorkflow {
    sandboxes: SandboxManager,
    agent_model: Arc<dyn ChatModel>,
    summary_model: Arc<dyn ChatModel>,
    messages: Arc<dyn MessageStore>,
    runner: StepRunner,
    config: WorkflowConfig,
}

impl CodeAgentWorkflow {
    pub fn new(
        sandboxes: SandboxManager,
        agent_model: Arc<dyn ChatModel>,
        summary_model: Arc<dyn ChatModel>,
        messages: Arc<dyn MessageStore>,
        steps: Arc<dyn StepStore>,
        config: WorkflowConfig,
    ) -> Self {
        let runner = StepRunner::new(steps, config.retry);
        Self {
            sandboxes,
            agent_model,
            summary_model,
            messages,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn step_store(&self) -> &Arc<dyn StepStore> {
        self.runner.store()
    }

    /// Run the workflow for `event` to a terminal outcome.
    ///
    /// Never fails: errors are persisted as an error message and returned as
    /// [`RunOutcome::Failure`]. A run that already reached a terminal state returns
    /// its recorded outcome without executing anything.
    pub async fn run(&self, event: WorkflowEvent) -> RunOutcome {
        info!(run_id = %event.run_id, project_id = %event.project_id, "Workflow run started");

        let outcome = match self.execute(&event).await {
            Ok(outcome) => outcome,
            Err(err) => self.fail(&event, err).await,
        };

        if let Err(e) = self
            .runner
            .store()
            .finish_run(
                &event.run_id,
                outcome.status(),
                &serde_json::to_value(&outcome).unwrap_or_default(),
            )
            .await
        {
            warn!(run_id = %event.run_id, "Failed to record run outcome: {}", e);
        }

        info!(run_id = %event.run_id, status = outcome.status().as_str(), "Workflow run finished");
        outcome
    }

    /// Continue a run recorded in the step log, skipping completed steps
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        let record = self
            .runner
            .store()
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))?;

        Ok(self
            .run(WorkflowEvent {
                run_id: record.run_id,
                project_id: record.project_id,
                request_text: record.request_text,
            })
            .await)
    }

    async fn execute(&self, event: &WorkflowEvent) -> Result<RunOutcome> {
        let record = self
            .runner
            .store()
            .begin_run(NewRun {
                run_id: event.run_id.clone(),
                project_id: event.project_id.clone(),
                request_text: event.request_text.clone(),
            })
            .await?;

        if record.status.is_terminal() {
            if let Some(outcome) = record.outcome {
                info!(run_id = %event.run_id, "Run already finished, returning recorded outcome");
                return serde_json::from_value(outcome).map_err(|source| {
                    WorkflowError::Checkpoint {
                        step: "outcome".to_string(),
                        source,
                    }
                });
            }
        }

        let run_id = event.run_id.as_str();
        let sandboxes = &self.sandboxes;
        let config = &self.config;

        let sandbox_id: String = self
            .runner
            .run(run_id, CREATE_SANDBOX, || async move {
                Ok(sandboxes.create(&config.template_id).await?)
            })
            .await?;
        let sandbox_id = sandbox_id.as_str();

        let _: PrepareReport = self
            .runner
            .run(run_id, PREPARE_ENVIRONMENT, || {
                prepare_environment(sandboxes, sandbox_id, &config.prepare)
            })
            .await?;

        let history: Vec<ChatMessage> = self
            .runner
            .run(run_id, FETCH_CONTEXT, || self.fetch_context(event))
            .await?;

        self.agent_model.check_credentials()?;

        let history = &history;
        let state: AgentState = self
            .runner
            .run(run_id, RUN_AGENT, || {
                self.run_agent(event, sandbox_id, history.clone())
            })
            .await?;

        // Skips derive-title-and-response: an incomplete run persists only the fixed error text
        if !state.has_output() {
            warn!(
                run_id,
                has_summary = state.is_complete(),
                files = state.files.len(),
                "Agent produced no usable output"
            );
            let _: String = self
                .runner
                .run(run_id, PERSIST_OUTCOME, || {
                    self.persist_error_message(event, INCOMPLETE_MESSAGE.to_string())
                })
                .await?;
            return Ok(RunOutcome::Incomplete {
                message: INCOMPLETE_MESSAGE.to_string(),
            });
        }

        let summary_model = self.summary_model.as_ref();
        let summary = state.summary.as_str();
        let derived: TitleAndResponse = self
            .runner
            .run(run_id, DERIVE_TITLE_AND_RESPONSE, || async move {
                Ok(derive_title_and_response(summary_model, summary).await?)
            })
            .await?;

        let url: String = self
            .runner
            .run(run_id, RESOLVE_URL, || async move {
                let handle = sandboxes.connect(sandbox_id).await?;
                Ok(sandboxes.resolve_public_url(&handle, config.preview_port))
            })
            .await?;

        let fragment = FragmentData {
            title: derived.title.clone(),
            sandbox_url: url.clone(),
            files: state.files.clone(),
        };
        let _: String = self
            .runner
            .run(run_id, PERSIST_OUTCOME, || {
                self.persist_result(event, derived.response.clone(), fragment.clone())
            })
            .await?;

        Ok(RunOutcome::Success {
            url,
            title: derived.title,
            response: derived.response,
            files: state.files,
            summary: state.summary,
        })
    }

    /// Latest messages of the project, oldest first, as model conversation history
    async fn fetch_context(&self, event: &WorkflowEvent) -> Result<Vec<ChatMessage>> {
        let mut messages = self
            .messages
            .find_messages(&event.project_id, self.config.context_messages, SortOrder::Desc)
            .await?;
        messages.reverse();

        // The triggering request is usually stored already; the agent receives it as input
        if messages
            .last()
            .is_some_and(|m| m.role == MessageRole::User && m.content == event.request_text)
        {
            messages.pop();
        }

        Ok(messages
            .into_iter()
            .map(|m| match m.role {
                MessageRole::Assistant => ChatMessage::assistant(m.content),
                MessageRole::User => ChatMessage::user(m.content),
            })
            .collect())
    }

    async fn run_agent(
        &self,
        event: &WorkflowEvent,
        sandbox_id: &str,
        history: Vec<ChatMessage>,
    ) -> Result<AgentState> {
        let context = Arc::new(SandboxContext::new(self.sandboxes.clone(), sandbox_id));
        let agent = Agent::new(
            AGENT_NAME,
            CODE_AGENT_PROMPT,
            self.agent_model.clone(),
            sandbox_tools(context),
        );
        let network = AgentNetwork::single(NETWORK_NAME, agent, self.config.max_iterations);

        let run = network
            .run(&event.request_text, history, AgentState::new())
            .await?;

        info!(
            run_id = %event.run_id,
            iterations = run.iterations,
            completed = run.completed,
            total_tokens = run.usage.total_tokens(),
            "Agent loop finished"
        );
        Ok(run.state)
    }

    async fn persist_result(
        &self,
        event: &WorkflowEvent,
        response: String,
        fragment: FragmentData,
    ) -> Result<String> {
        let message = self
            .messages
            .create_message(
                NewMessage::new(
                    &event.project_id,
                    response,
                    MessageRole::Assistant,
                    MessageKind::Result,
                )
                .with_id(event.message_id())
                .with_fragment(fragment),
            )
            .await?;
        Ok(message.id)
    }

    async fn persist_error_message(&self, event: &WorkflowEvent, content: String) -> Result<String> {
        let message = self
            .messages
            .create_message(
                NewMessage::new(
                    &event.project_id,
                    content,
                    MessageRole::Assistant,
                    MessageKind::Error,
                )
                .with_id(event.message_id()),
            )
            .await?;
        Ok(message.id)
    }

    /// Best-effort error record for a run that hit an unrecoverable error
    async fn fail(&self, event: &WorkflowEvent, err: WorkflowError) -> RunOutcome {
        let class = err.class();
        let message = err.to_string();
        let details = format!("{:?}", err);
        error!(run_id = %event.run_id, class = %class, "Workflow run failed: {}", message);

        let content = format!("Agent failed: {}", message);
        let persisted: Result<String> = self
            .runner
            .run(&event.run_id, PERSIST_ERROR, || {
                self.persist_error_message(event, content.clone())
            })
            .await;
        if let Err(e) = persisted {
            error!(run_id = %event.run_id, "Failed to persist error message: {}", e);
        }

        RunOutcome::Failure {
            error: message,
            details,
            class,
        }
    }
}
