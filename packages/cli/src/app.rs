// ABOUTME: Wires settings, storage, providers and the workflow into the operations the CLI exposes
// ABOUTME: Credit consumption and project bookkeeping happen here, before a run is triggered

use std::sync::Arc;

use anyhow::Context;
use kiln_ai::{ChatModel, OpenAiChatModel};
use kiln_config::Settings;
use kiln_core::validate_request_text;
use kiln_sandbox::{E2bConfig, E2bProvider, SandboxManager, SandboxProvider};
use kiln_storage::{
    MessageStorage, Plan, Project, ProjectStorage, StepStorage, StepStore, UsageLimits,
    UsageStatus, UsageStorage, GENERATION_COST,
};
use kiln_workflows::{CodeAgentWorkflow, RunOutcome, WorkflowConfig, WorkflowEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

/// Result of a triggered run, printed as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub project_id: String,
    pub run_id: String,
    pub outcome: RunOutcome,
}

pub struct App {
    projects: ProjectStorage,
    usage: UsageStorage,
    workflow: CodeAgentWorkflow,
}

impl App {
    /// Open the database and build the E2B and OpenAI-backed workflow from settings
    pub async fn connect(settings: &Settings) -> anyhow::Result<Self> {
        let pool = kiln_storage::open(&settings.database_url)
            .await
            .with_context(|| format!("Failed to open database at {}", settings.database_url))?;

        let provider = E2bProvider::new(E2bConfig {
            api_key: settings.sandbox.api_key.clone(),
            api_url: settings.sandbox.api_url.clone(),
            domain: settings.sandbox.domain.clone(),
            envd_url: None,
            request_timeout: settings.model.request_timeout,
        })?;

        let agent_model = OpenAiChatModel::new(
            settings.model.api_key.clone(),
            settings.model.base_url.clone(),
            settings.model.agent_model.clone(),
            settings.model.request_timeout,
        )?;
        let summary_model = agent_model.with_model(settings.model.summary_model.clone());

        Ok(Self::assemble(
            settings,
            pool,
            Arc::new(provider),
            Arc::new(agent_model),
            Arc::new(summary_model),
        ))
    }

    pub fn assemble(
        settings: &Settings,
        pool: SqlitePool,
        provider: Arc<dyn SandboxProvider>,
        agent_model: Arc<dyn ChatModel>,
        summary_model: Arc<dyn ChatModel>,
    ) -> Self {
        let sandboxes = SandboxManager::new(provider, settings.sandbox.idle_timeout);
        let workflow = CodeAgentWorkflow::new(
            sandboxes,
            agent_model,
            summary_model,
            Arc::new(MessageStorage::new(pool.clone())),
            Arc::new(StepStorage::new(pool.clone())),
            WorkflowConfig::from_settings(settings),
        );

        let limits = UsageLimits {
            free: settings.usage.free_credits,
            pro: settings.usage.pro_credits,
            window: settings.usage.window,
        };

        Self {
            projects: ProjectStorage::new(pool.clone()),
            usage: UsageStorage::new(pool, limits),
            workflow,
        }
    }

    pub fn workflow(&self) -> &CodeAgentWorkflow {
        &self.workflow
    }

    /// Charge one credit, open a project seeded with `prompt`, then run the workflow
    pub async fn generate(&self, user_id: &str, plan: Plan, prompt: &str) -> anyhow::Result<Generation> {
        validate_request_text(prompt)?;
        self.usage.consume(user_id, plan, GENERATION_COST).await?;

        let project = self.projects.create_project(user_id, prompt).await?;
        info!(project_id = %project.id, name = %project.name, "Project opened");

        Ok(self.trigger(WorkflowEvent::new(project.id, prompt)).await)
    }

    /// Charge one credit to the project owner and continue the conversation with `prompt`
    pub async fn follow_up(&self, project_id: &str, plan: Plan, prompt: &str) -> anyhow::Result<Generation> {
        validate_request_text(prompt)?;
        let project = self.projects.get_project(project_id).await?;
        self.usage
            .consume(&project.user_id, plan, GENERATION_COST)
            .await?;

        self.projects.append_user_message(project_id, prompt).await?;
        Ok(self.trigger(WorkflowEvent::new(project.id, prompt)).await)
    }

    /// Continue an interrupted run from its step log
    pub async fn resume(&self, run_id: &str) -> anyhow::Result<Generation> {
        let record = self
            .workflow
            .step_store()
            .get_run(run_id)
            .await?
            .with_context(|| format!("Workflow run not found: {}", run_id))?;

        let outcome = self.workflow.resume(run_id).await?;
        Ok(Generation {
            project_id: record.project_id,
            run_id: record.run_id,
            outcome,
        })
    }

    pub async fn list_projects(&self, user_id: &str) -> anyhow::Result<Vec<Project>> {
        Ok(self.projects.list_projects(user_id).await?)
    }

    pub async fn usage_status(&self, user_id: &str, plan: Plan) -> anyhow::Result<UsageStatus> {
        Ok(self.usage.status(user_id, plan).await?)
    }

    pub async fn reset_usage(&self) -> anyhow::Result<u64> {
        Ok(self.usage.reset_all().await?)
    }

    async fn trigger(&self, event: WorkflowEvent) -> Generation {
        let project_id = event.project_id.clone();
        let run_id = event.run_id.clone();
        info!(run_id = %run_id, project_id = %project_id, "Triggering code-agent run");

        let outcome = self.workflow.run(event).await;
        Generation {
            project_id,
            run_id,
            outcome,
        }
    }
}
