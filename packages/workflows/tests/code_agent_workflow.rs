// ABOUTME: End-to-end workflow runs against the in-memory sandbox, scripted models and SQLite
// ABOUTME: Covers success, missing credentials, the iteration cap, resumption and persist idempotency

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kiln_ai::{ModelError, ModelResponse, ScriptedModel, ToolCall};
use kiln_core::{ErrorClass, MessageKind, MessageRole, SortOrder};
use kiln_sandbox::{MemoryProvider, ProviderError, SandboxManager};
use kiln_storage::{
    MessageStorage, MessageStore, NewRun, ProjectStorage, RunRecord, RunStatus, StepRecord,
    StepStorage, StepStore,
};
use kiln_workflows::code_agent::{
    CREATE_SANDBOX, PERSIST_OUTCOME, PREPARE_ENVIRONMENT, RESOLVE_URL, RUN_AGENT,
};
use kiln_workflows::{
    CodeAgentWorkflow, PrepareConfig, RetryPolicy, RunOutcome, WorkflowConfig, WorkflowEvent,
    INCOMPLETE_MESSAGE,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

struct Harness {
    provider: Arc<MemoryProvider>,
    agent_model: Arc<ScriptedModel>,
    summary_model: Arc<ScriptedModel>,
    messages: Arc<MessageStorage>,
    steps: Arc<dyn StepStore>,
    projects: ProjectStorage,
}

impl Harness {
    async fn new(provider: MemoryProvider, agent_model: ScriptedModel) -> Self {
        Self::with_steps(provider, agent_model, |store| store).await
    }

    async fn with_steps(
        provider: MemoryProvider,
        agent_model: ScriptedModel,
        wrap: impl FnOnce(Arc<dyn StepStore>) -> Arc<dyn StepStore>,
    ) -> Self {
        let pool = kiln_storage::open_in_memory().await.unwrap();
        Self {
            provider: Arc::new(provider),
            agent_model: Arc::new(agent_model),
            summary_model: Arc::new(ScriptedModel::new([
                ModelResponse::text("Todo App"),
                ModelResponse::text("Here's your todo app"),
            ])),
            messages: Arc::new(MessageStorage::new(pool.clone())),
            steps: wrap(Arc::new(StepStorage::new(pool.clone()))),
            projects: ProjectStorage::new(pool),
        }
    }

    fn manager(&self) -> SandboxManager {
        SandboxManager::new(self.provider.clone(), Duration::from_secs(1800))
    }

    fn workflow(&self) -> CodeAgentWorkflow {
        CodeAgentWorkflow::new(
            self.manager(),
            self.agent_model.clone(),
            self.summary_model.clone(),
            self.messages.clone(),
            self.steps.clone(),
            WorkflowConfig {
                retry: RetryPolicy::immediate(3),
                prepare: PrepareConfig {
                    settle: Duration::ZERO,
                    ..PrepareConfig::default()
                },
                ..WorkflowConfig::default()
            },
        )
    }

    async fn event(&self, request: &str) -> WorkflowEvent {
        let project = self.projects.create_project("user_1", request).await.unwrap();
        WorkflowEvent::new(project.id, request)
    }

    async fn assistant_messages(&self, project_id: &str) -> Vec<kiln_storage::Message> {
        self.messages
            .find_messages(project_id, 50, SortOrder::Asc)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect()
    }
}

fn write_page() -> ModelResponse {
    ModelResponse::tool_calls(vec![ToolCall {
        id: "call_1".to_string(),
        name: "createOrUpdateFiles".to_string(),
        arguments: json!({
            "files": [{ "path": "app/page.tsx", "content": "export default function Page() {}" }]
        })
        .to_string(),
    }])
}

fn happy_agent() -> ScriptedModel {
    ScriptedModel::new([
        write_page(),
        ModelResponse::text("Page written, checking the layout"),
        ModelResponse::text("<task_summary>Built a todo app</task_summary>"),
    ])
}

#[tokio::test]
async fn test_happy_path_persists_result_with_fragment() {
    let h = Harness::new(MemoryProvider::new(), happy_agent()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    let sandbox_id = h.provider.sandbox_ids().remove(0);
    let expected_url = format!("https://3000-{}.sandbox.test", sandbox_id);
    match &outcome {
        RunOutcome::Success {
            url,
            title,
            response,
            files,
            summary,
        } => {
            assert_eq!(url, &expected_url);
            assert_eq!(title, "Todo App");
            assert_eq!(response, "Here's your todo app");
            assert_eq!(files["app/page.tsx"], "export default function Page() {}");
            assert_eq!(summary, "<task_summary>Built a todo app</task_summary>");
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(h.agent_model.call_count(), 3);

    let persisted = h.assistant_messages(&event.project_id).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, event.message_id());
    assert_eq!(persisted[0].kind, MessageKind::Result);
    assert_eq!(persisted[0].content, "Here's your todo app");
    let fragment = persisted[0].fragment.as_ref().expect("fragment");
    assert_eq!(fragment.title, "Todo App");
    assert_eq!(fragment.sandbox_url, expected_url);
    assert_eq!(fragment.files.len(), 1);

    let run = h.steps.get_run(&event.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_missing_sandbox_key_persists_configuration_error() {
    let h = Harness::new(MemoryProvider::without_credentials(), happy_agent()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    match &outcome {
        RunOutcome::Failure { error, class, .. } => {
            assert!(error.contains("not set in environment variables"));
            assert_eq!(*class, ErrorClass::Configuration);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.provider.create_count(), 0);
    assert_eq!(h.agent_model.call_count(), 0);

    let persisted = h.assistant_messages(&event.project_id).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].kind, MessageKind::Error);
    assert!(persisted[0].content.starts_with("Agent failed: E2B_API_KEY"));
    assert!(persisted[0].fragment.is_none());

    // configuration errors are not retried
    let step = h.steps.load(&event.run_id, CREATE_SANDBOX).await.unwrap().unwrap();
    assert_eq!(step.attempts, 1);
}

#[tokio::test]
async fn test_missing_model_key_fails_before_the_agent_runs() {
    let h = Harness::new(MemoryProvider::new(), ScriptedModel::without_credentials()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    assert!(matches!(
        &outcome,
        RunOutcome::Failure { error, .. } if error.starts_with("OPENAI_API_KEY is not set")
    ));
    assert_eq!(h.agent_model.call_count(), 0);
    assert!(h.steps.load(&event.run_id, RUN_AGENT).await.unwrap().is_none());
    assert_eq!(h.assistant_messages(&event.project_id).await.len(), 1);
}

#[tokio::test]
async fn test_iteration_cap_persists_incomplete_without_url() {
    let h = Harness::new(
        MemoryProvider::new(),
        ScriptedModel::repeating(ModelResponse::text("still thinking")),
    )
    .await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    assert_eq!(
        outcome,
        RunOutcome::Incomplete {
            message: INCOMPLETE_MESSAGE.to_string()
        }
    );
    assert_eq!(h.agent_model.call_count(), 15);
    assert_eq!(h.summary_model.call_count(), 0);
    assert!(h.steps.load(&event.run_id, RESOLVE_URL).await.unwrap().is_none());

    let persisted = h.assistant_messages(&event.project_id).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].kind, MessageKind::Error);
    assert_eq!(persisted[0].content, "Agent execution failed to produce valid output");
    assert!(persisted[0].fragment.is_none());

    let run = h.steps.get_run(&event.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Incomplete);
}

#[tokio::test]
async fn test_summary_without_files_is_incomplete() {
    let h = Harness::new(
        MemoryProvider::new(),
        ScriptedModel::new([ModelResponse::text("<task_summary>nothing to do</task_summary>")]),
    )
    .await;
    let event = h.event("say hello").await;

    let outcome = h.workflow().run(event).await;

    assert!(matches!(outcome, RunOutcome::Incomplete { .. }));
    assert_eq!(h.agent_model.call_count(), 1);
}

#[tokio::test]
async fn test_tool_error_is_recovered_within_a_run() {
    let agent = ScriptedModel::new([
        ModelResponse::tool_calls(vec![ToolCall {
            id: "call_read".to_string(),
            name: "readFiles".to_string(),
            arguments: json!({ "files": ["app/missing.tsx"] }).to_string(),
        }]),
        write_page(),
        ModelResponse::text("<task_summary>Recovered</task_summary>"),
    ]);
    let h = Harness::new(MemoryProvider::new(), agent).await;
    let event = h.event("fix the page").await;

    let outcome = h.workflow().run(event).await;

    assert!(outcome.is_success());
}

#[tokio::test]
async fn test_transient_provisioning_failure_is_retried() {
    let provider = MemoryProvider::new();
    provider.fail_creates([ProviderError::Transport("503 Service Unavailable".into())]);
    let h = Harness::new(provider, happy_agent()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    assert!(outcome.is_success());
    assert_eq!(h.provider.create_count(), 2);
    let step = h.steps.load(&event.run_id, CREATE_SANDBOX).await.unwrap().unwrap();
    assert_eq!(step.attempts, 2);
}

#[tokio::test]
async fn test_timeout_failure_does_not_provision_a_second_sandbox() {
    let provider = MemoryProvider::new();
    provider.fail_timeouts([ProviderError::Transport("connection reset".into())]);
    let h = Harness::new(provider, happy_agent()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    assert!(outcome.is_success());
    assert_eq!(h.provider.create_count(), 1);
    let sandbox_ids = h.provider.sandbox_ids();
    assert_eq!(sandbox_ids.len(), 1);
    assert_eq!(
        h.provider.timeout_of(&sandbox_ids[0]),
        Some(Duration::from_secs(1800))
    );
    let step = h.steps.load(&event.run_id, CREATE_SANDBOX).await.unwrap().unwrap();
    assert_eq!(step.attempts, 1);
}

#[tokio::test]
async fn test_failed_dev_server_start_is_retried() {
    let provider = MemoryProvider::new();
    provider.fail_background([ProviderError::Transport("connection reset".into())]);
    let h = Harness::new(provider, happy_agent()).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    assert!(outcome.is_success());
    assert_eq!(
        h.provider.background_commands(),
        vec!["cd /home/user && npm run dev", "cd /home/user && npm run dev"]
    );
    let step = h
        .steps
        .load(&event.run_id, PREPARE_ENVIRONMENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.attempts, 2);
    assert_eq!(step.output, Some(json!({ "scaffolded": true, "started": true })));
}

#[tokio::test]
async fn test_model_transport_failure_becomes_hard_failure() {
    let agent = ScriptedModel::new(Vec::<ModelResponse>::new());
    for _ in 0..3 {
        agent.push_error(ModelError::Transport("connection reset".into()));
    }
    let h = Harness::new(MemoryProvider::new(), agent).await;
    let event = h.event("build a todo app").await;

    let outcome = h.workflow().run(event.clone()).await;

    match &outcome {
        RunOutcome::Failure { class, .. } => assert_eq!(*class, ErrorClass::Transient),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.agent_model.call_count(), 3);

    let persisted = h.assistant_messages(&event.project_id).await;
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].content, "Agent failed: Model request failed: connection reset");
}

#[tokio::test]
async fn test_resume_skips_completed_steps() {
    let h = Harness::new(MemoryProvider::new(), happy_agent()).await;
    let event = h.event("build a todo app").await;

    // A previous attempt provisioned the sandbox before stopping
    let sandbox_id = h.manager().create("base").await.unwrap();
    h.steps
        .begin_run(NewRun {
            run_id: event.run_id.clone(),
            project_id: event.project_id.clone(),
            request_text: event.request_text.clone(),
        })
        .await
        .unwrap();
    h.steps
        .record_success(&event.run_id, CREATE_SANDBOX, &json!(sandbox_id))
        .await
        .unwrap();

    let outcome = h.workflow().resume(&event.run_id).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(h.provider.create_count(), 1);
    assert_eq!(
        h.provider.file(&sandbox_id, "app/page.tsx").as_deref(),
        Some("export default function Page() {}")
    );
}

#[tokio::test]
async fn test_finished_run_is_not_executed_again() {
    let h = Harness::new(MemoryProvider::new(), happy_agent()).await;
    let event = h.event("build a todo app").await;
    let workflow = h.workflow();

    let first = workflow.run(event.clone()).await;
    let second = workflow.run(event.clone()).await;

    assert_eq!(first, second);
    assert_eq!(h.provider.create_count(), 1);
    assert_eq!(h.agent_model.call_count(), 3);
    assert_eq!(h.assistant_messages(&event.project_id).await.len(), 1);
}

#[tokio::test]
async fn test_resume_unknown_run_is_an_error() {
    let h = Harness::new(MemoryProvider::new(), happy_agent()).await;
    let err = h.workflow().resume("run_missing").await.unwrap_err();
    assert!(err.to_string().contains("run_missing"));
}

/// Step log that loses the checkpoint of `persist-outcome` and never marks runs finished,
/// as if the process died right after the message was written.
struct ForgetfulSteps {
    inner: Arc<dyn StepStore>,
}

#[async_trait]
impl StepStore for ForgetfulSteps {
    async fn begin_run(&self, run: NewRun) -> kiln_storage::Result<RunRecord> {
        self.inner.begin_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> kiln_storage::Result<Option<RunRecord>> {
        self.inner.get_run(run_id).await
    }

    async fn finish_run(
        &self,
        _run_id: &str,
        _status: RunStatus,
        _outcome: &Value,
    ) -> kiln_storage::Result<()> {
        Ok(())
    }

    async fn load(&self, run_id: &str, step_name: &str) -> kiln_storage::Result<Option<StepRecord>> {
        self.inner.load(run_id, step_name).await
    }

    async fn record_success(
        &self,
        run_id: &str,
        step_name: &str,
        output: &Value,
    ) -> kiln_storage::Result<()> {
        if step_name == PERSIST_OUTCOME {
            return Ok(());
        }
        self.inner.record_success(run_id, step_name, output).await
    }

    async fn record_failure(
        &self,
        run_id: &str,
        step_name: &str,
        error: &str,
    ) -> kiln_storage::Result<u32> {
        self.inner.record_failure(run_id, step_name, error).await
    }
}

#[tokio::test]
async fn test_repeated_persist_writes_one_message() {
    let h = Harness::with_steps(MemoryProvider::new(), happy_agent(), |inner| {
        Arc::new(ForgetfulSteps { inner }) as Arc<dyn StepStore>
    })
    .await;
    let event = h.event("build a todo app").await;
    let workflow = h.workflow();

    assert!(workflow.run(event.clone()).await.is_success());
    assert!(workflow.run(event.clone()).await.is_success());

    // everything but the persist step was replayed from the log
    assert_eq!(h.agent_model.call_count(), 3);
    assert_eq!(h.summary_model.call_count(), 2);
    assert_eq!(h.assistant_messages(&event.project_id).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_get_their_own_sandboxes() {
    let h = Harness::new(
        MemoryProvider::new(),
        ScriptedModel::repeating(ModelResponse::text("<task_summary>done</task_summary>")),
    )
    .await;
    let first = h.event("build a todo app").await;
    let second = h.event("build a weather app").await;
    let workflow = h.workflow();

    let (a, b) = tokio::join!(workflow.run(first.clone()), workflow.run(second.clone()));
    assert!(matches!(a, RunOutcome::Incomplete { .. }));
    assert!(matches!(b, RunOutcome::Incomplete { .. }));

    let sandbox_of = |run_id: String| {
        let steps = h.steps.clone();
        async move {
            steps
                .load(&run_id, CREATE_SANDBOX)
                .await
                .unwrap()
                .and_then(|record| record.output)
                .unwrap()
        }
    };
    let (sandbox_a, sandbox_b) = (
        sandbox_of(first.run_id.clone()).await,
        sandbox_of(second.run_id.clone()).await,
    );
    assert_ne!(sandbox_a, sandbox_b);
    assert_eq!(h.provider.sandbox_ids().len(), 2);
}
