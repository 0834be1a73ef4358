use kiln_agents::AgentError;
use kiln_ai::ModelError;
use kiln_core::{Classify, ErrorClass};
use kiln_sandbox::SandboxError;
use kiln_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to scaffold the sandbox project (exit code {exit_code}): {stderr}")]
    Scaffold { exit_code: i32, stderr: String },

    #[error("Recorded output of step '{step}' is unreadable: {source}")]
    Checkpoint {
        step: String,
        source: serde_json::Error,
    },

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),
}

impl Classify for WorkflowError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Sandbox(e) => e.class(),
            Self::Model(e) => e.class(),
            Self::Agent(e) => e.class(),
            Self::Storage(e) => e.class(),
            Self::Scaffold { .. } => ErrorClass::Execution,
            Self::Checkpoint { .. } => ErrorClass::Internal,
            Self::RunNotFound(_) => ErrorClass::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
