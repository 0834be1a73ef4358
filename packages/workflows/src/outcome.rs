use kiln_core::{ErrorClass, FileSnapshot};
use kiln_storage::RunStatus;
use serde::{Deserialize, Serialize};

/// Content of the error message persisted for a run that ended without usable output
pub const INCOMPLETE_MESSAGE: &str = "Agent execution failed to produce valid output";

/// Structured result of one workflow run, returned instead of an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Success {
        url: String,
        title: String,
        response: String,
        files: FileSnapshot,
        summary: String,
    },
    /// The agent finished without a summary or without files
    Incomplete { message: String },
    Failure {
        error: String,
        details: String,
        class: ErrorClass,
    },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Success { .. } => RunStatus::Succeeded,
            Self::Incomplete { .. } => RunStatus::Incomplete,
            Self::Failure { .. } => RunStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
