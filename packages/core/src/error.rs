// ABOUTME: Error classification shared by every package that can fail a workflow step
// ABOUTME: Lets the orchestrator decide retryability without knowing concrete error types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a failure, used to decide whether a step may be retried
/// and how the failure is reported to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing or rejected credential, unknown template, bad setting. Never retried.
    Configuration,
    /// Network failure, timeout, rate limit or provider 5xx. Retried per step.
    Transient,
    /// The addressed resource (sandbox, project, file) does not exist or expired.
    NotFound,
    /// Malformed input, e.g. tool arguments that do not match the schema.
    Validation,
    /// The operation ran but failed on its own terms (non-zero exit, unreadable file).
    Execution,
    /// The caller's usage allowance is exhausted.
    Quota,
    /// Anything else: corrupted data, bugs, unexpected provider responses.
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Quota => "quota",
            Self::Internal => "internal",
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type that can surface from a workflow step.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}
