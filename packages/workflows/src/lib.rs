// ABOUTME: Durable workflow orchestration for Kiln
// ABOUTME: Step runner with a write-ahead log, retry policy and the code-agent workflow

pub mod code_agent;
pub mod error;
pub mod outcome;
pub mod prepare;
pub mod retry;
pub mod runner;

pub use code_agent::{CodeAgentWorkflow, WorkflowConfig, WorkflowEvent};
pub use error::{Result, WorkflowError};
pub use outcome::{RunOutcome, INCOMPLETE_MESSAGE};
pub use prepare::{prepare_environment, PrepareConfig, PrepareReport};
pub use retry::RetryPolicy;
pub use runner::StepRunner;
