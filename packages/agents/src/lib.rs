// ABOUTME: Agent iteration engine and sandbox tool dispatch for Kiln
// ABOUTME: Bounded model/tool loop with a pluggable router and completion detector

pub mod completion;
pub mod error;
pub mod network;
pub mod output;
pub mod prompts;
pub mod router;
pub mod state;
pub mod tools;

pub use completion::{CompletionDetector, MarkerDetector, TASK_SUMMARY_MARKER};
pub use error::{AgentError, Result};
pub use network::{Agent, AgentNetwork, NetworkRun};
pub use output::{derive_title_and_response, parse_agent_output, TitleAndResponse, DEFAULT_OUTPUT};
pub use router::{RouteDecision, Router, SummaryRouter};
pub use state::AgentState;
pub use tools::{
    parse_args, sandbox_tools, SandboxContext, Tool, ToolError, ToolOutcome, ToolRegistry,
};
