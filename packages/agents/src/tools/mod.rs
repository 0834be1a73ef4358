// ABOUTME: Tool capability interface and the lookup table the agent loop dispatches through
// ABOUTME: Every dispatch yields a string for the model; bad arguments never abort a run

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_ai::{ToolCall, ToolSpec};
use kiln_core::{Classify, ErrorClass};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::AgentState;

pub mod sandbox;

pub use sandbox::{sandbox_tools, CreateOrUpdateFilesTool, ReadFilesTool, SandboxContext, TerminalTool};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl Classify for ToolError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Validation
    }
}

/// Decode a JSON argument payload into the tool's typed arguments
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::Validation {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// A callable operation exposed to the model
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object
    fn parameters(&self) -> Value;

    /// Run the tool. Only argument validation is an `Err`; execution failures are
    /// returned as text so the model can react to them.
    async fn invoke(&self, args: Value, state: &mut AgentState) -> Result<String, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Result of one dispatched tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub rejected: bool,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Specs in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Validate and run one tool call against the run's state
    pub async fn dispatch(&self, call: &ToolCall, state: &mut AgentState) -> ToolOutcome {
        let result = match self.tools.get(&call.name) {
            None => Err(ToolError::UnknownTool(call.name.clone())),
            Some(tool) => match decode_arguments(&call.name, &call.arguments) {
                Ok(args) => tool.invoke(args, state).await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(content) => {
                debug!(tool = %call.name, call_id = %call.id, "Tool call completed");
                ToolOutcome {
                    content,
                    rejected: false,
                }
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, "Tool call rejected: {}", e);
                ToolOutcome {
                    content: format!("Error: {}", e),
                    rejected: true,
                }
            }
        }
    }
}

fn decode_arguments(tool: &str, raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::Validation {
        tool: tool.to_string(),
        reason: format!("arguments are not valid JSON: {}", e),
    })
}
