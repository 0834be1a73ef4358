// ABOUTME: Routing policy consulted before each iteration of the agent network
// ABOUTME: Decides whether to run an agent again or stop the loop

use crate::state::AgentState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Run the named agent for another iteration
    Continue(String),
    Stop,
}

pub trait Router: Send + Sync {
    fn route(&self, state: &AgentState, iteration: u32) -> RouteDecision;
}

/// Keeps re-selecting one agent until a summary has been recorded
#[derive(Debug, Clone)]
pub struct SummaryRouter {
    agent: String,
}

impl SummaryRouter {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
        }
    }
}

impl Router for SummaryRouter {
    fn route(&self, state: &AgentState, _iteration: u32) -> RouteDecision {
        if state.is_complete() {
            RouteDecision::Stop
        } else {
            RouteDecision::Continue(self.agent.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continues_until_summary() {
        let router = SummaryRouter::new("code-agent");
        let mut state = AgentState::new();
        assert_eq!(
            router.route(&state, 0),
            RouteDecision::Continue("code-agent".to_string())
        );

        state.complete("<task_summary>ok</task_summary>");
        assert_eq!(router.route(&state, 1), RouteDecision::Stop);
    }
}
