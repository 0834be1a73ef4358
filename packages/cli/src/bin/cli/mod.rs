pub mod env;
pub mod projects;
pub mod usage;

use kiln_storage::Plan;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum PlanArg {
    Free,
    Pro,
}

impl From<PlanArg> for Plan {
    fn from(plan: PlanArg) -> Self {
        match plan {
            PlanArg::Free => Plan::Free,
            PlanArg::Pro => Plan::Pro,
        }
    }
}

/// Truncate to `max` characters, marking the cut with an ellipsis
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
