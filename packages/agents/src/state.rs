// ABOUTME: Per-run agent state threaded through tools and the completion hook
// ABOUTME: Summary is the termination flag; files accumulate with last-write-wins

use kiln_core::FileSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Empty until the completion signal is seen, then fixed for the rest of the run.
    pub summary: String,
    pub files: FileSnapshot,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge written files into the snapshot. Existing paths are overwritten.
    pub fn merge_files<I>(&mut self, files: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.files.extend(files);
    }

    /// Record the completion summary. Returns false if one was already recorded.
    pub fn complete(&mut self, summary: impl Into<String>) -> bool {
        if !self.summary.is_empty() {
            return false;
        }
        self.summary = summary.into();
        !self.summary.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.summary.is_empty()
    }

    /// A run produced usable output only with both a summary and at least one file
    pub fn has_output(&self) -> bool {
        self.is_complete() && !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload() -> Vec<(String, String)> {
        vec![
            ("app/page.tsx".to_string(), "export default Page".to_string()),
            ("app/layout.tsx".to_string(), "export default Layout".to_string()),
        ]
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = AgentState::new();
        once.merge_files(payload());

        let mut twice = AgentState::new();
        twice.merge_files(payload());
        twice.merge_files(payload());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_keeps_earlier_paths_and_last_write_wins() {
        let mut state = AgentState::new();
        state.merge_files(payload());
        state.merge_files(vec![("app/page.tsx".to_string(), "v2".to_string())]);

        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["app/page.tsx"], "v2");
        assert_eq!(state.files["app/layout.tsx"], "export default Layout");
    }

    #[test]
    fn test_summary_set_exactly_once() {
        let mut state = AgentState::new();
        assert!(!state.complete(""));
        assert!(state.complete("<task_summary>done</task_summary>"));
        assert!(!state.complete("<task_summary>again</task_summary>"));
        assert_eq!(state.summary, "<task_summary>done</task_summary>");
    }

    #[test]
    fn test_output_requires_summary_and_files() {
        let mut state = AgentState::new();
        state.complete("done");
        assert!(!state.has_output());
        state.merge_files(payload());
        assert!(state.has_output());
    }
}
