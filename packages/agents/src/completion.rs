// ABOUTME: Completion detection hook run after every model response
// ABOUTME: The default detector looks for the task summary marker in assistant text

/// Marker the code agent emits when it considers the task finished
pub const TASK_SUMMARY_MARKER: &str = "<task_summary>";

/// Inspects the latest assistant text and returns the summary to record, if any
pub trait CompletionDetector: Send + Sync {
    fn detect(&self, assistant_text: &str) -> Option<String>;
}

/// Treats any text containing `marker` as the summary, keeping the whole text
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    marker: String,
}

impl MarkerDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self::new(TASK_SUMMARY_MARKER)
    }
}

impl CompletionDetector for MarkerDetector {
    fn detect(&self, assistant_text: &str) -> Option<String> {
        assistant_text
            .contains(&self.marker)
            .then(|| assistant_text.to_string())
    }
}
