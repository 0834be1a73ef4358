// ABOUTME: Conversation and artifact types shared between storage, agents and workflows
// ABOUTME: Message roles and kinds, fragment payloads and file snapshots

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest request text accepted from a user.
pub const MAX_REQUEST_CHARS: usize = 10_000;

/// Generated files keyed by slash-separated, case-sensitive path.
pub type FileSnapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "USER" => Some(Self::User),
            "ASSISTANT" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Result,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Result => "RESULT",
            Self::Error => "ERROR",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RESULT" => Some(Self::Result),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// The persisted artifact of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentData {
    pub title: String,
    pub sandbox_url: String,
    pub files: FileSnapshot,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is required")]
    Empty,
    #[error("Message is too long ({0} characters, max {MAX_REQUEST_CHARS})")]
    TooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_storage_strings() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::from_str(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::from_str("SYSTEM"), None);
    }

    #[test]
    fn test_fragment_serializes_camel_case() {
        let mut files = FileSnapshot::new();
        files.insert("app/page.tsx".to_string(), "export default 1".to_string());
        let fragment = FragmentData {
            title: "Todo App".to_string(),
            sandbox_url: "https://3000-abc.e2b.app".to_string(),
            files,
        };

        let value = serde_json::to_value(&fragment).unwrap();
        assert_eq!(value["sandboxUrl"], "https://3000-abc.e2b.app");
        assert_eq!(value["files"]["app/page.tsx"], "export default 1");
    }
}
