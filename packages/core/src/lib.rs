// ABOUTME: Core types, traits, and utilities for Kiln
// ABOUTME: Foundational package providing the shared vocabulary used across all Kiln packages

pub mod error;
pub mod types;
pub mod utils;

// Re-export main types
pub use error::{Classify, ErrorClass};
pub use types::{
    FileSnapshot, FragmentData, MessageKind, MessageRole, SortOrder, ValidationError,
    MAX_REQUEST_CHARS,
};

// Re-export utilities
pub use utils::{generate_id, generate_slug, truncate, validate_request_text};
