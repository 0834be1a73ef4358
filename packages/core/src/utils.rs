// ABOUTME: Shared utility functions for Kiln
// ABOUTME: ID generation, project name slugs, text truncation and request validation

use crate::types::{ValidationError, MAX_REQUEST_CHARS};
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "crimson", "daring", "eager", "gentle", "golden",
    "hidden", "lucky", "mellow", "nimble", "quiet", "rapid", "silent", "silver", "sunny", "swift",
    "tidy", "vivid", "wild", "witty",
];

const NOUNS: &[&str] = &[
    "anchor", "badger", "beacon", "canyon", "comet", "falcon", "forest", "harbor", "island",
    "lantern", "meadow", "otter", "pebble", "pine", "river", "rocket", "summit", "thunder",
    "tiger", "valley", "willow", "zephyr",
];

/// Generate a prefixed unique identifier, e.g. `msg_3f2a...`
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Generate a two-word kebab-case slug used as a default project name.
pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("river");
    format!("{}-{}", adjective, noun)
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Validate a user request before it is allowed to trigger a run.
pub fn validate_request_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = text.chars().count();
    if len > MAX_REQUEST_CHARS {
        return Err(ValidationError::TooLong(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_generate_id_has_prefix_and_is_unique() {
        let a = generate_id("run");
        let b = generate_id("run");
        assert!(a.starts_with("run_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_slug_is_two_kebab_words() {
        let slug = generate_slug();
        let parts: Vec<&str> = slug.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.is_empty()));
    }

    #[rstest]
    #[case("hello", 10, "hello")]
    #[case("hello", 3, "hel")]
    #[case("héllo", 2, "hé")]
    #[case("", 5, "")]
    fn test_truncate(#[case] input: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate(input, max), expected);
    }

    #[test]
    fn test_validate_request_text() {
        assert_eq!(validate_request_text("   "), Err(ValidationError::Empty));
        assert!(validate_request_text("build a todo app").is_ok());
        let long = "a".repeat(MAX_REQUEST_CHARS + 1);
        assert_eq!(
            validate_request_text(&long),
            Err(ValidationError::TooLong(MAX_REQUEST_CHARS + 1))
        );
    }
}
