// ABOUTME: Environment validation report for required and optional Kiln variables
// ABOUTME: Flags missing and placeholder values and masks secrets for display

use std::fmt;

use crate::constants::*;

/// Variables a run cannot complete without.
pub const REQUIRED_VARS: &[&str] = &[E2B_API_KEY, OPENAI_API_KEY, DATABASE_URL];

/// Variables with usable defaults.
pub const OPTIONAL_VARS: &[&str] = &[
    E2B_TEMPLATE_ID,
    E2B_API_URL,
    E2B_DOMAIN,
    OPENAI_BASE_URL,
    KILN_AGENT_MODEL,
    KILN_SUMMARY_MODEL,
    KILN_MAX_ITERATIONS,
    KILN_SANDBOX_TIMEOUT_SECS,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarStatus {
    Missing,
    /// Set, but still looks like a value copied from an example file.
    Placeholder,
    /// Set; carries the masked value for display.
    Set(String),
}

#[derive(Debug, Clone)]
pub struct EnvReport {
    pub required: Vec<(&'static str, VarStatus)>,
    pub optional: Vec<(&'static str, VarStatus)>,
}

impl EnvReport {
    pub fn has_errors(&self) -> bool {
        self.required
            .iter()
            .any(|(_, status)| *status == VarStatus::Missing)
    }

    pub fn has_warnings(&self) -> bool {
        self.required
            .iter()
            .chain(self.optional.iter())
            .any(|(_, status)| *status == VarStatus::Placeholder)
    }
}

impl fmt::Display for EnvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Required variables:")?;
        for (name, status) in &self.required {
            match status {
                VarStatus::Missing => writeln!(f, "  [missing]     {}", name)?,
                VarStatus::Placeholder => writeln!(f, "  [placeholder] {}", name)?,
                VarStatus::Set(masked) => writeln!(f, "  [ok]          {} = {}", name, masked)?,
            }
        }
        writeln!(f, "Optional variables:")?;
        for (name, status) in &self.optional {
            match status {
                VarStatus::Missing => writeln!(f, "  [default]     {}", name)?,
                VarStatus::Placeholder => writeln!(f, "  [placeholder] {}", name)?,
                VarStatus::Set(masked) => writeln!(f, "  [ok]          {} = {}", name, masked)?,
            }
        }
        Ok(())
    }
}

/// Inspect the process environment.
pub fn validate_environment() -> EnvReport {
    validate_with(|name| std::env::var(name).ok())
}

pub fn validate_with<F>(lookup: F) -> EnvReport
where
    F: Fn(&str) -> Option<String>,
{
    let status_of = |name: &str, secret: bool| match lookup(name).filter(|v| !v.trim().is_empty()) {
        None => VarStatus::Missing,
        Some(value) if looks_like_placeholder(&value) => VarStatus::Placeholder,
        Some(value) if secret => VarStatus::Set(mask(&value)),
        Some(value) => VarStatus::Set(mask_long(&value)),
    };

    EnvReport {
        required: REQUIRED_VARS
            .iter()
            .map(|name| (*name, status_of(name, true)))
            .collect(),
        optional: OPTIONAL_VARS
            .iter()
            .map(|name| (*name, status_of(name, false)))
            .collect(),
    }
}

fn looks_like_placeholder(value: &str) -> bool {
    value.contains("your_") || value.contains("placeholder")
}

fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 14 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn mask_long(value: &str) -> String {
    if value.chars().count() > 20 {
        mask(value)
    } else {
        value.to_string()
    }
}
