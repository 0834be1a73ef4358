use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{name} is out of range: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub api_key: Option<String>,
    pub template_id: String,
    pub api_url: String,
    pub domain: String,
    pub idle_timeout: Duration,
    pub preview_port: u16,
    pub prepare_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub agent_model: String,
    pub summary_model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub context_messages: u32,
}

#[derive(Debug, Clone)]
pub struct StepSettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct UsageSettings {
    pub free_credits: u32,
    pub pro_credits: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub sandbox: SandboxSettings,
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub steps: StepSettings,
    pub usage: UsageSettings,
    pub database_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Self::from_lookup(|name| env::var(name).ok())?;
        debug!(
            template = %settings.sandbox.template_id,
            agent_model = %settings.model.agent_model,
            summary_model = %settings.model.summary_model,
            max_iterations = settings.agent.max_iterations,
            "Loaded settings from environment"
        );
        if settings.sandbox.api_key.is_none() {
            warn!("{} is not set; runs will fail when creating a sandbox", E2B_API_KEY);
        }
        if settings.model.api_key.is_none() {
            warn!("{} is not set; runs will fail before the agent starts", OPENAI_API_KEY);
        }
        Ok(settings)
    }

    /// Build settings from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let sandbox = SandboxSettings {
            api_key: get(E2B_API_KEY),
            template_id: get(E2B_TEMPLATE_ID).unwrap_or_else(|| DEFAULT_TEMPLATE_ID.to_string()),
            api_url: get(E2B_API_URL).unwrap_or_else(|| DEFAULT_E2B_API_URL.to_string()),
            domain: get(E2B_DOMAIN).unwrap_or_else(|| DEFAULT_E2B_DOMAIN.to_string()),
            idle_timeout: Duration::from_secs(parse_or(
                KILN_SANDBOX_TIMEOUT_SECS,
                get(KILN_SANDBOX_TIMEOUT_SECS),
                DEFAULT_SANDBOX_TIMEOUT_SECS,
            )?),
            preview_port: parse_or(KILN_SANDBOX_PORT, get(KILN_SANDBOX_PORT), DEFAULT_SANDBOX_PORT)?,
            prepare_settle: Duration::from_secs(parse_or(
                KILN_PREPARE_SETTLE_SECS,
                get(KILN_PREPARE_SETTLE_SECS),
                DEFAULT_PREPARE_SETTLE_SECS,
            )?),
        };

        if sandbox.preview_port == 0 {
            return Err(ConfigError::OutOfRange {
                name: KILN_SANDBOX_PORT,
                value: "0".to_string(),
                expected: "1-65535",
            });
        }

        let model = ModelSettings {
            api_key: get(OPENAI_API_KEY),
            base_url: get(OPENAI_BASE_URL)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            agent_model: get(KILN_AGENT_MODEL).unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string()),
            summary_model: get(KILN_SUMMARY_MODEL)
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            request_timeout: Duration::from_secs(parse_or(
                KILN_HTTP_REQUEST_TIMEOUT_SECS,
                get(KILN_HTTP_REQUEST_TIMEOUT_SECS),
                DEFAULT_HTTP_REQUEST_TIMEOUT_SECS,
            )?),
        };

        let agent = AgentSettings {
            max_iterations: parse_or(
                KILN_MAX_ITERATIONS,
                get(KILN_MAX_ITERATIONS),
                DEFAULT_MAX_ITERATIONS,
            )?,
            context_messages: parse_or(
                KILN_CONTEXT_MESSAGES,
                get(KILN_CONTEXT_MESSAGES),
                DEFAULT_CONTEXT_MESSAGES,
            )?,
        };

        if agent.max_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                name: KILN_MAX_ITERATIONS,
                value: "0".to_string(),
                expected: "at least 1",
            });
        }

        let steps = StepSettings {
            max_attempts: parse_or(
                KILN_STEP_MAX_ATTEMPTS,
                get(KILN_STEP_MAX_ATTEMPTS),
                DEFAULT_STEP_MAX_ATTEMPTS,
            )?
            .max(1),
            initial_backoff: Duration::from_millis(parse_or(
                KILN_STEP_BACKOFF_MS,
                get(KILN_STEP_BACKOFF_MS),
                DEFAULT_STEP_BACKOFF_MS,
            )?),
        };

        let usage = UsageSettings {
            free_credits: parse_or(KILN_FREE_CREDITS, get(KILN_FREE_CREDITS), DEFAULT_FREE_CREDITS)?,
            pro_credits: parse_or(KILN_PRO_CREDITS, get(KILN_PRO_CREDITS), DEFAULT_PRO_CREDITS)?,
            window: Duration::from_secs(parse_or(
                KILN_CREDIT_WINDOW_SECS,
                get(KILN_CREDIT_WINDOW_SECS),
                DEFAULT_CREDIT_WINDOW_SECS,
            )?),
        };

        Ok(Settings {
            sandbox,
            model,
            agent,
            steps,
            usage,
            database_url: get(DATABASE_URL).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            name,
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.sandbox.api_key, None);
        assert_eq!(settings.sandbox.template_id, "base");
        assert_eq!(settings.sandbox.preview_port, 3000);
        assert_eq!(settings.sandbox.idle_timeout, Duration::from_secs(1800));
        assert_eq!(settings.model.base_url, "https://models.github.ai/inference");
        assert_eq!(settings.model.agent_model, "gpt-4.1");
        assert_eq!(settings.model.summary_model, "gpt-4o");
        assert_eq!(settings.agent.max_iterations, 15);
        assert_eq!(settings.agent.context_messages, 5);
        assert_eq!(settings.usage.free_credits, 5);
        assert_eq!(settings.usage.pro_credits, 100);
    }

    #[test]
    fn test_empty_credential_counts_as_missing() {
        let settings = settings_from(&[("E2B_API_KEY", "  "), ("OPENAI_API_KEY", "sk-live")]).unwrap();
        assert_eq!(settings.sandbox.api_key, None);
        assert_eq!(settings.model.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn test_invalid_number_is_reported_with_variable_name() {
        let err = settings_from(&[("KILN_MAX_ITERATIONS", "lots")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { name, value, .. } => {
                assert_eq!(name, "KILN_MAX_ITERATIONS");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = settings_from(&[("KILN_MAX_ITERATIONS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let settings = settings_from(&[("OPENAI_BASE_URL", "http://localhost:8080/v1/")]).unwrap();
        assert_eq!(settings.model.base_url, "http://localhost:8080/v1");
    }
}
