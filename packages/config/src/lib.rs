// ABOUTME: Typed runtime settings for Kiln loaded from environment variables
// ABOUTME: Credentials stay optional here; the step that needs one reports its absence

pub mod constants;
pub mod settings;
pub mod validate;

pub use settings::{
    AgentSettings, ConfigError, ModelSettings, SandboxSettings, Settings, StepSettings,
    UsageSettings,
};
pub use validate::{validate_environment, validate_with, EnvReport, VarStatus};
