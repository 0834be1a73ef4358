// ABOUTME: Provider trait and implementations for remote sandbox backends
// ABOUTME: Defines the abstract interface for sandbox lifecycle, command and file operations

use async_trait::async_trait;
use kiln_core::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub mod e2b;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use e2b::{E2bConfig, E2bProvider};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryProvider, ScriptedCommand};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Missing or rejected credential, unknown template.
    #[error("{0}")]
    Configuration(String),

    /// Connection failure, timeout, rate limit or 5xx from the provider.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    /// Missing path on read, unwritable path on write.
    #[error("File error: {0}")]
    FileIo(String),

    /// The process could not be started or was killed by the provider.
    #[error("Command error: {0}")]
    Command(String),

    /// The provider answered with something we could not interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Classify for ProviderError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Transport(_) => ErrorClass::Transient,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::FileIo(_) | Self::Command(_) => ErrorClass::Execution,
            Self::Protocol(_) => ErrorClass::Internal,
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, ProviderError>;

/// Addressing information for a live sandbox, resolved by `create` or `connect`.
///
/// Only `sandbox_id` is durable; the rest is session detail re-fetched on every connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub sandbox_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

impl SandboxHandle {
    pub fn new(sandbox_id: impl Into<String>) -> Self {
        Self {
            sandbox_id: sandbox_id.into(),
            template_id: None,
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Detach after the process starts; no exit code is reported.
    pub background: bool,
    pub cwd: Option<String>,
    pub envs: HashMap<String, String>,
}

impl CommandOptions {
    pub fn background() -> Self {
        Self {
            background: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// Accumulates command output as it streams in.
///
/// Owned by the caller so partial output survives a failed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    pub stdout: String,
    pub stderr: String,
}

impl OutputBuffer {
    pub fn push(&mut self, stream: StreamType, data: &str) {
        match stream {
            StreamType::Stdout => self.stdout.push_str(data),
            StreamType::Stderr => self.stderr.push_str(data),
        }
    }
}

/// Outcome of a command. A non-zero exit code is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` for background commands.
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Provider trait for remote sandbox backends
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    /// Fail fast when the credential the provider needs is absent
    fn check_credentials(&self) -> Result<()> {
        Ok(())
    }

    /// Provision a new sandbox from a template
    async fn create(&self, template_id: &str) -> Result<SandboxHandle>;

    /// Resolve an existing sandbox by id
    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle>;

    /// Set the idle-expiry timeout, counted from now
    async fn set_timeout(&self, handle: &SandboxHandle, timeout: Duration) -> Result<()>;

    /// Run a shell command, streaming output into `output`
    ///
    /// Returns the exit code, or `None` when `options.background` is set.
    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        options: &CommandOptions,
        output: &mut OutputBuffer,
    ) -> Result<Option<i32>>;

    /// Write bytes to a path inside the sandbox, creating parent directories
    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &[u8]) -> Result<()>;

    /// Read bytes from a path inside the sandbox
    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>>;

    /// Externally reachable host for a port inside the sandbox
    fn host(&self, handle: &SandboxHandle, port: u16) -> String;
}
