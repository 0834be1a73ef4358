// ABOUTME: Sandbox lifecycle manager wrapping a provider with timeout and error classification policy
// ABOUTME: Creates, reconnects and addresses sandboxes; exposes command and file primitives

use crate::providers::{
    CommandOptions, CommandResult, OutputBuffer, ProviderError, SandboxHandle, SandboxProvider,
};
use kiln_core::{Classify, ErrorClass};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// Credential missing or rejected before any sandbox existed.
    #[error("{0}")]
    Configuration(String),

    #[error("Failed to create E2B sandbox: {source}. Make sure your E2B_API_KEY is valid and you have access to the '{template}' template.")]
    Provision {
        template: String,
        source: ProviderError,
    },

    #[error("Sandbox not found or expired: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error(transparent)]
    Provider(ProviderError),
}

impl Classify for SandboxError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Provision { source, .. } => source.class(),
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Io(_) => ErrorClass::Execution,
            Self::Provider(e) => e.class(),
        }
    }
}

impl From<ProviderError> for SandboxError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(msg) => Self::Configuration(msg),
            ProviderError::NotFound(id) => Self::NotFound(id),
            ProviderError::FileIo(msg) => Self::Io(msg),
            other => Self::Provider(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Sandbox lifecycle manager
///
/// Does not retry; every failure carries an [`ErrorClass`] so the caller can decide.
#[derive(Clone)]
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    idle_timeout: Duration,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, idle_timeout: Duration) -> Self {
        Self {
            provider,
            idle_timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Provision a sandbox from `template_id` and arm its idle-expiry timeout
    pub async fn create(&self, template_id: &str) -> Result<String> {
        self.provider
            .check_credentials()
            .map_err(SandboxError::from)?;

        let handle = self
            .provider
            .create(template_id)
            .await
            .map_err(|source| match source {
                ProviderError::Configuration(_) | ProviderError::NotFound(_) => {
                    SandboxError::Provision {
                        template: template_id.to_string(),
                        source: ProviderError::Configuration(source.to_string()),
                    }
                }
                source => SandboxError::Provision {
                    template: template_id.to_string(),
                    source,
                },
            })?;

        // Must not fail once the sandbox exists; connect re-arms the timeout
        if let Err(e) = self.provider.set_timeout(&handle, self.idle_timeout).await {
            warn!(
                sandbox_id = %handle.sandbox_id,
                "Failed to arm sandbox idle timeout, continuing: {}",
                e
            );
        }

        info!(
            provider = self.provider.name(),
            sandbox_id = %handle.sandbox_id,
            template = template_id,
            timeout_secs = self.idle_timeout.as_secs(),
            "Sandbox created"
        );
        Ok(handle.sandbox_id)
    }

    /// Resolve an existing sandbox and refresh its idle-expiry timeout
    pub async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        self.provider
            .check_credentials()
            .map_err(SandboxError::from)?;

        let handle = self.provider.connect(sandbox_id).await?;
        self.provider
            .set_timeout(&handle, self.idle_timeout)
            .await?;

        debug!(sandbox_id, "Connected to sandbox");
        Ok(handle)
    }

    /// Run a shell command. A non-zero exit code is returned, not raised.
    ///
    /// Output already streamed before a failure is kept in `output`.
    pub async fn run_command_into(
        &self,
        handle: &SandboxHandle,
        command: &str,
        options: &CommandOptions,
        output: &mut OutputBuffer,
    ) -> Result<Option<i32>> {
        debug!(sandbox_id = %handle.sandbox_id, background = options.background, "Running: {}", command);

        let exit_code = self
            .provider
            .run_command(handle, command, options, output)
            .await
            .map_err(|e| {
                warn!(sandbox_id = %handle.sandbox_id, "Command failed to run: {}", e);
                SandboxError::from(e)
            })?;

        if let Some(code) = exit_code.filter(|code| *code != 0) {
            debug!(sandbox_id = %handle.sandbox_id, exit_code = code, "Command exited non-zero");
        }
        Ok(exit_code)
    }

    pub async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult> {
        let mut output = OutputBuffer::default();
        let exit_code = self
            .run_command_into(handle, command, options, &mut output)
            .await?;

        Ok(CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code,
        })
    }

    pub async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &[u8]) -> Result<()> {
        self.provider.write_file(handle, path, content).await?;
        debug!(sandbox_id = %handle.sandbox_id, path, bytes = content.len(), "Wrote file");
        Ok(())
    }

    pub async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>> {
        Ok(self.provider.read_file(handle, path).await?)
    }

    /// Read a file as UTF-8 text, replacing invalid sequences
    pub async fn read_text(&self, handle: &SandboxHandle, path: &str) -> Result<String> {
        let bytes = self.read_file(handle, path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Public address of a service listening on `port` inside the sandbox
    pub fn resolve_public_url(&self, handle: &SandboxHandle, port: u16) -> String {
        format!("https://{}", self.provider.host(handle, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryProvider, ScriptedCommand};

    fn manager(provider: Arc<MemoryProvider>) -> SandboxManager {
        SandboxManager::new(provider, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_arms_idle_timeout() {
        let provider = Arc::new(MemoryProvider::new());
        let id = manager(provider.clone()).create("base").await.unwrap();

        assert_eq!(provider.timeout_of(&id), Some(Duration::from_secs(60)));
        assert_eq!(provider.template_of(&id).as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn test_timeout_failure_after_create_keeps_the_sandbox() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_timeouts([ProviderError::Transport("connection reset".into())]);
        let manager = manager(provider.clone());

        let id = manager.create("base").await.unwrap();
        assert_eq!(provider.create_count(), 1);
        assert_eq!(provider.timeout_of(&id), None);

        manager.connect(&id).await.unwrap();
        assert_eq!(provider.timeout_of(&id), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_create_without_credentials_is_configuration_error() {
        let provider = Arc::new(MemoryProvider::without_credentials());
        let err = manager(provider.clone()).create("base").await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("not set in environment variables"));
        assert_eq!(provider.create_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_template_names_template() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_creates([ProviderError::Configuration("template not found".into())]);

        let err = manager(provider).create("nextjs-x").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(err.to_string().contains("'nextjs-x' template"));
    }

    #[tokio::test]
    async fn test_transport_failure_on_create_is_transient() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_creates([ProviderError::Transport("connection reset".into())]);

        let err = manager(provider).create("base").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_refreshes_timeout_and_reports_expiry() {
        let provider = Arc::new(MemoryProvider::new());
        let mgr = manager(provider.clone());
        let id = mgr.create("base").await.unwrap();

        let handle = mgr.connect(&id).await.unwrap();
        assert_eq!(handle.sandbox_id, id);

        provider.expire(&id);
        let err = mgr.connect(&id).await.unwrap_err();
        assert_eq!(err, SandboxError::NotFound(id));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let provider = Arc::new(MemoryProvider::new());
        provider.script(ScriptedCommand::failing("npm test", "1 failing", 1));
        let mgr = manager(provider);
        let handle = mgr.connect(&mgr.create("base").await.unwrap()).await.unwrap();

        let result = mgr
            .run_command(&handle, "npm test", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.stderr, "1 failing");
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn test_background_command_has_no_exit_code() {
        let provider = Arc::new(MemoryProvider::new());
        let mgr = manager(provider.clone());
        let handle = mgr.connect(&mgr.create("base").await.unwrap()).await.unwrap();

        let result = mgr
            .run_command(&handle, "npm run dev", &CommandOptions::background())
            .await
            .unwrap();
        assert_eq!(result.exit_code, None);
        assert_eq!(provider.background_commands(), vec!["npm run dev".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let provider = Arc::new(MemoryProvider::new());
        let mgr = manager(provider);
        let handle = mgr.connect(&mgr.create("base").await.unwrap()).await.unwrap();

        let err = mgr.read_file(&handle, "nope.txt").await.unwrap_err();
        assert!(matches!(err, SandboxError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Execution);
    }

    #[tokio::test]
    async fn test_resolve_public_url() {
        let provider = Arc::new(MemoryProvider::new());
        let mgr = manager(provider);
        let handle = SandboxHandle::new("abc");
        assert_eq!(
            mgr.resolve_public_url(&handle, 3000),
            "https://3000-abc.sandbox.test"
        );
    }
}
