// ABOUTME: In-memory sandbox provider for tests
// ABOUTME: Scripted command results, a per-sandbox file map and failure injection

use super::{
    e2b::MISSING_API_KEY_MESSAGE, CommandOptions, OutputBuffer, ProviderError, Result,
    SandboxHandle, SandboxProvider,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Canned response for commands whose text contains a pattern
#[derive(Debug, Clone)]
pub struct ScriptedCommand {
    pub pattern: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ScriptedCommand {
    pub fn ok(pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failing(pattern: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            pattern: pattern.into(),
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }
}

#[derive(Debug, Default)]
struct SandboxState {
    template_id: String,
    files: HashMap<String, Vec<u8>>,
    timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    sandboxes: HashMap<String, SandboxState>,
    commands: Vec<(String, CommandOptions)>,
    scripts: Vec<ScriptedCommand>,
    create_failures: Vec<ProviderError>,
    command_failures: Vec<ProviderError>,
    background_failures: Vec<ProviderError>,
    timeout_failures: Vec<ProviderError>,
    creates: u32,
}

/// Sandbox provider backed by process memory
#[derive(Debug)]
pub struct MemoryProvider {
    state: Mutex<State>,
    credentials: bool,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            credentials: true,
        }
    }

    /// A provider that behaves as if its API key were never configured
    pub fn without_credentials() -> Self {
        Self {
            credentials: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn script(&self, command: ScriptedCommand) -> &Self {
        self.lock().scripts.push(command);
        self
    }

    /// Fail the next `create` calls with these errors, in order
    pub fn fail_creates(&self, errors: impl IntoIterator<Item = ProviderError>) -> &Self {
        self.lock().create_failures.extend(errors);
        self
    }

    /// Fail the next `run_command` calls with these errors, in order
    pub fn fail_commands(&self, errors: impl IntoIterator<Item = ProviderError>) -> &Self {
        self.lock().command_failures.extend(errors);
        self
    }

    /// Fail the next background `run_command` calls with these errors, in order
    pub fn fail_background(&self, errors: impl IntoIterator<Item = ProviderError>) -> &Self {
        self.lock().background_failures.extend(errors);
        self
    }

    /// Fail the next `set_timeout` calls with these errors, in order
    pub fn fail_timeouts(&self, errors: impl IntoIterator<Item = ProviderError>) -> &Self {
        self.lock().timeout_failures.extend(errors);
        self
    }

    pub fn seed_file(&self, sandbox_id: &str, path: &str, content: &str) {
        let mut state = self.lock();
        state
            .sandboxes
            .entry(sandbox_id.to_string())
            .or_default()
            .files
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn file(&self, sandbox_id: &str, path: &str) -> Option<String> {
        self.lock()
            .sandboxes
            .get(sandbox_id)
            .and_then(|sbx| sbx.files.get(path))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Commands executed so far, across all sandboxes
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn background_commands(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(_, options)| options.background)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn sandbox_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().sandboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn create_count(&self) -> u32 {
        self.lock().creates
    }

    pub fn template_of(&self, sandbox_id: &str) -> Option<String> {
        self.lock()
            .sandboxes
            .get(sandbox_id)
            .map(|sbx| sbx.template_id.clone())
    }

    pub fn timeout_of(&self, sandbox_id: &str) -> Option<Duration> {
        self.lock().sandboxes.get(sandbox_id).and_then(|sbx| sbx.timeout)
    }

    /// Simulate provider-side expiry
    pub fn expire(&self, sandbox_id: &str) {
        self.lock().sandboxes.remove(sandbox_id);
    }
}

#[async_trait]
impl SandboxProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn check_credentials(&self) -> Result<()> {
        if self.credentials {
            Ok(())
        } else {
            Err(ProviderError::Configuration(MISSING_API_KEY_MESSAGE.to_string()))
        }
    }

    async fn create(&self, template_id: &str) -> Result<SandboxHandle> {
        let mut state = self.lock();
        state.creates += 1;
        if !state.create_failures.is_empty() {
            return Err(state.create_failures.remove(0));
        }

        let sandbox_id = format!("mem-{}", uuid::Uuid::new_v4().simple());
        state.sandboxes.insert(
            sandbox_id.clone(),
            SandboxState {
                template_id: template_id.to_string(),
                ..Default::default()
            },
        );

        Ok(SandboxHandle {
            sandbox_id,
            template_id: Some(template_id.to_string()),
            access_token: None,
        })
    }

    async fn connect(&self, sandbox_id: &str) -> Result<SandboxHandle> {
        let state = self.lock();
        let sandbox = state
            .sandboxes
            .get(sandbox_id)
            .ok_or_else(|| ProviderError::NotFound(sandbox_id.to_string()))?;

        Ok(SandboxHandle {
            sandbox_id: sandbox_id.to_string(),
            template_id: Some(sandbox.template_id.clone()),
            access_token: None,
        })
    }

    async fn set_timeout(&self, handle: &SandboxHandle, timeout: Duration) -> Result<()> {
        let mut state = self.lock();
        if !state.timeout_failures.is_empty() {
            return Err(state.timeout_failures.remove(0));
        }
        let sandbox = state
            .sandboxes
            .get_mut(&handle.sandbox_id)
            .ok_or_else(|| ProviderError::NotFound(handle.sandbox_id.clone()))?;
        sandbox.timeout = Some(timeout);
        Ok(())
    }

    async fn run_command(
        &self,
        handle: &SandboxHandle,
        command: &str,
        options: &CommandOptions,
        output: &mut OutputBuffer,
    ) -> Result<Option<i32>> {
        let mut state = self.lock();
        if !state.sandboxes.contains_key(&handle.sandbox_id) {
            return Err(ProviderError::NotFound(handle.sandbox_id.clone()));
        }
        state.commands.push((command.to_string(), options.clone()));

        if !state.command_failures.is_empty() {
            return Err(state.command_failures.remove(0));
        }
        if options.background {
            if !state.background_failures.is_empty() {
                return Err(state.background_failures.remove(0));
            }
            return Ok(None);
        }

        if let Some(script) = state.scripts.iter().find(|s| command.contains(&s.pattern)) {
            output.stdout.push_str(&script.stdout);
            output.stderr.push_str(&script.stderr);
            return Ok(Some(script.exit_code));
        }

        // `test -f <path>` consults the file map
        if let Some(rest) = command.strip_prefix("test -f ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            let exists = state
                .sandboxes
                .get(&handle.sandbox_id)
                .is_some_and(|sbx| sbx.files.contains_key(path));
            if command.contains("echo") {
                output
                    .stdout
                    .push_str(if exists { "exists\n" } else { "missing\n" });
                return Ok(Some(0));
            }
            return Ok(Some(if exists { 0 } else { 1 }));
        }

        Ok(Some(0))
    }

    async fn write_file(&self, handle: &SandboxHandle, path: &str, content: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let sandbox = state
            .sandboxes
            .get_mut(&handle.sandbox_id)
            .ok_or_else(|| ProviderError::NotFound(handle.sandbox_id.clone()))?;
        if path.is_empty() || path.ends_with('/') {
            return Err(ProviderError::FileIo(format!("{}: not a file path", path)));
        }
        sandbox.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn read_file(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>> {
        let state = self.lock();
        let sandbox = state
            .sandboxes
            .get(&handle.sandbox_id)
            .ok_or_else(|| ProviderError::NotFound(handle.sandbox_id.clone()))?;
        sandbox
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::FileIo(format!("{}: no such file or directory", path)))
    }

    fn host(&self, handle: &SandboxHandle, port: u16) -> String {
        format!("{}-{}.sandbox.test", port, handle.sandbox_id)
    }
}
