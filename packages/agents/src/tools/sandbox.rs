// ABOUTME: Terminal, file write and file read tools bound to one run's sandbox
// ABOUTME: Each call reconnects through the manager, which refreshes the sandbox idle timeout

use std::sync::Arc;

use async_trait::async_trait;
use kiln_sandbox::{CommandOptions, OutputBuffer, SandboxError, SandboxHandle, SandboxManager};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{parse_args, Tool, ToolError, ToolRegistry};
use crate::state::AgentState;

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

/// The sandbox a run's tools operate on
pub struct SandboxContext {
    manager: SandboxManager,
    sandbox_id: String,
}

impl SandboxContext {
    pub fn new(manager: SandboxManager, sandbox_id: impl Into<String>) -> Self {
        Self {
            manager,
            sandbox_id: sandbox_id.into(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn connect(&self) -> Result<SandboxHandle, SandboxError> {
        self.manager.connect(&self.sandbox_id).await
    }
}

/// Registry holding the three sandbox tools
pub fn sandbox_tools(context: Arc<SandboxContext>) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(TerminalTool::new(context.clone())))
        .with(Arc::new(CreateOrUpdateFilesTool::new(context.clone())))
        .with(Arc::new(ReadFilesTool::new(context)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TerminalArgs {
    command: String,
}

pub struct TerminalTool {
    context: Arc<SandboxContext>,
}

impl TerminalTool {
    pub fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }

    fn failure(cause: impl std::fmt::Display, output: &OutputBuffer) -> String {
        format!(
            "Command failed: {} \nstdout: {}\nstderr: {}",
            cause, output.stdout, output.stderr
        )
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        TERMINAL
    }

    fn description(&self) -> &str {
        "Use the terminal to run commands"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: Value, _state: &mut AgentState) -> Result<String, ToolError> {
        let TerminalArgs { command } = parse_args(self.name(), args)?;
        debug!(sandbox_id = self.context.sandbox_id(), "terminal < {}", command);

        let mut output = OutputBuffer::default();
        let handle = match self.context.connect().await {
            Ok(handle) => handle,
            Err(e) => return Ok(Self::failure(e, &output)),
        };

        let result = self
            .context
            .manager
            .run_command_into(&handle, &command, &CommandOptions::default(), &mut output)
            .await;

        Ok(match result {
            Ok(Some(0)) | Ok(None) => output.stdout,
            Ok(Some(code)) => {
                let text = Self::failure(format!("exit status {}", code), &output);
                warn!(sandbox_id = self.context.sandbox_id(), "{}", text);
                text
            }
            Err(e) => {
                let text = Self::failure(e, &output);
                warn!(sandbox_id = self.context.sandbox_id(), "{}", text);
                text
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEntry {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateOrUpdateFilesArgs {
    files: Vec<FileEntry>,
}

pub struct CreateOrUpdateFilesTool {
    context: Arc<SandboxContext>,
}

impl CreateOrUpdateFilesTool {
    pub fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }

    async fn write_all(&self, files: &[FileEntry]) -> Result<(), SandboxError> {
        let handle = self.context.connect().await?;
        for file in files {
            self.context
                .manager
                .write_file(&handle, &file.path, file.content.as_bytes())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for CreateOrUpdateFilesTool {
    fn name(&self) -> &str {
        CREATE_OR_UPDATE_FILES
    }

    fn description(&self) -> &str {
        "Create or update files in the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "content": { "type": "string" }
                        },
                        "required": ["path", "content"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: Value, state: &mut AgentState) -> Result<String, ToolError> {
        let CreateOrUpdateFilesArgs { files } = parse_args(self.name(), args)?;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        debug!(sandbox_id = self.context.sandbox_id(), "createOrUpdateFiles < {:?}", paths);

        if let Err(e) = self.write_all(&files).await {
            warn!(sandbox_id = self.context.sandbox_id(), "createOrUpdateFiles failed: {}", e);
            return Ok(format!("Error: {}", e));
        }

        let written = paths.join(", ");
        state.merge_files(files.into_iter().map(|f| (f.path, f.content)));
        Ok(format!("Files created/updated: {}", written))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFilesArgs {
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FileContent {
    path: String,
    content: String,
}

pub struct ReadFilesTool {
    context: Arc<SandboxContext>,
}

impl ReadFilesTool {
    pub fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }

    async fn read_all(&self, paths: Vec<String>) -> Result<Vec<FileContent>, SandboxError> {
        let handle = self.context.connect().await?;
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            let content = self.context.manager.read_text(&handle, &path).await?;
            contents.push(FileContent { path, content });
        }
        Ok(contents)
    }
}

#[async_trait]
impl Tool for ReadFilesTool {
    fn name(&self) -> &str {
        READ_FILES
    }

    fn description(&self) -> &str {
        "Read files from the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, args: Value, _state: &mut AgentState) -> Result<String, ToolError> {
        let ReadFilesArgs { files } = parse_args(self.name(), args)?;
        debug!(sandbox_id = self.context.sandbox_id(), "readFiles < {:?}", files);

        Ok(match self.read_all(files).await {
            Ok(contents) => serde_json::to_string(&contents)
                .unwrap_or_else(|e| format!("Error: {}", e)),
            Err(e) => {
                warn!(sandbox_id = self.context.sandbox_id(), "readFiles failed: {}", e);
                format!("Error: {}", e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ai::ToolCall;
    use kiln_sandbox::{MemoryProvider, ScriptedCommand};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryProvider>, ToolRegistry, String) {
        let provider = Arc::new(MemoryProvider::new());
        let manager = SandboxManager::new(provider.clone(), Duration::from_secs(60));
        let sandbox_id = manager.create("base").await.unwrap();
        let tools = sandbox_tools(Arc::new(SandboxContext::new(manager, sandbox_id.clone())));
        (provider, tools, sandbox_id)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    #[tokio::test]
    async fn test_registry_exposes_three_tools() {
        let (_, tools, _) = setup().await;
        assert_eq!(
            tools.names(),
            &["terminal".to_string(), "createOrUpdateFiles".to_string(), "readFiles".to_string()]
        );
    }

    #[tokio::test]
    async fn test_terminal_returns_stdout() {
        let (provider, tools, _) = setup().await;
        provider.script(ScriptedCommand::ok("ls", "app\npackage.json\n"));

        let mut state = AgentState::new();
        let outcome = tools
            .dispatch(&call(TERMINAL, json!({ "command": "ls" })), &mut state)
            .await;
        assert_eq!(outcome.content, "app\npackage.json\n");
    }

    #[tokio::test]
    async fn test_terminal_failure_is_diagnostic_text() {
        let (provider, tools, _) = setup().await;
        provider.script(ScriptedCommand::failing("npm run build", "Type error", 1));

        let mut state = AgentState::new();
        let outcome = tools
            .dispatch(&call(TERMINAL, json!({ "command": "npm run build" })), &mut state)
            .await;
        assert!(!outcome.rejected);
        assert_eq!(
            outcome.content,
            "Command failed: exit status 1 \nstdout: \nstderr: Type error"
        );
    }

    #[tokio::test]
    async fn test_write_merges_into_state_and_sandbox() {
        let (provider, tools, sandbox_id) = setup().await;
        let mut state = AgentState::new();

        let args = json!({ "files": [
            { "path": "app/page.tsx", "content": "v1" },
            { "path": "app/todo.tsx", "content": "todo" }
        ]});
        let first = tools
            .dispatch(&call(CREATE_OR_UPDATE_FILES, args.clone()), &mut state)
            .await;
        let snapshot = state.clone();
        tools
            .dispatch(&call(CREATE_OR_UPDATE_FILES, args), &mut state)
            .await;

        assert_eq!(first.content, "Files created/updated: app/page.tsx, app/todo.tsx");
        assert_eq!(state, snapshot);
        assert_eq!(provider.file(&sandbox_id, "app/todo.tsx").as_deref(), Some("todo"));
    }

    #[tokio::test]
    async fn test_write_failure_leaves_state_untouched() {
        let (_, tools, _) = setup().await;
        let mut state = AgentState::new();

        let outcome = tools
            .dispatch(
                &call(
                    CREATE_OR_UPDATE_FILES,
                    json!({ "files": [{ "path": "app/", "content": "x" }] }),
                ),
                &mut state,
            )
            .await;
        assert!(outcome.content.starts_with("Error: "));
        assert!(state.files.is_empty());
    }

    #[tokio::test]
    async fn test_read_files_returns_json_list() {
        let (provider, tools, sandbox_id) = setup().await;
        provider.seed_file(&sandbox_id, "app/page.tsx", "hello");

        let mut state = AgentState::new();
        let outcome = tools
            .dispatch(&call(READ_FILES, json!({ "files": ["app/page.tsx"] })), &mut state)
            .await;
        let parsed: Value = serde_json::from_str(&outcome.content).unwrap();
        assert_eq!(parsed, json!([{ "path": "app/page.tsx", "content": "hello" }]));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_error_string() {
        let (_, tools, _) = setup().await;
        let mut state = AgentState::new();

        let outcome = tools
            .dispatch(&call(READ_FILES, json!({ "files": ["nope.ts"] })), &mut state)
            .await;
        assert!(!outcome.rejected);
        assert!(outcome.content.starts_with("Error: "));
        assert!(outcome.content.contains("nope.ts"));
    }

    #[tokio::test]
    async fn test_missing_argument_is_rejected() {
        let (_, tools, _) = setup().await;
        let mut state = AgentState::new();

        let outcome = tools
            .dispatch(&call(TERMINAL, json!({ "cmd": "ls" })), &mut state)
            .await;
        assert!(outcome.rejected);
        assert!(outcome.content.contains("missing field `command`"));
    }

    #[tokio::test]
    async fn test_unknown_argument_is_rejected() {
        let (provider, tools, _) = setup().await;
        let mut state = AgentState::new();

        let outcome = tools
            .dispatch(
                &call(TERMINAL, json!({ "command": "ls", "cwd": "/tmp" })),
                &mut state,
            )
            .await;
        assert!(outcome.rejected);
        assert!(outcome.content.contains("unknown field `cwd`"));
        assert!(provider.commands().iter().all(|c| c != "ls"));

        let outcome = tools
            .dispatch(
                &call(
                    CREATE_OR_UPDATE_FILES,
                    json!({ "files": [{ "path": "a.ts", "content": "x", "mode": "0644" }] }),
                ),
                &mut state,
            )
            .await;
        assert!(outcome.rejected);
        assert!(state.files.is_empty());
    }
}
