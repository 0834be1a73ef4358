// ABOUTME: Sandbox environment preparation: scaffold a project once, then start its dev server
// ABOUTME: Probe commands make the step safe to repeat against a partly prepared sandbox

use std::time::Duration;

use kiln_config::Settings;
use kiln_sandbox::{CommandOptions, SandboxHandle, SandboxManager};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, WorkflowError};

/// Shell commands that prepare a sandbox for the code agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareConfig {
    /// Must print `missing` when the project has not been scaffolded yet
    pub probe: String,
    /// Non-zero exit fails the step
    pub scaffold: String,
    /// Run after scaffolding; failures are only logged
    pub post_scaffold: Vec<String>,
    /// Must print `running` when the dev server is already up
    pub server_probe: String,
    /// Started in the background
    pub start: String,
    /// How long to let the started server come up
    pub settle: Duration,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            probe: "test -f /home/user/package.json && echo 'exists' || echo 'missing'".to_string(),
            scaffold: "cd /home/user && npx create-next-app@15.3.5 . --yes --no-git --typescript --tailwind --app --turbopack --import-alias '@/*'".to_string(),
            post_scaffold: vec!["cd /home/user && npx shadcn@2.8.0 init --yes --defaults".to_string()],
            server_probe: "pgrep -f 'next dev' > /dev/null && echo 'running' || echo 'stopped'"
                .to_string(),
            start: "cd /home/user && npm run dev".to_string(),
            settle: Duration::from_secs(10),
        }
    }
}

impl PrepareConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            settle: settings.sandbox.prepare_settle,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReport {
    /// False when the probe found an existing project
    pub scaffolded: bool,
    /// False when the dev server was already running
    pub started: bool,
}

pub async fn prepare_environment(
    sandboxes: &SandboxManager,
    sandbox_id: &str,
    config: &PrepareConfig,
) -> Result<PrepareReport> {
    let handle = sandboxes.connect(sandbox_id).await?;
    let foreground = CommandOptions::default();

    let probe = sandboxes
        .run_command(&handle, &config.probe, &foreground)
        .await?;
    let scaffolded = probe.stdout.trim() == "missing";
    if scaffolded {
        scaffold(sandboxes, &handle, sandbox_id, config).await?;
    } else {
        info!(sandbox_id, "Sandbox project already present, skipping scaffold");
    }

    let server = sandboxes
        .run_command(&handle, &config.server_probe, &foreground)
        .await?;
    let started = server.stdout.trim() != "running";
    if started {
        sandboxes
            .run_command(
                &handle,
                &config.start,
                &CommandOptions {
                    background: true,
                    ..CommandOptions::default()
                },
            )
            .await?;

        if !config.settle.is_zero() {
            tokio::time::sleep(config.settle).await;
        }
    } else {
        debug!(sandbox_id, "Dev server already running");
    }

    info!(sandbox_id, scaffolded, started, "Sandbox environment prepared");
    Ok(PrepareReport {
        scaffolded,
        started,
    })
}

async fn scaffold(
    sandboxes: &SandboxManager,
    handle: &SandboxHandle,
    sandbox_id: &str,
    config: &PrepareConfig,
) -> Result<()> {
    let foreground = CommandOptions::default();

    info!(sandbox_id, "Scaffolding sandbox project");
    let scaffold = sandboxes
        .run_command(handle, &config.scaffold, &foreground)
        .await?;
    if !scaffold.succeeded() {
        return Err(WorkflowError::Scaffold {
            exit_code: scaffold.exit_code.unwrap_or(-1),
            stderr: scaffold.stderr,
        });
    }

    for command in &config.post_scaffold {
        match sandboxes.run_command(handle, command, &foreground).await {
            Ok(result) if result.succeeded() => {}
            Ok(result) => warn!(
                sandbox_id,
                exit_code = ?result.exit_code,
                "Post-scaffold command failed (non-critical): {}",
                result.stderr.trim()
            ),
            Err(e) => warn!(sandbox_id, "Post-scaffold command could not run (non-critical): {}", e),
        }
    }
    Ok(())
}
