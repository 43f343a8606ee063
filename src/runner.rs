// ABOUTME: Process-based execution backend
// ABOUTME: Spawns the configured command with the positional dispatch contract appended

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use confab_core::traits::{BackendInvocation, BackendOutput, ExecutionBackend};

pub struct ProcessBackend {
    command: String,
    base_args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            base_args,
        }
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    async fn run(&self, invocation: &BackendInvocation) -> Result<BackendOutput> {
        if self.command.contains("..") || self.command.contains('\0') {
            bail!("invalid backend command path");
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.base_args);
        cmd.args(invocation.positional_args());
        // A timed-out dispatch drops this future; the child must go with it
        cmd.kill_on_drop(true);

        if let Some(dir) = &invocation.work_directory {
            if !dir.is_dir() {
                bail!("work directory does not exist: {}", dir.display());
            }
            cmd.current_dir(dir);
        }

        debug!(
            command = %self.command,
            message_id = %invocation.message_id,
            conversation = %invocation.conversation_id,
            "invoking execution backend"
        );

        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to run backend command {}", self.command))?;

        Ok(BackendOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code(),
        })
    }
}
