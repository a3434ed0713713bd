//! Timeout-bounded external command execution
//!
//! Runs one program (typically `git`) in a fixed working directory and
//! captures its output. The child is killed if the timeout expires.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::DEFAULT_COMMAND_TIMEOUT;
use crate::traits::{CommandOutput, CommandRunner};
use shared::{fleet_debug, fleet_error, Component};

/// Real command runner backed by `tokio::process`
pub struct ShellCommandRunner {
    program: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellCommandRunner {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Configure per-command timeout (fluent API)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, args: Vec<String>) -> CommandOutput {
        let description = self.describe(&args);
        fleet_debug!(Component::Updater, "🔧 Running: {}", description);

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                fleet_error!(Component::Updater, "💥 Could not spawn {}: {}", description, e);
                return CommandOutput::failed(e.to_string());
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                };
                if !result.success {
                    fleet_error!(Component::Updater, "❌ {} failed: {}", description, result.stderr);
                }
                result
            }
            Ok(Err(e)) => {
                fleet_error!(Component::Updater, "💥 {} error: {}", description, e);
                CommandOutput::failed(e.to_string())
            }
            Err(_) => {
                fleet_error!(Component::Updater, "⏰ {} timed out after {:?}", description, self.timeout);
                CommandOutput::failed("Command timeout")
            }
        }
    }
}
