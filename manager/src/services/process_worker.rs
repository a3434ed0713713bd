//! Process-backed worker runtime
//!
//! Each worker runs one external bot process. The configuration is handed
//! over through environment variables and the process output is forwarded
//! into the worker's log stream. Cancellation sends SIGTERM, waits for a
//! grace period, then kills.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::core::CancelToken;
use crate::error::{ManagerError, ManagerResult};
use crate::traits::WorkerRuntime;
use shared::{fleet_debug, fleet_info, fleet_warn, Component, WorkerConfig, WorkerId};

const DEFAULT_GRACE: Duration = Duration::from_secs(3);

pub struct ProcessWorkerRuntime {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    grace: Duration,
}

impl ProcessWorkerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            grace: DEFAULT_GRACE,
        }
    }

    /// Configure extra arguments (fluent API)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Configure working directory (fluent API)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Configure how long SIGTERM is given before killing (fluent API)
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self, id: WorkerId, config: &WorkerConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("BOT_ID", id.value().to_string())
            .env("BOT_NAME", &config.bot_name)
            .env("TELEGRAM_TOKEN", &config.telegram_token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &config.settings {
            match scalar_env_value(value) {
                Some(text) => {
                    cmd.env(env_key(key), text);
                }
                None => fleet_debug!(Component::Worker(id), "Not passing non-scalar setting {}", key),
            }
        }
        cmd
    }

    async fn shutdown(&self, id: WorkerId, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;

                match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => {
                        if let Ok(Ok(status)) = tokio::time::timeout(self.grace, child.wait()).await {
                            fleet_debug!(Component::Worker(id), "Bot process exited with {}", status);
                            return;
                        }
                        fleet_warn!(Component::Worker(id), "🔨 Bot process ignored SIGTERM, killing");
                    }
                    Err(nix::errno::Errno::ESRCH) => return,
                    Err(e) => fleet_warn!(Component::Worker(id), "⚠️ SIGTERM failed: {}", e),
                }
            }
        }

        if let Err(e) = child.kill().await {
            fleet_warn!(Component::Worker(id), "⚠️ Could not kill bot process: {}", e);
        }
    }
}

#[async_trait]
impl WorkerRuntime for ProcessWorkerRuntime {
    async fn run(&self, id: WorkerId, config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()> {
        let mut child = self.command(id, &config).spawn().map_err(|e| ManagerError::WorkerFailed {
            id,
            message: format!("failed to spawn {}: {e}", self.program),
        })?;
        fleet_info!(
            Component::Worker(id),
            "🤖 Launched bot '{}' (PID: {})",
            config.bot_name,
            child.id().unwrap_or(0)
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(id, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(id, stderr));
        }

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match exited {
            Some(status) => check_exit(id, status?),
            None => {
                self.shutdown(id, &mut child).await;
                Ok(())
            }
        }
    }
}

fn check_exit(id: WorkerId, status: ExitStatus) -> ManagerResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(ManagerError::WorkerFailed {
            id,
            message: format!("bot process exited with {status}"),
        })
    }
}

async fn forward_output<R: AsyncRead + Unpin>(id: WorkerId, stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        fleet_info!(Component::Worker(id), "{}", line);
    }
}

/// `voice_type` -> `BOT_VOICE_TYPE`
fn env_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("BOT_{sanitized}")
}

fn scalar_env_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
