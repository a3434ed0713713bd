//! Restart hand-off to the external process supervisor
//!
//! The request returns immediately; the actual restart happens on a
//! background task after the configured delay so any pending response can
//! still be flushed.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use crate::config::{RestartMode, DEFAULT_RESTART_DELAY};
use crate::error::{ManagerError, ManagerResult};
use crate::traits::RestartTrigger;
use shared::{fleet_error, fleet_info, logging, Component};

pub struct SupervisorRestart {
    mode: RestartMode,
    delay: Duration,
}

impl SupervisorRestart {
    pub fn new(mode: RestartMode) -> Self {
        Self {
            mode,
            delay: DEFAULT_RESTART_DELAY,
        }
    }

    /// Configure delay before restarting (fluent API)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn mode(&self) -> &RestartMode {
        &self.mode
    }
}

#[async_trait]
impl RestartTrigger for SupervisorRestart {
    async fn request_restart(&self) -> ManagerResult<()> {
        if let RestartMode::Command(parts) = &self.mode {
            if parts.is_empty() {
                return Err(ManagerError::restart("restart command is empty"));
            }
        }

        let mode = self.mode.clone();
        let delay = self.delay;
        fleet_info!(Component::Restart, "🔄 Restart scheduled in {:?} ({:?})", delay, mode);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            execute(mode);
        });
        Ok(())
    }
}

fn execute(mode: RestartMode) {
    match mode {
        RestartMode::Exit(code) => {
            logging::log_shutdown(Component::Restart, "exiting for supervisor restart");
            std::process::exit(code);
        }
        RestartMode::Signal => terminate_self(),
        RestartMode::Command(parts) => {
            let Some((program, args)) = parts.split_first() else {
                return;
            };
            // Detached: the supervisor command usually outlives us
            match std::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => fleet_info!(Component::Restart, "🚀 Launched {} (PID: {})", program, child.id()),
                Err(e) => fleet_error!(Component::Restart, "💥 Could not launch {}: {}", program, e),
            }
        }
    }
}

#[cfg(unix)]
fn terminate_self() {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    logging::log_shutdown(Component::Restart, "sending SIGTERM for supervisor restart");
    if let Err(e) = signal::kill(Pid::this(), Signal::SIGTERM) {
        fleet_error!(Component::Restart, "❌ SIGTERM failed ({}), exiting instead", e);
        std::process::exit(0);
    }
}

#[cfg(not(unix))]
fn terminate_self() {
    logging::log_shutdown(Component::Restart, "exiting for supervisor restart");
    std::process::exit(0);
}
