//! Trait definitions with mockall annotations for testing
//!
//! Every external collaborator of the manager core sits behind one of these
//! traits: the worker's own execution loop, source control, external command
//! execution, configuration persistence and the process supervisor. The real
//! implementations live in `services`; tests inject mocks.

use shared::{WorkerConfig, WorkerId};

use crate::core::{CancelToken, RegistrySnapshot};
use crate::error::ManagerResult;

/// Result of running an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// A worker's execution loop
///
/// Called on the worker's own thread inside a dedicated single-threaded
/// runtime. Implementations must observe `cancel` at their safe points and
/// return once it fires; the coordinator never terminates them forcibly.
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn run(&self, id: WorkerId, config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()>;
}

/// Timeout-bounded external command execution
#[mockall::automock]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the configured program with the given arguments
    ///
    /// Never fails: spawn errors and timeouts come back as an unsuccessful
    /// output with the reason in `stderr`.
    async fn run(&self, args: Vec<String>) -> CommandOutput;
}

/// Source control operations needed by the updater and the backup store
#[mockall::automock]
#[async_trait::async_trait]
pub trait SourceControl: Send + Sync {
    /// Refresh knowledge of the remote
    async fn fetch(&self) -> ManagerResult<()>;

    /// Full identifier of the checked-out revision
    async fn local_ref(&self) -> ManagerResult<String>;

    /// Full identifier of the remote branch head
    async fn remote_ref(&self) -> ManagerResult<String>;

    /// One-line summaries of the revisions in `from..to`, newest first
    async fn change_log(&self, from: &str, to: &str, limit: usize) -> ManagerResult<Vec<String>>;

    /// Fetch and apply the remote branch to the working tree
    async fn pull(&self) -> ManagerResult<()>;

    /// Force the working tree back to a revision
    async fn reset_to(&self, revision: &str) -> ManagerResult<()>;
}

/// Durable storage for registry contents
///
/// Implementations own atomicity (write-temp-then-rename or equivalent).
#[mockall::automock]
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> ManagerResult<RegistrySnapshot>;

    async fn persist(&self, snapshot: &RegistrySnapshot) -> ManagerResult<()>;
}

/// Hand-off to the external process supervisor
#[mockall::automock]
#[async_trait::async_trait]
pub trait RestartTrigger: Send + Sync {
    /// Ask for the current executable to be relaunched
    ///
    /// Returns once the request is scheduled; there is no feedback channel.
    async fn request_restart(&self) -> ManagerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that mock traits can be instantiated
    #[tokio::test]
    async fn test_mock_trait_instantiation() {
        let _runtime = MockWorkerRuntime::new();
        let _runner = MockCommandRunner::new();
        let _source = MockSourceControl::new();
        let _store = MockConfigStore::new();
        let _restart = MockRestartTrigger::new();
    }

    #[tokio::test]
    async fn test_mock_command_runner_returns_output() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|args| args == &["rev-parse".to_string(), "HEAD".to_string()])
            .returning(|_| CommandOutput::ok("abc123"));

        let output = runner.run(vec!["rev-parse".to_string(), "HEAD".to_string()]).await;
        assert!(output.success);
        assert_eq!(output.stdout, "abc123");
    }
}
