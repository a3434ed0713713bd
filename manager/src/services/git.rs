//! Git-backed source control
//!
//! Every operation is a single git invocation through the injected
//! `CommandRunner`, so timeouts and process handling live in one place.

use async_trait::async_trait;

use crate::error::{ManagerError, ManagerResult};
use crate::traits::{CommandOutput, CommandRunner, SourceControl};

pub struct GitSourceControl<R: CommandRunner> {
    runner: R,
    remote: String,
    branch: String,
}

impl<R: CommandRunner> GitSourceControl<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            remote: "origin".to_string(),
            branch: "master".to_string(),
        }
    }

    /// Configure the remote and branch updates come from (fluent API)
    pub fn with_remote(mut self, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        self.remote = remote.into();
        self.branch = branch.into();
        self
    }

    async fn git(&self, args: &[&str]) -> CommandOutput {
        self.runner.run(args.iter().map(|s| s.to_string()).collect()).await
    }

    /// Run and require success, returning trimmed stdout
    async fn git_ok(&self, args: &[&str], context: &str) -> ManagerResult<String> {
        let output = self.git(args).await;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(ManagerError::remote(format!("{context}: {}", reason(&output))))
        }
    }
}

#[async_trait]
impl<R: CommandRunner> SourceControl for GitSourceControl<R> {
    async fn fetch(&self) -> ManagerResult<()> {
        self.git_ok(&["fetch", &self.remote], "Failed to fetch updates").await?;
        Ok(())
    }

    async fn local_ref(&self) -> ManagerResult<String> {
        self.git_ok(&["rev-parse", "HEAD"], "Could not get local commit").await
    }

    async fn remote_ref(&self) -> ManagerResult<String> {
        let tracking = format!("{}/{}", self.remote, self.branch);
        self.git_ok(&["rev-parse", &tracking], "Could not get remote commit").await
    }

    async fn change_log(&self, from: &str, to: &str, limit: usize) -> ManagerResult<Vec<String>> {
        let range = format!("{from}..{to}");
        let max_count = format!("--max-count={limit}");
        let stdout = self
            .git_ok(&["log", &range, "--oneline", &max_count], "Could not read change log")
            .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn pull(&self) -> ManagerResult<()> {
        self.git_ok(&["pull", &self.remote, &self.branch], "Git pull failed").await?;
        Ok(())
    }

    async fn reset_to(&self, revision: &str) -> ManagerResult<()> {
        self.git_ok(&["reset", "--hard", revision], "Git reset failed").await?;
        Ok(())
    }
}

fn reason(output: &CommandOutput) -> &str {
    if output.stderr.is_empty() {
        "command failed without output"
    } else {
        &output.stderr
    }
}
