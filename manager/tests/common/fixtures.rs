//! Test fixtures and fakes
//!
//! The fakes keep their state behind an `Arc` and are cheap to clone, so a
//! test can hand one copy to the manager and keep another for assertions.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use manager::core::CancelToken;
use manager::traits::{RestartTrigger, SourceControl, WorkerRuntime};
use manager::{ManagerError, ManagerResult};
use shared::{WorkerConfig, WorkerId};

/// Standard test data
pub struct TestFixtures;

impl TestFixtures {
    pub const LOCAL_REF: &'static str = "a1b2c3d4e5f60718293a4b5c6d7e8f9012345678";
    pub const REMOTE_REF: &'static str = "ffeeddccbbaa99887766554433221100aabbccdd";

    pub const CARGO_TOML: &'static str = "[package]\nname = \"telegram-bot\"\nversion = \"1.4.0\"\n";
    pub const README: &'static str = "# Telegram bot\n";

    pub fn worker_config(name: &str) -> WorkerConfig {
        WorkerConfig::new(name, format!("5123:{name}-token"))
            .with_setting("enable_ai_responses", true)
            .with_setting("voice_type", "alloy")
    }

    pub fn change_log() -> Vec<String> {
        vec![
            "ffeeddc Add voice replies".to_string(),
            "9a8b7c6 Fix group mentions".to_string(),
        ]
    }

    /// Lay out a minimal application tree
    pub fn write_app_tree(app_dir: &Path) {
        std::fs::create_dir_all(app_dir).unwrap();
        std::fs::write(app_dir.join("Cargo.toml"), Self::CARGO_TOML).unwrap();
        std::fs::write(app_dir.join("README.md"), Self::README).unwrap();
    }
}

/// Worker that runs until cancelled
pub struct Cooperative;

#[async_trait]
impl WorkerRuntime for Cooperative {
    async fn run(&self, _id: WorkerId, _config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// Worker that counts its starts and runs until cancelled
#[derive(Clone, Default)]
pub struct Counting {
    runs: Arc<AtomicUsize>,
}

impl Counting {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerRuntime for Counting {
    async fn run(&self, _id: WorkerId, _config: WorkerConfig, cancel: CancelToken) -> ManagerResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Ok(())
    }
}

/// Worker that never observes cancellation
pub struct Stubborn;

#[async_trait]
impl WorkerRuntime for Stubborn {
    async fn run(&self, _id: WorkerId, _config: WorkerConfig, _cancel: CancelToken) -> ManagerResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Worker that exits on its own after a short delay, optionally with an error
pub struct Exiting {
    pub after: Duration,
    pub failure: Option<&'static str>,
}

#[async_trait]
impl WorkerRuntime for Exiting {
    async fn run(&self, id: WorkerId, _config: WorkerConfig, _cancel: CancelToken) -> ManagerResult<()> {
        tokio::time::sleep(self.after).await;
        match self.failure {
            Some(message) => Err(ManagerError::WorkerFailed {
                id,
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// What `pull` does to the working tree
#[derive(Debug, Clone)]
pub enum PullBehavior {
    /// Write these files and move the head to the remote
    Apply(Vec<(String, String)>),
    /// Delete this file and move the head to the remote
    Remove(String),
    /// Write these files, then fail half-way
    FailAfterWriting(Vec<(String, String)>),
}

struct RepoState {
    app_dir: PathBuf,
    head: Mutex<String>,
    remote: Mutex<String>,
    fetch_delay: Duration,
    pull: PullBehavior,
    fetches: AtomicUsize,
    resets: Mutex<Vec<String>>,
}

/// In-memory source control over a real directory
#[derive(Clone)]
pub struct FakeRepo {
    state: Arc<RepoState>,
}

impl FakeRepo {
    pub fn new(app_dir: impl Into<PathBuf>, head: &str, remote: &str, pull: PullBehavior) -> Self {
        Self::with_fetch_delay(app_dir, head, remote, pull, Duration::ZERO)
    }

    pub fn with_fetch_delay(
        app_dir: impl Into<PathBuf>,
        head: &str,
        remote: &str,
        pull: PullBehavior,
        fetch_delay: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RepoState {
                app_dir: app_dir.into(),
                head: Mutex::new(head.to_string()),
                remote: Mutex::new(remote.to_string()),
                fetch_delay,
                pull,
                fetches: AtomicUsize::new(0),
                resets: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn head(&self) -> String {
        self.state.head.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> Vec<String> {
        self.state.resets.lock().unwrap().clone()
    }

    fn write_files(&self, files: &[(String, String)]) -> ManagerResult<()> {
        for (name, contents) in files {
            std::fs::write(self.state.app_dir.join(name), contents)?;
        }
        Ok(())
    }

    fn fast_forward(&self) {
        let remote = self.state.remote.lock().unwrap().clone();
        *self.state.head.lock().unwrap() = remote;
    }
}

#[async_trait]
impl SourceControl for FakeRepo {
    async fn fetch(&self) -> ManagerResult<()> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.state.fetch_delay.is_zero() {
            tokio::time::sleep(self.state.fetch_delay).await;
        }
        Ok(())
    }

    async fn local_ref(&self) -> ManagerResult<String> {
        Ok(self.head())
    }

    async fn remote_ref(&self) -> ManagerResult<String> {
        Ok(self.state.remote.lock().unwrap().clone())
    }

    async fn change_log(&self, _from: &str, _to: &str, limit: usize) -> ManagerResult<Vec<String>> {
        Ok(TestFixtures::change_log().into_iter().take(limit).collect())
    }

    async fn pull(&self) -> ManagerResult<()> {
        match &self.state.pull {
            PullBehavior::Apply(files) => {
                self.write_files(files)?;
                self.fast_forward();
                Ok(())
            }
            PullBehavior::Remove(file) => {
                std::fs::remove_file(self.state.app_dir.join(file))?;
                self.fast_forward();
                Ok(())
            }
            PullBehavior::FailAfterWriting(files) => {
                self.write_files(files)?;
                Err(ManagerError::remote("git pull origin master: merge conflict in Cargo.toml"))
            }
        }
    }

    async fn reset_to(&self, revision: &str) -> ManagerResult<()> {
        self.state.resets.lock().unwrap().push(revision.to_string());
        *self.state.head.lock().unwrap() = revision.to_string();
        Ok(())
    }
}

/// Restart trigger that only counts requests
#[derive(Clone, Default)]
pub struct RecordingRestart {
    requests: Arc<AtomicUsize>,
}

impl RecordingRestart {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RestartTrigger for RecordingRestart {
    async fn request_restart(&self) -> ManagerResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
