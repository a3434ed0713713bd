//! Test helpers and builder patterns for fleet manager tests

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use manager::services::JsonConfigStore;
use manager::traits::WorkerRuntime;
use manager::{FleetManager, ManagerConfig};
use shared::{WorkerId, WorkerStatus};

use super::fixtures::{Cooperative, FakeRepo, PullBehavior, RecordingRestart, TestFixtures};

pub type TestManager = FleetManager<FakeRepo, JsonConfigStore, RecordingRestart>;

/// A fleet manager over a temporary application tree, plus handles to its fakes
pub struct TestFleet {
    pub temp: TempDir,
    pub config: ManagerConfig,
    pub repo: FakeRepo,
    pub restart: RecordingRestart,
    pub fleet: TestManager,
}

impl TestFleet {
    pub fn app_dir(&self) -> &Path {
        &self.config.app_dir
    }

    pub fn read_app_file(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.app_dir().join(name)).ok()
    }

    /// Register and start workers with the standard config
    pub fn start_workers(&self, names: &[&str]) -> Vec<WorkerId> {
        names
            .iter()
            .map(|name| {
                let id = self.fleet.register_worker(TestFixtures::worker_config(name)).unwrap();
                self.fleet.start_worker(id).unwrap();
                id
            })
            .collect()
    }

    /// A second manager over the same tree, as after a process restart
    pub fn reopen(&self, runtime: Arc<dyn WorkerRuntime>) -> TestManager {
        FleetManager::new(
            self.config.clone(),
            runtime,
            self.repo.clone(),
            JsonConfigStore::new(&self.config.config_file),
            self.restart.clone(),
        )
    }
}

/// Builder for test fleets with sensible defaults
pub struct FleetBuilder {
    runtime: Arc<dyn WorkerRuntime>,
    head: String,
    remote: String,
    pull: PullBehavior,
    fetch_delay: Duration,
    stop_all_timeout: Duration,
    stop_timeout: Duration,
    per_worker_ceiling: Duration,
    keep_backups: usize,
    backup_files: Vec<String>,
}

impl FleetBuilder {
    /// Cooperative workers, one pending update that touches the README
    pub fn new() -> Self {
        Self {
            runtime: Arc::new(Cooperative),
            head: TestFixtures::LOCAL_REF.to_string(),
            remote: TestFixtures::REMOTE_REF.to_string(),
            pull: PullBehavior::Apply(vec![("README.md".to_string(), "# Telegram bot v2\n".to_string())]),
            fetch_delay: Duration::ZERO,
            stop_all_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            per_worker_ceiling: Duration::from_secs(2),
            keep_backups: 5,
            backup_files: vec!["bot_configs.json".to_string(), "Cargo.toml".to_string(), "README.md".to_string()],
        }
    }

    pub fn with_runtime(mut self, runtime: impl WorkerRuntime + 'static) -> Self {
        self.runtime = Arc::new(runtime);
        self
    }

    /// Local and remote heads are equal
    pub fn up_to_date(mut self) -> Self {
        self.remote = self.head.clone();
        self
    }

    pub fn with_pull(mut self, pull: PullBehavior) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_stop_timeouts(mut self, stop_all: Duration, single: Duration, per_worker_ceiling: Duration) -> Self {
        self.stop_all_timeout = stop_all;
        self.stop_timeout = single;
        self.per_worker_ceiling = per_worker_ceiling;
        self
    }

    pub fn with_keep_backups(mut self, keep: usize) -> Self {
        self.keep_backups = keep;
        self
    }

    pub fn with_backup_files(mut self, files: &[&str]) -> Self {
        self.backup_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn build(self) -> TestFleet {
        let temp = TempDir::new().unwrap();
        let app_dir = temp.path().join("app");
        TestFixtures::write_app_tree(&app_dir);

        let config = ManagerConfig::new(&app_dir)
            .with_backup_dir(temp.path().join("backups"))
            .with_log_file(None)
            .with_backup_files(self.backup_files.clone())
            .with_required_files(["Cargo.toml"])
            .with_stop_timeouts(self.stop_all_timeout, self.stop_timeout, self.per_worker_ceiling)
            .with_keep_backups(self.keep_backups);

        let repo = FakeRepo::with_fetch_delay(&app_dir, &self.head, &self.remote, self.pull, self.fetch_delay);
        let restart = RecordingRestart::default();
        let fleet = FleetManager::new(
            config.clone(),
            self.runtime,
            repo.clone(),
            JsonConfigStore::new(&config.config_file),
            restart.clone(),
        );

        TestFleet {
            temp,
            config,
            repo,
            restart,
            fleet,
        }
    }
}

/// Common assertions and polling helpers
pub struct TestHelpers;

impl TestHelpers {
    /// Poll until `condition` holds or fail after `timeout`
    pub async fn wait_until<F>(timeout: Duration, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn assert_all_status(fleet: &TestManager, expected: WorkerStatus) {
        for worker in fleet.list_workers() {
            assert_eq!(worker.status, expected, "{} is {}", worker.id, worker.status);
        }
    }

    /// Snapshot directories currently on disk, sorted by name
    pub fn backup_dirs(backup_dir: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = match std::fs::read_dir(backup_dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        };
        dirs.sort();
        dirs
    }
}
