//! Fleet manager facade
//!
//! Wires the registry, coordinator, backup store and update orchestrator
//! together and exposes the operations consumed by the outer layers (HTTP
//! API, CLI). All dependencies are injected; `FleetManager::from_config`
//! builds the production wiring.

use serde_json::Value;
use std::sync::Arc;

use shared::{
    fleet_info, fleet_warn, BackupSummary, CleanupReport, Component, RemoteCheck, SharedError, StopAllReport,
    UpdateOutcome, UpdateStatusView, WorkerConfig, WorkerId, WorkerView,
};

use crate::backup::{BackupManager, BackupSnapshot};
use crate::config::ManagerConfig;
use crate::coordinator::LifecycleCoordinator;
use crate::core::Registry;
use crate::error::{ManagerError, ManagerResult};
use crate::services::{GitSourceControl, JsonConfigStore, ProcessWorkerRuntime, ShellCommandRunner, SupervisorRestart};
use crate::traits::{ConfigStore, RestartTrigger, SourceControl, WorkerRuntime};
use crate::updater::UpdateOrchestrator;

/// Production wiring: git over the shell, JSON config file, supervisor restart
pub type DefaultFleetManager = FleetManager<GitSourceControl<ShellCommandRunner>, JsonConfigStore, SupervisorRestart>;

pub struct FleetManager<S, C, R>
where
    S: SourceControl,
    C: ConfigStore,
    R: RestartTrigger,
{
    config: ManagerConfig,
    coordinator: Arc<LifecycleCoordinator>,
    updater: Arc<UpdateOrchestrator<S, C, R>>,
    store: Arc<C>,
}

impl DefaultFleetManager {
    pub fn from_config(config: ManagerConfig) -> Self {
        let runner = ShellCommandRunner::new(&config.git_program, &config.app_dir).with_timeout(config.command_timeout);
        let source = GitSourceControl::new(runner).with_remote(&config.git_remote, &config.git_branch);
        let store = JsonConfigStore::new(&config.config_file);
        let restart = SupervisorRestart::new(config.restart_mode.clone()).with_delay(config.restart_delay);
        let runtime = ProcessWorkerRuntime::new(&config.worker_program)
            .with_args(config.worker_args.clone())
            .with_working_dir(&config.app_dir);

        FleetManager::new(config, Arc::new(runtime), source, store, restart)
    }
}

impl<S, C, R> FleetManager<S, C, R>
where
    S: SourceControl + 'static,
    C: ConfigStore + 'static,
    R: RestartTrigger + 'static,
{
    pub fn new(config: ManagerConfig, runtime: Arc<dyn WorkerRuntime>, source: S, store: C, restart: R) -> Self {
        let registry = Arc::new(Registry::new());
        let coordinator = Arc::new(
            LifecycleCoordinator::new(registry, runtime).with_per_worker_ceiling(config.per_worker_ceiling),
        );

        let source = Arc::new(source);
        let store = Arc::new(store);
        let backups = Arc::new(
            BackupManager::new(Arc::clone(&source), &config.app_dir, &config.backup_dir)
                .with_files(config.backup_files.clone()),
        );
        let updater = Arc::new(UpdateOrchestrator::new(
            Arc::clone(&coordinator),
            source,
            backups,
            Arc::clone(&store),
            Arc::new(restart),
            &config,
        ));

        Self {
            config,
            coordinator,
            updater,
            store,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        self.coordinator.registry()
    }

    /// Replace the registry contents with the persisted ones
    ///
    /// Returns the workers flagged to start on boot.
    pub async fn load(&self) -> ManagerResult<Vec<WorkerId>> {
        let snapshot = self.store.load().await?;
        self.registry().restore(&snapshot);
        fleet_info!(
            Component::Manager,
            "📂 Loaded {} workers ({} to autostart)",
            snapshot.workers.len(),
            snapshot.autostart_ids().len()
        );
        Ok(snapshot.autostart_ids())
    }

    /// Load persisted workers and start the ones that were running before
    pub async fn start_autostart(&self) -> ManagerResult<Vec<WorkerId>> {
        let ids = self.load().await?;
        Ok(self.coordinator.start_many(&ids))
    }

    /// Persist the current registry; running workers are flagged for autostart
    pub async fn persist(&self) -> ManagerResult<()> {
        self.store.persist(&self.registry().snapshot()).await
    }

    pub fn register_worker(&self, config: WorkerConfig) -> ManagerResult<WorkerId> {
        let id = self.registry().register(config)?;
        fleet_info!(Component::Manager, "📝 Registered {}", id);
        Ok(id)
    }

    /// Register from an untyped JSON configuration
    pub fn register_worker_json(&self, value: Value) -> ManagerResult<WorkerId> {
        let config = WorkerConfig::from_value(value).map_err(|e| match e {
            SharedError::InvalidConfig { problems } => ManagerError::config(problems.join("; ")),
            other => other.into(),
        })?;
        self.register_worker(config)
    }

    pub fn update_worker_config(&self, id: WorkerId, config: WorkerConfig) -> ManagerResult<()> {
        self.registry().update_config(id, config)
    }

    pub fn remove_worker(&self, id: WorkerId) -> ManagerResult<WorkerView> {
        self.registry().remove(id)
    }

    pub fn start_worker(&self, id: WorkerId) -> ManagerResult<()> {
        self.coordinator.start(id)
    }

    pub async fn stop_worker(&self, id: WorkerId) -> ManagerResult<()> {
        self.coordinator.stop(id, self.config.stop_timeout).await
    }

    pub fn get_worker(&self, id: WorkerId) -> Option<WorkerView> {
        self.registry().get(id)
    }

    pub fn list_workers(&self) -> Vec<WorkerView> {
        self.registry().list()
    }

    pub fn get_update_status(&self) -> UpdateStatusView {
        self.updater.status()
    }

    pub fn acknowledge_update_status(&self) -> bool {
        self.updater.acknowledge()
    }

    pub async fn trigger_update(&self) -> ManagerResult<UpdateOutcome> {
        self.updater.perform_update().await
    }

    /// Update a fleet that is not running in this process
    ///
    /// Loads the persisted workers without starting them; their autostart
    /// flags are carried into the configuration the relaunched process reads.
    pub async fn trigger_offline_update(&self) -> ManagerResult<UpdateOutcome> {
        let autostart = self.load().await?;
        self.updater.perform_update_with(autostart).await
    }

    pub async fn check_for_updates(&self) -> ManagerResult<RemoteCheck> {
        self.updater.check_for_updates().await
    }

    pub async fn list_backups(&self) -> ManagerResult<Vec<BackupSummary>> {
        self.updater.backups().list_backups().await
    }

    pub async fn cleanup_old_backups(&self, keep: usize) -> ManagerResult<CleanupReport> {
        self.updater.cleanup_old_backups(keep).await
    }

    /// Restore a snapshot and save the restored worker configurations
    ///
    /// Workers flagged for autostart in the snapshot keep the flag.
    pub async fn restore_backup(&self, backup_id: &str) -> ManagerResult<BackupSnapshot> {
        let snapshot = self.updater.restore_backup(backup_id).await?;
        let autostart = snapshot.config_snapshot.autostart_ids();
        self.store
            .persist(&self.registry().snapshot().with_autostart(&autostart))
            .await?;
        Ok(snapshot)
    }

    /// Stop every worker and persist, remembering which ones were running
    pub async fn shutdown(&self) -> ManagerResult<StopAllReport> {
        let running = self.registry().running_ids();
        let report = self.coordinator.stop_all_for_update(self.config.stop_all_timeout).await;
        if !report.success {
            fleet_warn!(Component::Manager, "⚠️ Shutdown left workers behind: {}", report.message);
        }

        let snapshot = self.registry().snapshot().with_autostart(&running);
        self.store.persist(&snapshot).await?;
        Ok(report)
    }
}
