//! Update orchestrator
//!
//! Drives one staged update run:
//! check remote -> stop workers -> back up -> fetch/apply -> validate ->
//! persist -> restart. At most one run is active per process, guarded by an
//! in-memory flag plus a lock marker file. Failures after the backup exists
//! restore it before the run is marked failed, and the workers that were
//! running before the update are started again. The phases run on their own
//! task, so a caller that stops waiting does not strand the run mid-phase.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use shared::{
    fleet_debug, fleet_error, fleet_info, fleet_warn, logging, CleanupReport, Component, RemoteCheck, UpdateOutcome,
    UpdatePhase, UpdateStatusView, WorkerId,
};

use crate::backup::{BackupManager, BackupSnapshot};
use crate::config::ManagerConfig;
use crate::coordinator::LifecycleCoordinator;
use crate::core::UpdateState;
use crate::error::{ManagerError, ManagerResult};
use crate::traits::{ConfigStore, RestartTrigger, SourceControl};

const SHORT_REF_LEN: usize = 8;

/// First eight characters of a revision identifier
pub fn short_ref(revision: &str) -> String {
    revision.chars().take(SHORT_REF_LEN).collect()
}

/// Held for the duration of one update run
///
/// Dropping it clears the in-memory flag and removes the marker file if it
/// is still present.
struct UpdateLock {
    flag: Arc<AtomicBool>,
    marker: PathBuf,
    marker_held: bool,
}

impl UpdateLock {
    /// Remove the marker ahead of the restart hand-off; the flag stays set
    fn remove_marker(&mut self) {
        if !self.marker_held {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.marker) {
            if e.kind() != std::io::ErrorKind::NotFound {
                fleet_warn!(Component::Updater, "⚠️ Could not remove lock marker {}: {}", self.marker.display(), e);
            }
        }
        self.marker_held = false;
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        self.remove_marker();
        self.flag.store(false, Ordering::Release);
    }
}

pub struct UpdateOrchestrator<S, C, R>
where
    S: SourceControl,
    C: ConfigStore,
    R: RestartTrigger,
{
    coordinator: Arc<LifecycleCoordinator>,
    source: Arc<S>,
    backups: Arc<BackupManager<S>>,
    store: Arc<C>,
    restart: Arc<R>,
    state: Mutex<UpdateState>,
    in_progress: Arc<AtomicBool>,
    lock_file: PathBuf,
    app_dir: PathBuf,
    required_files: Vec<String>,
    stop_all_timeout: Duration,
    change_log_limit: usize,
    keep_backups: usize,
}

impl<S, C, R> UpdateOrchestrator<S, C, R>
where
    S: SourceControl + 'static,
    C: ConfigStore + 'static,
    R: RestartTrigger + 'static,
{
    pub fn new(
        coordinator: Arc<LifecycleCoordinator>,
        source: Arc<S>,
        backups: Arc<BackupManager<S>>,
        store: Arc<C>,
        restart: Arc<R>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            coordinator,
            source,
            backups,
            store,
            restart,
            state: Mutex::new(UpdateState::new()),
            in_progress: Arc::new(AtomicBool::new(false)),
            lock_file: config.lock_file.clone(),
            app_dir: config.app_dir.clone(),
            required_files: config.required_files.clone(),
            stop_all_timeout: config.stop_all_timeout,
            change_log_limit: config.change_log_limit,
            keep_backups: config.keep_backups,
        }
    }

    pub fn backups(&self) -> &BackupManager<S> {
        &self.backups
    }

    // Transitions are validated before any field changes, so a poisoned lock still holds a valid state
    fn state(&self) -> MutexGuard<'_, UpdateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a run is active, in memory or according to the marker file
    pub fn is_update_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire) || self.state().phase().is_in_progress() || self.lock_file.exists()
    }

    pub fn status(&self) -> UpdateStatusView {
        let in_progress = self.in_progress.load(Ordering::Acquire);
        self.state().view(in_progress)
    }

    /// Reset a finished run back to `idle`
    pub fn acknowledge(&self) -> bool {
        let reset = self.state().acknowledge();
        if reset {
            fleet_debug!(Component::Updater, "👀 Update status acknowledged");
        }
        reset
    }

    /// Compare the local revision with the remote one without changing the phase
    pub async fn check_for_updates(&self) -> ManagerResult<RemoteCheck> {
        if self.is_update_in_progress() {
            return Err(ManagerError::ConcurrencyError);
        }
        fleet_info!(Component::Updater, "🔍 Checking for updates...");
        self.query_remote().await
    }

    /// Run a full update
    ///
    /// Returns `ConcurrencyError` immediately, without touching any state,
    /// if another run is active. Every other failure is reported through the
    /// returned outcome and the update status.
    ///
    /// The run itself is spawned: dropping the returned future only stops
    /// waiting for it, the run still reaches `completed` or `failed`.
    pub async fn perform_update(self: &Arc<Self>) -> ManagerResult<UpdateOutcome> {
        self.perform_update_with(Vec::new()).await
    }

    /// Run a full update, also flagging `autostart` for the relaunched process
    ///
    /// For fleets whose workers are loaded but not running in this process.
    pub async fn perform_update_with(self: &Arc<Self>, autostart: Vec<WorkerId>) -> ManagerResult<UpdateOutcome> {
        let lock = self.try_lock()?;
        self.state().begin("Checking for updates...")?;

        let this = Arc::clone(self);
        let run = tokio::spawn(async move { this.execute(lock, autostart).await });

        match run.await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // The lock was released while the task unwound
                let reason = format!("update run aborted: {e}");
                let backup_id = {
                    let mut state = self.state();
                    if let Err(err) = state.fail(reason.clone()) {
                        fleet_error!(Component::Updater, "❌ Could not record aborted run: {}", err);
                    }
                    state.backup_id().map(str::to_string)
                };
                logging::log_error(Component::Updater, "Update run", &reason);
                Ok(UpdateOutcome {
                    success: false,
                    message: format!("Update failed: {reason}"),
                    backup_id,
                })
            }
        }
    }

    async fn execute(&self, mut lock: UpdateLock, autostart: Vec<WorkerId>) -> UpdateOutcome {
        logging::log_startup(Component::Updater, "update run");
        self.log_phase();

        let mut resume = Vec::new();
        let outcome = match self.run_phases(&mut lock, &mut resume, &autostart).await {
            Ok(outcome) => outcome,
            Err(error) => self.abort(error, &resume).await,
        };

        drop(lock);
        outcome
    }

    /// Restore a stored snapshot outside of an update run
    pub async fn restore_backup(&self, backup_id: &str) -> ManagerResult<BackupSnapshot> {
        let _lock = self.try_lock()?;
        self.rollback(backup_id).await
    }

    /// Apply retention; the snapshot of an active run is never removed
    pub async fn cleanup_old_backups(&self, keep: usize) -> ManagerResult<CleanupReport> {
        let protected = if self.is_update_in_progress() {
            self.state().backup_id().map(str::to_string)
        } else {
            None
        };
        self.backups.cleanup_old_backups(keep, protected.as_deref()).await
    }

    fn try_lock(&self) -> ManagerResult<UpdateLock> {
        if self.state().phase().is_in_progress() {
            return Err(ManagerError::ConcurrencyError);
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ManagerError::ConcurrencyError);
        }

        let mut lock = UpdateLock {
            flag: Arc::clone(&self.in_progress),
            marker: self.lock_file.clone(),
            marker_held: false,
        };

        let marker = OpenOptions::new().write(true).create_new(true).open(&self.lock_file);
        match marker {
            Ok(mut file) => {
                lock.marker_held = true;
                let _ = writeln!(file, "{} {}", std::process::id(), chrono::Utc::now().to_rfc3339());
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                fleet_warn!(
                    Component::Updater,
                    "🔒 Lock marker {} exists; remove it if no update is running",
                    self.lock_file.display()
                );
                Err(ManagerError::ConcurrencyError)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_phases(
        &self,
        lock: &mut UpdateLock,
        resume: &mut Vec<WorkerId>,
        autostart: &[WorkerId],
    ) -> ManagerResult<UpdateOutcome> {
        let check = self.query_remote().await?;
        if !check.has_updates {
            return Err(ManagerError::NoUpdatesAvailable);
        }
        fleet_info!(
            Component::Updater,
            "📥 Updating {} -> {} ({} commits)",
            check.local_ref,
            check.remote_ref,
            check.change_log.len()
        );

        self.advance(UpdatePhase::StoppingWorkers, "Stopping workers...")?;
        let registry = self.coordinator.registry();
        *resume = registry.running_ids();
        let before = registry.snapshot();
        let report = self.coordinator.stop_all_for_update(self.stop_all_timeout).await;
        if !report.success || report.forced > 0 {
            fleet_warn!(Component::Updater, "⚠️ Partial stop, continuing: {}", report.message);
        }

        self.advance(UpdatePhase::BackingUp, "Creating backup...")?;
        let backup = self.backups.create_backup(&before).await?;
        self.state().set_backup_id(backup.id.clone());
        self.prune_backups(&backup.id).await;

        self.advance(UpdatePhase::Fetching, "Downloading updates...")?;
        self.source.pull().await?;

        self.advance(UpdatePhase::Validating, "Validating update...")?;
        self.validate_tree().await?;

        self.advance(UpdatePhase::Persisting, "Saving configurations...")?;
        let snapshot = registry.snapshot().with_autostart(resume).with_autostart(autostart);
        self.store.persist(&snapshot).await.map_err(|e| match e {
            ManagerError::PersistError { .. } => e,
            other => ManagerError::persist(other.to_string()),
        })?;

        self.advance(UpdatePhase::Restarting, "Restarting application...")?;
        lock.remove_marker();
        self.restart.request_restart().await?;

        self.advance(UpdatePhase::Completed, "Update completed successfully")?;
        logging::log_success(Component::Updater, "Update completed successfully, restarting application");

        Ok(UpdateOutcome {
            success: true,
            message: "Update completed successfully".to_string(),
            backup_id: Some(backup.id),
        })
    }

    /// Roll back if the tree may have changed, resume workers, enter `failed`
    async fn abort(&self, error: ManagerError, resume: &[WorkerId]) -> UpdateOutcome {
        let (phase, backup_id) = {
            let state = self.state();
            (state.phase(), state.backup_id().map(str::to_string))
        };

        let mut reason = error.to_string();
        let touched_tree = matches!(
            phase,
            UpdatePhase::Fetching | UpdatePhase::Validating | UpdatePhase::Persisting
        );
        if touched_tree {
            if let Some(id) = &backup_id {
                if let Err(e) = self.rollback(id).await {
                    fleet_warn!(Component::Updater, "⚠️ Rollback to {} failed: {}", id, e);
                    reason = format!("{reason}; rollback failed: {e}");
                }
            }
        }

        if !resume.is_empty() {
            let started = self.coordinator.start_many(resume);
            fleet_info!(
                Component::Updater,
                "▶️ Resumed {}/{} workers after failed update",
                started.len(),
                resume.len()
            );
        }

        if let Err(e) = self.state().fail(reason.clone()) {
            fleet_error!(Component::Updater, "❌ Could not record failure in {}: {}", phase, e);
        }
        logging::log_error(Component::Updater, &format!("Update during {phase}"), &reason);

        UpdateOutcome {
            success: false,
            message: format!("Update failed: {reason}"),
            backup_id,
        }
    }

    async fn rollback(&self, backup_id: &str) -> ManagerResult<BackupSnapshot> {
        let snapshot = self.backups.restore(backup_id).await?;
        let skipped = self.coordinator.registry().restore(&snapshot.config_snapshot);
        if skipped > 0 {
            fleet_warn!(Component::Updater, "⚠️ {} running workers kept their current configuration", skipped);
        }
        fleet_info!(Component::Updater, "↩️ Rolled back to {}", backup_id);
        Ok(snapshot)
    }

    async fn query_remote(&self) -> ManagerResult<RemoteCheck> {
        self.source.fetch().await?;
        let local = self.source.local_ref().await?;
        let remote = self.source.remote_ref().await?;

        let has_updates = local != remote;
        let change_log = if has_updates {
            self.source.change_log(&local, &remote, self.change_log_limit).await?
        } else {
            Vec::new()
        };

        let check = RemoteCheck {
            has_updates,
            local_ref: short_ref(&local),
            remote_ref: short_ref(&remote),
            message: if has_updates {
                format!("Updates available: {} new commits", change_log.len())
            } else {
                "Already up to date".to_string()
            },
            change_log,
        };

        self.state().record_refs(check.local_ref.clone(), check.remote_ref.clone());
        fleet_info!(Component::Updater, "🔍 {} ({} / {})", check.message, check.local_ref, check.remote_ref);
        Ok(check)
    }

    async fn validate_tree(&self) -> ManagerResult<()> {
        for file in &self.required_files {
            let path: &Path = file.as_ref();
            if !tokio::fs::try_exists(self.app_dir.join(path)).await.unwrap_or(false) {
                fleet_error!(Component::Updater, "💥 Critical file missing after update: {}", file);
                return Err(ManagerError::ValidationError { path: file.clone() });
            }
        }
        Ok(())
    }

    async fn prune_backups(&self, current: &str) {
        if self.keep_backups == 0 {
            return;
        }
        if let Err(e) = self.backups.cleanup_old_backups(self.keep_backups, Some(current)).await {
            fleet_warn!(Component::Updater, "⚠️ Backup retention failed: {}", e);
        }
    }

    fn advance(&self, phase: UpdatePhase, message: &str) -> ManagerResult<()> {
        self.state().advance(phase, message)?;
        self.log_phase();
        Ok(())
    }

    fn log_phase(&self) {
        let view = self.status();
        logging::log_progress(
            Component::Updater,
            &view.phase.to_string(),
            &format!("{} ({}%)", view.message, view.progress),
        );
    }
}
