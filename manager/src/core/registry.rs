//! Worker registry
//!
//! The authoritative table of worker identities, configurations and lifecycle
//! states. Every operation is a short map operation under a single mutex; no
//! I/O and no waiting ever happens while the lock is held. Waiting for a
//! worker to exit is done by cloning its done signal inside the critical
//! section and awaiting it after the guard is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{fleet_debug, fleet_warn, Component, SharedError, WorkerConfig, WorkerId, WorkerStatus, WorkerView};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::handle::{DoneSignal, WorkerHandle};
use crate::error::{ManagerError, ManagerResult};

/// One managed worker
#[derive(Debug)]
pub struct WorkerEntry {
    pub id: WorkerId,
    pub config: WorkerConfig,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    handle: Option<WorkerHandle>,
}

impl WorkerEntry {
    fn new(id: WorkerId, config: WorkerConfig, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            status: WorkerStatus::Stopped,
            created_at,
            updated_at: Utc::now(),
            last_error: None,
            handle: None,
        }
    }

    pub fn view(&self) -> WorkerView {
        WorkerView {
            id: self.id,
            config: self.config.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_error: self.last_error.clone(),
        }
    }

    fn touch(&mut self, status: WorkerStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Persisted form of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedWorker {
    pub id: WorkerId,
    pub config: WorkerConfig,
    pub status: WorkerStatus,
    /// Start this worker when the process comes up
    #[serde(default)]
    pub autostart: bool,
    pub created_at: DateTime<Utc>,
}

/// Serializable copy of the registry contents
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub next_id: u64,
    pub workers: Vec<PersistedWorker>,
}

impl RegistrySnapshot {
    /// Mark the given workers to be started on the next boot (fluent API)
    pub fn with_autostart(mut self, ids: &[WorkerId]) -> Self {
        for worker in &mut self.workers {
            if ids.contains(&worker.id) {
                worker.autostart = true;
            }
        }
        self
    }

    pub fn autostart_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().filter(|w| w.autostart).map(|w| w.id).collect()
    }

    pub fn config_of(&self, id: WorkerId) -> Option<&WorkerConfig> {
        self.workers.iter().find(|w| w.id == id).map(|w| &w.config)
    }
}

struct RegistryInner {
    entries: BTreeMap<WorkerId, WorkerEntry>,
    next_id: u64,
}

/// In-memory map of worker identity to configuration and lifecycle state
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Build a registry from persisted contents
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let registry = Self::new();
        registry.restore(snapshot);
        registry
    }

    // No critical section can panic half-way, so a poisoned lock still guards consistent data
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new worker in the `stopped` state
    pub fn register(&self, config: WorkerConfig) -> ManagerResult<WorkerId> {
        validate(&config)?;

        let mut inner = self.lock();
        let id = WorkerId(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(id, WorkerEntry::new(id, config, Utc::now()));

        fleet_debug!(Component::Registry, "📝 Registered {}", id);
        Ok(id)
    }

    pub fn get(&self, id: WorkerId) -> Option<WorkerView> {
        self.lock().entries.get(&id).map(WorkerEntry::view)
    }

    /// All entries in registration order
    pub fn list(&self) -> Vec<WorkerView> {
        self.lock().entries.values().map(WorkerEntry::view).collect()
    }

    /// Ids currently `running`, in registration order
    pub fn running_ids(&self) -> Vec<WorkerId> {
        self.lock()
            .entries
            .values()
            .filter(|e| e.status == WorkerStatus::Running)
            .map(|e| e.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.lock().entries.get(&id).map(|e| e.status)
    }

    pub fn config(&self, id: WorkerId) -> Option<WorkerConfig> {
        self.lock().entries.get(&id).map(|e| e.config.clone())
    }

    /// Change the status without touching the handle
    ///
    /// Rejects any change that would break the handle invariant.
    pub fn set_status(&self, id: WorkerId, status: WorkerStatus) -> ManagerResult<()> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| ManagerError::not_found(id))?;

        if status.has_handle() != entry.handle.is_some() {
            return Err(ManagerError::state(
                id,
                format!("cannot mark {status} while {}", entry.status),
            ));
        }

        entry.touch(status);
        Ok(())
    }

    /// Attach a freshly started handle; the entry becomes `running`
    ///
    /// On rejection the handle is cancelled before it is dropped so the
    /// orphaned execution context winds down on its own.
    pub fn attach_handle(&self, id: WorkerId, handle: WorkerHandle) -> ManagerResult<()> {
        let mut inner = self.lock();

        let Some(entry) = inner.entries.get_mut(&id) else {
            handle.cancel();
            return Err(ManagerError::not_found(id));
        };

        if entry.status.has_handle() || entry.handle.is_some() {
            handle.cancel();
            return Err(ManagerError::state(id, format!("already {}", entry.status)));
        }

        entry.handle = Some(handle);
        entry.last_error = None;
        entry.touch(WorkerStatus::Running);
        Ok(())
    }

    /// Detach the handle and settle the entry in `stopped` or `error`
    pub fn detach_handle(&self, id: WorkerId, final_status: WorkerStatus) -> ManagerResult<Option<WorkerHandle>> {
        if final_status.has_handle() {
            return Err(ManagerError::state(
                id,
                format!("cannot detach into {final_status}"),
            ));
        }

        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| ManagerError::not_found(id))?;
        let handle = entry.handle.take();
        entry.touch(final_status);
        Ok(handle)
    }

    /// `running` -> `stopping`, deliver the cancel signal, hand back the done signal
    pub fn begin_stop(&self, id: WorkerId) -> ManagerResult<DoneSignal> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| ManagerError::not_found(id))?;

        if entry.status != WorkerStatus::Running {
            return Err(ManagerError::state(id, format!("cannot stop while {}", entry.status)));
        }

        let done = match entry.handle.as_ref() {
            Some(handle) => {
                handle.cancel();
                handle.done_signal()
            }
            None => return Err(ManagerError::state(id, "running without a handle")),
        };

        entry.touch(WorkerStatus::Stopping);
        Ok(done)
    }

    /// Unconditionally cancel, detach and mark `stopped`
    ///
    /// Returns whether a live handle was dropped without confirmed exit.
    pub fn force_stop(&self, id: WorkerId) -> ManagerResult<bool> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| ManagerError::not_found(id))?;

        let leaked = match entry.handle.take() {
            Some(handle) => {
                handle.cancel();
                !handle.is_finished()
            }
            None => false,
        };
        entry.touch(WorkerStatus::Stopped);
        Ok(leaked)
    }

    /// Settle an entry whose execution loop exited without being asked to
    ///
    /// Only acts while the entry is still `running` with the handle of the
    /// given generation; stops in progress and newer handles are left alone.
    pub fn settle_exit(&self, id: WorkerId, generation: u64, failure: Option<String>) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return false;
        };

        let owns_entry = entry.status == WorkerStatus::Running
            && entry.handle.as_ref().map(|h| h.generation()) == Some(generation);
        if !owns_entry {
            return false;
        }

        entry.handle = None;
        match failure {
            Some(message) => {
                entry.last_error = Some(message);
                entry.touch(WorkerStatus::Error);
            }
            None => entry.touch(WorkerStatus::Stopped),
        }
        true
    }

    /// Replace a worker's configuration; only allowed while `stopped`
    pub fn update_config(&self, id: WorkerId, config: WorkerConfig) -> ManagerResult<()> {
        validate(&config)?;

        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&id).ok_or_else(|| ManagerError::not_found(id))?;
        if entry.status != WorkerStatus::Stopped {
            return Err(ManagerError::state(
                id,
                format!("configuration is locked while {}", entry.status),
            ));
        }

        entry.config = config;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Delete a worker; only allowed while `stopped`
    pub fn remove(&self, id: WorkerId) -> ManagerResult<WorkerView> {
        let mut inner = self.lock();
        match inner.entries.get(&id) {
            None => return Err(ManagerError::not_found(id)),
            Some(entry) if entry.status != WorkerStatus::Stopped => {
                return Err(ManagerError::state(id, format!("cannot remove while {}", entry.status)));
            }
            Some(_) => {}
        }

        let removed = inner.entries.remove(&id).map(|e| e.view());
        fleet_debug!(Component::Registry, "🗑️ Removed {}", id);
        removed.ok_or_else(|| ManagerError::not_found(id))
    }

    /// Serializable copy of every entry; `running` entries are flagged for autostart
    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            next_id: inner.next_id,
            workers: inner
                .entries
                .values()
                .map(|e| PersistedWorker {
                    id: e.id,
                    config: e.config.clone(),
                    status: e.status,
                    autostart: e.status == WorkerStatus::Running,
                    created_at: e.created_at,
                })
                .collect(),
        }
    }

    /// Make the registry's configurations match a snapshot
    ///
    /// Entries with a live handle are never touched. Restored entries come
    /// back `stopped`; entries missing from the snapshot are dropped. Ids are
    /// never reused: the id counter only moves forward. Returns how many
    /// live entries were skipped.
    pub fn restore(&self, snapshot: &RegistrySnapshot) -> usize {
        let mut inner = self.lock();
        let wanted: BTreeSet<WorkerId> = snapshot.workers.iter().map(|w| w.id).collect();
        let mut skipped = 0;

        inner.entries.retain(|id, entry| wanted.contains(id) || entry.handle.is_some());

        for persisted in &snapshot.workers {
            match inner.entries.get_mut(&persisted.id) {
                Some(entry) if entry.handle.is_some() => {
                    fleet_warn!(Component::Registry, "⚠️ Not restoring {} while {}", entry.id, entry.status);
                    skipped += 1;
                }
                Some(entry) => {
                    entry.config = persisted.config.clone();
                    entry.created_at = persisted.created_at;
                    entry.last_error = None;
                    entry.touch(WorkerStatus::Stopped);
                }
                None => {
                    let entry = WorkerEntry::new(persisted.id, persisted.config.clone(), persisted.created_at);
                    inner.entries.insert(persisted.id, entry);
                }
            }
        }

        let highest = inner.entries.keys().next_back().map(|id| id.0 + 1).unwrap_or(1);
        inner.next_id = inner.next_id.max(snapshot.next_id).max(highest);

        fleet_debug!(
            Component::Registry,
            "♻️ Restored {} workers ({} skipped)",
            snapshot.workers.len(),
            skipped
        );
        skipped
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &WorkerConfig) -> ManagerResult<()> {
    config.validate().map_err(|e| match e {
        SharedError::InvalidConfig { problems } => ManagerError::config(problems.join("; ")),
        other => other.into(),
    })
}
