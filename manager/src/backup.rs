//! Backup store
//!
//! Each snapshot is a directory under the backup root:
//!
//! ```text
//! backups/
//!   backup_20250101_120000_000/
//!     manifest.json      # BackupSnapshot, including the registry snapshot
//!     files/...          # copies of the critical files, relative to the app dir
//! ```
//!
//! Snapshots are staged in a hidden `.<id>.partial` directory and renamed
//! into place once complete, so a failed backup leaves nothing a listing
//! would pick up.

use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{fleet_debug, fleet_info, fleet_warn, BackupSummary, CleanupReport, Component};
use tokio::fs;

use crate::core::RegistrySnapshot;
use crate::error::{ManagerError, ManagerResult};
use crate::traits::SourceControl;

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// Immutable point-in-time copy of critical files and registry contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Source control revision checked out when the backup was taken
    pub commit_hash: Option<String>,
    pub app_version: String,
    pub source_dir: PathBuf,
    /// Copied files, relative to `source_dir`
    pub file_manifest: Vec<String>,
    /// Configured files that did not exist; a restore deletes them again
    #[serde(default)]
    pub absent_files: Vec<String>,
    pub config_snapshot: RegistrySnapshot,
}

impl BackupSnapshot {
    pub fn summary(&self, size_bytes: u64) -> BackupSummary {
        BackupSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            commit_hash: self.commit_hash.clone(),
            app_version: self.app_version.clone(),
            files_count: self.file_manifest.len(),
            size_bytes,
        }
    }
}

pub struct BackupManager<S: SourceControl> {
    source: Arc<S>,
    app_dir: PathBuf,
    backup_dir: PathBuf,
    files: Vec<String>,
    app_version: String,
}

impl<S: SourceControl> BackupManager<S> {
    pub fn new(source: Arc<S>, app_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            app_dir: app_dir.into(),
            backup_dir: backup_dir.into(),
            files: Vec::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Configure the files copied into every snapshot (fluent API)
    pub fn with_files<I, T>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Configure the version recorded in manifests (fluent API)
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Take a snapshot of the critical files, the registry and the current revision
    ///
    /// Missing files are recorded as absent; any I/O failure aborts the
    /// whole snapshot.
    pub async fn create_backup(&self, config_snapshot: &RegistrySnapshot) -> ManagerResult<BackupSnapshot> {
        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| ManagerError::backup(format!("cannot create {}: {e}", self.backup_dir.display())))?;

        let id = self.allocate_id().await;
        let staging = self.backup_dir.join(format!(".{id}.partial"));
        fleet_info!(Component::Backup, "📦 Creating backup: {}", id);

        let commit_hash = match self.source.local_ref().await {
            Ok(commit) => Some(commit),
            Err(e) => {
                fleet_warn!(Component::Backup, "⚠️ Could not record current revision: {}", e);
                None
            }
        };

        match self.stage(&id, &staging, commit_hash, config_snapshot).await {
            Ok(snapshot) => {
                fs::rename(&staging, self.backup_dir.join(&id))
                    .await
                    .map_err(|e| ManagerError::backup(format!("{id}: could not finalize snapshot: {e}")))?;
                fleet_info!(
                    Component::Backup,
                    "✅ Backup created: {} ({} files)",
                    id,
                    snapshot.file_manifest.len()
                );
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging).await {
                    fleet_warn!(Component::Backup, "⚠️ Could not remove partial backup {}: {}", id, cleanup);
                }
                Err(match e {
                    ManagerError::BackupError { .. } => e,
                    other => ManagerError::backup(format!("{id}: {other}")),
                })
            }
        }
    }

    async fn stage(
        &self,
        id: &str,
        staging: &Path,
        commit_hash: Option<String>,
        config_snapshot: &RegistrySnapshot,
    ) -> ManagerResult<BackupSnapshot> {
        let files_root = staging.join(FILES_DIR);
        fs::create_dir_all(&files_root).await?;

        let mut manifest = Vec::new();
        let mut absent = Vec::new();
        for file in &self.files {
            let relative = relative_path(file)?;
            let source = self.app_dir.join(&relative);
            if !fs::metadata(&source).await.map(|m| m.is_file()).unwrap_or(false) {
                fleet_debug!(Component::Backup, "⏭️ Recording missing file: {}", file);
                absent.push(file.clone());
                continue;
            }

            let target = files_root.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&source, &target).await?;
            fleet_debug!(Component::Backup, "📋 Backed up: {}", file);
            manifest.push(file.clone());
        }

        let snapshot = BackupSnapshot {
            id: id.to_string(),
            created_at: Utc::now(),
            commit_hash,
            app_version: self.app_version.clone(),
            source_dir: self.app_dir.clone(),
            file_manifest: manifest,
            absent_files: absent,
            config_snapshot: config_snapshot.clone(),
        };

        let json = serde_json::to_vec_pretty(&snapshot)?;
        fs::write(staging.join(MANIFEST_FILE), json).await?;
        Ok(snapshot)
    }

    /// Copy a snapshot's files back over the live tree and reset source control
    ///
    /// The revision reset runs first and is best-effort; the backed-up files
    /// are copied afterwards so they win over whatever the reset checked out.
    /// Files that were absent when the snapshot was taken are deleted.
    /// Returns the snapshot so the caller can restore the registry from it.
    pub async fn restore(&self, backup_id: &str) -> ManagerResult<BackupSnapshot> {
        let snapshot = self.load(backup_id).await?;
        fleet_info!(Component::Backup, "🔄 Restoring from backup: {}", backup_id);

        if let Some(commit) = &snapshot.commit_hash {
            if let Err(e) = self.source.reset_to(commit).await {
                fleet_warn!(Component::Backup, "⚠️ Could not reset to {}: {}", commit, e);
            }
        }

        let files_root = self.backup_dir.join(backup_id).join(FILES_DIR);
        for file in &snapshot.file_manifest {
            let relative = relative_path(file)?;
            let target = self.app_dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ManagerError::backup(format!("restoring {file}: {e}")))?;
            }
            fs::copy(files_root.join(&relative), &target)
                .await
                .map_err(|e| ManagerError::backup(format!("restoring {file}: {e}")))?;
            fleet_debug!(Component::Backup, "📋 Restored: {}", file);
        }

        for file in &snapshot.absent_files {
            let target = self.app_dir.join(relative_path(file)?);
            match fs::remove_file(&target).await {
                Ok(()) => fleet_debug!(Component::Backup, "🗑️ Removed file created after backup: {}", file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ManagerError::backup(format!("removing {file}: {e}"))),
            }
        }

        fleet_info!(Component::Backup, "✅ Backup restored: {}", backup_id);
        Ok(snapshot)
    }

    /// Read a snapshot's manifest
    pub async fn load(&self, backup_id: &str) -> ManagerResult<BackupSnapshot> {
        if !is_valid_id(backup_id) {
            return Err(ManagerError::backup(format!("invalid backup id '{backup_id}'")));
        }

        let manifest = self.backup_dir.join(backup_id).join(MANIFEST_FILE);
        let bytes = match fs::read(&manifest).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManagerError::backup(format!("Backup {backup_id} not found")));
            }
            Err(e) => return Err(ManagerError::backup(format!("reading {}: {e}", manifest.display()))),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| ManagerError::backup(format!("corrupt manifest for {backup_id}: {e}")))
    }

    /// Summaries of every complete snapshot, newest first
    pub async fn list_backups(&self) -> ManagerResult<Vec<BackupSummary>> {
        let mut summaries = Vec::new();
        for snapshot in self.snapshots().await? {
            let size = dir_size(&self.backup_dir.join(&snapshot.id)).await;
            summaries.push(snapshot.summary(size));
        }
        Ok(summaries)
    }

    /// Delete all but the newest `keep` snapshots
    ///
    /// `protected` (the snapshot of an in-progress update) is never deleted.
    pub async fn cleanup_old_backups(&self, keep: usize, protected: Option<&str>) -> ManagerResult<CleanupReport> {
        let snapshots = self.snapshots().await?;
        let total = snapshots.len();
        let mut removed_ids = Vec::new();

        for snapshot in snapshots.into_iter().skip(keep) {
            if protected == Some(snapshot.id.as_str()) {
                fleet_debug!(Component::Backup, "🔒 Keeping {} (in use by update)", snapshot.id);
                continue;
            }

            match fs::remove_dir_all(self.backup_dir.join(&snapshot.id)).await {
                Ok(()) => {
                    fleet_debug!(Component::Backup, "🗑️ Removed old backup: {}", snapshot.id);
                    removed_ids.push(snapshot.id);
                }
                Err(e) => fleet_warn!(Component::Backup, "⚠️ Could not remove {}: {}", snapshot.id, e),
            }
        }

        let removed = removed_ids.len();
        let kept = total - removed;
        let message = format!("Removed {removed} old backups, kept {kept}");
        fleet_info!(Component::Backup, "🧹 {}", message);

        Ok(CleanupReport {
            removed,
            kept,
            removed_ids,
            message,
        })
    }

    /// Complete snapshots sorted by creation time, newest first
    async fn snapshots(&self) -> ManagerResult<Vec<BackupSnapshot>> {
        let mut entries = match fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ManagerError::backup(format!("listing {}: {e}", self.backup_dir.display()))),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_valid_id(&name) || !entry.file_type().await?.is_dir() {
                continue;
            }

            match self.load(&name).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => fleet_warn!(Component::Backup, "⚠️ Ignoring unreadable backup {}: {}", name, e),
            }
        }

        snapshots.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(snapshots)
    }

    async fn allocate_id(&self) -> String {
        let base = format!("backup_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        let mut id = base.clone();
        let mut suffix = 2;
        while fs::try_exists(self.backup_dir.join(&id)).await.unwrap_or(false) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }
        id
    }
}

/// Backup ids are single visible path segments
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\'])
}

/// Backed-up paths must stay inside the application directory
fn relative_path(file: &str) -> ManagerResult<PathBuf> {
    let path = Path::new(file);
    let inside = path.components().all(|c| matches!(c, PathComponent::Normal(_)));
    if file.is_empty() || !inside {
        return Err(ManagerError::backup(format!("'{file}' is not a relative path inside the app directory")));
    }
    Ok(path.to_path_buf())
}

async fn dir_size(root: &Path) -> u64 {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            match entry.metadata().await {
                Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                Ok(meta) => total += meta.len(),
                Err(_) => {}
            }
        }
    }
    total
}
