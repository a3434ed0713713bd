//! Backup store views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing entry for one stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub commit_hash: Option<String>,
    pub app_version: String,
    pub files_count: usize,
    pub size_bytes: u64,
}

/// Result of a retention pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
    pub removed_ids: Vec<String>,
    pub message: String,
}
