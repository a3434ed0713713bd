//! Update orchestration views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UpdatePhase;

/// Result of comparing the local revision with the remote one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCheck {
    pub has_updates: bool,
    pub local_ref: String,
    pub remote_ref: String,
    /// One-line summaries of the incoming commits, newest first
    pub change_log: Vec<String>,
    pub message: String,
}

/// Polled by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusView {
    pub phase: UpdatePhase,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub backup_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub local_ref: Option<String>,
    pub remote_ref: Option<String>,
    pub in_progress: bool,
}

/// Returned to whoever triggered an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub message: String,
    pub backup_id: Option<String>,
}
