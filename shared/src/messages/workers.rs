//! Worker registry views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{WorkerConfig, WorkerId, WorkerStatus};

/// Read-only view of a registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: WorkerId,
    pub config: WorkerConfig,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Aggregate result of stopping every running worker before an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAllReport {
    /// Workers that were running when the stop began
    pub total: usize,
    /// Workers that exited within their budget
    pub graceful: usize,
    /// Workers marked stopped without confirming exit
    pub forced: usize,
    /// Workers whose loop ended by itself before it was asked to stop
    #[serde(default)]
    pub exited: usize,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
}

impl StopAllReport {
    pub fn empty() -> Self {
        Self {
            total: 0,
            graceful: 0,
            forced: 0,
            exited: 0,
            success: true,
            message: "No active workers".to_string(),
            elapsed_ms: 0,
        }
    }
}
