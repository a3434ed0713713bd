//! Shared types for the bot fleet manager
//!
//! Contains the identifiers, configuration blobs and serializable views that
//! cross the boundary between the manager core and the layers that consume it
//! (HTTP API, CLI, persistence).

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

// Re-export the views handed to outer layers
pub use messages::{
    // Worker views
    StopAllReport, WorkerView,

    // Update views
    RemoteCheck, UpdateOutcome, UpdateStatusView,

    // Backup views
    BackupSummary, CleanupReport,
};
