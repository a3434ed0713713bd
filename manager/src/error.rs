//! Manager-specific error types

use shared::{SharedError, WorkerId};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Invalid worker configuration: {message}")]
    ConfigError { message: String },

    #[error("Invalid state for {id}: {reason}")]
    StateError { id: WorkerId, reason: String },

    #[error("{id} did not stop within {timeout:?}")]
    TimeoutError { id: WorkerId, timeout: Duration },

    #[error("Update already in progress")]
    ConcurrencyError,

    #[error("No updates available")]
    NoUpdatesAvailable,

    #[error("Remote operation failed: {message}")]
    RemoteError { message: String },

    #[error("Backup operation failed: {message}")]
    BackupError { message: String },

    #[error("Critical file missing after update: {path}")]
    ValidationError { path: String },

    #[error("Persisting configuration failed: {message}")]
    PersistError { message: String },

    #[error("Restart request failed: {message}")]
    RestartError { message: String },

    #[error("{id} failed: {message}")]
    WorkerFailed { id: WorkerId, message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ManagerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    pub fn state(id: WorkerId, reason: impl Into<String>) -> Self {
        Self::StateError { id, reason: reason.into() }
    }

    pub fn not_found(id: WorkerId) -> Self {
        Self::state(id, "not registered")
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteError { message: message.into() }
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::BackupError { message: message.into() }
    }

    pub fn persist(message: impl Into<String>) -> Self {
        Self::PersistError { message: message.into() }
    }

    pub fn restart(message: impl Into<String>) -> Self {
        Self::RestartError { message: message.into() }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
