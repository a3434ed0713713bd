//! Bot fleet manager library
//!
//! Owns the lifecycle of a fleet of long-running bot workers (start, stop,
//! timed stop-all) and drives self-updates of the application tree: remote
//! check, worker shutdown, backup, fetch, validation, persistence and
//! restart, with rollback when a step fails after the backup exists.

pub mod backup;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod manager;
pub mod services;
pub mod traits;
pub mod updater;

// Re-export commonly used types
pub use backup::{BackupManager, BackupSnapshot};
pub use config::{ManagerConfig, RestartMode};
pub use coordinator::LifecycleCoordinator;
pub use crate::core::{Registry, RegistrySnapshot, UpdateState};
pub use error::{ManagerError, ManagerResult};
pub use manager::{DefaultFleetManager, FleetManager};
pub use traits::{CommandRunner, ConfigStore, RestartTrigger, SourceControl, WorkerRuntime};
pub use updater::UpdateOrchestrator;
