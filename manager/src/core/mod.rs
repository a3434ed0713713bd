//! Core in-memory logic
//!
//! This module contains the registry, the worker handle primitives and the
//! update state bookkeeping. None of it performs I/O; everything is
//! deterministic apart from timestamps and easily testable.

pub mod handle;
pub mod registry;
pub mod update_state;

pub use handle::{CancelSignal, CancelToken, DoneSignal, WorkerHandle};
pub use registry::{PersistedWorker, Registry, RegistrySnapshot, WorkerEntry};
pub use update_state::UpdateState;
