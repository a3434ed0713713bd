//! Service implementations
//!
//! Real implementations of the traits in `crate::traits`. These perform the
//! actual I/O: spawning processes, running git, touching the filesystem.

pub mod command;
pub mod config_store;
pub mod git;
pub mod process_worker;
pub mod restart;

pub use command::ShellCommandRunner;
pub use config_store::JsonConfigStore;
pub use git::GitSourceControl;
pub use process_worker::ProcessWorkerRuntime;
pub use restart::SupervisorRestart;
