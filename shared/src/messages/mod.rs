//! Views handed to the layers around the manager core
//!
//! These are plain serializable snapshots; none of them carry runtime
//! handles, so they can be cloned, logged and sent over the wire freely.

pub mod backup;
pub mod update;
pub mod workers;

pub use backup::*;
pub use update::*;
pub use workers::*;
