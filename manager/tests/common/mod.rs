//! Common test utilities and infrastructure
//!
//! Fakes for the manager's collaborators plus a builder that wires a full
//! fleet manager over a temporary application tree.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::{Cooperative, Counting, Exiting, FakeRepo, PullBehavior, RecordingRestart, Stubborn, TestFixtures};
pub use helpers::{FleetBuilder, TestFleet, TestHelpers};
