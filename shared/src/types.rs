//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::{SharedError, SharedResult};

/// Unique identifier for a managed worker, assigned monotonically and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl WorkerId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker_{}", self.0)
    }
}

impl From<u64> for WorkerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a worker entry
///
/// `Running` and `Stopping` always come with a live worker handle,
/// `Stopped` and `Error` never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Running,
    Stopping,
    Error,
}

impl WorkerStatus {
    /// Whether this status requires an attached worker handle
    pub fn has_handle(&self) -> bool {
        matches!(self, WorkerStatus::Running | WorkerStatus::Stopping)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Stopping => write!(f, "stopping"),
            WorkerStatus::Error => write!(f, "error"),
        }
    }
}

/// Worker configuration blob
///
/// Only `bot_name` and `telegram_token` are interpreted by the manager; every
/// other field (credentials, behavioural flags) is carried through untouched
/// to the worker runtime and the config store.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub bot_name: String,

    #[serde(default)]
    pub telegram_token: String,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl WorkerConfig {
    pub fn new(bot_name: impl Into<String>, telegram_token: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            telegram_token: telegram_token.into(),
            settings: Map::new(),
        }
    }

    /// Add an opaque setting (fluent API)
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Build a config from an arbitrary JSON value, validating required fields
    pub fn from_value(value: Value) -> SharedResult<Self> {
        if !value.is_object() {
            return Err(SharedError::InvalidConfig {
                problems: vec!["configuration must be a JSON object".to_string()],
            });
        }

        let config: WorkerConfig = serde_json::from_value(value).map_err(|e| SharedError::InvalidConfig {
            problems: vec![e.to_string()],
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required field is present and non-empty
    pub fn validate(&self) -> SharedResult<()> {
        let mut problems = Vec::new();

        if self.bot_name.trim().is_empty() {
            problems.push("bot_name is required".to_string());
        }
        if self.telegram_token.trim().is_empty() {
            problems.push("telegram_token is required".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SharedError::InvalidConfig { problems })
        }
    }
}

// Tokens must never reach the logs
impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("bot_name", &self.bot_name)
            .field("telegram_token", &"<redacted>")
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Phase of the update state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Idle,
    Checking,
    StoppingWorkers,
    BackingUp,
    Fetching,
    Validating,
    Persisting,
    Restarting,
    Completed,
    Failed,
}

impl UpdatePhase {
    /// Fixed progress checkpoint reported when entering the phase
    ///
    /// `Failed` has no checkpoint: progress stays where the run stopped.
    pub fn checkpoint(&self) -> Option<u8> {
        match self {
            UpdatePhase::Idle => Some(0),
            UpdatePhase::Checking => Some(5),
            UpdatePhase::StoppingWorkers => Some(15),
            UpdatePhase::BackingUp => Some(25),
            UpdatePhase::Fetching => Some(50),
            UpdatePhase::Validating => Some(70),
            UpdatePhase::Persisting => Some(80),
            UpdatePhase::Restarting => Some(90),
            UpdatePhase::Completed => Some(100),
            UpdatePhase::Failed => None,
        }
    }

    /// Terminal phases reset to idle on the next run
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdatePhase::Completed | UpdatePhase::Failed)
    }

    /// An update run is active in every phase except idle and the terminal ones
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, UpdatePhase::Idle | UpdatePhase::Completed | UpdatePhase::Failed)
    }

    /// Legal transitions of the update state machine
    pub fn can_transition_to(&self, next: UpdatePhase) -> bool {
        use UpdatePhase::*;

        matches!(
            (self, next),
            (Idle | Completed | Failed, Checking)
                | (Checking, StoppingWorkers | Failed)
                | (StoppingWorkers, BackingUp)
                | (BackingUp, Fetching | Failed)
                | (Fetching, Validating | Failed)
                | (Validating, Persisting | Failed)
                | (Persisting, Restarting | Failed)
                | (Restarting, Completed | Failed)
                | (Completed | Failed, Idle)
        )
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::Checking => "checking",
            UpdatePhase::StoppingWorkers => "stopping_workers",
            UpdatePhase::BackingUp => "backing_up",
            UpdatePhase::Fetching => "fetching",
            UpdatePhase::Validating => "validating",
            UpdatePhase::Persisting => "persisting",
            UpdatePhase::Restarting => "restarting",
            UpdatePhase::Completed => "completed",
            UpdatePhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Component tag attached to every log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Manager,
    Registry,
    Coordinator,
    Backup,
    Updater,
    Restart,
    Worker(WorkerId),
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Manager => write!(f, "manager"),
            Component::Registry => write!(f, "registry"),
            Component::Coordinator => write!(f, "coordinator"),
            Component::Backup => write!(f, "backup"),
            Component::Updater => write!(f, "updater"),
            Component::Restart => write!(f, "restart"),
            Component::Worker(id) => write!(f, "{id}"),
        }
    }
}
