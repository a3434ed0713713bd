//! Manager configuration
//!
//! Every tunable lives here. Defaults are derived from the application
//! directory; `from_env` layers `.env` and `FLEET_*` variables on top.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ManagerError, ManagerResult};

pub const DEFAULT_STOP_ALL_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PER_WORKER_CEILING: Duration = Duration::from_secs(5);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_BACKUPS: usize = 5;
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_CHANGE_LOG_LIMIT: usize = 10;

const DEFAULT_BACKUP_FILES: &[&str] = &["bot_configs.json", "Cargo.toml", "Cargo.lock", "README.md"];
const DEFAULT_REQUIRED_FILES: &[&str] = &["Cargo.toml"];

/// How the process supervisor is asked to relaunch us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartMode {
    /// Exit with this status; the supervisor restarts on exit
    Exit(i32),
    /// Deliver SIGTERM to the current process
    Signal,
    /// Run a supervisor command, e.g. `systemctl restart botfleet`
    Command(Vec<String>),
}

impl Default for RestartMode {
    fn default() -> Self {
        RestartMode::Exit(0)
    }
}

impl FromStr for RestartMode {
    type Err = ManagerError;

    /// Accepts `exit`, `exit:<code>`, `signal` or `command:<program> [args..]`
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.split_once(':') {
            None if value == "exit" => Ok(RestartMode::Exit(0)),
            None if value == "signal" => Ok(RestartMode::Signal),
            Some(("exit", code)) => code
                .trim()
                .parse()
                .map(RestartMode::Exit)
                .map_err(|e| ManagerError::config(format!("invalid restart exit code '{code}': {e}"))),
            Some(("command", command)) => {
                let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return Err(ManagerError::config("restart command is empty"));
                }
                Ok(RestartMode::Command(parts))
            }
            _ => Err(ManagerError::config(format!("unknown restart mode '{value}'"))),
        }
    }
}

/// Configuration for the fleet manager
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Root of the application tree being updated
    pub app_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Persisted worker configurations
    pub config_file: PathBuf,
    /// Marker file held while an update runs
    pub lock_file: PathBuf,
    /// Dedicated update log, appended to alongside stdout
    pub log_file: Option<PathBuf>,

    pub git_program: String,
    pub git_remote: String,
    pub git_branch: String,

    /// Paths relative to `app_dir` copied into every backup
    pub backup_files: Vec<String>,
    /// Paths relative to `app_dir` that must exist after an update is applied
    pub required_files: Vec<String>,

    pub stop_all_timeout: Duration,
    pub stop_timeout: Duration,
    pub per_worker_ceiling: Duration,
    pub command_timeout: Duration,
    pub keep_backups: usize,
    pub change_log_limit: usize,

    pub restart_delay: Duration,
    pub restart_mode: RestartMode,

    /// Bot executable launched once per worker
    pub worker_program: String,
    pub worker_args: Vec<String>,
}

impl ManagerConfig {
    /// Defaults rooted at `app_dir`
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            backup_dir: app_dir.join("backups"),
            config_file: app_dir.join("bot_configs.json"),
            lock_file: app_dir.join(".update_lock"),
            log_file: Some(app_dir.join("logs").join("auto_update.log")),
            git_program: "git".to_string(),
            git_remote: "origin".to_string(),
            git_branch: "master".to_string(),
            backup_files: DEFAULT_BACKUP_FILES.iter().map(|s| s.to_string()).collect(),
            required_files: DEFAULT_REQUIRED_FILES.iter().map(|s| s.to_string()).collect(),
            stop_all_timeout: DEFAULT_STOP_ALL_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            per_worker_ceiling: DEFAULT_PER_WORKER_CEILING,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            keep_backups: DEFAULT_KEEP_BACKUPS,
            change_log_limit: DEFAULT_CHANGE_LOG_LIMIT,
            restart_delay: DEFAULT_RESTART_DELAY,
            restart_mode: RestartMode::default(),
            worker_program: "telegram-bot".to_string(),
            worker_args: Vec::new(),
            app_dir,
        }
    }

    /// Load `.env`, then build from `FLEET_*` variables
    ///
    /// `FLEET_APP_DIR` defaults to the current directory.
    pub fn from_env() -> ManagerResult<Self> {
        Self::from_env_with(None)
    }

    /// Like `from_env`, with an explicit application directory taking precedence
    pub fn from_env_with(app_dir: Option<PathBuf>) -> ManagerResult<Self> {
        dotenv::dotenv().ok();

        let app_dir = match app_dir.or_else(|| env::var_os("FLEET_APP_DIR").map(PathBuf::from)) {
            Some(dir) => dir,
            None => env::current_dir()?,
        };

        Self::new(app_dir).apply_env(|key| env::var(key).ok())
    }

    /// Override fields from a variable lookup; unset variables keep the current value
    pub fn apply_env<F>(mut self, lookup: F) -> ManagerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FLEET_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("FLEET_CONFIG_FILE") {
            self.config_file = PathBuf::from(file);
        }
        if let Some(file) = lookup("FLEET_LOCK_FILE") {
            self.lock_file = PathBuf::from(file);
        }
        if let Some(file) = lookup("FLEET_LOG_FILE") {
            self.log_file = if file.is_empty() { None } else { Some(PathBuf::from(file)) };
        }
        if let Some(program) = lookup("FLEET_GIT_PROGRAM") {
            self.git_program = program;
        }
        if let Some(remote) = lookup("FLEET_GIT_REMOTE") {
            self.git_remote = remote;
        }
        if let Some(branch) = lookup("FLEET_GIT_BRANCH") {
            self.git_branch = branch;
        }
        if let Some(files) = lookup("FLEET_BACKUP_FILES") {
            self.backup_files = split_list(&files);
        }
        if let Some(files) = lookup("FLEET_REQUIRED_FILES") {
            self.required_files = split_list(&files);
        }
        if let Some(secs) = lookup("FLEET_STOP_ALL_TIMEOUT_SECS") {
            self.stop_all_timeout = parse_secs("FLEET_STOP_ALL_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("FLEET_STOP_TIMEOUT_SECS") {
            self.stop_timeout = parse_secs("FLEET_STOP_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("FLEET_PER_WORKER_CEILING_SECS") {
            self.per_worker_ceiling = parse_secs("FLEET_PER_WORKER_CEILING_SECS", &secs)?;
        }
        if let Some(secs) = lookup("FLEET_COMMAND_TIMEOUT_SECS") {
            self.command_timeout = parse_secs("FLEET_COMMAND_TIMEOUT_SECS", &secs)?;
        }
        if let Some(keep) = lookup("FLEET_KEEP_BACKUPS") {
            self.keep_backups = keep
                .trim()
                .parse()
                .map_err(|e| ManagerError::config(format!("FLEET_KEEP_BACKUPS='{keep}': {e}")))?;
        }
        if let Some(secs) = lookup("FLEET_RESTART_DELAY_SECS") {
            self.restart_delay = parse_secs("FLEET_RESTART_DELAY_SECS", &secs)?;
        }
        if let Some(mode) = lookup("FLEET_RESTART_MODE") {
            self.restart_mode = mode.parse()?;
        }
        if let Some(program) = lookup("FLEET_WORKER_PROGRAM") {
            self.worker_program = program;
        }
        if let Some(args) = lookup("FLEET_WORKER_ARGS") {
            self.worker_args = args.split_whitespace().map(str::to_string).collect();
        }

        Ok(self)
    }

    /// Configure backup directory (fluent API)
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Configure persisted config file (fluent API)
    pub fn with_config_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.config_file = file.into();
        self
    }

    /// Configure update log file (fluent API)
    pub fn with_log_file(mut self, file: Option<PathBuf>) -> Self {
        self.log_file = file;
        self
    }

    /// Configure remote and branch to update from (fluent API)
    pub fn with_remote(mut self, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        self.git_remote = remote.into();
        self.git_branch = branch.into();
        self
    }

    /// Configure files copied into backups (fluent API)
    pub fn with_backup_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backup_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Configure files required after an update (fluent API)
    pub fn with_required_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Configure stop timeouts (fluent API)
    pub fn with_stop_timeouts(mut self, stop_all: Duration, single: Duration, per_worker_ceiling: Duration) -> Self {
        self.stop_all_timeout = stop_all;
        self.stop_timeout = single;
        self.per_worker_ceiling = per_worker_ceiling;
        self
    }

    /// Configure external command timeout (fluent API)
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Configure backup retention (fluent API)
    pub fn with_keep_backups(mut self, keep: usize) -> Self {
        self.keep_backups = keep;
        self
    }

    /// Configure restart behaviour (fluent API)
    pub fn with_restart(mut self, mode: RestartMode, delay: Duration) -> Self {
        self.restart_mode = mode;
        self.restart_delay = delay;
        self
    }

    /// Configure the bot executable (fluent API)
    pub fn with_worker_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.worker_program = program.into();
        self.worker_args = args;
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Remote-tracking ref compared against `HEAD`
    pub fn remote_ref_name(&self) -> String {
        format!("{}/{}", self.git_remote, self.git_branch)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs(key: &str, value: &str) -> ManagerResult<Duration> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| ManagerError::config(format!("{key}='{value}': {e}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ManagerError::config(format!("{key}='{value}': must be a non-negative number")));
    }
    Ok(Duration::from_secs_f64(secs))
}
