//! Update run state
//!
//! Pure bookkeeping for the update state machine: which phase the current run
//! is in, the coarse progress checkpoint, and the diagnostics shown to
//! pollers. Transitions are validated against the phase table in
//! `UpdatePhase::can_transition_to`.

use chrono::{DateTime, Utc};
use shared::{SharedError, SharedResult, UpdatePhase, UpdateStatusView};

/// Process-wide update status, one per running instance
#[derive(Debug, Clone)]
pub struct UpdateState {
    phase: UpdatePhase,
    progress: u8,
    message: String,
    error: Option<String>,
    backup_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    local_ref: Option<String>,
    remote_ref: Option<String>,
}

impl UpdateState {
    pub fn new() -> Self {
        Self {
            phase: UpdatePhase::Idle,
            progress: 0,
            message: String::new(),
            error: None,
            backup_id: None,
            started_at: None,
            finished_at: None,
            local_ref: None,
            remote_ref: None,
        }
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn backup_id(&self) -> Option<&str> {
        self.backup_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Start a new run: any previous terminal state is discarded
    pub fn begin(&mut self, message: impl Into<String>) -> SharedResult<()> {
        self.check_transition(UpdatePhase::Checking)?;

        let refs = (self.local_ref.take(), self.remote_ref.take());
        *self = Self::new();
        (self.local_ref, self.remote_ref) = refs;

        self.phase = UpdatePhase::Checking;
        self.progress = UpdatePhase::Checking.checkpoint().unwrap_or(0);
        self.message = message.into();
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move to the next phase; progress never goes backwards within a run
    pub fn advance(&mut self, next: UpdatePhase, message: impl Into<String>) -> SharedResult<()> {
        self.check_transition(next)?;

        self.phase = next;
        if let Some(checkpoint) = next.checkpoint() {
            self.progress = self.progress.max(checkpoint);
        }
        self.message = message.into();
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Enter `failed` with a diagnostic
    pub fn fail(&mut self, error: impl Into<String>) -> SharedResult<()> {
        let error = error.into();
        self.advance(UpdatePhase::Failed, format!("Update failed: {error}"))?;
        self.error = Some(error);
        Ok(())
    }

    pub fn set_backup_id(&mut self, backup_id: impl Into<String>) {
        self.backup_id = Some(backup_id.into());
    }

    pub fn record_refs(&mut self, local_ref: impl Into<String>, remote_ref: impl Into<String>) {
        self.local_ref = Some(local_ref.into());
        self.remote_ref = Some(remote_ref.into());
    }

    /// Return a terminal state to `idle` once it has been seen
    pub fn acknowledge(&mut self) -> bool {
        if !self.phase.is_terminal() {
            return false;
        }

        let refs = (self.local_ref.take(), self.remote_ref.take());
        *self = Self::new();
        (self.local_ref, self.remote_ref) = refs;
        true
    }

    pub fn view(&self, in_progress: bool) -> UpdateStatusView {
        UpdateStatusView {
            phase: self.phase,
            progress: self.progress,
            message: self.message.clone(),
            error: self.error.clone(),
            backup_id: self.backup_id.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            local_ref: self.local_ref.clone(),
            remote_ref: self.remote_ref.clone(),
            in_progress: in_progress || self.phase.is_in_progress(),
        }
    }

    fn check_transition(&self, next: UpdatePhase) -> SharedResult<()> {
        if self.phase.can_transition_to(next) {
            Ok(())
        } else {
            Err(SharedError::IllegalTransition { from: self.phase, to: next })
        }
    }
}

impl Default for UpdateState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_from_idle_sets_checkpoint() {
        let mut state = UpdateState::new();
        state.begin("Checking for updates").unwrap();

        assert_eq!(state.phase(), UpdatePhase::Checking);
        assert_eq!(state.progress(), 5);

        let view = state.view(false);
        assert!(view.in_progress);
        assert!(view.started_at.is_some());
    }

    #[test]
    fn test_cannot_begin_twice() {
        let mut state = UpdateState::new();
        state.begin("first").unwrap();
        assert!(matches!(
            state.begin("second"),
            Err(SharedError::IllegalTransition { from: UpdatePhase::Checking, .. })
        ));
    }

    #[test]
    fn test_failure_keeps_progress_and_error() {
        let mut state = UpdateState::new();
        state.begin("checking").unwrap();
        state.advance(UpdatePhase::StoppingWorkers, "stopping").unwrap();
        state.advance(UpdatePhase::BackingUp, "backing up").unwrap();
        state.set_backup_id("backup_1");
        state.advance(UpdatePhase::Fetching, "fetching").unwrap();
        state.fail("pull rejected").unwrap();

        let view = state.view(false);
        assert_eq!(view.phase, UpdatePhase::Failed);
        assert_eq!(view.progress, 50);
        assert_eq!(view.error.as_deref(), Some("pull rejected"));
        assert_eq!(view.backup_id.as_deref(), Some("backup_1"));
        assert!(view.finished_at.is_some());
        assert!(!view.in_progress);
    }

    #[test]
    fn test_illegal_skip_is_rejected() {
        let mut state = UpdateState::new();
        state.begin("checking").unwrap();
        assert!(state.advance(UpdatePhase::Fetching, "skip ahead").is_err());
        assert_eq!(state.phase(), UpdatePhase::Checking);
    }

    #[test]
    fn test_terminal_state_resets_on_next_run() {
        let mut state = UpdateState::new();
        state.begin("checking").unwrap();
        state.record_refs("aaaa1111", "bbbb2222");
        state.fail("No updates available").unwrap();

        state.begin("again").unwrap();
        assert_eq!(state.phase(), UpdatePhase::Checking);
        assert!(state.error().is_none());
        assert!(state.backup_id().is_none());
        assert_eq!(state.view(false).local_ref.as_deref(), Some("aaaa1111"));
    }

    #[test]
    fn test_acknowledge_only_resets_terminal_states() {
        let mut state = UpdateState::new();
        assert!(!state.acknowledge());

        state.begin("checking").unwrap();
        assert!(!state.acknowledge());

        state.fail("boom").unwrap();
        assert!(state.acknowledge());
        assert_eq!(state.phase(), UpdatePhase::Idle);
        assert_eq!(state.progress(), 0);
    }

    #[test]
    fn test_completed_reaches_one_hundred() {
        let mut state = UpdateState::new();
        state.begin("checking").unwrap();
        for phase in [
            UpdatePhase::StoppingWorkers,
            UpdatePhase::BackingUp,
            UpdatePhase::Fetching,
            UpdatePhase::Validating,
            UpdatePhase::Persisting,
            UpdatePhase::Restarting,
            UpdatePhase::Completed,
        ] {
            let before = state.progress();
            state.advance(phase, phase.to_string()).unwrap();
            assert!(state.progress() >= before);
        }
        assert_eq!(state.progress(), 100);
    }
}
