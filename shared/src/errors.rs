//! Shared error types for the bot fleet manager

use thiserror::Error;

use crate::types::UpdatePhase;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid worker configuration: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },

    #[error("Illegal update phase transition: {from} -> {to}")]
    IllegalTransition { from: UpdatePhase, to: UpdatePhase },
}

pub type SharedResult<T> = Result<T, SharedError>;
