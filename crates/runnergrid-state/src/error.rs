//! Error types for the RunnerGrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Rejections produced by fleet-spec validation at enable time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("fleet id must not be empty")]
    EmptyId,

    #[error("fleet repo must not be empty")]
    EmptyRepo,

    #[error("fleet must advertise at least one label")]
    NoLabels,

    #[error("jobs_per_runner must be greater than zero")]
    JobsPerRunnerZero,

    #[error("min_runners ({min}) exceeds max_runners ({max})")]
    MinAboveMax { min: u32, max: u32 },
}
