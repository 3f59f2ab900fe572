//! Compute provisioning error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Errors raised by a compute provider.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("instance provisioning failed: {0}")]
    Provision(String),

    #[error("instance destruction failed: {0}")]
    Destroy(String),

    #[error("command execution failed: {0}")]
    Command(String),

    #[error("instance unreachable: {0}")]
    Unreachable(String),

    #[error("compute operation timed out after {0:?}")]
    Timeout(Duration),
}
