//! Fleet-layer error types.

use std::time::Duration;

use thiserror::Error;

use runnergrid_compute::ComputeError;
use runnergrid_provider::{DeregisterError, RegisterError, TokenError};
use runnergrid_state::{StateError, ValidationError};

/// Failure of a single worker's lifecycle operation.
///
/// Caught at the lifecycle-manager boundary and reported as that worker's
/// outcome; never propagates far enough to crash a tick loop.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Deregister(#[from] DeregisterError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("worker {name} not active within {deadline:?}")]
    ActivationTimeout { name: String, deadline: Duration },

    #[error("{op} timed out after {timeout:?}")]
    OperationTimeout { op: &'static str, timeout: Duration },
}

/// Errors from the fleet manager's operator surface.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid fleet spec: {0}")]
    Invalid(#[from] ValidationError),

    #[error("fleet {0} is already enabled")]
    AlreadyEnabled(String),

    #[error("fleet {0} is not enabled")]
    NotEnabled(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("fleet {0} controller unavailable")]
    ControllerUnavailable(String),
}
