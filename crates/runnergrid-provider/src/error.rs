//! Provider error taxonomy.
//!
//! Each operation against the CI provider fails with its own error kind so
//! the fleet layer can apply the right policy: token failures retry next
//! tick, registration failures trigger compute compensation, deregistration
//! failures are best-effort, queue failures skip the tick's decision.

use std::time::Duration;

use thiserror::Error;

use runnergrid_compute::ComputeError;

/// Transport-level failure from the shared HTTP client.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited after {0} attempts")]
    RateLimited(u32),

    #[error("invalid provider url: {0}")]
    BadUrl(String),
}

/// Registration-token fetch failed. Retried on the next tick, never
/// immediately within the same attempt.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("provider rejected credentials")]
    Unauthorized,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited after {0} attempts")]
    RateLimited(u32),

    #[error("token fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HttpError> for TokenError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => TokenError::Timeout(d),
            HttpError::RateLimited(n) => TokenError::RateLimited(n),
            other => TokenError::Unavailable(other.to_string()),
        }
    }
}

/// Binding a worker process to the provider failed. The caller must destroy
/// the compute instance before propagating this.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("registration token expired before use")]
    TokenExpired,

    #[error("provider rejected registration: {0}")]
    Rejected(String),

    #[error("runner install failed with exit code {exit_code}: {stderr}")]
    Install { exit_code: i32, stderr: String },

    #[error("registered runner not visible at provider: {0}")]
    Lookup(String),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("registration timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HttpError> for RegisterError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => RegisterError::Timeout(d),
            other => RegisterError::Unavailable(other.to_string()),
        }
    }
}

/// Deregistration failed. Best-effort: never blocks compute cleanup.
#[derive(Debug, Error)]
pub enum DeregisterError {
    #[error("provider rejected deregistration: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("deregistration timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HttpError> for DeregisterError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => DeregisterError::Timeout(d),
            other => DeregisterError::Unavailable(other.to_string()),
        }
    }
}

/// Runner status query failed.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("runner {0} not known to the provider")]
    NotFound(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("status query timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HttpError> for StatusError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => StatusError::Timeout(d),
            other => StatusError::Unavailable(other.to_string()),
        }
    }
}

/// Queue observation failed. The tick makes no decision; this is never
/// interpreted as "zero jobs".
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue observation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl From<HttpError> for QueueError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(d) => QueueError::Timeout(d),
            other => QueueError::Transport(other.to_string()),
        }
    }
}
