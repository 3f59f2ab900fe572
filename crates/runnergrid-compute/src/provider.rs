//! The `ComputeProvider` trait.

use async_trait::async_trait;

use crate::error::ComputeResult;
use crate::types::{CommandResult, ComputeHandle, ComputeSpec};

/// Abstraction over a compute backend that can create and destroy worker
/// instances and run a command on them.
///
/// All methods are expected to complete within a bounded time; callers wrap
/// each call in their own deadline on top of whatever the backend enforces.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Allocate a new compute instance.
    async fn provision(&self, spec: &ComputeSpec) -> ComputeResult<ComputeHandle>;

    /// Destroy a compute instance. Destroying an instance that no longer
    /// exists is an error; callers decide whether that matters.
    async fn destroy(&self, handle: &ComputeHandle) -> ComputeResult<()>;

    /// Execute a shell script on the instance and return its outcome.
    /// Used once per worker, to install and start the runner process.
    async fn run_command(&self, handle: &ComputeHandle, script: &str)
    -> ComputeResult<CommandResult>;
}
