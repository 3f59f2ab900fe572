//! DevCompute — in-process compute backend.
//!
//! Allocates fake instances instantly and pretends every command succeeds.
//! Used by the daemon's `--compute dev` mode and by tests that need a
//! working provider without a cloud account.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ComputeError, ComputeResult};
use crate::provider::ComputeProvider;
use crate::types::{CommandResult, ComputeHandle, ComputeSpec};

/// An in-process compute provider with no real instances behind it.
#[derive(Default)]
pub struct DevCompute {
    seq: AtomicU64,
    instances: Mutex<HashMap<String, ComputeHandle>>,
}

impl DevCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently provisioned instances.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}

#[async_trait]
impl ComputeProvider for DevCompute {
    async fn provision(&self, spec: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let handle = ComputeHandle {
            id: format!("dev-{n}"),
            address: format!("127.0.0.1:{}", 42000 + (n % 1000)),
        };
        self.instances
            .lock()
            .unwrap()
            .insert(handle.id.clone(), handle.clone());
        debug!(instance = %handle.id, name = %spec.name, "dev instance provisioned");
        Ok(handle)
    }

    async fn destroy(&self, handle: &ComputeHandle) -> ComputeResult<()> {
        let removed = self.instances.lock().unwrap().remove(&handle.id);
        match removed {
            Some(_) => {
                debug!(instance = %handle.id, "dev instance destroyed");
                Ok(())
            }
            None => Err(ComputeError::Destroy(format!(
                "unknown instance {}",
                handle.id
            ))),
        }
    }

    async fn run_command(
        &self,
        handle: &ComputeHandle,
        _script: &str,
    ) -> ComputeResult<CommandResult> {
        if !self.instances.lock().unwrap().contains_key(&handle.id) {
            return Err(ComputeError::Unreachable(format!(
                "unknown instance {}",
                handle.id
            )));
        }
        Ok(CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
