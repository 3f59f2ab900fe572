//! Types crossing the compute provisioning boundary.

use serde::{Deserialize, Serialize};

/// Request to provision a compute instance for one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeSpec {
    /// Instance name; also used as the runner's display name.
    pub name: String,
    /// Base image the instance boots from.
    pub image: String,
    /// Provider-specific size/flavor identifier.
    pub size: String,
}

/// Handle to a provisioned compute instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeHandle {
    /// Provider-assigned instance id.
    pub id: String,
    /// Address the instance is reachable at for command execution.
    pub address: String,
}

/// Outcome of a command executed on an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// Whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
