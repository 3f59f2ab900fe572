//! runnergrid-compute — the compute provisioning boundary.
//!
//! RunnerGrid does not create or destroy virtual machines itself; it drives
//! a [`ComputeProvider`] that does. This crate defines that interface
//! (`provision` / `destroy` / `run_command`), the types crossing it, and a
//! `DevCompute` in-process backend used for local runs and tests.
//!
//! Real backends (cloud APIs, on-prem hypervisors) implement
//! `ComputeProvider` and plug into the daemon at assembly time.

pub mod dev;
pub mod error;
pub mod provider;
pub mod types;

pub use dev::DevCompute;
pub use error::{ComputeError, ComputeResult};
pub use provider::ComputeProvider;
pub use types::{CommandResult, ComputeHandle, ComputeSpec};
