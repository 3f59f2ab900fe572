//! runnergrid-provider — client for the remote CI provider's HTTP API.
//!
//! Two seams face the rest of the system:
//!
//! - [`QueueObserver`] — read-only job-queue depth, filtered by the fleet's
//!   capability labels.
//! - [`RunnerRegistry`] — registration-token fetch, runner registration
//!   (installing the runner process on a compute instance), idempotent
//!   deregistration, and per-runner status.
//!
//! Both are async traits so the fleet layer can run against recording fakes
//! in tests. The HTTP implementations share [`ProviderClient`], which owns
//! the access token, enforces per-call timeouts, retries rate-limit
//! responses with exponential backoff, and redacts bearer-token-shaped
//! substrings from any error text before it propagates.

pub mod client;
pub mod error;
pub mod queue;
pub mod registry;
pub mod token;

#[cfg(test)]
pub(crate) mod testserver;

pub use client::ProviderClient;
pub use error::{DeregisterError, QueueError, RegisterError, StatusError, TokenError};
pub use queue::{HttpQueueObserver, QueueObserver};
pub use registry::{HttpRunnerRegistry, RegisteredRunner, RunnerInfo, RunnerRegistry};
pub use token::RegistrationToken;
