//! Ephemeral-worker lifecycle: provision, destroy, rotate, health.
//!
//! `provision` is a short saga: each step records what it completed so the
//! failure path knows exactly what to undo. A compute instance created but
//! not registered is destroyed before the error propagates; nothing created
//! means nothing to undo.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use runnergrid_compute::{ComputeProvider, ComputeSpec};
use runnergrid_provider::{RunnerInfo, RunnerRegistry, StatusError};
use runnergrid_state::{FleetSpec, WorkerStatus};

use crate::error::LifecycleError;
use crate::worker::EphemeralWorker;

/// Timeouts and instance parameters for lifecycle operations.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Deadline for each individual provider/compute call.
    pub api_timeout: Duration,
    /// Interval between status polls while waiting for a worker to come
    /// online.
    pub active_poll_interval: Duration,
    /// Overall deadline for a freshly registered worker to report online.
    pub active_deadline: Duration,
    /// Base image new instances boot from.
    pub instance_image: String,
    /// Size/flavor for new instances.
    pub instance_size: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(30),
            active_poll_interval: Duration::from_secs(2),
            active_deadline: Duration::from_secs(120),
            instance_image: "runner-default".to_string(),
            instance_size: "standard-2".to_string(),
        }
    }
}

/// Orchestrates the ephemeral-worker state machine against the registry and
/// the compute provider.
pub struct FleetLifecycleManager {
    registry: Arc<dyn RunnerRegistry>,
    compute: Arc<dyn ComputeProvider>,
    config: LifecycleConfig,
    seq: AtomicU64,
}

impl FleetLifecycleManager {
    pub fn new(
        registry: Arc<dyn RunnerRegistry>,
        compute: Arc<dyn ComputeProvider>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            compute,
            config,
            seq: AtomicU64::new(0),
        }
    }

    /// Provision a new worker for the fleet and bring it to `Active`.
    ///
    /// On registration failure after the compute step succeeded, the
    /// instance is destroyed exactly once before the error returns. A
    /// compute failure propagates directly; no registration is attempted.
    pub async fn provision(&self, fleet: &FleetSpec) -> Result<EphemeralWorker, LifecycleError> {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = epoch_secs();
        let name = format!("rg-{}-{now}-{n}", fleet.id);
        let spec = ComputeSpec {
            name: name.clone(),
            image: self.config.instance_image.clone(),
            size: self.config.instance_size.clone(),
        };

        // Saga step 1: compute instance.
        let handle = self
            .bounded("provision", self.compute.provision(&spec))
            .await??;
        let mut worker = EphemeralWorker {
            id: format!("w-{now}-{n}"),
            fleet_id: fleet.id.clone(),
            handle,
            runner_id: None,
            runner_name: name,
            status: WorkerStatus::Provisioning,
            jobs_completed: 0,
            busy: false,
            created_at: now,
        };
        debug!(
            fleet_id = %fleet.id,
            worker_id = %worker.id,
            instance = %worker.handle.id,
            "compute instance provisioned"
        );

        // Saga steps 2–3: token fetch + registration. From here on the
        // instance exists and must not be leaked.
        match self.register_worker(fleet, &worker).await {
            Ok(runner_id) => {
                worker.runner_id = Some(runner_id);
                worker.status = WorkerStatus::Registered;
            }
            Err(e) => {
                self.compensate_unregistered(fleet, &worker).await;
                return Err(e);
            }
        }

        // Saga step 4: wait for the worker to report online.
        match self.wait_for_active(fleet, &worker).await {
            Ok(()) => {
                worker.status = WorkerStatus::Active;
                info!(
                    fleet_id = %fleet.id,
                    worker_id = %worker.id,
                    runner_id = worker.runner_id.as_deref().unwrap_or(""),
                    "worker active"
                );
                Ok(worker)
            }
            Err(e) => {
                // Registered but never came up: tear down both halves.
                warn!(
                    fleet_id = %fleet.id,
                    worker_id = %worker.id,
                    error = %e,
                    "worker never reached active, tearing down"
                );
                if let Err(destroy_err) = self.destroy(fleet, &mut worker).await {
                    warn!(
                        fleet_id = %fleet.id,
                        worker_id = %worker.id,
                        error = %destroy_err,
                        "teardown of failed worker reported an error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Retire a worker: drain, deregister, destroy the instance.
    ///
    /// Deregistration failure does not block instance destruction; both are
    /// attempted. On return the worker is `Destroyed` whether or not an
    /// error is also reported.
    pub async fn destroy(
        &self,
        fleet: &FleetSpec,
        worker: &mut EphemeralWorker,
    ) -> Result<(), LifecycleError> {
        if worker.status != WorkerStatus::Draining {
            worker.status = WorkerStatus::Draining;
        }
        let mut first_err: Option<LifecycleError> = None;

        if let Some(runner_id) = worker.runner_id.clone() {
            match self
                .bounded("deregister", self.registry.deregister(fleet, &runner_id))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        fleet_id = %fleet.id,
                        worker_id = %worker.id,
                        error = %e,
                        "deregistration failed, destroying instance anyway"
                    );
                    first_err = Some(e.into());
                }
                Err(timeout) => {
                    warn!(
                        fleet_id = %fleet.id,
                        worker_id = %worker.id,
                        "deregistration timed out, destroying instance anyway"
                    );
                    first_err = Some(timeout);
                }
            }
        }

        match self
            .bounded("destroy", self.compute.destroy(&worker.handle))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    fleet_id = %fleet.id,
                    worker_id = %worker.id,
                    instance = %worker.handle.id,
                    error = %e,
                    "compute instance destruction failed"
                );
                first_err.get_or_insert(e.into());
            }
            Err(timeout) => {
                error!(
                    fleet_id = %fleet.id,
                    worker_id = %worker.id,
                    instance = %worker.handle.id,
                    "compute instance destruction timed out"
                );
                first_err.get_or_insert(timeout);
            }
        }

        worker.status = WorkerStatus::Destroyed;
        debug!(fleet_id = %fleet.id, worker_id = %worker.id, "worker destroyed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Replace a worker without a capacity gap: the new worker must reach
    /// `Active` before the old one is destroyed. If provisioning fails the
    /// old worker is left untouched and the rotation aborts.
    pub async fn rotate(
        &self,
        fleet: &FleetSpec,
        old: &mut EphemeralWorker,
    ) -> Result<EphemeralWorker, LifecycleError> {
        let replacement = self.provision(fleet).await?;
        info!(
            fleet_id = %fleet.id,
            old_worker = %old.id,
            new_worker = %replacement.id,
            "rotation replacement active, retiring old worker"
        );
        if let Err(e) = self.destroy(fleet, old).await {
            warn!(
                fleet_id = %fleet.id,
                worker_id = %old.id,
                error = %e,
                "old worker teardown reported an error during rotation"
            );
        }
        Ok(replacement)
    }

    /// Whether the worker looks healthy from the provider's side.
    ///
    /// Not found or offline means unhealthy. A failed probe is not evidence
    /// either way and reports healthy. Signal only — no state transition.
    pub async fn check_health(&self, fleet: &FleetSpec, worker: &EphemeralWorker) -> bool {
        match self.probe(fleet, worker).await {
            Ok(info) => info.online,
            Err(StatusError::NotFound(_)) => false,
            Err(e) => {
                debug!(
                    fleet_id = %fleet.id,
                    worker_id = %worker.id,
                    error = %e,
                    "status probe failed, assuming healthy"
                );
                true
            }
        }
    }

    /// Fetch the provider's view of the worker's runner.
    pub async fn probe(
        &self,
        fleet: &FleetSpec,
        worker: &EphemeralWorker,
    ) -> Result<RunnerInfo, StatusError> {
        let Some(runner_id) = &worker.runner_id else {
            return Err(StatusError::NotFound(worker.id.clone()));
        };
        match tokio::time::timeout(
            self.config.api_timeout,
            self.registry.status(fleet, runner_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StatusError::Timeout(self.config.api_timeout)),
        }
    }

    async fn register_worker(
        &self,
        fleet: &FleetSpec,
        worker: &EphemeralWorker,
    ) -> Result<String, LifecycleError> {
        let token = self
            .bounded("token fetch", self.registry.registration_token(fleet))
            .await??;
        // The token is single-use and time-boxed: consumed by this one call.
        let runner = self
            .bounded(
                "registration",
                self.registry
                    .register(&worker.handle, fleet, &worker.runner_name, token),
            )
            .await??;
        Ok(runner.id)
    }

    /// Undo saga step 1 after a later step failed: the instance exists but
    /// carries no registration, and must not keep running.
    async fn compensate_unregistered(&self, fleet: &FleetSpec, worker: &EphemeralWorker) {
        warn!(
            fleet_id = %fleet.id,
            worker_id = %worker.id,
            instance = %worker.handle.id,
            "registration failed, destroying unregistered instance"
        );
        match self
            .bounded("destroy", self.compute.destroy(&worker.handle))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    fleet_id = %fleet.id,
                    instance = %worker.handle.id,
                    error = %e,
                    "compensating destroy failed, instance may be orphaned"
                );
            }
            Err(_) => {
                error!(
                    fleet_id = %fleet.id,
                    instance = %worker.handle.id,
                    "compensating destroy timed out, instance may be orphaned"
                );
            }
        }
    }

    async fn wait_for_active(
        &self,
        fleet: &FleetSpec,
        worker: &EphemeralWorker,
    ) -> Result<(), LifecycleError> {
        let deadline = Instant::now() + self.config.active_deadline;
        loop {
            match self.probe(fleet, worker).await {
                Ok(info) if info.online => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        fleet_id = %fleet.id,
                        worker_id = %worker.id,
                        error = %e,
                        "worker not visible yet"
                    );
                }
            }
            if Instant::now() >= deadline {
                return Err(LifecycleError::ActivationTimeout {
                    name: worker.runner_name.clone(),
                    deadline: self.config.active_deadline,
                });
            }
            tokio::time::sleep(self.config.active_poll_interval).await;
        }
    }

    /// Wrap a lifecycle I/O call in the per-call deadline.
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = T>,
    ) -> Result<T, LifecycleError> {
        tokio::time::timeout(self.config.api_timeout, fut)
            .await
            .map_err(|_| LifecycleError::OperationTimeout {
                op,
                timeout: self.config.api_timeout,
            })
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
