//! FleetManager — one controller task per enabled fleet.
//!
//! Holds the slot map of running controllers, the global provisioning
//! semaphore they all share, and the operator operations: enable, disable
//! (optionally draining), manual scale, and status reads. Fleets are
//! independent; the semaphore is the only cross-fleet shared resource.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use runnergrid_autoscale::ScalingDecision;
use runnergrid_provider::QueueObserver;
use runnergrid_state::{FleetId, FleetSpec, FleetStatusRecord, StateStore};

use crate::controller::{ControllerCommand, ControllerConfig, FleetController};
use crate::error::ManagerError;
use crate::lifecycle::FleetLifecycleManager;

/// A running fleet controller.
struct FleetSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    commands: mpsc::Sender<ControllerCommand>,
}

/// Owns and supervises the per-fleet tick loops.
pub struct FleetManager {
    store: StateStore,
    observer: Arc<dyn QueueObserver>,
    lifecycle: Arc<FleetLifecycleManager>,
    limiter: Arc<Semaphore>,
    config: ControllerConfig,
    fleets: Arc<RwLock<HashMap<FleetId, FleetSlot>>>,
}

impl FleetManager {
    /// `max_concurrent_ops` bounds provision/destroy operations in flight
    /// across all fleets.
    pub fn new(
        store: StateStore,
        observer: Arc<dyn QueueObserver>,
        lifecycle: Arc<FleetLifecycleManager>,
        config: ControllerConfig,
        max_concurrent_ops: usize,
    ) -> Self {
        Self {
            store,
            observer,
            lifecycle,
            limiter: Arc::new(Semaphore::new(max_concurrent_ops)),
            config,
            fleets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate, persist, and start a fleet.
    pub async fn enable_fleet(&self, mut spec: FleetSpec) -> Result<(), ManagerError> {
        spec.validate()?;
        {
            let fleets = self.fleets.read().await;
            if fleets.contains_key(&spec.id) {
                return Err(ManagerError::AlreadyEnabled(spec.id));
            }
        }

        spec.enabled = true;
        self.store.put_fleet(&spec)?;
        self.spawn_controller(spec).await;
        Ok(())
    }

    /// Stop a fleet's tick loop. With `drain`, every tracked worker is
    /// destroyed first; without it, workers are left running and their
    /// records stay in the store.
    pub async fn disable_fleet(&self, fleet_id: &str, drain: bool) -> Result<(), ManagerError> {
        let slot = {
            let mut fleets = self.fleets.write().await;
            fleets
                .remove(fleet_id)
                .ok_or_else(|| ManagerError::NotEnabled(fleet_id.to_string()))?
        };

        if drain {
            let (reply, rx) = oneshot::channel();
            if slot.commands.send(ControllerCommand::Drain { reply }).await.is_ok() {
                match rx.await {
                    Ok(drained) => {
                        info!(%fleet_id, drained, "fleet drained before disable")
                    }
                    Err(_) => warn!(%fleet_id, "drain reply lost"),
                }
            }
        }

        let _ = slot.shutdown_tx.send(true);
        let _ = slot.handle.await;

        if let Some(mut spec) = self.store.get_fleet(fleet_id)? {
            spec.enabled = false;
            spec.updated_at = epoch_secs();
            self.store.put_fleet(&spec)?;
        }
        if drain {
            // Nothing tracked survives a drain; drop the leftover snapshots.
            self.store.clear_fleet_state(fleet_id)?;
        }

        info!(%fleet_id, drain, "fleet disabled");
        Ok(())
    }

    /// Force an immediate scale to `target` (still clamped and subject to
    /// cooldown by the controller).
    pub async fn scale_fleet(
        &self,
        fleet_id: &str,
        target: u32,
    ) -> Result<ScalingDecision, ManagerError> {
        let commands = {
            let fleets = self.fleets.read().await;
            fleets
                .get(fleet_id)
                .ok_or_else(|| ManagerError::NotEnabled(fleet_id.to_string()))?
                .commands
                .clone()
        };

        let (reply, rx) = oneshot::channel();
        commands
            .send(ControllerCommand::ScaleTo { target, reply })
            .await
            .map_err(|_| ManagerError::ControllerUnavailable(fleet_id.to_string()))?;
        rx.await
            .map_err(|_| ManagerError::ControllerUnavailable(fleet_id.to_string()))
    }

    /// Status snapshot as last persisted by the fleet's tick loop.
    pub fn fleet_status(&self, fleet_id: &str) -> Result<FleetStatusRecord, ManagerError> {
        match self.store.get_fleet_status(fleet_id)? {
            Some(status) => Ok(status),
            None => Err(ManagerError::NotEnabled(fleet_id.to_string())),
        }
    }

    /// Restart controllers for every fleet persisted as enabled. Returns
    /// how many were started.
    pub async fn resume_enabled(&self) -> Result<usize, ManagerError> {
        let mut started = 0;
        for spec in self.store.list_fleets()? {
            if !spec.enabled {
                continue;
            }
            if self.is_enabled(&spec.id).await {
                continue;
            }
            debug!(fleet_id = %spec.id, "resuming persisted fleet");
            self.spawn_controller(spec).await;
            started += 1;
        }
        Ok(started)
    }

    /// Whether a controller is currently running for the fleet.
    pub async fn is_enabled(&self, fleet_id: &str) -> bool {
        self.fleets.read().await.contains_key(fleet_id)
    }

    /// Ids of all running fleets.
    pub async fn enabled_fleets(&self) -> Vec<FleetId> {
        self.fleets.read().await.keys().cloned().collect()
    }

    /// Stop every controller (for graceful shutdown). Workers keep running;
    /// a restart resumes them from persisted specs.
    pub async fn shutdown_all(&self) {
        let slots: Vec<(FleetId, FleetSlot)> = {
            let mut fleets = self.fleets.write().await;
            fleets.drain().collect()
        };
        for (fleet_id, slot) in slots {
            let _ = slot.shutdown_tx.send(true);
            let _ = slot.handle.await;
            debug!(%fleet_id, "fleet controller stopped");
        }
        info!("all fleet controllers stopped");
    }

    async fn spawn_controller(&self, spec: FleetSpec) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let controller = FleetController::new(
            spec.clone(),
            self.observer.clone(),
            self.lifecycle.clone(),
            self.store.clone(),
            self.limiter.clone(),
            self.config.clone(),
        );
        let fleet_id = spec.id.clone();
        let handle = tokio::spawn(async move {
            controller.run(cmd_rx, shutdown_rx).await;
        });

        let mut fleets = self.fleets.write().await;
        if let Some(old) = fleets.insert(
            fleet_id.clone(),
            FleetSlot {
                handle,
                shutdown_tx,
                commands: cmd_tx,
            },
        ) {
            // Stop the old controller if one was running.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%fleet_id, "fleet controller spawned");
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::testutil::*;
    use runnergrid_state::ScaleAction;
    use std::time::Duration;

    struct Harness {
        compute: Arc<RecordingCompute>,
        queue: Arc<StubQueue>,
        store: StateStore,
        manager: FleetManager,
    }

    fn harness() -> Harness {
        let registry = Arc::new(RecordingRegistry::new());
        let compute = Arc::new(RecordingCompute::new());
        let lifecycle = Arc::new(FleetLifecycleManager::new(
            registry,
            compute.clone(),
            LifecycleConfig {
                active_poll_interval: Duration::from_millis(5),
                active_deadline: Duration::from_millis(200),
                ..LifecycleConfig::default()
            },
        ));
        let queue = Arc::new(StubQueue::new());
        let store = StateStore::open_in_memory().unwrap();
        let manager = FleetManager::new(
            store.clone(),
            queue.clone(),
            lifecycle,
            ControllerConfig {
                // Keep automatic ticks out of these tests.
                tick_interval: Duration::from_secs(3600),
                ..ControllerConfig::default()
            },
            10,
        );
        Harness {
            compute,
            queue,
            store,
            manager,
        }
    }

    #[tokio::test]
    async fn enable_rejects_invalid_spec() {
        let h = harness();
        let mut spec = test_fleet();
        spec.scaling.jobs_per_runner = 0;

        let err = h.manager.enable_fleet(spec).await.unwrap_err();
        assert!(matches!(err, ManagerError::Invalid(_)));
        assert!(!h.manager.is_enabled("linux-x64").await);
    }

    #[tokio::test]
    async fn enable_persists_and_starts_controller() {
        let h = harness();

        h.manager.enable_fleet(test_fleet()).await.unwrap();

        assert!(h.manager.is_enabled("linux-x64").await);
        let stored = h.store.get_fleet("linux-x64").unwrap().unwrap();
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn double_enable_is_rejected() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();

        let err = h.manager.enable_fleet(test_fleet()).await.unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyEnabled(_)));
    }

    #[tokio::test]
    async fn manual_scale_through_manager() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();

        let decision = h.manager.scale_fleet("linux-x64", 2).await.unwrap();

        assert_eq!(decision.action, ScaleAction::ScaleUp);
        assert_eq!(decision.target, 2);
        assert_eq!(h.compute.live_instances(), 2);

        let status = h.manager.fleet_status("linux-x64").unwrap();
        assert_eq!(status.active_workers, 2);
    }

    #[tokio::test]
    async fn scale_unknown_fleet_fails() {
        let h = harness();
        let err = h.manager.scale_fleet("nope", 2).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotEnabled(_)));
    }

    #[tokio::test]
    async fn disable_with_drain_destroys_workers() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();
        h.manager.scale_fleet("linux-x64", 3).await.unwrap();
        assert_eq!(h.compute.live_instances(), 3);

        h.manager.disable_fleet("linux-x64", true).await.unwrap();

        assert!(!h.manager.is_enabled("linux-x64").await);
        assert_eq!(h.compute.live_instances(), 0);
        assert!(h.store.list_workers_for_fleet("linux-x64").unwrap().is_empty());
        let stored = h.store.get_fleet("linux-x64").unwrap().unwrap();
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn disable_without_drain_leaves_workers_running() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();
        h.manager.scale_fleet("linux-x64", 2).await.unwrap();

        h.manager.disable_fleet("linux-x64", false).await.unwrap();

        assert_eq!(h.compute.live_instances(), 2);
        assert_eq!(h.store.list_workers_for_fleet("linux-x64").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disable_unknown_fleet_fails() {
        let h = harness();
        let err = h.manager.disable_fleet("nope", false).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotEnabled(_)));
    }

    #[tokio::test]
    async fn resume_starts_persisted_enabled_fleets() {
        let h = harness();
        let mut enabled = test_fleet();
        enabled.enabled = true;
        h.store.put_fleet(&enabled).unwrap();

        let mut disabled = test_fleet();
        disabled.id = "windows-x64".to_string();
        disabled.enabled = false;
        h.store.put_fleet(&disabled).unwrap();

        let started = h.manager.resume_enabled().await.unwrap();

        assert_eq!(started, 1);
        assert!(h.manager.is_enabled("linux-x64").await);
        assert!(!h.manager.is_enabled("windows-x64").await);
    }

    #[tokio::test]
    async fn shutdown_all_stops_every_controller() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();
        let mut other = test_fleet();
        other.id = "windows-x64".to_string();
        h.manager.enable_fleet(other).await.unwrap();
        assert_eq!(h.manager.enabled_fleets().await.len(), 2);

        h.manager.shutdown_all().await;

        assert!(h.manager.enabled_fleets().await.is_empty());
    }

    #[tokio::test]
    async fn queue_outage_never_crashes_the_controller() {
        let h = harness();
        h.manager.enable_fleet(test_fleet()).await.unwrap();
        h.queue.set_fail(true);

        // The controller keeps answering commands even when observation
        // fails on every tick.
        let decision = h.manager.scale_fleet("linux-x64", 1).await.unwrap();
        assert_eq!(decision.action, ScaleAction::ScaleUp);
    }
}
