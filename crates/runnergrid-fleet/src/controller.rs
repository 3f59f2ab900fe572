//! FleetController — the per-fleet tick loop.
//!
//! Each tick: observe the queue, run the scaling policy, dispatch
//! provision/destroy batches bounded by the global semaphore, sweep worker
//! health, and persist a snapshot for the status surface.
//!
//! The controller owns its fleet's tracked worker set outright: this task
//! is the only writer, and reads elsewhere go through the state store's
//! persisted snapshots. A failed queue observation skips the tick without
//! touching any state — it is never interpreted as an empty queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use runnergrid_autoscale::{ScalingDecision, decide};
use runnergrid_provider::{QueueObserver, StatusError};
use runnergrid_state::{
    DecisionRecord, FleetSpec, FleetStatusRecord, QueueMetrics, ScaleAction, StateStore,
    WorkerId, WorkerStatus,
};

use crate::lifecycle::FleetLifecycleManager;
use crate::worker::EphemeralWorker;

/// Which workers go first when scaling down.
///
/// Idle workers are always preferred over busy ones; this picks the order
/// within the idle set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDownSelection {
    OldestIdleFirst,
    YoungestIdleFirst,
}

/// Controller loop parameters, shared by every fleet.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Scale-down victim ordering.
    pub selection: ScaleDownSelection,
    /// Consecutive all-failed provisioning ticks before the fleet is
    /// reported degraded.
    pub degraded_after: u32,
    /// Rotate workers older than this (credential hygiene). None disables
    /// age-based rotation.
    pub rotate_after: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            selection: ScaleDownSelection::OldestIdleFirst,
            degraded_after: 3,
            rotate_after: None,
        }
    }
}

/// Operator requests routed to the tick-owning task, so the tracked set
/// keeps its single writer.
pub enum ControllerCommand {
    /// Scale to an explicit target, bypassing the policy's target
    /// computation but still respecting min/max clamps and cooldown.
    ScaleTo {
        target: u32,
        reply: oneshot::Sender<ScalingDecision>,
    },
    /// Destroy every tracked worker (used by disable-with-drain).
    Drain { reply: oneshot::Sender<usize> },
}

/// The control loop for one fleet.
pub struct FleetController {
    fleet: FleetSpec,
    observer: Arc<dyn QueueObserver>,
    lifecycle: Arc<FleetLifecycleManager>,
    store: StateStore,
    limiter: Arc<Semaphore>,
    config: ControllerConfig,
    workers: Vec<EphemeralWorker>,
    last_action_at: Option<u64>,
    last_metrics: Option<QueueMetrics>,
    consecutive_provision_failures: u32,
}

impl FleetController {
    pub fn new(
        fleet: FleetSpec,
        observer: Arc<dyn QueueObserver>,
        lifecycle: Arc<FleetLifecycleManager>,
        store: StateStore,
        limiter: Arc<Semaphore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            fleet,
            observer,
            lifecycle,
            store,
            limiter,
            config,
            workers: Vec::new(),
            last_action_at: None,
            last_metrics: None,
            consecutive_provision_failures: 0,
        }
    }

    /// Run the tick loop until shutdown.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControllerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            fleet_id = %self.fleet.id,
            interval_secs = self.config.tick_interval.as_secs(),
            "fleet controller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.tick().await;
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(ControllerCommand::ScaleTo { target, reply }) => {
                            let decision = self.manual_scale(target).await;
                            let _ = reply.send(decision);
                        }
                        Some(ControllerCommand::Drain { reply }) => {
                            let drained = self.drain_all().await;
                            let _ = reply.send(drained);
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.persist_snapshot(epoch_secs());
        info!(fleet_id = %self.fleet.id, "fleet controller stopped");
    }

    /// One pass of the control loop.
    pub(crate) async fn tick(&mut self) {
        let now = epoch_secs();

        let metrics = match self.observer.metrics(&self.fleet).await {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    fleet_id = %self.fleet.id,
                    error = %e,
                    "queue observation failed, skipping tick"
                );
                return;
            }
        };

        let current = self.active_count();
        let decision = decide(
            &metrics,
            current,
            &self.fleet.scaling,
            self.last_action_at,
            now,
        );
        debug!(
            fleet_id = %self.fleet.id,
            action = ?decision.action,
            target = decision.target,
            current,
            reason = %decision.reason,
            "tick decision"
        );

        match decision.action {
            ScaleAction::ScaleUp => {
                self.scale_up(decision.target - current).await;
                self.last_action_at = Some(now);
            }
            ScaleAction::ScaleDown => {
                let excess = (current - decision.target) as usize;
                let victims = self.select_victims(excess).await;
                self.destroy_batch(victims).await;
                self.last_action_at = Some(now);
            }
            ScaleAction::Maintain => {}
        }

        self.sweep_health().await;
        self.persist_decision(&decision, metrics.pending, now);
        self.persist_snapshot(now);
        self.last_metrics = Some(metrics);
    }

    /// Scale to an operator-requested target.
    pub(crate) async fn manual_scale(&mut self, requested: u32) -> ScalingDecision {
        let now = epoch_secs();
        let scaling = &self.fleet.scaling;
        let current = self.active_count();

        if let Some(last) = self.last_action_at {
            let elapsed = now.saturating_sub(last);
            if elapsed < scaling.cooldown_seconds {
                let remaining = scaling.cooldown_seconds - elapsed;
                let decision = ScalingDecision {
                    action: ScaleAction::Maintain,
                    target: current,
                    current,
                    reason: format!("cooldown active for another {remaining}s"),
                };
                self.persist_decision(&decision, self.last_pending(), now);
                return decision;
            }
        }

        let target = requested.clamp(scaling.min_runners, scaling.max_runners);
        let decision = if target == current {
            ScalingDecision {
                action: ScaleAction::Maintain,
                target,
                current,
                reason: format!("already at {target} runners"),
            }
        } else if target > current {
            ScalingDecision {
                action: ScaleAction::ScaleUp,
                target,
                current,
                reason: format!("manual scale to {target}"),
            }
        } else {
            ScalingDecision {
                action: ScaleAction::ScaleDown,
                target,
                current,
                reason: format!("manual scale to {target}"),
            }
        };

        match decision.action {
            ScaleAction::ScaleUp => {
                self.scale_up(target - current).await;
                self.last_action_at = Some(now);
            }
            ScaleAction::ScaleDown => {
                let victims = self.select_victims((current - target) as usize).await;
                self.destroy_batch(victims).await;
                self.last_action_at = Some(now);
            }
            ScaleAction::Maintain => {}
        }

        self.persist_decision(&decision, self.last_pending(), now);
        self.persist_snapshot(now);
        decision
    }

    /// Destroy every tracked worker. Returns how many were drained.
    pub(crate) async fn drain_all(&mut self) -> usize {
        let victims: Vec<_> = self.workers.drain(..).collect();
        let drained = victims.len();
        info!(fleet_id = %self.fleet.id, drained, "draining fleet");
        self.destroy_batch(victims).await;
        self.persist_snapshot(epoch_secs());
        drained
    }

    /// Dispatch `count` concurrent provisions through the global limiter.
    /// Each success joins the tracked set as it completes; failures are
    /// independent per-worker outcomes.
    async fn scale_up(&mut self, count: u32) {
        if count == 0 {
            return;
        }
        debug!(fleet_id = %self.fleet.id, count, "dispatching provisions");

        let mut set = JoinSet::new();
        for _ in 0..count {
            let lifecycle = self.lifecycle.clone();
            let limiter = self.limiter.clone();
            let fleet = self.fleet.clone();
            set.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                lifecycle.provision(&fleet).await
            });
        }

        let mut successes = 0u32;
        let mut failures = 0u32;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(worker)) => {
                    if let Err(e) = self.store.put_worker(&worker.record(epoch_secs())) {
                        warn!(fleet_id = %self.fleet.id, error = %e, "failed to persist worker record");
                    }
                    self.workers.push(worker);
                    successes += 1;
                }
                Ok(Err(e)) => {
                    warn!(fleet_id = %self.fleet.id, error = %e, "provisioning failed");
                    failures += 1;
                }
                Err(e) => {
                    warn!(fleet_id = %self.fleet.id, error = %e, "provisioning task failed");
                    failures += 1;
                }
            }
        }

        if successes == 0 && failures > 0 {
            self.consecutive_provision_failures += 1;
            if self.consecutive_provision_failures == self.config.degraded_after {
                warn!(
                    fleet_id = %self.fleet.id,
                    ticks = self.consecutive_provision_failures,
                    "fleet degraded: every provisioning attempt is failing"
                );
            }
        } else if successes > 0 {
            self.consecutive_provision_failures = 0;
        }
    }

    /// Pick `count` workers to destroy: known-idle before unknown before
    /// busy, ordered within each class by the configured selection. The
    /// victims leave the tracked set here.
    async fn select_victims(&mut self, count: usize) -> Vec<EphemeralWorker> {
        let mut ranked: Vec<(u8, u64, WorkerId)> = Vec::new();
        for worker in &self.workers {
            let class = match self.lifecycle.probe(&self.fleet, worker).await {
                Ok(info) if !info.busy => 0u8,
                Err(_) => 1,
                Ok(_) => 2,
            };
            ranked.push((class, worker.created_at, worker.id.clone()));
        }

        let selection = self.config.selection;
        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0).then_with(|| match selection {
                ScaleDownSelection::OldestIdleFirst => a.1.cmp(&b.1),
                ScaleDownSelection::YoungestIdleFirst => b.1.cmp(&a.1),
            })
        });

        let chosen: HashSet<WorkerId> = ranked.into_iter().take(count).map(|r| r.2).collect();
        self.take_workers(&chosen)
    }

    /// Destroy a batch with bounded concurrency. Every victim is already
    /// out of the tracked set; an individual failure is logged and the
    /// worker's record is removed regardless.
    async fn destroy_batch(&mut self, victims: Vec<EphemeralWorker>) {
        if victims.is_empty() {
            return;
        }

        let mut set = JoinSet::new();
        for mut worker in victims {
            let lifecycle = self.lifecycle.clone();
            let limiter = self.limiter.clone();
            let fleet = self.fleet.clone();
            set.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let result = lifecycle.destroy(&fleet, &mut worker).await;
                (worker, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((worker, result)) => {
                    if let Err(e) = result {
                        warn!(
                            fleet_id = %self.fleet.id,
                            worker_id = %worker.id,
                            error = %e,
                            "destroy reported an error, worker removed from tracking"
                        );
                    }
                    let _ = self.store.delete_worker(&self.fleet.id, &worker.id);
                }
                Err(e) => {
                    warn!(fleet_id = %self.fleet.id, error = %e, "destroy task failed");
                }
            }
        }
    }

    /// Probe active workers: update busy flags, retire workers that are
    /// offline, vanished, or done with their one job, and rotate workers
    /// past the configured age.
    async fn sweep_health(&mut self) {
        let now = epoch_secs();
        let mut retire: Vec<WorkerId> = Vec::new();
        let mut rotate: Vec<WorkerId> = Vec::new();

        for i in 0..self.workers.len() {
            let (probe_result, id, created_at) = {
                let worker = &self.workers[i];
                if worker.status != WorkerStatus::Active {
                    continue;
                }
                (
                    self.lifecycle.probe(&self.fleet, worker).await,
                    worker.id.clone(),
                    worker.created_at,
                )
            };

            let worker = &mut self.workers[i];
            match probe_result {
                Ok(info) => {
                    if worker.busy && !info.busy {
                        worker.jobs_completed += 1;
                    }
                    worker.busy = info.busy;

                    if !info.online {
                        debug!(fleet_id = %self.fleet.id, worker_id = %id, "worker offline, retiring");
                        retire.push(id);
                    } else if worker.jobs_completed >= 1 {
                        // Ephemeral contract: one job, then drain.
                        debug!(fleet_id = %self.fleet.id, worker_id = %id, "worker finished its job, retiring");
                        retire.push(id);
                    } else if let Some(max_age) = self.config.rotate_after
                        && now.saturating_sub(created_at) >= max_age.as_secs()
                    {
                        rotate.push(id);
                    }
                }
                Err(StatusError::NotFound(_)) => {
                    // The ephemeral runner finished and removed itself;
                    // clean up the instance left behind.
                    if worker.busy {
                        worker.jobs_completed += 1;
                    }
                    debug!(fleet_id = %self.fleet.id, worker_id = %id, "runner gone from provider, retiring");
                    retire.push(id);
                }
                Err(e) => {
                    debug!(
                        fleet_id = %self.fleet.id,
                        worker_id = %id,
                        error = %e,
                        "status probe failed, leaving worker alone"
                    );
                }
            }
        }

        if !retire.is_empty() {
            let chosen: HashSet<WorkerId> = retire.into_iter().collect();
            let victims = self.take_workers(&chosen);
            self.destroy_batch(victims).await;
        }
        for id in rotate {
            self.rotate_worker(id).await;
        }
    }

    /// Rotate one worker: replacement reaches active before the old worker
    /// is destroyed; on failure the old worker stays in the tracked set.
    async fn rotate_worker(&mut self, id: WorkerId) {
        let Some(pos) = self.workers.iter().position(|w| w.id == id) else {
            return;
        };
        let mut old = self.workers.remove(pos);

        let permit = self.limiter.clone().acquire_owned().await.ok();
        let result = self.lifecycle.rotate(&self.fleet, &mut old).await;
        drop(permit);

        match result {
            Ok(replacement) => {
                info!(
                    fleet_id = %self.fleet.id,
                    old_worker = %old.id,
                    new_worker = %replacement.id,
                    "worker rotated"
                );
                let _ = self.store.delete_worker(&self.fleet.id, &old.id);
                self.workers.push(replacement);
            }
            Err(e) => {
                warn!(
                    fleet_id = %self.fleet.id,
                    worker_id = %old.id,
                    error = %e,
                    "rotation failed, keeping old worker"
                );
                self.workers.push(old);
            }
        }
    }

    fn take_workers(&mut self, ids: &HashSet<WorkerId>) -> Vec<EphemeralWorker> {
        let mut victims = Vec::new();
        let mut kept = Vec::new();
        for worker in self.workers.drain(..) {
            if ids.contains(&worker.id) {
                victims.push(worker);
            } else {
                kept.push(worker);
            }
        }
        self.workers = kept;
        victims
    }

    fn active_count(&self) -> u32 {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Active)
            .count() as u32
    }

    fn last_pending(&self) -> u64 {
        self.last_metrics.as_ref().map(|m| m.pending).unwrap_or(0)
    }

    fn persist_decision(&self, decision: &ScalingDecision, pending: u64, now: u64) {
        let record = DecisionRecord {
            fleet_id: self.fleet.id.clone(),
            action: decision.action,
            target: decision.target,
            current: decision.current,
            reason: decision.reason.clone(),
            pending_jobs: pending,
            decided_at: now,
        };
        if let Err(e) = self.store.put_decision(&record) {
            warn!(fleet_id = %self.fleet.id, error = %e, "failed to persist decision");
        }
    }

    fn persist_snapshot(&self, now: u64) {
        let status = FleetStatusRecord {
            fleet_id: self.fleet.id.clone(),
            tracked_workers: self.workers.len() as u32,
            active_workers: self.active_count(),
            degraded: self.consecutive_provision_failures >= self.config.degraded_after,
            consecutive_provision_failures: self.consecutive_provision_failures,
            last_action_at: self.last_action_at,
            updated_at: now,
        };
        if let Err(e) = self.store.put_fleet_status(&status) {
            warn!(fleet_id = %self.fleet.id, error = %e, "failed to persist fleet status");
        }
        for worker in &self.workers {
            if let Err(e) = self.store.put_worker(&worker.record(now)) {
                warn!(fleet_id = %self.fleet.id, error = %e, "failed to persist worker record");
            }
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
