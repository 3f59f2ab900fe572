//! Recording fakes for the registry, compute provider, and queue observer.
//!
//! Each fake appends to an event log so tests can assert ordering (e.g.
//! rotation registers the replacement before deregistering the old worker)
//! and counts (e.g. compensation destroys the instance exactly once).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use runnergrid_compute::{
    CommandResult, ComputeError, ComputeHandle, ComputeProvider, ComputeResult, ComputeSpec,
};
use runnergrid_provider::{
    DeregisterError, QueueError, QueueObserver, RegisterError, RegisteredRunner,
    RegistrationToken, RunnerInfo, RunnerRegistry, StatusError, TokenError,
};
use runnergrid_state::{FleetSpec, QueueMetrics, ScalingConfig};

pub(crate) fn test_fleet() -> FleetSpec {
    FleetSpec {
        id: "linux-x64".to_string(),
        repo: "acme/widgets".to_string(),
        labels: vec!["self-hosted".to_string(), "linux".to_string()],
        runner_group: None,
        scaling: ScalingConfig {
            min_runners: 0,
            max_runners: 10,
            jobs_per_runner: 1,
            scale_up_threshold: 0,
            scale_down_threshold: 0,
            cooldown_seconds: 0,
        },
        enabled: true,
        created_at: 1000,
        updated_at: 1000,
    }
}

// ── Registry fake ─────────────────────────────────────────────────

struct RunnerSlot {
    online: bool,
    busy: bool,
}

#[derive(Default)]
struct RegistryInner {
    events: Vec<String>,
    runners: HashMap<String, RunnerSlot>,
    next_id: u64,
    fail_token: bool,
    fail_register: bool,
    fail_deregister: bool,
    fail_status: bool,
    never_online: bool,
}

/// In-memory provider registry that records every mutating call.
#[derive(Default)]
pub(crate) struct RecordingRegistry {
    inner: Mutex<RegistryInner>,
}

impl RecordingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub(crate) fn events_clear(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    pub(crate) fn fail_token(&self) {
        self.inner.lock().unwrap().fail_token = true;
    }

    pub(crate) fn fail_register(&self) {
        self.inner.lock().unwrap().fail_register = true;
    }

    pub(crate) fn fail_deregister(&self) {
        self.inner.lock().unwrap().fail_deregister = true;
    }

    pub(crate) fn fail_status(&self) {
        self.inner.lock().unwrap().fail_status = true;
    }

    /// Newly registered runners stay offline (for activation-timeout tests).
    pub(crate) fn set_never_online(&self, never: bool) {
        self.inner.lock().unwrap().never_online = never;
    }

    pub(crate) fn set_online(&self, runner_id: &str, online: bool) {
        if let Some(slot) = self.inner.lock().unwrap().runners.get_mut(runner_id) {
            slot.online = online;
        }
    }

    pub(crate) fn set_busy(&self, runner_id: &str, busy: bool) {
        if let Some(slot) = self.inner.lock().unwrap().runners.get_mut(runner_id) {
            slot.busy = busy;
        }
    }

    /// Simulate an ephemeral runner that finished its job and vanished.
    pub(crate) fn remove_runner(&self, runner_id: &str) {
        self.inner.lock().unwrap().runners.remove(runner_id);
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.inner.lock().unwrap().runners.len()
    }
}

#[async_trait]
impl RunnerRegistry for RecordingRegistry {
    async fn registration_token(
        &self,
        _fleet: &FleetSpec,
    ) -> Result<RegistrationToken, TokenError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push("token".to_string());
        if inner.fail_token {
            return Err(TokenError::Unavailable("induced token failure".to_string()));
        }
        Ok(RegistrationToken::new("REG".to_string(), u64::MAX))
    }

    async fn register(
        &self,
        _handle: &ComputeHandle,
        _fleet: &FleetSpec,
        name: &str,
        _token: RegistrationToken,
    ) -> Result<RegisteredRunner, RegisterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(format!("register:{name}"));
        if inner.fail_register {
            return Err(RegisterError::Rejected(
                "induced registration failure".to_string(),
            ));
        }
        inner.next_id += 1;
        let id = inner.next_id.to_string();
        let online = !inner.never_online;
        inner.runners.insert(id.clone(), RunnerSlot { online, busy: false });
        Ok(RegisteredRunner {
            id,
            name: name.to_string(),
        })
    }

    async fn deregister(
        &self,
        _fleet: &FleetSpec,
        runner_id: &str,
    ) -> Result<(), DeregisterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(format!("deregister:{runner_id}"));
        if inner.fail_deregister {
            return Err(DeregisterError::Rejected(
                "induced deregistration failure".to_string(),
            ));
        }
        // Unknown ids succeed silently, like the real provider.
        inner.runners.remove(runner_id);
        Ok(())
    }

    async fn status(&self, _fleet: &FleetSpec, runner_id: &str) -> Result<RunnerInfo, StatusError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_status {
            return Err(StatusError::Unavailable(
                "induced status failure".to_string(),
            ));
        }
        match inner.runners.get(runner_id) {
            Some(slot) => Ok(RunnerInfo {
                id: runner_id.to_string(),
                name: format!("runner-{runner_id}"),
                online: slot.online,
                busy: slot.busy,
                labels: Vec::new(),
            }),
            None => Err(StatusError::NotFound(runner_id.to_string())),
        }
    }
}

// ── Compute fake ──────────────────────────────────────────────────

#[derive(Default)]
struct ComputeInner {
    events: Vec<String>,
    live: HashMap<String, ()>,
    fail_provision: bool,
    provision_failures_remaining: u32,
}

/// In-memory compute provider that records calls and tracks concurrency.
#[derive(Default)]
pub(crate) struct RecordingCompute {
    inner: Mutex<ComputeInner>,
    seq: AtomicU64,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    provision_delay: Mutex<Duration>,
}

impl RecordingCompute {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub(crate) fn events_clear(&self) {
        self.inner.lock().unwrap().events.clear();
    }

    pub(crate) fn live_instances(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    /// Toggle permanent provisioning failure.
    pub(crate) fn set_fail_provision(&self, fail: bool) {
        self.inner.lock().unwrap().fail_provision = fail;
    }

    /// The next `n` provisions fail, then provisioning recovers.
    pub(crate) fn fail_next_provisions(&self, n: u32) {
        self.inner.lock().unwrap().provision_failures_remaining = n;
    }

    /// Slow provisioning down so concurrent calls overlap measurably.
    pub(crate) fn set_provision_delay(&self, delay: Duration) {
        *self.provision_delay.lock().unwrap() = delay;
    }

    /// Highest number of provisions observed in flight at once.
    pub(crate) fn max_concurrent_provisions(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeProvider for RecordingCompute {
    async fn provision(&self, _spec: &ComputeSpec) -> ComputeResult<ComputeHandle> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.provision_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push("provision".to_string());
            if inner.fail_provision {
                Err(ComputeError::Provision("induced failure".to_string()))
            } else if inner.provision_failures_remaining > 0 {
                inner.provision_failures_remaining -= 1;
                Err(ComputeError::Provision("induced transient failure".to_string()))
            } else {
                let n = self.seq.fetch_add(1, Ordering::Relaxed);
                let handle = ComputeHandle {
                    id: format!("i-{n}"),
                    address: format!("10.0.0.{}:22", n % 250),
                };
                inner.live.insert(handle.id.clone(), ());
                Ok(handle)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn destroy(&self, handle: &ComputeHandle) -> ComputeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(format!("destroy:{}", handle.id));
        inner.live.remove(&handle.id);
        Ok(())
    }

    async fn run_command(
        &self,
        _handle: &ComputeHandle,
        _script: &str,
    ) -> ComputeResult<CommandResult> {
        Ok(CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

// ── Queue fake ────────────────────────────────────────────────────

/// Queue observer returning a configurable pending count, or failing.
#[derive(Default)]
pub(crate) struct StubQueue {
    pending: AtomicU64,
    fail: AtomicBool,
}

impl StubQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_pending(&self, pending: u64) {
        self.pending.store(pending, Ordering::SeqCst);
    }

    pub(crate) fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueObserver for StubQueue {
    async fn metrics(&self, fleet: &FleetSpec) -> Result<QueueMetrics, QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::Transport("induced queue failure".to_string()));
        }
        let pending = self.pending.load(Ordering::SeqCst);
        Ok(QueueMetrics {
            fleet_id: fleet.id.clone(),
            pending,
            in_progress: 0,
            queued: 0,
            total: pending,
            observed_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}
