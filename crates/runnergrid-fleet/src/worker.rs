//! The live ephemeral worker owned by a fleet's tick loop.

use runnergrid_compute::ComputeHandle;
use runnergrid_state::{FleetId, RunnerId, WorkerId, WorkerRecord, WorkerStatus};

/// A compute instance plus (once known) its runner registration.
///
/// The two halves share one fate: neither may outlive the other beyond the
/// duration of a single compensating cleanup. Owned by the lifecycle
/// manager / controller; the persisted view is [`WorkerRecord`].
#[derive(Debug, Clone)]
pub struct EphemeralWorker {
    pub id: WorkerId,
    pub fleet_id: FleetId,
    pub handle: ComputeHandle,
    pub runner_id: Option<RunnerId>,
    pub runner_name: String,
    pub status: WorkerStatus,
    /// Jobs completed so far. The ephemeral contract allows exactly one.
    pub jobs_completed: u32,
    /// Busy flag from the most recent status probe.
    pub busy: bool,
    pub created_at: u64,
}

impl EphemeralWorker {
    /// Snapshot for the state store.
    pub fn record(&self, now: u64) -> WorkerRecord {
        WorkerRecord {
            id: self.id.clone(),
            fleet_id: self.fleet_id.clone(),
            runner_id: self.runner_id.clone(),
            runner_name: self.runner_name.clone(),
            instance_id: self.handle.id.clone(),
            status: self.status,
            jobs_completed: self.jobs_completed,
            created_at: self.created_at,
            updated_at: now,
        }
    }
}
