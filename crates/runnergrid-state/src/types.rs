//! Domain types for the RunnerGrid state store.
//!
//! These types represent the persisted state of runner fleets: the fleet
//! spec (identity + scaling policy), per-worker lifecycle records, the last
//! scaling decision, and a per-fleet status snapshot. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Unique identifier for a fleet (operator-chosen name).
pub type FleetId = String;

/// Locally assigned identifier for an ephemeral worker.
pub type WorkerId = String;

/// Provider-assigned identifier for a registered runner (opaque).
pub type RunnerId = String;

// ── Fleet ─────────────────────────────────────────────────────────

/// Specification for a runner fleet.
///
/// Identity fields are immutable after the fleet is enabled; `scaling` may
/// be updated by an operator between ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSpec {
    pub id: FleetId,
    /// Repository the fleet serves, `owner/name`.
    pub repo: String,
    /// Capability labels every worker in this fleet advertises. A job is
    /// only counted for this fleet if it requires all of these labels.
    pub labels: Vec<String>,
    /// Optional runner group the workers join on registration.
    pub runner_group: Option<String>,
    /// Scaling policy parameters.
    pub scaling: ScalingConfig,
    /// Whether the fleet's tick loop should be running.
    pub enabled: bool,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

/// Scaling policy parameters for a fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingConfig {
    /// Lower bound on fleet size (inclusive).
    pub min_runners: u32,
    /// Upper bound on fleet size (inclusive).
    pub max_runners: u32,
    /// Target job:worker ratio used to compute the desired fleet size.
    pub jobs_per_runner: u32,
    /// Dead-band above the current count before a scale-up fires.
    pub scale_up_threshold: u32,
    /// Dead-band below the current count before a scale-down fires.
    pub scale_down_threshold: u32,
    /// Minimum seconds between two scaling actions for the same fleet.
    pub cooldown_seconds: u64,
}

impl FleetSpec {
    /// Validate the spec at enable time. Invalid configuration is rejected
    /// here, never discovered later in the tick loop.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.repo.is_empty() {
            return Err(ValidationError::EmptyRepo);
        }
        if self.labels.is_empty() {
            return Err(ValidationError::NoLabels);
        }
        self.scaling.validate()
    }
}

impl ScalingConfig {
    /// Validate the scaling parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jobs_per_runner == 0 {
            return Err(ValidationError::JobsPerRunnerZero);
        }
        if self.min_runners > self.max_runners {
            return Err(ValidationError::MinAboveMax {
                min: self.min_runners,
                max: self.max_runners,
            });
        }
        Ok(())
    }
}

// ── Workers ───────────────────────────────────────────────────────

/// Lifecycle status of an ephemeral worker.
///
/// `Provisioning` and `Registered` are transient startup states; `Active`
/// means the worker reports itself online; `Draining` means it is being
/// retired (job complete or rotation); `Destroyed` is terminal and removes
/// the worker from the fleet's tracked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Provisioning,
    Registered,
    Active,
    Draining,
    Destroyed,
}

/// Persisted snapshot of an ephemeral worker's state.
///
/// Written by the fleet's tick loop after each tick; read by the status
/// surface. The live worker (with its compute handle) is owned by the
/// lifecycle manager and never leaves the tick task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub fleet_id: FleetId,
    /// Provider-assigned runner id, known once registration completes.
    pub runner_id: Option<RunnerId>,
    /// Display name the runner registered under.
    pub runner_name: String,
    /// Compute instance id backing this worker.
    pub instance_id: String,
    pub status: WorkerStatus,
    /// Jobs this worker has completed (ephemeral contract: at most 1).
    pub jobs_completed: u32,
    /// Unix timestamp when the worker was provisioned.
    pub created_at: u64,
    /// Unix timestamp of last status change.
    pub updated_at: u64,
}

// ── Queue metrics ─────────────────────────────────────────────────

/// Point-in-time count of jobs matching a fleet's labels.
///
/// Created fresh each tick, never mutated, and discarded once the tick's
/// decision is made (the previous tick's metrics are kept only for
/// diagnostics).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMetrics {
    pub fleet_id: FleetId,
    /// Jobs waiting for a runner to pick them up.
    pub pending: u64,
    /// Jobs currently executing.
    pub in_progress: u64,
    /// Jobs accepted by the provider but not yet runnable.
    pub queued: u64,
    /// Total jobs matching the fleet's labels.
    pub total: u64,
    /// Unix timestamp when the queue was observed.
    pub observed_at: u64,
}

impl QueueMetrics {
    /// Whether there is any demand the fleet should react to.
    pub fn needs_scaling(&self) -> bool {
        self.pending > 0 || self.queued > 0
    }
}

// ── Decisions & status ────────────────────────────────────────────

/// The scaling action chosen by one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    Maintain,
}

/// Persisted record of the most recent scaling decision for a fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub fleet_id: FleetId,
    pub action: ScaleAction,
    pub target: u32,
    pub current: u32,
    pub reason: String,
    /// Pending jobs observed when the decision was made.
    pub pending_jobs: u64,
    pub decided_at: u64,
}

/// Per-fleet status snapshot for the operator surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetStatusRecord {
    pub fleet_id: FleetId,
    /// Workers in states provisioning/registered/active/draining.
    pub tracked_workers: u32,
    /// Workers confirmed active.
    pub active_workers: u32,
    /// True after several consecutive ticks in which every provisioning
    /// attempt failed. Operator-visible; never fatal to the controller.
    pub degraded: bool,
    pub consecutive_provision_failures: u32,
    /// Unix timestamp of the last scale-up or scale-down (not maintain).
    pub last_action_at: Option<u64>,
    pub updated_at: u64,
}

impl WorkerRecord {
    /// Build the composite key for the workers table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.fleet_id, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> FleetSpec {
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
                cooldown_seconds: 300,
            },
            enabled: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn zero_jobs_per_runner_rejected() {
        let mut s = spec();
        s.scaling.jobs_per_runner = 0;
        assert_eq!(s.validate(), Err(ValidationError::JobsPerRunnerZero));
    }

    #[test]
    fn min_above_max_rejected() {
        let mut s = spec();
        s.scaling.min_runners = 5;
        s.scaling.max_runners = 2;
        assert_eq!(
            s.validate(),
            Err(ValidationError::MinAboveMax { min: 5, max: 2 })
        );
    }

    #[test]
    fn empty_id_and_labels_rejected() {
        let mut s = spec();
        s.id.clear();
        assert_eq!(s.validate(), Err(ValidationError::EmptyId));

        let mut s = spec();
        s.labels.clear();
        assert_eq!(s.validate(), Err(ValidationError::NoLabels));
    }

    #[test]
    fn needs_scaling_on_pending_or_queued() {
        let mut m = QueueMetrics {
            fleet_id: "f".to_string(),
            pending: 0,
            in_progress: 2,
            queued: 0,
            total: 2,
            observed_at: 1000,
        };
        assert!(!m.needs_scaling());

        m.pending = 1;
        assert!(m.needs_scaling());

        m.pending = 0;
        m.queued = 3;
        assert!(m.needs_scaling());
    }
}
