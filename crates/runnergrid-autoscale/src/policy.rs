//! The scaling decision function.

use tracing::debug;

use runnergrid_state::{QueueMetrics, ScaleAction, ScalingConfig};

/// Output of one policy evaluation. Produced and consumed within a single
/// tick; the controller persists a record of it for the status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingDecision {
    pub action: ScaleAction,
    pub target: u32,
    pub current: u32,
    pub reason: String,
}

impl ScalingDecision {
    fn maintain(current: u32, reason: String) -> Self {
        Self {
            action: ScaleAction::Maintain,
            target: current,
            current,
            reason,
        }
    }
}

/// Decide the scaling action for one fleet.
///
/// `current` is the number of workers that have actually reached active;
/// `last_action_at` is the unix time of the last scale-up or scale-down
/// (never a maintain). Deterministic: the caller supplies `now`.
pub fn decide(
    metrics: &QueueMetrics,
    current: u32,
    config: &ScalingConfig,
    last_action_at: Option<u64>,
    now: u64,
) -> ScalingDecision {
    if let Some(last) = last_action_at {
        let elapsed = now.saturating_sub(last);
        if elapsed < config.cooldown_seconds {
            let remaining = config.cooldown_seconds - elapsed;
            return ScalingDecision::maintain(
                current,
                format!("cooldown active for another {remaining}s"),
            );
        }
    }

    // jobs_per_runner > 0 is enforced at enable time.
    let raw = metrics.pending.div_ceil(config.jobs_per_runner as u64);
    let raw = u32::try_from(raw).unwrap_or(u32::MAX);
    let target = raw.clamp(config.min_runners, config.max_runners);

    let decision = if target == current {
        ScalingDecision::maintain(
            current,
            format!("at target ({target} runners for {} pending jobs)", metrics.pending),
        )
    } else if target > current + config.scale_up_threshold {
        ScalingDecision {
            action: ScaleAction::ScaleUp,
            target,
            current,
            reason: format!(
                "queue demands {target} runners ({} pending, {} per runner)",
                metrics.pending, config.jobs_per_runner
            ),
        }
    } else if current > config.scale_down_threshold
        && target < current - config.scale_down_threshold
    {
        ScalingDecision {
            action: ScaleAction::ScaleDown,
            target,
            current,
            reason: format!(
                "queue satisfied by {target} runners ({} pending, {} per runner)",
                metrics.pending, config.jobs_per_runner
            ),
        }
    } else {
        ScalingDecision::maintain(
            current,
            format!("target {target} within threshold band of {current}"),
        )
    };

    debug!(
        fleet_id = %metrics.fleet_id,
        action = ?decision.action,
        target = decision.target,
        current,
        "scaling decision"
    );
    decision
}
