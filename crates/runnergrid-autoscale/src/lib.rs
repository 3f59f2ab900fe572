//! runnergrid-autoscale — queue-driven fleet sizing.
//!
//! Pure decision logic: given queue metrics, the current fleet size, and the
//! fleet's `ScalingConfig`, emit a [`ScalingDecision`]. No I/O and no clock
//! reads — the caller passes `now`, so every decision is reproducible.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if now - last_action_at < cooldown_seconds:
//!     Maintain  // cooldown active
//!
//! target = ceil(pending_jobs / jobs_per_runner)
//! target = clamp(target, min_runners, max_runners)
//!
//! if target == current:                          Maintain
//! if target > current + scale_up_threshold:      ScaleUp(target)
//! if target < current - scale_down_threshold:    ScaleDown(target)
//! else:                                          Maintain
//! ```
//!
//! Threshold comparisons are strict, so a target exactly at the band's edge
//! maintains — the dead-band includes its boundary to prevent oscillation.

pub mod policy;

pub use policy::{decide, ScalingDecision};
