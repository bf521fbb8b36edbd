//! Scaling policy — pure per-deployment decision logic.
//!
//! No clocks, no locks, no I/O: callers pass the observed average load and
//! the current time, and the policy returns whether the desired replica
//! count changes.

use steward_state::{AutoscalingConfig, Timestamp};
use tracing::{debug, warn};

/// A scaling decision for a single deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified replica count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Round half up: `2.5 → 3`, `2.49 → 2`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Replica count the load calls for before hysteresis: proportional raw
/// target, smoothed towards from `current_replicas`, then clamped.
pub fn proposed_replicas(config: &AutoscalingConfig, current_replicas: u32, avg_in_flight: f64) -> u32 {
    let current = f64::from(current_replicas);
    let raw = round_half_up(current * avg_in_flight / config.target_num_ongoing_requests_per_replica);
    let smoothed = round_half_up(current + config.smoothing_factor * (raw - current));
    smoothed.clamp(f64::from(config.min_replicas), f64::from(config.max_replicas)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingChange {
    direction: Direction,
    since: Timestamp,
}

/// Desired replica count of one deployment plus its hysteresis timer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentScaler {
    desired: u32,
    pending: Option<PendingChange>,
}

impl DeploymentScaler {
    pub fn new(config: &AutoscalingConfig) -> Self {
        Self {
            desired: config.initial_target(),
            pending: None,
        }
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    /// Apply new bounds: the desired count is clamped into them at once
    /// and any pending change is dropped.
    pub fn rebound(&mut self, config: &AutoscalingConfig) -> u32 {
        let bounded = config.clamp(self.desired);
        if bounded != self.desired {
            debug!(from = self.desired, to = bounded, "desired replicas clamped to new bounds");
            self.desired = bounded;
        }
        self.pending = None;
        self.desired
    }

    /// Run one control tick.
    ///
    /// `avg_in_flight` is `None` when no replica reported inside the
    /// look-back window; the desired count is then held and any pending
    /// change keeps its timer.
    pub fn decide(
        &mut self,
        config: &AutoscalingConfig,
        current_replicas: u32,
        avg_in_flight: Option<f64>,
        now: Timestamp,
    ) -> ScaleDecision {
        // Bounds may have moved under us through a config update.
        let bounded = config.clamp(self.desired);
        if bounded != self.desired {
            debug!(from = self.desired, to = bounded, "desired replicas clamped to new bounds");
            self.desired = bounded;
            self.pending = None;
            return ScaleDecision::ScaleTo(bounded);
        }

        let Some(avg) = avg_in_flight else {
            return ScaleDecision::NoChange;
        };
        if !avg.is_finite() || avg < 0.0 {
            warn!(avg, "ignoring invalid load average");
            return ScaleDecision::NoChange;
        }

        let proposal = proposed_replicas(config, current_replicas, avg);
        let direction = match proposal.cmp(&self.desired) {
            std::cmp::Ordering::Equal => {
                self.pending = None;
                return ScaleDecision::NoChange;
            }
            std::cmp::Ordering::Greater => Direction::Up,
            std::cmp::Ordering::Less => Direction::Down,
        };

        let since = match self.pending {
            Some(pending) if pending.direction == direction => pending.since,
            _ => now,
        };
        let delay = match direction {
            Direction::Up => config.upscale_delay_s,
            Direction::Down => config.downscale_delay_s,
        };

        if now - since >= delay {
            debug!(
                from = self.desired,
                to = proposal,
                avg,
                current_replicas,
                "scaling decision committed"
            );
            self.desired = proposal;
            self.pending = None;
            ScaleDecision::ScaleTo(proposal)
        } else {
            self.pending = Some(PendingChange { direction, since });
            ScaleDecision::NoChange
        }
    }
}
