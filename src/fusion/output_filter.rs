//! Exponential smoothing of the reported view pose.
//!
//! The raw fused pose carries observation jitter that is visible as
//! shimmer when rendered. The output filter smooths position with a
//! per-axis exponential filter whose strength adapts to how fast the pose
//! is moving (slow drift is smoothed hard, deliberate motion passes
//! through), and smooths orientation by slerping toward the target.

use nalgebra::Vector3;

use crate::geometry::Pose;

/// Position delta (metres) at which smoothing fully yields to the input.
const POS_FAST_MOTION_M: f64 = 0.020;

#[derive(Debug, Clone)]
pub struct OutputPoseFilter {
    /// Smoothing time constant for position, seconds.
    pos_tau_s: f64,
    /// Smoothing time constant for orientation, seconds.
    orient_tau_s: f64,
    last_ts_ns: u64,
    state: Option<Pose>,
}

impl OutputPoseFilter {
    pub fn new(pos_tau_s: f64, orient_tau_s: f64) -> Self {
        Self {
            pos_tau_s,
            orient_tau_s,
            last_ts_ns: 0,
            state: None,
        }
    }

    /// Forget the smoothing state; the next run reports the target as-is.
    pub fn reset(&mut self) {
        self.state = None;
        self.last_ts_ns = 0;
    }

    /// Advance the filter to `ts_ns` and smooth toward `target`.
    pub fn run(&mut self, ts_ns: u64, target: &Pose) -> Pose {
        let Some(prev) = self.state else {
            self.state = Some(*target);
            self.last_ts_ns = ts_ns;
            return *target;
        };

        let dt = (ts_ns.saturating_sub(self.last_ts_ns)) as f64 / 1e9;
        self.last_ts_ns = ts_ns;

        let delta = target.pos - prev.pos;
        let mut pos_alpha = 1.0 - (-dt / self.pos_tau_s).exp();
        // Let genuine motion through: scale the blend up as the step size
        // approaches the fast-motion threshold.
        let speed_boost = (delta.norm() / POS_FAST_MOTION_M).min(1.0);
        pos_alpha += (1.0 - pos_alpha) * speed_boost;

        let orient_alpha = 1.0 - (-dt / self.orient_tau_s).exp();

        let pos = prev.pos + delta * pos_alpha;
        let orient = prev
            .orient
            .try_slerp(&target.orient, orient_alpha, 1e-9)
            .unwrap_or(target.orient);

        let smoothed = Pose { orient, pos };
        self.state = Some(smoothed);
        smoothed
    }
}

impl Default for OutputPoseFilter {
    fn default() -> Self {
        // Tuned for 54 Hz observation cadence.
        Self::new(0.05, 0.02)
    }
}
