//! Tracker configuration.

use serde::{Deserialize, Serialize};

/// How camera pose observations are fed into the fusion filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPolicy {
    /// Full pose observations (position + orientation).
    PoseUpdate,
    /// Position only; orientation comes purely from the IMU.
    PositionUpdate,
}

impl Default for ObservationPolicy {
    fn default() -> Self {
        ObservationPolicy::PoseUpdate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How accepted camera observations update the fusion filter.
    pub observation_policy: ObservationPolicy,

    /// How long position is carried forward without a camera observation
    /// before it is frozen in place.
    pub pose_lost_threshold_ms: u64,

    /// Window after a frame's USB start timestamp within which a
    /// late-arriving exposure may still be adopted by that frame.
    pub exposure_adoption_window_ms: u64,

    /// Capacity of the per-device pending IMU buffer flushed to telemetry.
    pub max_pending_imu_observations: usize,

    /// Position smoothing time constant of the output filter, seconds.
    pub output_filter_pos_tau_s: f64,

    /// Orientation smoothing time constant of the output filter, seconds.
    pub output_filter_orient_tau_s: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            observation_policy: ObservationPolicy::PoseUpdate,
            pose_lost_threshold_ms: 500,
            exposure_adoption_window_ms: 5,
            max_pending_imu_observations: 64,
            output_filter_pos_tau_s: 0.05,
            output_filter_orient_tau_s: 0.02,
        }
    }
}

impl TrackerConfig {
    pub(crate) fn pose_lost_threshold_ns(&self) -> u64 {
        self.pose_lost_threshold_ms * 1_000_000
    }

    pub(crate) fn exposure_adoption_window_ns(&self) -> u64 {
        self.exposure_adoption_window_ms * 1_000_000
    }
}
