//! 6-DoF Kalman filter interface.
//!
//! The filter itself is an external collaborator; the tracker drives it
//! through these operations. Delayed camera observations are injected via
//! *delay slots*: the tracker asks the filter to prepare a slot at a
//! historical device time, then later feeds the matching observation into
//! that slot without replaying the whole state history.

use nalgebra::Vector3;

use crate::geometry::Pose;

/// Filter state queried at a device time.
#[derive(Debug, Clone, Copy)]
pub struct FilterPoseState {
    pub pose: Pose,
    /// Linear velocity, world frame, m/s.
    pub velocity: Vector3<f64>,
    /// Linear acceleration, world frame, m/s².
    pub acceleration: Vector3<f64>,
    /// Positional standard deviation per world axis, metres.
    pub pos_error: Vector3<f64>,
    /// Rotational standard deviation per world axis, radians.
    pub rot_error: Vector3<f64>,
}

impl Default for FilterPoseState {
    fn default() -> Self {
        Self {
            pose: Pose::identity(),
            velocity: Vector3::zeros(),
            acceleration: Vector3::zeros(),
            pos_error: Vector3::zeros(),
            rot_error: Vector3::zeros(),
        }
    }
}

/// The operations the tracker uses on a device's 6-DoF fusion filter.
///
/// An implementation must support [`crate::tracker::NUM_POSE_DELAY_SLOTS`]
/// concurrently prepared delay slots.
pub trait PoseFilter: Send {
    /// Feed one inertial sample at `device_time_ns`.
    fn imu_update(
        &mut self,
        device_time_ns: u64,
        ang_vel: &Vector3<f64>,
        accel: &Vector3<f64>,
        mag: &Vector3<f64>,
    );

    /// Anchor `slot_id` at `device_time_ns` so a delayed observation of
    /// that instant can be applied later.
    fn prepare_delay_slot(&mut self, device_time_ns: u64, slot_id: usize);

    /// Discard a prepared slot.
    fn release_delay_slot(&mut self, slot_id: usize);

    /// Apply a full pose observation through a prepared slot.
    fn pose_update(&mut self, device_time_ns: u64, pose: &Pose, slot_id: usize);

    /// Apply a position-only observation through a prepared slot.
    fn position_update(&mut self, device_time_ns: u64, pos: &Vector3<f64>, slot_id: usize);

    /// Query pose, derivatives and uncertainty at `device_time_ns`.
    fn get_pose_at(&mut self, device_time_ns: u64) -> FilterPoseState;
}
