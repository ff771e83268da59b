//! Exposure info broadcast from the tracker to its sensors.
//!
//! An exposure is one synchronised LED flash + camera shutter, identified
//! by a monotonically increasing count. The tracker snapshots every
//! device's fused pose and delay-slot assignment at the moment the
//! exposure is registered; sensors bind that snapshot to the frame being
//! captured so analysis can run against capture-time state.

use nalgebra::Vector3;

use crate::geometry::Pose;

/// Most devices a tracker will ever carry (HMD plus two controllers).
pub const MAX_TRACKED_DEVICES: usize = 3;

/// Number of Kalman delay slots per device.
pub const NUM_POSE_DELAY_SLOTS: usize = 3;

/// Sentinel for "no delay slot assigned".
pub const NO_FUSION_SLOT: i32 = -1;

/// Per-device snapshot taken when an exposure is registered.
#[derive(Debug, Clone, Copy)]
pub struct DeviceExposureInfo {
    /// Device clock at the exposure, nanoseconds.
    pub device_time_ns: u64,
    /// Fused model pose at the exposure.
    pub capture_pose: Pose,
    /// Positional standard deviation per axis, metres.
    pub pos_error: Vector3<f64>,
    /// Rotational standard deviation per axis, radians.
    pub rot_error: Vector3<f64>,
    /// Delay slot assigned to this exposure, or [`NO_FUSION_SLOT`].
    pub fusion_slot: i32,
}

impl Default for DeviceExposureInfo {
    fn default() -> Self {
        Self {
            device_time_ns: 0,
            capture_pose: Pose::identity(),
            pos_error: Vector3::zeros(),
            rot_error: Vector3::zeros(),
            fusion_slot: NO_FUSION_SLOT,
        }
    }
}

impl DeviceExposureInfo {
    /// Gravity-vector uncertainty: the rotation error in the horizontal
    /// (XZ) plane, radians.
    pub fn gravity_error_rad(&self) -> f64 {
        (self.rot_error.x * self.rot_error.x + self.rot_error.z * self.rot_error.z).sqrt()
    }
}

/// Tracker-wide exposure snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExposureInfo {
    /// Local timestamp at which the exposure was registered, nanoseconds.
    pub local_ts: u64,
    /// HMD clock at the triggering IMU report, microseconds.
    pub hmd_ts: u32,
    /// Monotonic exposure counter.
    pub count: u16,
    /// Blink-pattern phase the LEDs carried during this exposure.
    pub led_pattern_phase: u8,
    /// Devices known when the exposure began; later additions get no
    /// retroactive entry.
    pub n_devices: usize,
    pub devices: [DeviceExposureInfo; MAX_TRACKED_DEVICES],
}

impl ExposureInfo {
    /// The entry for device `index`, if the device existed at exposure
    /// time.
    pub fn device(&self, index: usize) -> Option<&DeviceExposureInfo> {
        (index < self.n_devices).then(|| &self.devices[index])
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut DeviceExposureInfo> {
        (index < self.n_devices).then(|| &mut self.devices[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gravity_error_uses_xz_components() {
        let info = DeviceExposureInfo {
            rot_error: Vector3::new(3.0, 100.0, 4.0),
            ..Default::default()
        };
        assert_relative_eq!(info.gravity_error_rad(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn device_accessor_respects_capture_time_count() {
        let mut info = ExposureInfo {
            n_devices: 1,
            ..Default::default()
        };
        info.devices[0].device_time_ns = 42;

        assert!(info.device(0).is_some());
        assert!(info.device(1).is_none());
        assert!(info.device_mut(2).is_none());
    }
}
