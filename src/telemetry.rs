//! Typed telemetry events.
//!
//! Every noteworthy tracking event (exposures, frame lifecycle, pose
//! observations, batched IMU samples) is mirrored onto an optional
//! crossbeam channel so an external consumer can record or inspect the
//! run. With no consumer attached, sending is a no-op.

use nalgebra::Vector3;

use crate::geometry::Pose;

#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// One inertial sample, flushed from a device's pending buffer.
    Imu {
        device: u8,
        local_ts: u64,
        device_ts: u64,
        dt: f32,
        ang_vel: Vector3<f64>,
        accel: Vector3<f64>,
        mag: Vector3<f64>,
    },
    /// A new exposure was registered for a device.
    Exposure {
        device: u8,
        local_ts: u64,
        hmd_ts: u32,
        exposure_hmd_ts: u32,
        count: u16,
        device_ts: u64,
        delay_slot: i32,
    },
    /// A sensor announced the start of a frame capture.
    FrameStart {
        device: u8,
        local_ts: u64,
        source: String,
    },
    /// A sensor finished capturing a frame.
    FrameCaptured {
        device: u8,
        local_ts: u64,
        frame_start_local_ts: u64,
        source: String,
    },
    /// A frame finished its pipeline pass and was returned to the pool.
    FrameRelease {
        device: u8,
        local_ts: u64,
        frame_local_ts: u64,
        source: String,
    },
    /// A camera pose observation reached the device, whether or not a
    /// delay slot was still available to apply it to the filter.
    PoseObservation {
        device: u8,
        local_ts: u64,
        frame_device_ts: u64,
        fusion_slot: i32,
        applied: bool,
        pose: Pose,
        source: String,
    },
}

/// Cheap cloneable sender handle; disabled unless a channel is attached.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySender {
    tx: Option<crossbeam_channel::Sender<TelemetryEvent>>,
}

impl TelemetrySender {
    /// A sender that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sender backed by an unbounded channel, plus the receiving end.
    pub fn channel() -> (Self, crossbeam_channel::Receiver<TelemetryEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn send(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.tx {
            // A gone receiver just means nobody is listening any more.
            let _ = tx.send(event);
        }
    }
}
