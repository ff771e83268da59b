//! Per-device record: fusion filter, delay-slot bookkeeping, the device
//! clock, and the reported-pose output path.
//!
//! A delay slot is a pre-registered time point inside the fusion filter at
//! which a delayed camera observation can later be injected. Slots are
//! reference counted: each in-flight frame that might still produce an
//! observation for an exposure holds one claim on that exposure's slot.
//! When the last claim is released the slot is invalidated in the filter
//! and becomes free for a future exposure.

use nalgebra::Vector3;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::ObservationPolicy;
use crate::fusion::{OutputPoseFilter, PoseFilter};
use crate::geometry::Pose;
use crate::led::LedModel;
use crate::telemetry::{TelemetryEvent, TelemetrySender};

use super::exposure::{
    DeviceExposureInfo, ExposureInfo, NO_FUSION_SLOT, NUM_POSE_DELAY_SLOTS,
};

/// What a device is, fixed at construction. The HMD is special-cased in
/// three ways: its pose is mirrored between device axes and view-plane
/// axes, it may match against every blob during deep search, and it is
/// the bootstrap source for a sensor's camera pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Hmd,
    Controller,
}

impl DeviceKind {
    /// Device axes are mirrored in XZ relative to view-plane axes.
    pub fn mirrors_view_plane(self) -> bool {
        matches!(self, DeviceKind::Hmd)
    }

    /// Deep search may claim any blob, labelled or not.
    pub fn matches_all_blobs(self) -> bool {
        matches!(self, DeviceKind::Hmd)
    }

    /// A confident observation of this device may bootstrap a sensor's
    /// world-to-camera transform.
    pub fn bootstraps_camera_pose(self) -> bool {
        matches!(self, DeviceKind::Hmd)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DelaySlot {
    valid: bool,
    use_count: u32,
    device_time_ns: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingImu {
    local_ts: u64,
    device_ts: u64,
    dt: f32,
    ang_vel: Vector3<f64>,
    accel: Vector3<f64>,
    mag: Vector3<f64>,
}

struct DeviceState {
    filter: Box<dyn PoseFilter>,

    /// Round-robin cursor over the delay slots.
    delay_slot_index: usize,
    delay_slots: [DelaySlot; NUM_POSE_DELAY_SLOTS],

    /// Rigid transform from the fusion (IMU) pose to the LED model the
    /// cameras observe.
    fusion_to_model: Pose,

    /// Raw 32-bit microsecond device timestamp of the last IMU sample.
    last_device_ts: u32,
    /// Extended 64-bit nanosecond device clock.
    device_time_ns: u64,

    last_observed_pose_ts: u64,
    last_observed_pose: Pose,

    last_reported_pose_ts: u64,
    reported_pose: Pose,
    model_pose: Pose,
    output_filter: OutputPoseFilter,

    pending_imu: Vec<PendingImu>,
}

/// One tracked device (HMD or controller).
pub struct TrackedDevice {
    id: u8,
    kind: DeviceKind,
    /// Index of this device in the tracker's device array and in every
    /// exposure's per-device array.
    index: usize,
    leds: Arc<LedModel>,
    policy: ObservationPolicy,
    pose_lost_threshold_ns: u64,
    max_pending_imu: usize,
    telemetry: TelemetrySender,
    state: Mutex<DeviceState>,
}

impl TrackedDevice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u8,
        kind: DeviceKind,
        index: usize,
        fusion_to_model: Pose,
        leds: Arc<LedModel>,
        filter: Box<dyn PoseFilter>,
        policy: ObservationPolicy,
        pose_lost_threshold_ns: u64,
        max_pending_imu: usize,
        output_filter: OutputPoseFilter,
        telemetry: TelemetrySender,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            index,
            leds,
            policy,
            pose_lost_threshold_ns,
            max_pending_imu,
            telemetry,
            state: Mutex::new(DeviceState {
                filter,
                delay_slot_index: 0,
                delay_slots: [DelaySlot::default(); NUM_POSE_DELAY_SLOTS],
                fusion_to_model,
                last_device_ts: 0,
                device_time_ns: 0,
                last_observed_pose_ts: 0,
                last_observed_pose: Pose::identity(),
                last_reported_pose_ts: 0,
                reported_pose: Pose::identity(),
                model_pose: Pose::identity(),
                output_filter,
                pending_imu: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub fn leds(&self) -> &Arc<LedModel> {
        &self.leds
    }

    /// Feed one IMU sample. `device_ts` is the device's raw 32-bit
    /// microsecond counter; it is extended onto a 64-bit nanosecond
    /// timeline using wrapping subtraction so counter wrap is seamless.
    pub fn imu_update(
        &self,
        local_ts: u64,
        device_ts: u32,
        dt: f32,
        ang_vel: &Vector3<f64>,
        accel: &Vector3<f64>,
        mag: &Vector3<f64>,
    ) {
        let mut state = self.state.lock();

        if state.device_time_ns == 0 {
            state.device_time_ns = device_ts as u64 * 1000;
        } else {
            let dt_ns = device_ts.wrapping_sub(state.last_device_ts) as u64 * 1000;
            state.device_time_ns += dt_ns;
        }
        state.last_device_ts = device_ts;

        let now_ns = state.device_time_ns;
        state.filter.imu_update(now_ns, ang_vel, accel, mag);

        state.pending_imu.push(PendingImu {
            local_ts,
            device_ts: now_ns,
            dt,
            ang_vel: *ang_vel,
            accel: *accel,
            mag: *mag,
        });
        if state.pending_imu.len() >= self.max_pending_imu {
            // No camera observation for a while; flush from here.
            self.flush_pending_imu(&mut state);
        }
    }

    /// The smoothed pose reported to the caller, with velocity and
    /// acceleration. When no camera observation has arrived within the
    /// pose-lost threshold, position and velocity freeze at their last
    /// reported values while orientation keeps following the filter.
    pub fn get_view_pose(&self) -> (Pose, Vector3<f64>, Vector3<f64>) {
        let mut state = self.state.lock();
        let mut vel = Vector3::zeros();
        let mut accel = Vector3::zeros();

        if state.device_time_ns > state.last_reported_pose_ts {
            let now_ns = state.device_time_ns;
            let fused = state.filter.get_pose_at(now_ns);
            let mut pose = fused.pose;
            vel = fused.velocity;
            accel = fused.acceleration;

            if now_ns - state.last_observed_pose_ts >= self.pose_lost_threshold_ns {
                // Don't let the device move without a recent observation
                // of actual position.
                pose.pos = state.reported_pose.pos;
                vel = Vector3::zeros();
                accel = Vector3::zeros();
            }

            state.reported_pose = state.output_filter.run(now_ns, &pose);
            state.last_reported_pose_ts = now_ns;
        }

        (state.reported_pose, vel, accel)
    }

    /// The fused pose in model (LED constellation) coordinates, with the
    /// filter's positional and rotational uncertainty rotated into the
    /// device's current frame. Used to seed camera-frame priors.
    pub fn get_model_pose(&self) -> (Pose, Vector3<f64>, Vector3<f64>) {
        let mut state = self.state.lock();
        self.model_pose_locked(&mut state)
    }

    fn model_pose_locked(&self, state: &mut DeviceState) -> (Pose, Vector3<f64>, Vector3<f64>) {
        let now_ns = state.device_time_ns;
        let fused = state.filter.get_pose_at(now_ns);

        let mut global_pose = fused.pose;
        if self.kind.mirrors_view_plane() {
            // View-plane axes back to device axes.
            global_pose.mirror_xz();
        }

        let model_pose = state.fusion_to_model.compose(&global_pose);
        let pos_error = global_pose.orient * fused.pos_error;
        let rot_error = global_pose.orient * fused.rot_error;

        state.model_pose.orient = model_pose.orient;
        if now_ns - state.last_observed_pose_ts < self.pose_lost_threshold_ns {
            state.model_pose.pos = model_pose.pos;
        }

        (state.model_pose, pos_error, rot_error)
    }

    /// Accept a camera observation of the device's model pose.
    ///
    /// The pose is brought back into fusion coordinates, matched against
    /// the delay slot recorded for the frame's exposure, and injected into
    /// the filter through that slot. If the slot was never allocated or
    /// has since been overwritten the observation is dropped from the
    /// filter but still reported to telemetry.
    pub fn model_pose_update(
        &self,
        local_ts: u64,
        _frame_start_local_ts: u64,
        exposure_info: &ExposureInfo,
        mut pose: Pose,
        source: &str,
    ) {
        let mut state = self.state.lock();

        // Undo the IMU-to-model conversion.
        pose = state.fusion_to_model.inverse_compose(&pose);
        if self.kind.mirrors_view_plane() {
            pose.mirror_xz();
        }

        self.flush_pending_imu(&mut state);

        let mut frame_device_time_ns = 0;
        let mut fusion_slot = NO_FUSION_SLOT;
        let mut applied = false;

        if let Some(dev_info) = exposure_info.device(self.index) {
            frame_device_time_ns = dev_info.device_time_ns;

            if let Some(slot_no) = matching_delay_slot(&state, dev_info) {
                debug!(
                    "Pose update in delay slot {} for device {}, exposure ts {} (delay {:.3}s)",
                    slot_no,
                    self.id,
                    frame_device_time_ns,
                    (state.device_time_ns - frame_device_time_ns) as f64 / 1e9
                );
                fusion_slot = slot_no as i32;
                let now_ns = state.device_time_ns;
                match self.policy {
                    ObservationPolicy::PoseUpdate => {
                        state.filter.pose_update(now_ns, &pose, slot_no);
                    }
                    ObservationPolicy::PositionUpdate => {
                        state.filter.position_update(now_ns, &pose.pos, slot_no);
                    }
                }
                state.last_observed_pose_ts = now_ns;
                state.last_observed_pose = pose;
                applied = true;
            } else {
                debug!(
                    "Dropping pose observation for device {}: no delay slot for exposure ts {}",
                    self.id, frame_device_time_ns
                );
            }
        }

        self.telemetry.send(TelemetryEvent::PoseObservation {
            device: self.id,
            local_ts,
            frame_device_ts: frame_device_time_ns,
            fusion_slot,
            applied,
            pose,
            source: source.to_string(),
        });
    }

    /// Register a new exposure: snapshot the fused pose, pick a free
    /// delay slot round-robin and have the filter prepare it. With no
    /// free slot the exposure proceeds without fusion.
    ///
    /// Called with the tracker lock held.
    pub(crate) fn update_exposure(&self, dev_info: &mut DeviceExposureInfo) {
        let mut state = self.state.lock();

        dev_info.device_time_ns = state.device_time_ns;
        let (pose, pos_error, rot_error) = self.model_pose_locked(&mut state);
        dev_info.capture_pose = pose;
        dev_info.pos_error = pos_error;
        dev_info.rot_error = rot_error;

        if let Some(slot_no) = find_free_delay_slot(&mut state) {
            let slot = &mut state.delay_slots[slot_no];
            slot.device_time_ns = dev_info.device_time_ns;
            slot.valid = true;
            dev_info.fusion_slot = slot_no as i32;

            trace!(
                "Assigning free delay slot {} for device {}, ts {}",
                slot_no, self.id, dev_info.device_time_ns
            );
            let ts = dev_info.device_time_ns;
            state.filter.prepare_delay_slot(ts, slot_no);
        } else {
            warn!(
                "No free delay slot for device {}, ts {}",
                self.id, dev_info.device_time_ns
            );
            dev_info.fusion_slot = NO_FUSION_SLOT;
        }
    }

    /// A frame bound to this exposure started: claim the slot.
    pub(crate) fn on_frame_start(
        &self,
        local_ts: u64,
        dev_info: Option<&mut DeviceExposureInfo>,
        source: &str,
    ) {
        let mut state = self.state.lock();
        self.flush_pending_imu(&mut state);
        if let Some(dev_info) = dev_info {
            exposure_claim(&mut state, dev_info, self.id);
        }
        self.telemetry.send(TelemetryEvent::FrameStart {
            device: self.id,
            local_ts,
            source: source.to_string(),
        });
    }

    /// A frame bound to this exposure finished arriving.
    pub(crate) fn on_frame_captured(
        &self,
        local_ts: u64,
        frame_start_local_ts: u64,
        dev_info: Option<&DeviceExposureInfo>,
        source: &str,
    ) {
        let mut state = self.state.lock();
        if let Some(dev_info) = dev_info {
            trace!(
                "Frame captured - exposure ts {}, delay slot {} for device {}",
                dev_info.device_time_ns, dev_info.fusion_slot, self.id
            );
        }
        self.flush_pending_imu(&mut state);
        self.telemetry.send(TelemetryEvent::FrameCaptured {
            device: self.id,
            local_ts,
            frame_start_local_ts,
            source: source.to_string(),
        });
    }

    /// A frame finished its pipeline pass: release its claim.
    pub(crate) fn on_frame_release(
        &self,
        local_ts: u64,
        frame_local_ts: u64,
        dev_info: Option<&mut DeviceExposureInfo>,
        source: &str,
    ) {
        let mut state = self.state.lock();
        if let Some(dev_info) = dev_info {
            exposure_release(&mut state, dev_info, self.id);
        }
        self.flush_pending_imu(&mut state);
        self.telemetry.send(TelemetryEvent::FrameRelease {
            device: self.id,
            local_ts,
            frame_local_ts,
            source: source.to_string(),
        });
    }

    /// The exposure a frame is bound to changed mid-capture: release the
    /// old claim, take the new one.
    pub(crate) fn on_frame_changed_exposure(
        &self,
        old_info: Option<&mut DeviceExposureInfo>,
        new_info: Option<&mut DeviceExposureInfo>,
    ) {
        let mut state = self.state.lock();
        if let Some(old_info) = old_info {
            exposure_release(&mut state, old_info, self.id);
        }
        if let Some(new_info) = new_info {
            exposure_claim(&mut state, new_info, self.id);
        }
    }

    /// Release this device's claim on an exposure early, once its pose
    /// for the frame has been found and applied.
    pub fn frame_release_exposure(&self, exposure_info: &mut ExposureInfo) {
        let index = self.index;
        let mut state = self.state.lock();
        if let Some(dev_info) = exposure_info.device_mut(index) {
            exposure_release(&mut state, dev_info, self.id);
        }
    }

    /// Emit the telemetry event for this exposure's registration.
    pub(crate) fn send_exposure_telemetry(
        &self,
        local_ts: u64,
        hmd_ts: u32,
        exposure_hmd_ts: u32,
        count: u16,
        dev_info: &DeviceExposureInfo,
    ) {
        let mut state = self.state.lock();
        self.flush_pending_imu(&mut state);
        self.telemetry.send(TelemetryEvent::Exposure {
            device: self.id,
            local_ts,
            hmd_ts,
            exposure_hmd_ts,
            count,
            device_ts: dev_info.device_time_ns,
            delay_slot: dev_info.fusion_slot,
        });
    }

    fn flush_pending_imu(&self, state: &mut DeviceState) {
        if state.pending_imu.is_empty() {
            return;
        }
        if self.telemetry.is_enabled() {
            for obs in &state.pending_imu {
                self.telemetry.send(TelemetryEvent::Imu {
                    device: self.id,
                    local_ts: obs.local_ts,
                    device_ts: obs.device_ts,
                    dt: obs.dt,
                    ang_vel: obs.ang_vel,
                    accel: obs.accel,
                    mag: obs.mag,
                });
            }
        }
        state.pending_imu.clear();
    }

    /// Current extended device clock, nanoseconds.
    pub fn device_time_ns(&self) -> u64 {
        self.state.lock().device_time_ns
    }

    /// The last camera observation applied to the filter, with its
    /// device timestamp.
    pub fn last_observed_pose(&self) -> Option<(u64, Pose)> {
        let state = self.state.lock();
        (state.last_observed_pose_ts != 0).then(|| (state.last_observed_pose_ts, state.last_observed_pose))
    }
}

impl std::fmt::Debug for TrackedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedDevice")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .finish()
    }
}

/// Cycle through the delay slots from the round-robin cursor, returning
/// the first unclaimed one.
fn find_free_delay_slot(state: &mut DeviceState) -> Option<usize> {
    for _ in 0..NUM_POSE_DELAY_SLOTS {
        let slot_no = state.delay_slot_index;
        state.delay_slot_index = (slot_no + 1) % NUM_POSE_DELAY_SLOTS;

        if state.delay_slots[slot_no].use_count == 0 {
            return Some(slot_no);
        }
    }
    None
}

/// The slot recorded for `dev_info`, provided it is still anchored at the
/// same device time (a slot may have been re-prepared for a newer
/// exposure in the meantime).
fn matching_delay_slot(state: &DeviceState, dev_info: &DeviceExposureInfo) -> Option<usize> {
    if dev_info.fusion_slot == NO_FUSION_SLOT {
        return None;
    }
    let slot_no = dev_info.fusion_slot as usize;
    assert!(slot_no < NUM_POSE_DELAY_SLOTS);

    let slot = &state.delay_slots[slot_no];
    (slot.valid && slot.device_time_ns == dev_info.device_time_ns).then_some(slot_no)
}

fn exposure_claim(state: &mut DeviceState, dev_info: &mut DeviceExposureInfo, device_id: u8) {
    if let Some(slot_no) = matching_delay_slot(state, dev_info) {
        let slot = &mut state.delay_slots[slot_no];
        slot.use_count += 1;
        dev_info.fusion_slot = slot_no as i32;
        trace!(
            "Claimed delay slot {} for device {}, ts {}. use_count now {}",
            slot_no, device_id, dev_info.device_time_ns, slot.use_count
        );
    } else if dev_info.fusion_slot != NO_FUSION_SLOT {
        // The slot was never allocated, or was re-used by a later
        // exposure before this frame started.
        trace!(
            "Lost delay slot {} for device {}, ts {}",
            dev_info.fusion_slot, device_id, dev_info.device_time_ns
        );
        dev_info.fusion_slot = NO_FUSION_SLOT;
    }
}

fn exposure_release(state: &mut DeviceState, dev_info: &mut DeviceExposureInfo, device_id: u8) {
    if let Some(slot_no) = matching_delay_slot(state, dev_info) {
        let slot = &mut state.delay_slots[slot_no];
        if slot.use_count > 0 {
            slot.use_count -= 1;
            trace!(
                "Released delay slot {} for device {}, ts {}. use_count now {}",
                slot_no, device_id, dev_info.device_time_ns, slot.use_count
            );
        }

        if slot.use_count == 0 {
            slot.valid = false;
            state.filter.release_delay_slot(slot_no);
            trace!(
                "Invalidated delay slot {} for device {}, ts {}",
                slot_no, device_id, dev_info.device_time_ns
            );
        }

        // Clear the reference so the same info cannot release twice.
        dev_info.fusion_slot = NO_FUSION_SLOT;
    }
}
