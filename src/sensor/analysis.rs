//! Correspondence driver: fast re-acquisition, the two-pass deep search,
//! pose adoption, and the camera-pose bootstrap.
//!
//! Fast analysis tries to confirm each device's fusion-predicted pose
//! against the frame's blobs, falling back to PnP over previously
//! labelled blobs. Devices that stay unresolved send the frame to deep
//! analysis, where the correspondence search runs in two passes so that a
//! confident device cannot silently hold blobs a later device needs.

use std::sync::Arc;

use nalgebra::Vector3;
use tracing::{debug, info, trace};

use crate::geometry::{swing_twist, Pose};
use crate::tracker::{ExposureInfo, TrackedDevice, NO_FUSION_SLOT};
use crate::vision::{BlobObservation, PosePrior, SearchFlags};

use super::context::SensorContext;
use super::frame::{CaptureFrame, FrameDeviceState};

/// Above this gravity uncertainty the aligned search path is not trusted.
const ALIGNED_SEARCH_MAX_GRAVITY_ERROR_RAD: f64 = 45.0 * std::f64::consts::PI / 180.0;

/// Floor for the aligned-search swing tolerance.
const ALIGNED_SEARCH_MIN_TOLERANCE_RAD: f64 = 10.0 * std::f64::consts::PI / 180.0;

/// Gravity uncertainty below which an HMD observation may bootstrap the
/// camera pose.
const BOOTSTRAP_MAX_GRAVITY_ERROR_RAD: f64 = 15.0 * std::f64::consts::PI / 180.0;

/// More labelled blobs than this allow PnP re-acquisition without a full
/// search.
const REACQUISITION_MIN_BLOBS: usize = 4;

impl SensorContext {
    /// Fast analysis: extract blobs, then try to re-acquire every device
    /// that holds a fusion slot for this exposure.
    pub(super) fn analyse_frame_fast(
        &self,
        frame: &mut CaptureFrame,
        devices: &[Arc<TrackedDevice>],
    ) {
        let now = self.clock.now_ns();
        debug!("Sensor {} Frame {} - starting fast analysis", self.id, frame.id);

        frame.need_long_analysis = false;
        frame.long_analysis_found_new_blobs = false;
        frame.long_analysis_start_ts = 0;
        frame.long_analysis_finish_ts = 0;
        frame.fast_analysis_start_ts = now;

        frame.bwobs = self.detector.lock().process(
            &frame.pixels,
            frame.width,
            frame.height,
            frame.exposure_info.led_pattern_phase,
        );
        frame.blob_extract_finish_ts = self.clock.now_ns();

        if frame
            .bwobs
            .as_ref()
            .is_some_and(|obs| !obs.blobs.is_empty())
        {
            self.process_blobs_fast(frame, devices);
        }

        frame.fast_analysis_finish_ts = self.clock.now_ns();
    }

    fn process_blobs_fast(&self, frame: &mut CaptureFrame, devices: &[Arc<TrackedDevice>]) {
        let CaptureFrame {
            id: frame_id,
            bwobs,
            capture_state,
            exposure_info,
            n_devices,
            need_long_analysis,
            start_ts,
            ..
        } = frame;
        let observation = bwobs.as_mut().expect("fast analysis without blobs");

        // Only process the devices that were available when this frame
        // was captured.
        for d in 0..(*n_devices).min(devices.len()) {
            let dev = &devices[d];
            let dev_state = &mut capture_state[d];
            let exp_dev_info = exposure_info.devices[d];

            if exp_dev_info.fusion_slot == NO_FUSION_SLOT {
                trace!(
                    "Skipping fast analysis of device {}. No fusion slot assigned",
                    dev.id()
                );
                continue;
            }

            let obj_world_pose = dev_state.capture_world_pose;

            // With a camera pose, re-express the fusion pose
            // (object→world) in the camera frame. Without one the
            // initial pose won't match anything and the deep search will
            // run a full search regardless, so the value doesn't matter.
            let (have_camera_pose, camera_pose) = self.camera_pose_snapshot();
            let mut obj_cam_pose = if have_camera_pose {
                camera_pose.inverse_compose(&obj_world_pose)
            } else {
                obj_world_pose
            };

            debug!(
                "Sensor {} Frame {} searching for matching pose for device {}, initial pos [{:.3} {:.3} {:.3}]",
                self.id, frame_id, dev.id(),
                obj_cam_pose.pos.x, obj_cam_pose.pos.y, obj_cam_pose.pos.z
            );

            dev_state.final_cam_pose = obj_cam_pose;

            let prior = PosePrior {
                pose: obj_cam_pose,
                pos_error: exp_dev_info.pos_error,
                rot_error: exp_dev_info.rot_error,
            };
            dev_state.score = self.scorer.evaluate_with_prior(
                &obj_cam_pose,
                &prior,
                &observation.blobs,
                dev.id(),
                dev.leds(),
                &self.intrinsics,
            );

            if dev_state.score.good_pose_match {
                debug!(
                    "Sensor {} already had good pose match for device {} matched {} blobs of {}",
                    self.id, dev.id(), dev_state.score.matched_blobs, dev_state.score.visible_leds
                );
            } else {
                // See if we still have enough labelled blobs to try to
                // re-acquire the pose without a full search.
                let num_blobs = observation
                    .blobs
                    .iter()
                    .filter(|b| b.belongs_to(dev.id()))
                    .count();

                if num_blobs > REACQUISITION_MIN_BLOBS {
                    self.pnp.estimate_initial_pose(
                        &observation.blobs,
                        dev.id(),
                        dev.leds(),
                        &self.intrinsics,
                        &mut obj_cam_pose,
                        true,
                    );
                    let prior = PosePrior {
                        pose: dev_state.final_cam_pose,
                        pos_error: exp_dev_info.pos_error,
                        rot_error: exp_dev_info.rot_error,
                    };
                    dev_state.score = self.scorer.evaluate_with_prior(
                        &obj_cam_pose,
                        &prior,
                        &observation.blobs,
                        dev.id(),
                        dev.leds(),
                        &self.intrinsics,
                    );

                    if dev_state.score.good_pose_match {
                        debug!(
                            "Sensor {} re-acquired match for device {} matched {} blobs of {}",
                            self.id,
                            dev.id(),
                            dev_state.score.matched_blobs,
                            dev_state.score.visible_leds
                        );
                    }
                }
            }

            if dev_state.score.good_pose_match {
                self.update_device_and_blobs(
                    observation,
                    exposure_info,
                    dev,
                    dev_state,
                    &mut obj_cam_pose,
                    *start_ts,
                );
            } else {
                // Didn't find this device; send the frame for long
                // analysis.
                debug!(
                    "Sensor {} frame {} needs full search for device {} - sending to long analysis",
                    self.id, frame_id, dev.id()
                );
                *need_long_analysis = true;
            }
        }
    }

    /// Deep analysis: two-pass correspondence search over the devices
    /// still unresolved in this frame. Pass 0 is shallow and only strong
    /// matches are kept; pass 1 searches deep and accepts good matches.
    pub(super) fn analyse_frame_long(
        &self,
        frame: &mut CaptureFrame,
        devices: &[Arc<TrackedDevice>],
    ) {
        let CaptureFrame {
            id: frame_id,
            bwobs,
            capture_state,
            exposure_info,
            n_devices,
            long_analysis_found_new_blobs,
            start_ts,
            ..
        } = frame;
        let Some(observation) = bwobs.as_mut() else {
            return;
        };

        debug!(
            "Sensor {} Frame {} - starting long search for devices",
            self.id, frame_id
        );

        let mut search = self.search.lock();
        search.set_blobs(&observation.blobs);

        // The camera-frame gravity vector is fixed for the whole search,
        // even if the camera pose gets bootstrapped mid-way through.
        let mut gravity_vector = Vector3::new(0.0, 1.0, 0.0);
        {
            let (have_camera_pose, camera_pose) = self.camera_pose_snapshot();
            if have_camera_pose {
                gravity_vector = camera_pose.orient.inverse() * gravity_vector;
            }
        }

        let mut had_strong_matches = false;

        for pass in 0..2 {
            // Only process the devices that were available when this
            // frame was captured.
            for d in 0..(*n_devices).min(devices.len()) {
                let dev = &devices[d];
                let dev_state = &mut capture_state[d];
                let exp_dev_info = exposure_info.devices[d];

                if dev_state.found_device_pose {
                    continue; // Already found a pose for this device.
                }

                let mut flags = SearchFlags::STOP_FOR_STRONG_MATCH;
                if dev.kind().matches_all_blobs() {
                    // Let the HMD match whatever it can.
                    flags |= SearchFlags::MATCH_ALL_BLOBS;
                }
                flags |= if pass == 0 {
                    SearchFlags::SHALLOW_SEARCH
                } else {
                    SearchFlags::DEEP_SEARCH
                };

                if exp_dev_info.fusion_slot == NO_FUSION_SLOT {
                    trace!(
                        "Skipping long analysis of device {}. No fusion slot assigned",
                        dev.id()
                    );
                    continue;
                }

                // With a trustworthy gravity estimate, constrain the
                // search around the prior, within two standard
                // deviations. The camera pose is re-read per device: an
                // earlier device in this very search may have
                // bootstrapped it.
                let (have_camera_pose, camera_pose) = self.camera_pose_snapshot();
                let do_aligned_checks = have_camera_pose
                    && dev_state.gravity_error_rad < ALIGNED_SEARCH_MAX_GRAVITY_ERROR_RAD;

                let mut obj_cam_pose = dev_state.final_cam_pose;
                if do_aligned_checks {
                    obj_cam_pose = camera_pose.inverse_compose(&dev_state.capture_world_pose);
                }

                if dev_state.score.good_pose_match && had_strong_matches {
                    // A good match found on the earlier pass may have
                    // lost blobs to another device's strong match since.
                    // Re-check it and possibly search again.
                    dev_state.score = if do_aligned_checks {
                        let prior = PosePrior {
                            pose: dev_state.final_cam_pose,
                            pos_error: exp_dev_info.pos_error,
                            rot_error: exp_dev_info.rot_error,
                        };
                        self.scorer.evaluate_with_prior(
                            &obj_cam_pose,
                            &prior,
                            &observation.blobs,
                            dev.id(),
                            dev.leds(),
                            &self.intrinsics,
                        )
                    } else {
                        self.scorer.evaluate(
                            &dev_state.final_cam_pose,
                            &observation.blobs,
                            dev.id(),
                            dev.leds(),
                            &self.intrinsics,
                        )
                    };

                    if !dev_state.score.good_pose_match {
                        flags |= SearchFlags::SHALLOW_SEARCH;
                    }
                }

                if flags.contains(SearchFlags::DEEP_SEARCH) {
                    debug!("Sensor {} long search for device {}", self.id, dev.id());
                }

                let found = if do_aligned_checks {
                    let tolerance = (2.0 * dev_state.gravity_error_rad)
                        .max(ALIGNED_SEARCH_MIN_TOLERANCE_RAD);
                    let (pose_gravity_swing, _pose_gravity_twist) =
                        swing_twist(&obj_cam_pose.orient, &gravity_vector);

                    search.find_one_pose_aligned(
                        dev.id(),
                        flags,
                        &mut obj_cam_pose,
                        &gravity_vector,
                        &pose_gravity_swing,
                        tolerance,
                        &mut dev_state.score,
                    )
                } else {
                    search.find_one_pose(dev.id(), flags, &mut obj_cam_pose, &mut dev_state.score)
                };

                trace!(
                    "Sensor {} Frame {} - long search pass {} device {} found {} matched {} blobs of {} ({} match)",
                    self.id,
                    frame_id,
                    pass,
                    dev.id(),
                    found,
                    dev_state.score.matched_blobs,
                    dev_state.score.visible_leds,
                    if dev_state.score.good_pose_match { "good" } else { "bad" }
                );

                // Require a strong pose match on the quick pass.
                if pass == 0 && !dev_state.score.strong_pose_match {
                    continue;
                }

                if dev_state.score.good_pose_match {
                    had_strong_matches |= dev_state.score.strong_pose_match;

                    self.update_device_and_blobs(
                        observation,
                        exposure_info,
                        dev,
                        dev_state,
                        &mut obj_cam_pose,
                        *start_ts,
                    );
                    *long_analysis_found_new_blobs = true;

                    // Publish the refined labels so the next fast pass
                    // and the remaining searches observe the claims.
                    self.detector.lock().update_labels(observation, dev.id());
                    search.set_blobs(&observation.blobs);
                }
            }
        }
    }

    /// Adopt `obj_cam_pose` for a device: re-label its blobs, refine by
    /// PnP over the fresh labels, label once more (a second pass can pick
    /// up newly visible LEDs), then hand the pose upstream.
    fn update_device_and_blobs(
        &self,
        observation: &mut BlobObservation,
        exposure_info: &mut ExposureInfo,
        dev: &Arc<TrackedDevice>,
        dev_state: &mut FrameDeviceState,
        obj_cam_pose: &mut Pose,
        frame_start_ts: u64,
    ) {
        // Clear this device's existing labels, keeping them as previous
        // labels, then back-project LED ids onto blobs whose LED normal
        // points strongly to the camera.
        for blob in observation.blobs.iter_mut() {
            if blob.led_id.device_id() == Some(dev.id()) {
                blob.prev_led_id = blob.led_id;
                blob.led_id = crate::led::LedLabel::INVALID;
            }
        }

        self.scorer.mark_matching_blobs(
            obj_cam_pose,
            &mut observation.blobs,
            dev.id(),
            dev.leds(),
            &self.intrinsics,
        );

        // Refine the pose with PnP now that the blobs are labelled.
        self.pnp.estimate_initial_pose(
            &observation.blobs,
            dev.id(),
            dev.leds(),
            &self.intrinsics,
            obj_cam_pose,
            true,
        );

        // Label again in case the refined pose collects more blobs.
        self.scorer.mark_matching_blobs(
            obj_cam_pose,
            &mut observation.blobs,
            dev.id(),
            dev.leds(),
            &self.intrinsics,
        );

        dev_state.final_cam_pose = *obj_cam_pose;

        debug!(
            "Sensor {} PnP for device {} yielded pos [{:.3} {:.3} {:.3}]",
            self.id, dev.id(), obj_cam_pose.pos.x, obj_cam_pose.pos.y, obj_cam_pose.pos.z
        );

        self.update_device_pose(observation, exposure_info, dev, dev_state, frame_start_ts);
    }

    /// Re-score the refined pose; on a good match either feed it to the
    /// device's fusion filter (composing through the camera pose), or use
    /// it to bootstrap the camera pose from the HMD.
    fn update_device_pose(
        &self,
        observation: &BlobObservation,
        exposure_info: &mut ExposureInfo,
        dev: &Arc<TrackedDevice>,
        dev_state: &mut FrameDeviceState,
        frame_start_ts: u64,
    ) {
        let pose = dev_state.final_cam_pose;
        let capture_pose = dev_state.capture_world_pose;

        dev_state.score = self.scorer.evaluate(
            &pose,
            &observation.blobs,
            dev.id(),
            dev.leds(),
            &self.intrinsics,
        );

        if !dev_state.score.good_pose_match {
            trace!(
                "Failed pose match - only {} LEDs matched {} visible ones",
                dev_state.score.matched_blobs, dev_state.score.visible_leds
            );
            return;
        }

        trace!(
            "Found good pose match - {} LEDs matched {} visible ones",
            dev_state.score.matched_blobs, dev_state.score.visible_leds
        );

        let (have_camera_pose, camera_pose) = self.camera_pose_snapshot();
        if have_camera_pose {
            let now = self.clock.now_ns();

            // The found pose is object→camera; composing with the
            // camera→world pose yields the object→world pose the fusion
            // needs.
            let world_pose = camera_pose.compose(&pose);

            debug!(
                "TS {} updating fusion for device {} pos [{:.3} {:.3} {:.3}]",
                now, dev.id(), world_pose.pos.x, world_pose.pos.y, world_pose.pos.z
            );

            dev.model_pose_update(now, frame_start_ts, exposure_info, world_pose, &self.serial);
            dev.frame_release_exposure(exposure_info);
            dev_state.found_device_pose = true;
        } else if dev.kind().bootstraps_camera_pose()
            && dev_state.gravity_error_rad < BOOTSTRAP_MAX_GRAVITY_ERROR_RAD
        {
            // No camera pose yet, but the fusion had a good gravity
            // vector at capture time: derive the camera→world transform
            // from this observation. Applying the inverted observation
            // (camera→object) to the fusion pose (object→world) yields
            // camera→world.
            let bootstrap_pose = capture_pose.compose(&pose.inverse());

            let mut camera_pose_state = self.camera_pose.lock();
            if !camera_pose_state.have {
                info!(
                    "Set sensor {} pose from device {} - gravity error {:.1} degrees yielded camera pose pos [{:.3} {:.3} {:.3}]",
                    self.id,
                    dev.id(),
                    dev_state.gravity_error_rad.to_degrees(),
                    bootstrap_pose.pos.x,
                    bootstrap_pose.pos.y,
                    bootstrap_pose.pos.z
                );
                camera_pose_state.pose = bootstrap_pose;
                camera_pose_state.have = true;
            }
        } else if dev.kind().bootstraps_camera_pose() {
            debug!(
                "No camera pose yet - gravity error is {:.1} degrees",
                dev_state.gravity_error_rad.to_degrees()
            );
        }
    }
}
