//! Pose scoring interface and match metrics.

use nalgebra::Vector3;

use super::blob::Blob;
use crate::calib::CameraIntrinsics;
use crate::geometry::Pose;
use crate::led::LedModel;

/// Result of scoring a candidate pose against a frame's blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseMetrics {
    /// Number of projected LEDs that landed on a blob.
    pub matched_blobs: u32,
    /// Number of model LEDs facing the camera under the candidate pose.
    pub visible_leds: u32,
    /// Mean reprojection error of the matched blobs, in pixels.
    pub reprojection_error: f64,
    /// The pose explains the blobs well enough to adopt.
    pub good_pose_match: bool,
    /// The pose is unambiguous; implies `good_pose_match`.
    pub strong_pose_match: bool,
}

impl PoseMetrics {
    /// Reset to the un-evaluated state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Reference pose and its uncertainty, used by the prior-aware evaluator.
#[derive(Debug, Clone, Copy)]
pub struct PosePrior {
    pub pose: Pose,
    /// Positional standard deviation per axis, metres.
    pub pos_error: Vector3<f64>,
    /// Rotational standard deviation per axis, radians.
    pub rot_error: Vector3<f64>,
}

/// Scores candidate poses against blobs and labels matching blobs.
pub trait PoseScorer: Send + Sync {
    /// Score `pose` against the blobs.
    fn evaluate(
        &self,
        pose: &Pose,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    ) -> PoseMetrics;

    /// Score `pose`, additionally penalising deviation from `prior`
    /// beyond its stated uncertainty.
    fn evaluate_with_prior(
        &self,
        pose: &Pose,
        prior: &PosePrior,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    ) -> PoseMetrics;

    /// Label blobs that match `device_id`'s LEDs projected under `pose`,
    /// in place. Only LEDs whose normal points sufficiently toward the
    /// camera participate.
    fn mark_matching_blobs(
        &self,
        pose: &Pose,
        blobs: &mut [Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    );
}
