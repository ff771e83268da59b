//! Perspective-n-Point solver interface.

use super::blob::Blob;
use crate::calib::CameraIntrinsics;
use crate::geometry::Pose;
use crate::led::LedModel;

/// Recovers an object→camera pose from 2D blobs labelled against a 3D
/// LED model.
pub trait PnpSolver: Send + Sync {
    /// Estimate or refine `pose` from the blobs currently labelled to
    /// `device_id`. When `use_prior` is set, the incoming value of `pose`
    /// seeds the solver. Returns false when no pose could be recovered
    /// (too few labelled blobs, degenerate geometry); `pose` is left
    /// untouched in that case.
    fn estimate_initial_pose(
        &self,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
        pose: &mut Pose,
        use_prior: bool,
    ) -> bool;
}
