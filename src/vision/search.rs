//! Correspondence search interface.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};

use super::blob::Blob;
use super::score::PoseMetrics;
use crate::geometry::Pose;
use crate::led::LedModel;

bitflags::bitflags! {
    /// Flags steering one correspondence search invocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchFlags: u32 {
        /// Return as soon as a strong match is found.
        const STOP_FOR_STRONG_MATCH = 1 << 0;
        /// Allow matching against every blob, not just unclaimed ones.
        const MATCH_ALL_BLOBS = 1 << 1;
        /// Bounded-depth search over the most promising anchors only.
        const SHALLOW_SEARCH = 1 << 2;
        /// Exhaustive search.
        const DEEP_SEARCH = 1 << 3;
    }
}

/// Matches 2D blobs against registered 3D LED models to recover device
/// poses without a usable prior.
///
/// Blob labels are how devices claim blobs from one another: after a
/// device's labels change, the caller re-publishes the blob set with
/// `set_blobs` so later searches observe the claims.
pub trait CorrespondenceSearch: Send {
    /// Register (or replace) the LED model searched for `device_id`.
    /// Returns false if the model cannot be indexed.
    fn set_model(&mut self, device_id: u8, model: Arc<LedModel>) -> bool;

    /// Supply the blob set subsequent searches run against.
    fn set_blobs(&mut self, blobs: &[Blob]);

    /// Search for one device's pose. On success writes the pose and its
    /// metrics and returns true.
    fn find_one_pose(
        &mut self,
        device_id: u8,
        flags: SearchFlags,
        pose: &mut Pose,
        metrics: &mut PoseMetrics,
    ) -> bool;

    /// Gravity-constrained variant: only poses whose swing component
    /// (about `gravity`) stays within `tolerance_rad` of `swing` are
    /// considered.
    #[allow(clippy::too_many_arguments)]
    fn find_one_pose_aligned(
        &mut self,
        device_id: u8,
        flags: SearchFlags,
        pose: &mut Pose,
        gravity: &Vector3<f64>,
        swing: &UnitQuaternion<f64>,
        tolerance_rad: f64,
        metrics: &mut PoseMetrics,
    ) -> bool;
}
