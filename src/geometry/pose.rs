//! Rigid 6-DoF pose: a unit quaternion orientation plus a translation.
//!
//! Composition follows the usual convention: `a.compose(&b)` is the
//! transform that first applies `b`, then `a`, so a camera→world pose
//! composed with an object→camera pose yields the object→world pose.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// A rigid transform (orientation + position) with `f64` components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub orient: UnitQuaternion<f64>,
    pub pos: Vector3<f64>,
}

impl Pose {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            orient: UnitQuaternion::identity(),
            pos: Vector3::zeros(),
        }
    }

    pub fn new(orient: UnitQuaternion<f64>, pos: Vector3<f64>) -> Self {
        Self { orient, pos }
    }

    /// Transform a point from this pose's source frame to its target frame.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.orient * p + self.pos
    }

    /// Compose with `inner`: the result applies `inner` first, then `self`.
    ///
    /// `camera_pose.compose(&obj_cam_pose)` maps object→camera→world.
    pub fn compose(&self, inner: &Pose) -> Pose {
        Pose {
            orient: self.orient * inner.orient,
            pos: self.orient * inner.pos + self.pos,
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Pose {
        let inv_orient = self.orient.inverse();
        Pose {
            orient: inv_orient,
            pos: -(inv_orient * self.pos),
        }
    }

    /// Apply the inverse of `self` to `other`: `self⁻¹ ∘ other`.
    ///
    /// Used to re-express a world-frame pose in this (camera→world)
    /// transform's camera frame without materialising the inverse.
    pub fn inverse_compose(&self, other: &Pose) -> Pose {
        let inv_orient = self.orient.inverse();
        Pose {
            orient: inv_orient * other.orient,
            pos: inv_orient * (other.pos - self.pos),
        }
    }

    /// Mirror the pose in the XZ plane, swapping between device axes and
    /// view-plane axes. Involutive: applying it twice is the identity.
    pub fn mirror_xz(&mut self) {
        let q = self.orient.into_inner();
        let mirrored = Quaternion::new(q.coords.w, -q.coords.x, q.coords.y, -q.coords.z);
        self.orient = UnitQuaternion::new_unchecked(mirrored);
        self.pos.x = -self.pos.x;
        self.pos.z = -self.pos.z;
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Decompose `q` into rotation about `axis` (twist) and the remainder
/// (swing), such that `q = swing * twist`.
///
/// `axis` must be a unit vector. Degenerate rotations perpendicular to
/// the axis yield an identity twist.
pub fn swing_twist(
    q: &UnitQuaternion<f64>,
    axis: &Vector3<f64>,
) -> (UnitQuaternion<f64>, UnitQuaternion<f64>) {
    let inner = q.into_inner();
    let rot_axis = Vector3::new(inner.coords.x, inner.coords.y, inner.coords.z);
    let proj = axis * rot_axis.dot(axis);

    let twist_raw = Quaternion::new(inner.coords.w, proj.x, proj.y, proj.z);
    if twist_raw.norm() < 1e-9 {
        return (*q, UnitQuaternion::identity());
    }

    let twist = UnitQuaternion::new_normalize(twist_raw);
    let swing = q * twist.inverse();
    (swing, twist)
}
