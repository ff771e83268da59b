//! Geometry utilities: rigid poses and quaternion decompositions.

pub mod pose;

pub use pose::{swing_twist, Pose};
