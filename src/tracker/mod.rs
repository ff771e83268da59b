//! Tracker-wide state: tracked devices, exposure bookkeeping, and the
//! delay-slot handshake that feeds delayed camera observations into each
//! device's fusion filter.

pub mod core;
pub mod device;
pub mod exposure;

pub use self::core::{Tracker, TrackerCore};
pub use device::{DeviceKind, TrackedDevice};
pub use exposure::{
    DeviceExposureInfo, ExposureInfo, MAX_TRACKED_DEVICES, NO_FUSION_SLOT, NUM_POSE_DELAY_SLOTS,
};
