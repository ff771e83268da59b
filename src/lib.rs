//! Real-time 6-DoF positional tracking of a head-mounted display and its
//! controllers from external IR camera sensors observing LED
//! constellations.
//!
//! The crate contains the per-sensor image-analysis and
//! pose-correspondence pipeline (capture callback, fast and long analysis
//! workers over a shared four-frame pool) together with the tracker-wide
//! exposure and delay-slot bookkeeping that synchronises camera
//! observations with inertial fusion. The blob detector, PnP solver, pose
//! scorer, correspondence search, Kalman filter and USB transport are
//! external collaborators driven through the traits in [`vision`],
//! [`fusion`] and [`transport`].

pub mod calib;
pub mod clock;
pub mod config;
pub mod error;
pub mod fusion;
pub mod geometry;
pub mod led;
pub mod sensor;
pub mod telemetry;
pub mod tracker;
pub mod transport;
pub mod vision;

pub use calib::{CameraIntrinsics, Distortion};
pub use clock::{Clock, MonotonicClock};
pub use config::{ObservationPolicy, TrackerConfig};
pub use error::TrackerError;
pub use geometry::Pose;
pub use led::{LedLabel, LedModel, LedPoint};
pub use sensor::{SensorContext, SensorStats};
pub use telemetry::{TelemetryEvent, TelemetrySender};
pub use tracker::{DeviceKind, ExposureInfo, TrackedDevice, Tracker, TrackerCore};
