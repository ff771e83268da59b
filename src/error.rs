//! Error type for tracker and sensor setup.
//!
//! Only setup-time failures surface as errors. Runtime conditions such as
//! dropped frames, missing exposure info or exhausted delay slots are part
//! of normal operation: they are counted and logged, never returned.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The frame transport could not be prepared or started.
    #[error("transport setup failed: {0}")]
    Transport(String),

    /// A calibration block could not be decoded; the sensor is not created.
    #[error("calibration decode failed: {0}")]
    CalibrationDecode(String),

    /// The correspondence search rejected a device's LED model.
    #[error("device {0} could not be registered for correspondence search")]
    DeviceModelRejected(u8),
}
