//! Blobs: bright connected regions extracted from a sensor frame.

use crate::led::LedLabel;

/// One candidate LED observation in image space.
#[derive(Debug, Clone, Copy)]
pub struct Blob {
    /// Centre, in pixels.
    pub x: f64,
    pub y: f64,
    /// Bounding box extents, in pixels.
    pub width: u16,
    pub height: u16,
    /// Current label, claiming the blob for a device's LED.
    pub led_id: LedLabel,
    /// Label before the most recent clearing pass, kept so a device can
    /// count blobs it recently owned when re-acquiring a pose.
    pub prev_led_id: LedLabel,
    /// Observed blink-pattern bits.
    pub pattern: u16,
    /// Number of consecutive frames the pattern has been tracked.
    pub pattern_age: u32,
}

impl Blob {
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            width: 0,
            height: 0,
            led_id: LedLabel::INVALID,
            prev_led_id: LedLabel::INVALID,
            pattern: 0,
            pattern_age: 0,
        }
    }

    /// Whether the blob currently, or until the last clearing pass,
    /// belonged to `device_id`.
    pub fn belongs_to(&self, device_id: u8) -> bool {
        self.led_id.device_id() == Some(device_id)
            || self.prev_led_id.device_id() == Some(device_id)
    }
}

/// An owning set of blobs for one frame, borrowed from the detector and
/// handed back when the frame is released.
#[derive(Debug, Default)]
pub struct BlobObservation {
    pub blobs: Vec<Blob>,
}

impl BlobObservation {
    pub fn new(blobs: Vec<Blob>) -> Self {
        Self { blobs }
    }

    /// Count blobs currently labelled to `device_id`.
    pub fn count_labelled(&self, device_id: u8) -> usize {
        self.blobs
            .iter()
            .filter(|b| b.led_id.device_id() == Some(device_id))
            .count()
    }
}
