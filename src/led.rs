//! LED constellation models and blob label encoding.
//!
//! Every tracked device carries a rigid model of IR LEDs (position +
//! emission normal in model space). Blobs extracted from sensor frames are
//! labelled with a [`LedLabel`] that packs the owning device id into the
//! high bits and the LED index into the low bits, so a single label both
//! claims a blob for a device and names the LED it corresponds to.

use nalgebra::Vector3;

/// Upper bound on LEDs per device model.
pub const MAX_OBJECT_LEDS: usize = 64;

/// A single LED in a device model.
#[derive(Debug, Clone, Copy)]
pub struct LedPoint {
    /// Position in model space (metres).
    pub pos: Vector3<f64>,
    /// Unit emission direction in model space.
    pub normal: Vector3<f64>,
    /// Blink-pattern code carried by this LED.
    pub pattern: u16,
}

/// The rigid LED constellation of one tracked device.
#[derive(Debug, Clone)]
pub struct LedModel {
    points: Vec<LedPoint>,
}

impl LedModel {
    pub fn new(points: Vec<LedPoint>) -> Self {
        assert!(points.len() <= MAX_OBJECT_LEDS, "LED model too large");
        Self { points }
    }

    pub fn points(&self) -> &[LedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A blob label: device id in the high byte, LED index in the low byte.
///
/// The invalid label means "unclaimed"; it belongs to no device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedLabel(i32);

impl LedLabel {
    pub const INVALID: LedLabel = LedLabel(-1);

    pub fn new(device_id: u8, led_index: u8) -> Self {
        LedLabel(((device_id as i32) << 8) | led_index as i32)
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The device this label claims the blob for, if any.
    pub fn device_id(self) -> Option<u8> {
        if self.is_valid() {
            Some((self.0 >> 8) as u8)
        } else {
            None
        }
    }

    /// Index of the LED within the owning device's model, if any.
    pub fn led_index(self) -> Option<u8> {
        if self.is_valid() {
            Some((self.0 & 0xff) as u8)
        } else {
            None
        }
    }
}

impl Default for LedLabel {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for LedLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.device_id(), self.led_index()) {
            (Some(dev), Some(led)) => write!(f, "D{}L{}", dev, led),
            _ => write!(f, "unlabelled"),
        }
    }
}
