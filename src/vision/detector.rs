//! Blob detector interface.

use super::blob::BlobObservation;

/// Extracts bright blobs from grayscale frames and tracks blink-pattern
/// labels across frames.
///
/// The detector owns a pool of observations: `process` lends one out and
/// `release_observation` returns it. `update_labels` publishes the labels
/// refined during analysis back into the detector's tracking state so the
/// next frame's observation starts from them.
pub trait BlobDetector: Send {
    /// Extract blobs from a frame. Returns `None` when the frame contains
    /// nothing trackable.
    fn process(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        led_pattern_phase: u8,
    ) -> Option<BlobObservation>;

    /// Return a previously lent observation.
    fn release_observation(&mut self, observation: BlobObservation);

    /// Publish `device_id`'s refined blob labels from `observation` into
    /// the detector's own tracking state.
    fn update_labels(&mut self, observation: &BlobObservation, device_id: u8);
}
