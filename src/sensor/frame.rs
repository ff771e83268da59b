//! Capture frames: the pixel buffer plus everything the analysis stages
//! learn about one exposure.

use crate::geometry::Pose;
use crate::tracker::{ExposureInfo, MAX_TRACKED_DEVICES};
use crate::transport::FrameBuffer;
use crate::vision::{BlobObservation, PoseMetrics};

/// Per-device analysis state within one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDeviceState {
    /// Fused (world-frame) pose of the device at capture time.
    pub capture_world_pose: Pose,
    /// Gravity-vector uncertainty at capture time, radians.
    pub gravity_error_rad: f64,
    /// Best object→camera pose found so far.
    pub final_cam_pose: Pose,
    /// Set once a pose was found and applied for this device.
    pub found_device_pose: bool,
    pub score: PoseMetrics,
}

/// One frame cycling through the capture pool.
///
/// A frame is reachable from exactly one place at any time: the capture
/// pool, the fast or long queue, the in-capture slot, or a worker's hand.
#[derive(Debug)]
pub struct CaptureFrame {
    /// Index of the frame in the pool.
    pub id: usize,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,

    /// USB start-of-frame timestamp, local nanoseconds.
    pub start_ts: u64,

    /// Exposure snapshot bound at start-of-frame (or adopted shortly
    /// after; see the 5 ms adoption window).
    pub exposure_info: ExposureInfo,
    pub exposure_info_valid: bool,

    /// Blob observation lent by the detector, present between fast
    /// analysis and release.
    pub bwobs: Option<BlobObservation>,

    /// Device poses at capture time; only the first `n_devices` entries
    /// are meaningful.
    pub capture_state: [FrameDeviceState; MAX_TRACKED_DEVICES],
    pub n_devices: usize,

    pub delivered_ts: u64,
    pub fast_analysis_start_ts: u64,
    pub blob_extract_finish_ts: u64,
    pub fast_analysis_finish_ts: u64,
    pub long_analysis_start_ts: u64,
    pub long_analysis_finish_ts: u64,

    pub need_long_analysis: bool,
    pub long_analysis_found_new_blobs: bool,
}

impl CaptureFrame {
    pub(crate) fn new(id: usize, frame_size: usize, width: u32, height: u32) -> Self {
        Self {
            id,
            pixels: vec![0; frame_size],
            width,
            height,
            start_ts: 0,
            exposure_info: ExposureInfo::default(),
            exposure_info_valid: false,
            bwobs: None,
            capture_state: [FrameDeviceState::default(); MAX_TRACKED_DEVICES],
            n_devices: 0,
            delivered_ts: 0,
            fast_analysis_start_ts: 0,
            blob_extract_finish_ts: 0,
            fast_analysis_finish_ts: 0,
            long_analysis_start_ts: 0,
            long_analysis_finish_ts: 0,
            need_long_analysis: false,
            long_analysis_found_new_blobs: false,
        }
    }

    /// Lend the pixel buffer to the transport for the next capture. On a
    /// reused frame whose buffer is still with the transport this yields
    /// an empty buffer; the transport keeps capturing into the one it
    /// holds.
    pub(crate) fn take_buffer(&mut self) -> FrameBuffer {
        FrameBuffer {
            frame_id: self.id,
            data: std::mem::take(&mut self.pixels),
        }
    }

    /// Accept the filled buffer back from the transport.
    pub(crate) fn restore_buffer(&mut self, buffer: FrameBuffer) {
        debug_assert_eq!(buffer.frame_id, self.id);
        self.pixels = buffer.data;
    }
}
