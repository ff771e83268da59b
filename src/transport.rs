//! Frame transport interface.
//!
//! The USB/UVC layer that actually produces frames is external. A sensor
//! drives it through [`FrameStream`] and receives capture callbacks
//! through [`StreamSink`]. Buffer ownership follows the callbacks: the
//! sensor lends a pixel buffer with `set_frame` at each start-of-frame and
//! receives it back, filled, in `frame_captured`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TrackerError;

/// Stream geometry negotiated during setup.
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub width: u32,
    pub height: u32,
    pub frame_size: usize,
}

/// A pixel buffer in flight between a sensor and its transport.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Pool index of the frame this buffer belongs to.
    pub frame_id: usize,
    pub data: Vec<u8>,
}

/// Capture callbacks a sensor exposes to its transport.
///
/// `start_of_frame` runs on the transport's event thread; the sink calls
/// `FrameStream::set_frame` from within it to lend the buffer for the
/// announced frame, so a stream must not hold locks that `set_frame`
/// takes while invoking the callback.
pub trait StreamSink: Send + Sync {
    /// A new frame began arriving at `start_ts` (local nanoseconds).
    fn start_of_frame(&self, start_ts: u64);

    /// The lent buffer came back filled.
    fn frame_captured(&self, buffer: FrameBuffer);
}

/// One sensor's video stream.
pub trait FrameStream: Send {
    /// Prepare streaming and register the capture callbacks.
    fn setup(&mut self, sink: Arc<dyn StreamSink>) -> Result<StreamParams, TrackerError>;

    fn start(&mut self) -> Result<(), TrackerError>;

    /// Stop delivering callbacks. After `stop` returns no further
    /// callbacks are invoked.
    fn stop(&mut self);

    /// Lend the buffer the current frame should be captured into.
    fn set_frame(&self, buffer: FrameBuffer);
}

/// Transport event loop driven by the tracker's event thread.
pub trait EventPump: Send {
    /// Process pending transport events, waiting at most `timeout`.
    fn handle_events(&self, timeout: Duration);
}
