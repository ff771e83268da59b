//! Per-sensor capture and analysis pipeline.

mod analysis;
pub mod context;
pub mod frame;
pub mod queue;

pub use context::{SensorContext, SensorStats};
pub use frame::{CaptureFrame, FrameDeviceState};
pub use queue::{NUM_CAPTURE_BUFFERS, QUEUE_SIZE};
