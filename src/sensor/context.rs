//! Per-sensor pipeline: the capture callback, the fast analysis worker,
//! and the long analysis worker, sharing a pool of four frames.
//!
//! Lock discipline: the sensor lock protects the frame pool, the three
//! queues and the worker flags. It is never held while calling into the
//! tracker core or a device; capture callbacks gather what they need
//! under the lock, drop it, then announce frame lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::calib::CameraIntrinsics;
use crate::clock::Clock;
use crate::error::TrackerError;
use crate::geometry::Pose;
use crate::tracker::{ExposureInfo, TrackedDevice, TrackerCore, MAX_TRACKED_DEVICES};
use crate::transport::{FrameBuffer, FrameStream, StreamSink};
use crate::vision::{BlobDetector, CorrespondenceSearch, PnpSolver, PoseScorer};

use super::frame::CaptureFrame;
use super::queue::{FrameQueue, NUM_CAPTURE_BUFFERS};

pub(super) struct CameraPoseState {
    pub have: bool,
    /// Camera→world transform, bootstrapped from the first confident HMD
    /// observation with a reliable gravity vector.
    pub pose: Pose,
}

struct SensorShared {
    devices: Vec<Arc<TrackedDevice>>,

    cur_capture: Option<Box<CaptureFrame>>,

    /// Frames free for capture.
    capture_q: FrameQueue,
    /// Frames awaiting fast analysis.
    fast_q: FrameQueue,
    /// Frames awaiting long analysis.
    long_q: FrameQueue,

    dropped_frames: u32,
    long_analysis_busy: bool,
    shutdown: bool,
}

/// Snapshot of a sensor's pipeline accounting.
#[derive(Debug, Clone, Copy)]
pub struct SensorStats {
    pub dropped_frames: u32,
    pub pooled_frames: usize,
    pub fast_queued: usize,
    pub long_queued: usize,
    pub in_capture: bool,
}

/// One camera sensor and its analysis pipeline.
pub struct SensorContext {
    pub(super) id: u32,
    pub(super) serial: String,
    pub(super) intrinsics: CameraIntrinsics,
    pub(super) core: Arc<TrackerCore>,
    pub(super) clock: Arc<dyn Clock>,

    pub(super) detector: Mutex<Box<dyn BlobDetector>>,
    pub(super) search: Mutex<Box<dyn CorrespondenceSearch>>,
    pub(super) pnp: Box<dyn PnpSolver>,
    pub(super) scorer: Box<dyn PoseScorer>,

    /// Updated from the analysis threads once the first confident HMD
    /// observation arrives; read on every frame after that.
    pub(super) camera_pose: Mutex<CameraPoseState>,

    shared: Mutex<SensorShared>,
    new_frame_cond: Condvar,

    stream: Mutex<Box<dyn FrameStream>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl SensorContext {
    /// Create a sensor around a transport stream. Sets up the stream and
    /// fills the capture pool; `start` begins streaming.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        serial: &str,
        intrinsics: CameraIntrinsics,
        stream: Box<dyn FrameStream>,
        detector: Box<dyn BlobDetector>,
        search: Box<dyn CorrespondenceSearch>,
        pnp: Box<dyn PnpSolver>,
        scorer: Box<dyn PoseScorer>,
        core: Arc<TrackerCore>,
    ) -> Result<Arc<Self>, TrackerError> {
        let clock = core.clock().clone();
        let ctx = Arc::new(Self {
            id,
            serial: serial.to_string(),
            intrinsics,
            core,
            clock,
            detector: Mutex::new(detector),
            search: Mutex::new(search),
            pnp,
            scorer,
            camera_pose: Mutex::new(CameraPoseState {
                have: false,
                pose: Pose::identity(),
            }),
            shared: Mutex::new(SensorShared {
                devices: Vec::new(),
                cur_capture: None,
                capture_q: FrameQueue::new(),
                fast_q: FrameQueue::new(),
                long_q: FrameQueue::new(),
                dropped_frames: 0,
                long_analysis_busy: false,
                shutdown: false,
            }),
            new_frame_cond: Condvar::new(),
            stream: Mutex::new(stream),
            workers: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        });

        let params = {
            let sink: Arc<dyn StreamSink> = ctx.clone();
            ctx.stream.lock().setup(sink)?
        };

        {
            let mut shared = ctx.shared.lock();
            for i in 0..NUM_CAPTURE_BUFFERS {
                shared.capture_q.push(Box::new(CaptureFrame::new(
                    i,
                    params.frame_size,
                    params.width,
                    params.height,
                )));
            }
        }

        Ok(ctx)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Spawn the analysis workers and start streaming.
    pub fn start(self: &Arc<Self>) -> Result<(), TrackerError> {
        {
            let fast_ctx = Arc::clone(self);
            let long_ctx = Arc::clone(self);
            let mut workers = self.workers.lock();
            workers.push(thread::spawn(move || fast_ctx.fast_analysis_loop()));
            workers.push(thread::spawn(move || long_ctx.long_analysis_loop()));
        }
        self.stream.lock().start()
    }

    /// Stop streaming, wake and join the workers, then release any frame
    /// still in flight so every announced start is matched by a release.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stream.lock().stop();

        {
            let mut shared = self.shared.lock();
            shared.shutdown = true;
            self.new_frame_cond.notify_all();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }

        loop {
            let frame = {
                let mut shared = self.shared.lock();
                shared
                    .fast_q
                    .pop()
                    .or_else(|| shared.long_q.pop())
                    .or_else(|| shared.cur_capture.take())
            };
            match frame {
                Some(frame) => self.release_frame(frame),
                None => break,
            }
        }
    }

    /// Register a device with this sensor's correspondence search.
    pub fn add_device(&self, device: &Arc<TrackedDevice>) -> bool {
        let ok = self
            .search
            .lock()
            .set_model(device.id(), device.leds().clone());
        if ok {
            let mut shared = self.shared.lock();
            assert!(shared.devices.len() < MAX_TRACKED_DEVICES);
            debug_assert_eq!(shared.devices.len(), device.index());
            shared.devices.push(device.clone());
        }
        ok
    }

    /// Offer a fresh exposure to the frame currently in capture. Adopted
    /// unconditionally when the frame has none yet; a replacement is
    /// accepted only within the adoption window of the frame's start.
    pub fn update_exposure(&self, info: &ExposureInfo) {
        let mut changed: Option<(Option<ExposureInfo>, ExposureInfo)> = None;
        {
            let mut shared = self.shared.lock();
            let Some(frame) = shared.cur_capture.as_mut() else {
                return; // No capture frame yet.
            };

            if !frame.exposure_info_valid {
                trace!(
                    "Sensor {} frame (sof {:.3}ms) taking exposure info count {} phase {}",
                    self.id,
                    frame.start_ts as f64 / 1e6,
                    info.count,
                    info.led_pattern_phase
                );
                frame.exposure_info = *info;
                frame.exposure_info_valid = true;
                changed = Some((None, *info));
            } else if frame.exposure_info.count != info.count {
                let threshold = frame.start_ts + self.core.config().exposure_adoption_window_ns();
                if info.local_ts < threshold {
                    trace!(
                        "Sensor {} frame (sof {:.3}ms) updating exposure info to count {} phase {}",
                        self.id,
                        frame.start_ts as f64 / 1e6,
                        info.count,
                        info.led_pattern_phase
                    );
                    let old = frame.exposure_info;
                    frame.exposure_info = *info;
                    changed = Some((Some(old), *info));
                }
            }
        }

        if let Some((mut old, mut new)) = changed {
            self.core.frame_changed_exposure(old.as_mut(), &mut new);
        }
    }

    /// Pipeline accounting, for observability and tests.
    pub fn stats(&self) -> SensorStats {
        let shared = self.shared.lock();
        SensorStats {
            dropped_frames: shared.dropped_frames,
            pooled_frames: shared.capture_q.len(),
            fast_queued: shared.fast_q.len(),
            long_queued: shared.long_q.len(),
            in_capture: shared.cur_capture.is_some(),
        }
    }

    /// The bootstrapped camera→world transform, once known.
    pub fn camera_pose(&self) -> Option<Pose> {
        let state = self.camera_pose.lock();
        state.have.then(|| state.pose)
    }

    pub(super) fn camera_pose_snapshot(&self) -> (bool, Pose) {
        let state = self.camera_pose.lock();
        (state.have, state.pose)
    }

    fn handle_start_of_frame(&self, start_ts: u64) {
        let exposure = self.core.get_exposure_info();
        match &exposure {
            Some(info) => trace!(
                "{:.3} ms Sensor {} SOF phase {}",
                start_ts as f64 / 1e6,
                self.id,
                info.led_pattern_phase
            ),
            None => trace!("{:.3} ms Sensor {} SOF no phase info", start_ts as f64 / 1e6, self.id),
        }

        let mut release_old: Option<(u64, ExposureInfo)> = None;
        let buffer;
        {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;

            let mut from_rewind = false;
            let mut frame = if let Some(prev) = shared.cur_capture.take() {
                // Previous frame never completed; some USB problem. Reuse
                // it, but pair the announced start with a release.
                release_old = Some((prev.start_ts, prev.exposure_info));
                prev
            } else if let Some(frame) = shared.capture_q.pop() {
                frame
            } else {
                // No frame available from the analysis threads yet;
                // recover the most recent one we handed to fast analysis.
                // This must succeed, or there are not enough capture
                // frames in circulation.
                let frame = shared
                    .fast_q
                    .rewind()
                    .expect("no capture frame available: pool accounting broken");
                debug!(
                    "Sensor {} reclaimed frame {} from fast analysis for capture",
                    self.id, frame.id
                );
                shared.dropped_frames += 1;
                from_rewind = true;
                release_old = Some((frame.start_ts, frame.exposure_info));
                frame
            };

            if !from_rewind && shared.dropped_frames > 0 {
                warn!("Sensor {} dropped {} frames", self.id, shared.dropped_frames);
                shared.dropped_frames = 0;
            }

            frame.start_ts = start_ts;
            frame.exposure_info_valid = exposure.is_some();
            if let Some(info) = &exposure {
                frame.exposure_info = *info;
            }

            buffer = frame.take_buffer();
            shared.cur_capture = Some(frame);
        }

        if let Some((old_ts, mut old_info)) = release_old {
            self.core
                .frame_release(start_ts, old_ts, Some(&mut old_info), &self.serial);
        }

        let mut start_info = exposure;
        self.core
            .frame_start(start_ts, &self.serial, start_info.as_mut());

        self.stream.lock().set_frame(buffer);
    }

    fn handle_frame_captured(&self, buffer: FrameBuffer) {
        let now = self.clock.now_ns();

        let mut frame = {
            let mut shared = self.shared.lock();
            // The frame being returned must be the most recent one we
            // handed to the transport.
            let mut frame = shared
                .cur_capture
                .take()
                .expect("frame delivered with no capture in progress");
            assert_eq!(
                frame.id, buffer.frame_id,
                "delivered buffer does not match the frame in capture"
            );
            frame.restore_buffer(buffer);
            frame
        };

        if !frame.exposure_info_valid {
            // Without exposure info the frame cannot be used.
            self.release_frame(frame);
            return;
        }

        frame.delivered_ts = now;

        let info = frame.exposure_info;
        for d in 0..info.n_devices {
            let dev_state = &mut frame.capture_state[d];
            let exp_dev_info = &info.devices[d];

            dev_state.capture_world_pose = exp_dev_info.capture_pose;
            dev_state.gravity_error_rad = exp_dev_info.gravity_error_rad();
            dev_state.final_cam_pose = Pose::identity();
            dev_state.score.clear();
            dev_state.found_device_pose = false;
        }
        frame.n_devices = info.n_devices;

        debug!(
            "Sensor {} captured frame {} exposure counter {} phase {}",
            self.id, frame.id, info.count, info.led_pattern_phase
        );

        self.core
            .frame_captured(now, frame.start_ts, &info, &self.serial);

        let mut shared = self.shared.lock();
        shared.fast_q.push(frame);
        self.new_frame_cond.notify_all();
    }

    /// Return a frame to the capture pool, handing its observation back
    /// to the detector and announcing the release to the tracker. The
    /// frame rejoins the pool before the announcement so a start-of-frame
    /// never finds the pool empty while a release is in flight.
    pub(super) fn release_frame(&self, mut frame: Box<CaptureFrame>) {
        let now = self.clock.now_ns();
        debug!(
            "Sensor {} frame {} analysis done after {}ms. USB delivery {}ms fast: queued {:.1}ms analysis {}ms ({}ms blob extraction) long: queued {:.1}ms analysis {}ms",
            self.id,
            frame.id,
            (now.saturating_sub(frame.start_ts)) / 1_000_000,
            (frame.delivered_ts.saturating_sub(frame.start_ts)) / 1_000_000,
            (frame.fast_analysis_start_ts.saturating_sub(frame.delivered_ts)) as f64 / 1e6,
            (frame.fast_analysis_finish_ts.saturating_sub(frame.fast_analysis_start_ts)) / 1_000_000,
            (frame.blob_extract_finish_ts.saturating_sub(frame.fast_analysis_start_ts)) / 1_000_000,
            (frame.long_analysis_start_ts.saturating_sub(frame.fast_analysis_finish_ts)) as f64 / 1e6,
            (frame.long_analysis_finish_ts.saturating_sub(frame.long_analysis_start_ts)) / 1_000_000,
        );

        let observation = frame.bwobs.take();
        let mut release_info = frame.exposure_info_valid.then_some(frame.exposure_info);
        let frame_ts = frame.start_ts;

        {
            let mut shared = self.shared.lock();
            shared.capture_q.push(frame);
        }

        if let Some(observation) = observation {
            self.detector.lock().release_observation(observation);
        }

        self.core
            .frame_release(now, frame_ts, release_info.as_mut(), &self.serial);
    }

    fn fast_analysis_loop(self: Arc<Self>) {
        let mut guard = self.shared.lock();
        loop {
            // Drain the queue before sleeping so a wakeup that fires
            // mid-analysis cannot strand a queued frame.
            while !guard.shutdown {
                let Some(mut frame) = guard.fast_q.pop() else {
                    break;
                };
                let devices = guard.devices.clone();
                drop(guard);

                self.analyse_frame_fast(&mut frame, &devices);

                guard = self.shared.lock();
                if frame.need_long_analysis && !guard.long_analysis_busy {
                    // Only one pending long frame at a time; the newest
                    // wins. Reclaim an un-fetched older frame first.
                    if let Some(mut old_frame) = guard.long_q.rewind() {
                        let now = self.clock.now_ns();
                        debug!(
                            "Sensor {} reclaimed frame {} from long analysis queue",
                            self.id, old_frame.id
                        );
                        old_frame.long_analysis_start_ts = now;
                        old_frame.long_analysis_finish_ts = now;
                        drop(guard);
                        self.release_frame(old_frame);
                        guard = self.shared.lock();
                    }
                    guard.long_q.push(frame);
                } else {
                    frame.long_analysis_start_ts = frame.fast_analysis_finish_ts;
                    frame.long_analysis_finish_ts = frame.fast_analysis_finish_ts;
                    drop(guard);
                    self.release_frame(frame);
                    guard = self.shared.lock();
                }
            }

            if guard.shutdown {
                break;
            }
            self.new_frame_cond.wait(&mut guard);
        }
    }

    fn long_analysis_loop(self: Arc<Self>) {
        let mut guard = self.shared.lock();
        loop {
            while !guard.shutdown {
                let Some(mut frame) = guard.long_q.pop() else {
                    break;
                };
                guard.long_analysis_busy = true;
                let devices = guard.devices.clone();
                drop(guard);

                frame.long_analysis_start_ts = self.clock.now_ns();
                self.analyse_frame_long(&mut frame, &devices);
                frame.long_analysis_finish_ts = self.clock.now_ns();

                guard = self.shared.lock();
                guard.long_analysis_busy = false;
                drop(guard);
                self.release_frame(frame);
                guard = self.shared.lock();
            }

            if guard.shutdown {
                break;
            }
            self.new_frame_cond.wait(&mut guard);
        }
    }
}

impl StreamSink for SensorContext {
    fn start_of_frame(&self, start_ts: u64) {
        self.handle_start_of_frame(start_ts);
    }

    fn frame_captured(&self, buffer: FrameBuffer) {
        self.handle_frame_captured(buffer);
    }
}

impl std::fmt::Debug for SensorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorContext")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .finish()
    }
}
