//! Shared test rig: deterministic in-process fakes for the external
//! collaborators (transport stream, blob detector, pose scorer, PnP
//! solver, correspondence search, fusion filter) plus a hand-driven
//! clock, wired into a full tracker + sensor pipeline.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use nalgebra::{UnitQuaternion, Vector3};
use parking_lot::{Condvar, Mutex};

use constellation_tracker::calib::{CameraIntrinsics, Distortion};
use constellation_tracker::clock::Clock;
use constellation_tracker::error::TrackerError;
use constellation_tracker::fusion::{FilterPoseState, PoseFilter};
use constellation_tracker::geometry::Pose;
use constellation_tracker::led::{LedLabel, LedModel, LedPoint};
use constellation_tracker::sensor::SensorContext;
use constellation_tracker::telemetry::{TelemetryEvent, TelemetrySender};
use constellation_tracker::tracker::{DeviceKind, TrackedDevice, Tracker};
use constellation_tracker::transport::{FrameBuffer, FrameStream, StreamParams, StreamSink};
use constellation_tracker::vision::{
    Blob, BlobDetector, BlobObservation, CorrespondenceSearch, PnpSolver, PoseMetrics, PosePrior,
    PoseScorer, SearchFlags,
};
use constellation_tracker::TrackerConfig;

// ---------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------

pub struct ManualClock {
    ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { ns: AtomicU64::new(1_000_000) })
    }

    pub fn set_ns(&self, ns: u64) {
        self.ns.store(ns, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.ns.fetch_add(ms * 1_000_000, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------
// Fusion filter fake
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct FilterLog {
    pub prepared: Vec<(u64, usize)>,
    pub released: Vec<usize>,
    pub pose_updates: Vec<(u64, Pose, usize)>,
    pub position_updates: Vec<(u64, Vector3<f64>, usize)>,
    pub imu_updates: usize,
    /// What `get_pose_at` reports; tests steer this.
    pub report: FilterPoseState,
}

pub struct ScriptedFilter {
    log: Arc<Mutex<FilterLog>>,
}

pub fn scripted_filter() -> (Box<dyn PoseFilter>, Arc<Mutex<FilterLog>>) {
    let log = Arc::new(Mutex::new(FilterLog::default()));
    (Box::new(ScriptedFilter { log: log.clone() }), log)
}

impl PoseFilter for ScriptedFilter {
    fn imu_update(
        &mut self,
        _device_time_ns: u64,
        _ang_vel: &Vector3<f64>,
        _accel: &Vector3<f64>,
        _mag: &Vector3<f64>,
    ) {
        self.log.lock().imu_updates += 1;
    }

    fn prepare_delay_slot(&mut self, device_time_ns: u64, slot_id: usize) {
        self.log.lock().prepared.push((device_time_ns, slot_id));
    }

    fn release_delay_slot(&mut self, slot_id: usize) {
        self.log.lock().released.push(slot_id);
    }

    fn pose_update(&mut self, device_time_ns: u64, pose: &Pose, slot_id: usize) {
        self.log.lock().pose_updates.push((device_time_ns, *pose, slot_id));
    }

    fn position_update(&mut self, device_time_ns: u64, pos: &Vector3<f64>, slot_id: usize) {
        self.log
            .lock()
            .position_updates
            .push((device_time_ns, *pos, slot_id));
    }

    fn get_pose_at(&mut self, _device_time_ns: u64) -> FilterPoseState {
        self.log.lock().report
    }
}

// ---------------------------------------------------------------------
// Scene geometry
// ---------------------------------------------------------------------

pub fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(700.0, 700.0, 640.0, 480.0, Distortion::RadialTangential([0.0; 5]))
}

/// Eight LEDs on a 10 cm planar grid, all facing -Z (toward a camera the
/// object faces).
pub fn grid_led_model() -> Arc<LedModel> {
    let mut points = Vec::new();
    let coords = [
        (-0.05, -0.05),
        (-0.05, 0.0),
        (-0.05, 0.05),
        (0.0, -0.05),
        (0.0, 0.05),
        (0.05, -0.05),
        (0.05, 0.0),
        (0.05, 0.05),
    ];
    for (i, (x, y)) in coords.iter().enumerate() {
        points.push(LedPoint {
            pos: Vector3::new(*x, *y, 0.0),
            normal: Vector3::new(0.0, 0.0, -1.0),
            pattern: i as u16,
        });
    }
    Arc::new(LedModel::new(points))
}

/// An object two grid-columns to the side of `object_pose(0.0)`.
pub fn object_pose(x: f64) -> Pose {
    Pose::new(UnitQuaternion::identity(), Vector3::new(x, 0.0, 1.5))
}

fn project_visible(
    pose: &Pose,
    model: &LedModel,
    intr: &CameraIntrinsics,
) -> Vec<(usize, f64, f64)> {
    let fx = intr.matrix[(0, 0)];
    let fy = intr.matrix[(1, 1)];
    let cx = intr.matrix[(0, 2)];
    let cy = intr.matrix[(1, 2)];

    let mut out = Vec::new();
    for (i, led) in model.points().iter().enumerate() {
        let normal_cam = pose.orient * led.normal;
        if normal_cam.z > -0.25 {
            continue; // Not facing the camera.
        }
        let p = pose.transform_point(&led.pos);
        if p.z < 0.1 {
            continue;
        }
        out.push((i, fx * p.x / p.z + cx, fy * p.y / p.z + cy));
    }
    out
}

/// The blob set a frame would contain for an object at `pose`.
pub fn blobs_for(pose: &Pose, model: &LedModel) -> Vec<Blob> {
    project_visible(pose, model, &intrinsics())
        .into_iter()
        .map(|(_, u, v)| Blob::at(u, v))
        .collect()
}

/// Union of two blob sets, merging blobs closer than half a pixel.
pub fn merge_blobs(mut a: Vec<Blob>, b: Vec<Blob>) -> Vec<Blob> {
    for blob in b {
        let shared = a
            .iter()
            .any(|e| (e.x - blob.x).hypot(e.y - blob.y) < 0.5);
        if !shared {
            a.push(blob);
        }
    }
    a
}

// ---------------------------------------------------------------------
// Pose scorer fake: projection-based
// ---------------------------------------------------------------------

pub struct ProjectionScorer {
    pub px_tol: f64,
    pub good_min: u32,
    pub strong_min: u32,
}

impl Default for ProjectionScorer {
    fn default() -> Self {
        Self {
            px_tol: 2.0,
            good_min: 5,
            strong_min: 7,
        }
    }
}

impl ProjectionScorer {
    fn match_blobs(
        &self,
        pose: &Pose,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intr: &CameraIntrinsics,
    ) -> PoseMetrics {
        let projected = project_visible(pose, model, intr);
        let mut matched = 0u32;
        let mut err_sum = 0.0;

        for (_, u, v) in &projected {
            let hit = blobs.iter().filter_map(|b| {
                if b.led_id.is_valid() && b.led_id.device_id() != Some(device_id) {
                    return None; // Claimed by another device.
                }
                let d = (b.x - u).hypot(b.y - v);
                (d <= self.px_tol).then_some(d)
            });
            if let Some(d) = hit.fold(None::<f64>, |best, d| Some(best.map_or(d, |b| b.min(d)))) {
                matched += 1;
                err_sum += d;
            }
        }

        let good = matched >= self.good_min;
        PoseMetrics {
            matched_blobs: matched,
            visible_leds: projected.len() as u32,
            reprojection_error: if matched > 0 { err_sum / matched as f64 } else { f64::INFINITY },
            good_pose_match: good,
            strong_pose_match: good && matched >= self.strong_min,
        }
    }
}

impl PoseScorer for ProjectionScorer {
    fn evaluate(
        &self,
        pose: &Pose,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    ) -> PoseMetrics {
        self.match_blobs(pose, blobs, device_id, model, intrinsics)
    }

    fn evaluate_with_prior(
        &self,
        pose: &Pose,
        prior: &PosePrior,
        blobs: &[Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    ) -> PoseMetrics {
        let mut metrics = self.match_blobs(pose, blobs, device_id, model, intrinsics);

        let pos_tol = (3.0 * prior.pos_error.norm()).max(0.02);
        let rot_tol = (3.0 * prior.rot_error.norm()).max(10f64.to_radians());
        if (pose.pos - prior.pose.pos).norm() > pos_tol
            || pose.orient.angle_to(&prior.pose.orient) > rot_tol
        {
            metrics.good_pose_match = false;
            metrics.strong_pose_match = false;
        }
        metrics
    }

    fn mark_matching_blobs(
        &self,
        pose: &Pose,
        blobs: &mut [Blob],
        device_id: u8,
        model: &LedModel,
        intrinsics: &CameraIntrinsics,
    ) {
        for (led, u, v) in project_visible(pose, model, intrinsics) {
            let best = blobs
                .iter_mut()
                .filter(|b| !b.led_id.is_valid() || b.led_id.device_id() == Some(device_id))
                .filter(|b| (b.x - u).hypot(b.y - v) <= self.px_tol)
                .min_by(|a, b| {
                    let da = (a.x - u).hypot(a.y - v);
                    let db = (b.x - u).hypot(b.y - v);
                    da.partial_cmp(&db).unwrap()
                });
            if let Some(blob) = best {
                blob.led_id = LedLabel::new(device_id, led as u8);
            }
        }
    }
}

// ---------------------------------------------------------------------
// PnP fake: oracle over ground-truth poses
// ---------------------------------------------------------------------

pub struct OraclePnp {
    truth: Arc<Mutex<HashMap<u8, Pose>>>,
}

pub fn oracle_pnp() -> (Box<dyn PnpSolver>, Arc<Mutex<HashMap<u8, Pose>>>) {
    let truth = Arc::new(Mutex::new(HashMap::new()));
    (Box::new(OraclePnp { truth: truth.clone() }), truth)
}

impl PnpSolver for OraclePnp {
    fn estimate_initial_pose(
        &self,
        blobs: &[Blob],
        device_id: u8,
        _model: &LedModel,
        _intrinsics: &CameraIntrinsics,
        pose: &mut Pose,
        _use_prior: bool,
    ) -> bool {
        let labelled = blobs
            .iter()
            .filter(|b| b.led_id.device_id() == Some(device_id))
            .count();
        if labelled < 4 {
            return false;
        }
        match self.truth.lock().get(&device_id) {
            Some(truth) => {
                *pose = *truth;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------
// Correspondence search fake
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct SearchAnswer {
    pub pose: Pose,
    pub strong: bool,
    /// Minimum unclaimed (or own) blobs for the search to succeed.
    pub min_blobs: usize,
}

#[derive(Default)]
pub struct SearchState {
    pub models: HashMap<u8, Arc<LedModel>>,
    pub blobs: Vec<Blob>,
    pub answers: HashMap<u8, SearchAnswer>,
    /// Every search invocation: (device, flags, aligned).
    pub calls: Vec<(u8, SearchFlags, bool)>,
}

pub struct ScriptedSearch {
    state: Arc<Mutex<SearchState>>,
}

pub fn scripted_search() -> (Box<dyn CorrespondenceSearch>, Arc<Mutex<SearchState>>) {
    let state = Arc::new(Mutex::new(SearchState::default()));
    (Box::new(ScriptedSearch { state: state.clone() }), state)
}

impl ScriptedSearch {
    fn answer(
        &self,
        device_id: u8,
        flags: SearchFlags,
        aligned: bool,
        pose: &mut Pose,
        metrics: &mut PoseMetrics,
    ) -> bool {
        let mut state = self.state.lock();
        state.calls.push((device_id, flags, aligned));

        let available = state
            .blobs
            .iter()
            .filter(|b| {
                flags.contains(SearchFlags::MATCH_ALL_BLOBS)
                    || !b.led_id.is_valid()
                    || b.led_id.device_id() == Some(device_id)
            })
            .count();
        let model_leds = state.models.get(&device_id).map(|m| m.len()).unwrap_or(0);

        let Some(answer) = state.answers.get(&device_id).cloned() else {
            *metrics = PoseMetrics::default();
            return false;
        };

        if available >= answer.min_blobs {
            *pose = answer.pose;
            *metrics = PoseMetrics {
                matched_blobs: available.min(model_leds) as u32,
                visible_leds: model_leds as u32,
                reprojection_error: 0.5,
                good_pose_match: true,
                strong_pose_match: answer.strong,
            };
            true
        } else {
            *metrics = PoseMetrics {
                matched_blobs: available as u32,
                visible_leds: model_leds as u32,
                reprojection_error: f64::INFINITY,
                good_pose_match: false,
                strong_pose_match: false,
            };
            false
        }
    }
}

impl CorrespondenceSearch for ScriptedSearch {
    fn set_model(&mut self, device_id: u8, model: Arc<LedModel>) -> bool {
        self.state.lock().models.insert(device_id, model);
        true
    }

    fn set_blobs(&mut self, blobs: &[Blob]) {
        self.state.lock().blobs = blobs.to_vec();
    }

    fn find_one_pose(
        &mut self,
        device_id: u8,
        flags: SearchFlags,
        pose: &mut Pose,
        metrics: &mut PoseMetrics,
    ) -> bool {
        self.answer(device_id, flags, false, pose, metrics)
    }

    fn find_one_pose_aligned(
        &mut self,
        device_id: u8,
        flags: SearchFlags,
        pose: &mut Pose,
        _gravity: &Vector3<f64>,
        _swing: &UnitQuaternion<f64>,
        _tolerance_rad: f64,
        metrics: &mut PoseMetrics,
    ) -> bool {
        self.answer(device_id, flags, true, pose, metrics)
    }
}

// ---------------------------------------------------------------------
// Blob detector fake
// ---------------------------------------------------------------------

/// Blocks the fast worker inside `process` while closed. Open it before
/// shutting the rig down.
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new_closed() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    fn wait_open(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

#[derive(Default)]
pub struct DetectorState {
    /// Blob sets served frame by frame; `default_blobs` serves when empty.
    pub queue: VecDeque<Vec<Blob>>,
    pub default_blobs: Option<Vec<Blob>>,
    /// Labels persisted across frames (index-aligned with the blob sets).
    pub label_store: Vec<LedLabel>,
    /// Every `update_labels` publication: (device, labels per blob).
    pub published: Vec<(u8, Vec<LedLabel>)>,
    pub processed: usize,
    pub released: usize,
}

pub struct FakeDetector {
    state: Arc<Mutex<DetectorState>>,
    gate: Option<Arc<Gate>>,
}

pub fn fake_detector(gate: Option<Arc<Gate>>) -> (Box<dyn BlobDetector>, Arc<Mutex<DetectorState>>) {
    let state = Arc::new(Mutex::new(DetectorState::default()));
    (
        Box::new(FakeDetector {
            state: state.clone(),
            gate,
        }),
        state,
    )
}

impl BlobDetector for FakeDetector {
    fn process(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _led_pattern_phase: u8,
    ) -> Option<BlobObservation> {
        if let Some(gate) = &self.gate {
            gate.wait_open();
        }
        let mut state = self.state.lock();
        state.processed += 1;

        let mut blobs = match state.queue.pop_front() {
            Some(blobs) => blobs,
            None => state.default_blobs.clone()?,
        };
        for (i, blob) in blobs.iter_mut().enumerate() {
            if let Some(&label) = state.label_store.get(i) {
                blob.led_id = label;
                blob.prev_led_id = label;
            }
        }
        Some(BlobObservation::new(blobs))
    }

    fn release_observation(&mut self, _observation: BlobObservation) {
        self.state.lock().released += 1;
    }

    fn update_labels(&mut self, observation: &BlobObservation, device_id: u8) {
        let mut state = self.state.lock();
        let labels: Vec<LedLabel> = observation.blobs.iter().map(|b| b.led_id).collect();
        if state.label_store.len() < labels.len() {
            state.label_store.resize(labels.len(), LedLabel::INVALID);
        }
        for (i, &label) in labels.iter().enumerate() {
            if label.device_id() == Some(device_id) {
                state.label_store[i] = label;
            } else if state.label_store[i].device_id() == Some(device_id) {
                state.label_store[i] = LedLabel::INVALID;
            }
        }
        state.published.push((device_id, labels));
    }
}

// ---------------------------------------------------------------------
// Transport stream fake
// ---------------------------------------------------------------------

struct StreamState {
    sink: Option<Arc<dyn StreamSink>>,
    pending: Option<FrameBuffer>,
    started: bool,
}

pub struct FakeStream {
    params: StreamParams,
    state: Arc<Mutex<StreamState>>,
}

#[derive(Clone)]
pub struct StreamHandle {
    state: Arc<Mutex<StreamState>>,
}

pub fn fake_stream(width: u32, height: u32) -> (Box<dyn FrameStream>, StreamHandle) {
    let state = Arc::new(Mutex::new(StreamState {
        sink: None,
        pending: None,
        started: false,
    }));
    (
        Box::new(FakeStream {
            params: StreamParams {
                width,
                height,
                frame_size: (width * height) as usize,
            },
            state: state.clone(),
        }),
        StreamHandle { state },
    )
}

impl FrameStream for FakeStream {
    fn setup(&mut self, sink: Arc<dyn StreamSink>) -> Result<StreamParams, TrackerError> {
        self.state.lock().sink = Some(sink);
        Ok(self.params)
    }

    fn start(&mut self) -> Result<(), TrackerError> {
        self.state.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().started = false;
    }

    fn set_frame(&self, buffer: FrameBuffer) {
        let mut state = self.state.lock();
        match &state.pending {
            // A reused frame lends an empty buffer: keep capturing into
            // the one already held.
            Some(existing) if buffer.data.is_empty() && existing.frame_id == buffer.frame_id => {}
            _ => state.pending = Some(buffer),
        }
    }
}

impl StreamHandle {
    /// Announce a start-of-frame at `start_ts`, as the USB layer would.
    pub fn fire_sof(&self, start_ts: u64) {
        let sink = self.state.lock().sink.clone().expect("stream not set up");
        sink.start_of_frame(start_ts);
    }

    /// Deliver the pending frame back to the sensor.
    pub fn deliver(&self) {
        let (sink, buffer) = {
            let mut state = self.state.lock();
            let sink = state.sink.clone().expect("stream not set up");
            let buffer = state.pending.take().expect("no frame buffer pending");
            (sink, buffer)
        };
        sink.frame_captured(buffer);
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}

// ---------------------------------------------------------------------
// Rig assembly
// ---------------------------------------------------------------------

pub struct Rig {
    pub tracker: Tracker,
    pub clock: Arc<ManualClock>,
    pub rx: Receiver<TelemetryEvent>,
    pub stream: StreamHandle,
    pub sensor: Arc<SensorContext>,
    pub detector: Arc<Mutex<DetectorState>>,
    pub search: Arc<Mutex<SearchState>>,
    pub pnp_truth: Arc<Mutex<HashMap<u8, Pose>>>,
}

pub fn build_rig(
    config: TrackerConfig,
    gate: Option<Arc<Gate>>,
    scorer: ProjectionScorer,
) -> Rig {
    let clock = ManualClock::new();
    let (telemetry, rx) = TelemetrySender::channel();
    let tracker = Tracker::new(config, clock.clone(), telemetry);

    let (stream, stream_handle) = fake_stream(1280, 960);
    let (detector, detector_state) = fake_detector(gate);
    let (search, search_state) = scripted_search();
    let (pnp, pnp_truth) = oracle_pnp();

    let sensor = SensorContext::new(
        0,
        "SN-TEST-01",
        intrinsics(),
        stream,
        detector,
        search,
        pnp,
        Box::new(scorer),
        tracker.core().clone(),
    )
    .expect("sensor setup");

    tracker.add_sensor(sensor.clone());
    sensor.start().expect("sensor start");

    Rig {
        tracker,
        clock,
        rx,
        stream: stream_handle,
        sensor,
        detector: detector_state,
        search: search_state,
        pnp_truth,
    }
}

pub fn add_device(
    rig: &Rig,
    id: u8,
    kind: DeviceKind,
) -> (Arc<TrackedDevice>, Arc<Mutex<FilterLog>>) {
    let (filter, log) = scripted_filter();
    let device = rig
        .tracker
        .add_device(id, kind, Pose::identity(), grid_led_model(), filter);
    (device, log)
}

// ---------------------------------------------------------------------
// Synchronisation helpers
// ---------------------------------------------------------------------

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Wait until a FrameRelease event for the frame started at `frame_ts`
/// arrives, collecting everything seen along the way.
pub fn wait_for_frame_release(
    rx: &Receiver<TelemetryEvent>,
    frame_ts: u64,
    timeout: Duration,
    seen: &mut Vec<TelemetryEvent>,
) -> bool {
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                let hit = matches!(
                    &event,
                    TelemetryEvent::FrameRelease { frame_local_ts, .. } if *frame_local_ts == frame_ts
                );
                seen.push(event);
                if hit {
                    return true;
                }
            }
            Err(_) => return false,
        }
    }
    false
}

/// Wait until FrameRelease events for every timestamp in `frame_ts` have
/// been observed (counting events already collected in `seen`).
pub fn wait_for_frame_releases(
    rx: &Receiver<TelemetryEvent>,
    frame_ts: &[u64],
    timeout: Duration,
    seen: &mut Vec<TelemetryEvent>,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let mut missing: Vec<u64> = frame_ts
            .iter()
            .copied()
            .filter(|ts| {
                !seen.iter().any(|event| {
                    matches!(
                        event,
                        TelemetryEvent::FrameRelease { frame_local_ts, .. } if frame_local_ts == ts
                    )
                })
            })
            .collect();
        missing.dedup();
        if missing.is_empty() {
            return true;
        }

        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        match rx.recv_timeout(remaining) {
            Ok(event) => seen.push(event),
            Err(_) => return false,
        }
    }
}

pub fn drain_events(rx: &Receiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count_starts_and_releases(events: &[TelemetryEvent]) -> (usize, usize) {
    let starts = events
        .iter()
        .filter(|e| matches!(e, TelemetryEvent::FrameStart { .. }))
        .count();
    let releases = events
        .iter()
        .filter(|e| matches!(e, TelemetryEvent::FrameRelease { .. }))
        .count();
    (starts, releases)
}
