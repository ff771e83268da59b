//! Tracker core: the device set, the exposure broadcast, and frame
//! lifecycle fan-out to devices.
//!
//! Ownership is split to keep references acyclic: sensors hold a
//! non-owning `Arc<TrackerCore>` for callbacks, while the outer
//! [`Tracker`] owns both the core and the sensors (plus the transport
//! event thread).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::fusion::{OutputPoseFilter, PoseFilter};
use crate::geometry::Pose;
use crate::led::LedModel;
use crate::sensor::SensorContext;
use crate::telemetry::TelemetrySender;
use crate::transport::EventPump;

use super::device::{DeviceKind, TrackedDevice};
use super::exposure::{ExposureInfo, MAX_TRACKED_DEVICES};

struct CoreState {
    have_exposure_info: bool,
    exposure_info: ExposureInfo,
    devices: Vec<Arc<TrackedDevice>>,
}

/// Shared tracker state reachable from sensor callbacks.
pub struct TrackerCore {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    telemetry: TelemetrySender,
    state: Mutex<CoreState>,
}

impl TrackerCore {
    pub fn new(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        telemetry: TelemetrySender,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            telemetry,
            state: Mutex::new(CoreState {
                have_exposure_info: false,
                exposure_info: ExposureInfo::default(),
                devices: Vec::new(),
            }),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Snapshot of the current exposure info, if any exposure has been
    /// registered yet.
    pub fn get_exposure_info(&self) -> Option<ExposureInfo> {
        let state = self.state.lock();
        state.have_exposure_info.then(|| state.exposure_info)
    }

    /// Snapshot of the tracked devices, in index order.
    pub fn devices(&self) -> Vec<Arc<TrackedDevice>> {
        self.state.lock().devices.clone()
    }

    pub(crate) fn add_device(
        &self,
        id: u8,
        kind: DeviceKind,
        fusion_to_model: Pose,
        leds: Arc<LedModel>,
        filter: Box<dyn PoseFilter>,
    ) -> Arc<TrackedDevice> {
        let mut state = self.state.lock();
        assert!(
            state.devices.len() < MAX_TRACKED_DEVICES,
            "tracked device capacity exceeded"
        );

        let device = TrackedDevice::new(
            id,
            kind,
            state.devices.len(),
            fusion_to_model,
            leds,
            filter,
            self.config.observation_policy,
            self.config.pose_lost_threshold_ns(),
            self.config.max_pending_imu_observations,
            OutputPoseFilter::new(
                self.config.output_filter_pos_tau_s,
                self.config.output_filter_orient_tau_s,
            ),
            self.telemetry.clone(),
        );
        state.devices.push(device.clone());
        device
    }

    /// Register a new exposure. When only the LED pattern phase moved,
    /// the stored info is refreshed in place; a new count snapshots every
    /// device, assigns delay slots, and returns the broadcast payload.
    pub fn update_exposure(
        &self,
        hmd_ts: u32,
        exposure_count: u16,
        exposure_hmd_ts: u32,
        led_pattern_phase: u8,
    ) -> Option<ExposureInfo> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.exposure_info.led_pattern_phase != led_pattern_phase {
            debug!(
                "{:.3} LED pattern phase changed to {}",
                self.clock.now_ns() as f64 / 1e6,
                led_pattern_phase
            );
            state.exposure_info.led_pattern_phase = led_pattern_phase;
        }

        if state.exposure_info.count == exposure_count {
            return None;
        }

        let now = self.clock.now_ns();
        state.exposure_info.local_ts = now;
        state.exposure_info.count = exposure_count;
        state.exposure_info.hmd_ts = exposure_hmd_ts;
        state.exposure_info.led_pattern_phase = led_pattern_phase;
        state.have_exposure_info = true;

        debug!(
            "{:.3} Have new exposure TS {} count {} LED pattern phase {}",
            now as f64 / 1e6,
            exposure_hmd_ts,
            exposure_count,
            led_pattern_phase
        );

        if (exposure_hmd_ts.wrapping_sub(hmd_ts) as i32) < -1500 {
            warn!(
                "Exposure timestamp {} was more than 1.5 IMU samples earlier than IMU ts {} by {} µs",
                exposure_hmd_ts,
                hmd_ts,
                hmd_ts.wrapping_sub(exposure_hmd_ts)
            );
        }

        state.exposure_info.n_devices = state.devices.len();
        for (i, dev) in state.devices.iter().enumerate() {
            dev.update_exposure(&mut state.exposure_info.devices[i]);
            dev.send_exposure_telemetry(
                now,
                hmd_ts,
                exposure_hmd_ts,
                exposure_count,
                &state.exposure_info.devices[i],
            );
        }

        Some(state.exposure_info)
    }

    /// A sensor announced the start of a frame capture: every device with
    /// an entry in the bound exposure claims its delay slot.
    pub fn frame_start(&self, local_ts: u64, source: &str, mut info: Option<&mut ExposureInfo>) {
        let guard = self.state.lock();
        for (i, dev) in guard.devices.iter().enumerate() {
            // This device might not have exposure info for this frame if
            // it recently came online.
            let dev_info = match &mut info {
                Some(exposure) => exposure.device_mut(i),
                None => None,
            };
            dev.on_frame_start(local_ts, dev_info, source);
        }
    }

    /// A sensor finished receiving a frame.
    pub fn frame_captured(
        &self,
        local_ts: u64,
        frame_start_local_ts: u64,
        info: &ExposureInfo,
        source: &str,
    ) {
        let guard = self.state.lock();
        for (i, dev) in guard.devices.iter().enumerate() {
            dev.on_frame_captured(local_ts, frame_start_local_ts, info.device(i), source);
        }
    }

    /// A frame finished its pipeline pass (or was abandoned): release
    /// every remaining delay-slot claim it holds.
    pub fn frame_release(
        &self,
        local_ts: u64,
        frame_local_ts: u64,
        mut info: Option<&mut ExposureInfo>,
        source: &str,
    ) {
        let guard = self.state.lock();
        for (i, dev) in guard.devices.iter().enumerate() {
            let dev_info = match &mut info {
                Some(exposure) => exposure.device_mut(i),
                None => None,
            };
            dev.on_frame_release(local_ts, frame_local_ts, dev_info, source);
        }
    }

    /// A frame's exposure association changed mid-capture: move every
    /// device's claim from the old exposure to the new one.
    pub fn frame_changed_exposure(
        &self,
        mut old_info: Option<&mut ExposureInfo>,
        new_info: &mut ExposureInfo,
    ) {
        let guard = self.state.lock();
        for (i, dev) in guard.devices.iter().enumerate() {
            let old = match &mut old_info {
                Some(exposure) => exposure.device_mut(i),
                None => None,
            };
            dev.on_frame_changed_exposure(old, new_info.device_mut(i));
        }
    }
}

struct EventThread {
    completed: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The tracker: owns the core, the sensors, and the transport event
/// thread.
pub struct Tracker {
    core: Arc<TrackerCore>,
    sensors: Mutex<Vec<Arc<SensorContext>>>,
    event_thread: Mutex<Option<EventThread>>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>, telemetry: TelemetrySender) -> Self {
        Self {
            core: TrackerCore::new(config, clock, telemetry),
            sensors: Mutex::new(Vec::new()),
            event_thread: Mutex::new(None),
        }
    }

    pub fn core(&self) -> &Arc<TrackerCore> {
        &self.core
    }

    /// Bring a new device online. The filter must already be initialised
    /// for [`super::NUM_POSE_DELAY_SLOTS`] delay slots.
    pub fn add_device(
        &self,
        id: u8,
        kind: DeviceKind,
        fusion_to_model: Pose,
        leds: Arc<LedModel>,
        filter: Box<dyn PoseFilter>,
    ) -> Arc<TrackedDevice> {
        let device = self.core.add_device(id, kind, fusion_to_model, leds, filter);

        // Tell the sensors about the new device.
        let sensors: Vec<_> = self.sensors.lock().clone();
        for sensor in &sensors {
            if !sensor.add_device(&device) {
                error!(
                    "Failed to configure object tracking for device {} on sensor {}",
                    id,
                    sensor.serial()
                );
            }
        }

        info!("device {} online. Now tracking.", id);
        device
    }

    /// Register a sensor and hand it the devices that already exist.
    pub fn add_sensor(&self, sensor: Arc<SensorContext>) {
        for device in self.core.devices() {
            if !sensor.add_device(&device) {
                error!(
                    "Failed to configure object tracking for device {} on sensor {}",
                    device.id(),
                    sensor.serial()
                );
            }
        }
        self.sensors.lock().push(sensor);
    }

    /// Register a new exposure and broadcast it to every sensor. The
    /// broadcast runs outside the tracker lock so sensors can call back
    /// into the core.
    pub fn update_exposure(
        &self,
        hmd_ts: u32,
        exposure_count: u16,
        exposure_hmd_ts: u32,
        led_pattern_phase: u8,
    ) {
        let Some(info) =
            self.core
                .update_exposure(hmd_ts, exposure_count, exposure_hmd_ts, led_pattern_phase)
        else {
            return;
        };

        let sensors: Vec<_> = self.sensors.lock().clone();
        for sensor in &sensors {
            sensor.update_exposure(&info);
        }
    }

    /// Spawn the transport event thread: polls the pump with a 100 ms
    /// timeout until shutdown.
    pub fn start_event_thread(&self, pump: Box<dyn EventPump>) {
        let completed = Arc::new(AtomicBool::new(false));
        let thread_completed = completed.clone();
        let handle = thread::spawn(move || {
            while !thread_completed.load(Ordering::SeqCst) {
                pump.handle_events(Duration::from_millis(100));
            }
        });
        *self.event_thread.lock() = Some(EventThread { completed, handle });
    }

    /// Stop sensors, then the transport event thread.
    pub fn shutdown(&self) {
        let sensors: Vec<_> = self.sensors.lock().drain(..).collect();
        for sensor in &sensors {
            sensor.stop();
        }

        if let Some(event_thread) = self.event_thread.lock().take() {
            event_thread.completed.store(true, Ordering::SeqCst);
            let _ = event_thread.handle.join();
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
