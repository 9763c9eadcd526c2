//! Software stand-in for a USB3 machine-vision camera array.
//!
//! Devices share a trigger bus, so a software trigger on the master (with its
//! Line2 configured as output) fans out to every slave listening on Line3, the
//! way the physical sync cable does.

use crate::app_config::SimulatedDeviceConfig;
use crate::camera::camera_media::{PixelFormat, RawFrame};
use crate::config_loader::MasterConfig;
use crate::core::capture_source::{CameraHandle, CameraSystem, FeatureValue};
use crate::errors::CameraError;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait applied when the caller passes no grab timeout.
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_BINNING: i64 = 4;

#[derive(Debug, Default)]
struct BusState {
    pulses: u64,
    free_run: Option<(Instant, f64)>,
}

/// Shared sync line between all simulated devices.
#[derive(Debug, Default)]
pub struct TriggerBus {
    inner: Mutex<BusState>,
}

impl TriggerBus {
    pub fn pulse(&self) {
        self.inner.lock().pulses += 1;
    }

    pub fn pulses(&self) -> u64 {
        let state = self.inner.lock();
        state.pulses + state.free_run.map_or(0, |(start, fps)| free_run_count(start, fps))
    }

    /// Starts a periodic pulse train, as a free-running master or an external generator does.
    pub fn start_free_run(&self, fps: f64) {
        let mut state = self.inner.lock();
        if state.free_run.is_none() {
            state.free_run = Some((Instant::now(), fps));
        }
    }

    pub fn stop_free_run(&self) {
        let mut state = self.inner.lock();
        if let Some((start, fps)) = state.free_run.take() {
            state.pulses += free_run_count(start, fps);
        }
    }
}

fn free_run_count(start: Instant, fps: f64) -> u64 {
    if fps <= 0.0 {
        return 0;
    }
    (start.elapsed().as_secs_f64() * fps) as u64 + 1
}

/// Faults injected into a device.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Any write to this feature fails with a device error.
    pub reject_feature: Option<String>,
    /// Binning writes are accepted but not applied.
    pub ignore_binning: bool,
    /// Every grab from this (1-based) grab onwards fails with a device error.
    pub fail_grab_at: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum FrameSource {
    Software,
    Line,
    FreeRun { start: Instant, fps: f64 },
}

#[derive(Debug)]
struct SimState {
    device: SimulatedDeviceConfig,
    initialized: bool,
    streaming: bool,
    features: HashMap<String, FeatureValue>,
    feature_calls: Vec<(String, FeatureValue)>,
    lifecycle: Vec<String>,
    source: FrameSource,
    drives_bus: bool,
    pending_software: u64,
    consumed: u64,
    frames_emitted: u64,
    grabs: u64,
    faults: SimFaults,
}

impl SimState {
    fn new(device: SimulatedDeviceConfig) -> Self {
        let mut features = HashMap::new();
        let int = |v: i64| FeatureValue::Int(v);
        let en = FeatureValue::enumeration;
        for (name, value) in [
            ("WidthMax", int(device.width as i64)),
            ("HeightMax", int(device.height as i64)),
            ("Width", int(device.width as i64)),
            ("Height", int(device.height as i64)),
            ("OffsetX", int(0)),
            ("OffsetY", int(0)),
            ("BinningHorizontal", int(1)),
            ("BinningVertical", int(1)),
            ("StreamBufferCountManual", int(10)),
            ("PixelFormat", en("Mono8")),
            ("AcquisitionMode", en("Continuous")),
            ("ExposureMode", en("Timed")),
            ("ExposureAuto", en("Continuous")),
            ("ExposureTime", FeatureValue::Float(10_000.0)),
            ("GainAuto", en("Continuous")),
            ("Gain", FeatureValue::Float(0.0)),
            ("AutoExposureTargetGreyValueAuto", en("Continuous")),
            ("AutoExposureTargetGreyValue", FeatureValue::Float(35.0)),
            ("ReverseX", FeatureValue::Bool(false)),
            ("ReverseY", FeatureValue::Bool(false)),
            ("TriggerMode", en("Off")),
            ("TriggerSource", en("Software")),
            ("TriggerSelector", en("FrameStart")),
            ("TriggerOverlap", en("Off")),
            ("TriggerActivation", en("RisingEdge")),
            ("LineSelector", en("Line0")),
            ("LineMode", en("Input")),
            ("AcquisitionFrameRateEnable", FeatureValue::Bool(true)),
        ] {
            features.insert(name.to_string(), value);
        }
        SimState {
            device,
            initialized: false,
            streaming: false,
            features,
            feature_calls: Vec::new(),
            lifecycle: Vec::new(),
            source: FrameSource::Software,
            drives_bus: false,
            pending_software: 0,
            consumed: 0,
            frames_emitted: 0,
            grabs: 0,
            faults: SimFaults::default(),
        }
    }

    fn enum_feature(&self, name: &str) -> &str {
        self.features.get(name).and_then(|v| v.as_enum()).unwrap_or("")
    }

    fn int_feature(&self, name: &str) -> i64 {
        self.features.get(name).and_then(|v| v.as_int()).unwrap_or(0)
    }

    fn invalid(&self, feature: &str, details: String) -> CameraError {
        CameraError::InvalidFeatureValue { camera_id: self.device.id.clone(), feature: feature.to_string(), details }
    }

    fn write_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        let id = self.device.id.clone();
        if !self.initialized {
            return Err(CameraError::NotInitialized(id));
        }
        if self.faults.reject_feature.as_deref() == Some(name) {
            return Err(CameraError::Device { camera_id: id, details: format!("unable to set {}", name) });
        }
        let current = self
            .features
            .get(name)
            .ok_or_else(|| CameraError::UnknownFeature { camera_id: id.clone(), feature: name.to_string() })?;
        if std::mem::discriminant(current) != std::mem::discriminant(&value) {
            return Err(self.invalid(name, format!("wrong value type {:?}", value)));
        }
        self.feature_calls.push((name.to_string(), value.clone()));

        match (name, &value) {
            ("WidthMax" | "HeightMax", _) => return Err(self.invalid(name, "read-only".to_string())),
            ("Gain", FeatureValue::Float(v)) if *v > self.device.max_gain || *v < 0.0 => {
                return Err(self.invalid(name, format!("{} outside [0, {}]", v, self.device.max_gain)));
            }
            ("ExposureTime", FeatureValue::Float(v)) if *v > self.device.max_exposure || *v <= 0.0 => {
                return Err(self.invalid(name, format!("{} outside (0, {}]", v, self.device.max_exposure)));
            }
            ("BinningHorizontal" | "BinningVertical", FeatureValue::Int(b)) => {
                if !(1..=MAX_BINNING).contains(b) {
                    return Err(self.invalid(name, format!("binning {} unsupported", b)));
                }
                if self.faults.ignore_binning {
                    return Ok(());
                }
                let (max_name, size_name, offset_name, sensor) = if name == "BinningHorizontal" {
                    ("WidthMax", "Width", "OffsetX", self.device.width as i64)
                } else {
                    ("HeightMax", "Height", "OffsetY", self.device.height as i64)
                };
                self.features.insert(max_name.to_string(), FeatureValue::Int(sensor / b));
                self.features.insert(size_name.to_string(), FeatureValue::Int(sensor / b));
                self.features.insert(offset_name.to_string(), FeatureValue::Int(0));
            }
            ("Width" | "Height", FeatureValue::Int(v)) => {
                let (max_name, offset_name) =
                    if name == "Width" { ("WidthMax", "OffsetX") } else { ("HeightMax", "OffsetY") };
                let max = self.int_feature(max_name);
                if *v < 1 || *v + self.int_feature(offset_name) > max {
                    return Err(self.invalid(name, format!("{} exceeds {} of {}", v, max_name, max)));
                }
            }
            ("OffsetX" | "OffsetY", FeatureValue::Int(v)) => {
                let (max_name, size_name) =
                    if name == "OffsetX" { ("WidthMax", "Width") } else { ("HeightMax", "Height") };
                if *v < 0 || *v + self.int_feature(size_name) > self.int_feature(max_name) {
                    return Err(self.invalid(name, format!("offset {} out of range", v)));
                }
            }
            ("PixelFormat", FeatureValue::Enum(v)) if PixelFormat::from_feature(v).is_none() => {
                return Err(self.invalid(name, format!("Unable to set PixelFormat to {}", v)));
            }
            _ => {}
        }
        self.features.insert(name.to_string(), value);
        Ok(())
    }

    fn frames_available(&self, bus: &TriggerBus) -> bool {
        match self.source {
            FrameSource::Software => self.pending_software > 0,
            FrameSource::Line => bus.pulses() > self.consumed,
            FrameSource::FreeRun { start, fps } => free_run_count(start, fps) > self.consumed,
        }
    }

    fn take_frame(&mut self, epoch: Instant) -> RawFrame {
        match self.source {
            FrameSource::Software => self.pending_software -= 1,
            FrameSource::Line | FrameSource::FreeRun { .. } => self.consumed += 1,
        }
        let width = self.int_feature("Width").max(1) as u32;
        let height = self.int_feature("Height").max(1) as u32;
        let pixel_format = PixelFormat::from_feature(self.enum_feature("PixelFormat")).unwrap_or(PixelFormat::Mono8);
        let frame_id = self.frames_emitted;
        self.frames_emitted += 1;
        let bpp = pixel_format.bytes_per_pixel();
        let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
        for y in 0..height as u64 {
            for x in 0..(width as u64 * bpp as u64) {
                data.push(((x + y + frame_id) & 0xff) as u8);
            }
        }
        RawFrame {
            width,
            height,
            pixel_format,
            data,
            timestamp_ns: epoch.elapsed().as_nanos() as u64,
            frame_id,
        }
    }
}

/// Read-only view into a simulated device, for inspecting what the engine did.
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimProbe {
    pub fn feature(&self, name: &str) -> Option<FeatureValue> {
        self.state.lock().features.get(name).cloned()
    }

    /// Every feature write in call order, including rejected ones.
    pub fn feature_calls(&self) -> Vec<(String, FeatureValue)> {
        self.state.lock().feature_calls.clone()
    }

    pub fn clear_feature_calls(&self) {
        self.state.lock().feature_calls.clear();
    }

    pub fn lifecycle(&self) -> Vec<String> {
        self.state.lock().lifecycle.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.state.lock().faults = faults;
    }

    /// Snapshot of every feature value, sorted by name.
    pub fn feature_snapshot(&self) -> Vec<(String, FeatureValue)> {
        let mut all: Vec<_> = self.state.lock().features.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

pub struct SimulatedCamera {
    id: String,
    state: Arc<Mutex<SimState>>,
    bus: Arc<TriggerBus>,
    epoch: Instant,
}

impl CameraHandle for SimulatedCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn model_name(&self) -> String {
        self.state.lock().device.model.clone()
    }

    fn init(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        state.initialized = true;
        state.lifecycle.push("init".to_string());
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.streaming {
            return Err(CameraError::Device { camera_id: self.id.clone(), details: "deinit while streaming".to_string() });
        }
        state.initialized = false;
        state.lifecycle.push("deinit".to_string());
        Ok(())
    }

    fn begin_acquisition(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(CameraError::NotInitialized(self.id.clone()));
        }
        let triggered = state.enum_feature("TriggerMode") == "On";
        let source = if !triggered {
            FrameSource::FreeRun { start: Instant::now(), fps: state.device.fps }
        } else if state.enum_feature("TriggerSource") == "Software" {
            FrameSource::Software
        } else {
            FrameSource::Line
        };
        state.source = source;
        state.drives_bus = state.enum_feature("LineMode") == "Output";
        if state.drives_bus && !triggered {
            self.bus.start_free_run(state.device.fps);
        }
        state.consumed = if triggered { self.bus.pulses() } else { 0 };
        state.pending_software = 0;
        state.frames_emitted = 0;
        state.streaming = true;
        state.lifecycle.push("begin_acquisition".to_string());
        debug!("[sim {}] streaming with source {:?}", self.id, state.source);
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.streaming && state.drives_bus && matches!(state.source, FrameSource::FreeRun { .. }) {
            self.bus.stop_free_run();
        }
        state.streaming = false;
        state.pending_software = 0;
        state.lifecycle.push("end_acquisition".to_string());
        Ok(())
    }

    fn grab_frame(&mut self, timeout: Option<Duration>) -> Result<RawFrame, CameraError> {
        let wait = timeout.unwrap_or(DEFAULT_DEVICE_TIMEOUT);
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock();
                if !state.initialized {
                    return Err(CameraError::NotInitialized(self.id.clone()));
                }
                if !state.streaming {
                    return Err(CameraError::NotStreaming(self.id.clone()));
                }
                if let Some(fail_at) = state.faults.fail_grab_at {
                    if state.grabs + 1 >= fail_at {
                        state.grabs += 1;
                        return Err(CameraError::Device {
                            camera_id: self.id.clone(),
                            details: "simulated device disconnect".to_string(),
                        });
                    }
                }
                if state.frames_available(&self.bus) {
                    state.grabs += 1;
                    return Ok(state.take_frame(self.epoch));
                }
            }
            if Instant::now() >= deadline {
                return Err(CameraError::Timeout { camera_id: self.id.clone(), timeout_ms: wait.as_millis() as u64 });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        self.state.lock().write_feature(name, value)
    }

    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        self.state
            .lock()
            .features
            .get(name)
            .cloned()
            .ok_or_else(|| CameraError::UnknownFeature { camera_id: self.id.clone(), feature: name.to_string() })
    }

    fn feature_max(&self, name: &str) -> Result<f64, CameraError> {
        let state = self.state.lock();
        match name {
            "Gain" => Ok(state.device.max_gain),
            "ExposureTime" => Ok(state.device.max_exposure),
            "Width" => Ok(state.int_feature("WidthMax") as f64),
            "Height" => Ok(state.int_feature("HeightMax") as f64),
            _ => Err(CameraError::UnknownFeature { camera_id: self.id.clone(), feature: name.to_string() }),
        }
    }

    fn trigger(&mut self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if !state.streaming {
            return Err(CameraError::NotStreaming(self.id.clone()));
        }
        if !matches!(state.source, FrameSource::Software) {
            return Err(CameraError::Device {
                camera_id: self.id.clone(),
                details: "software trigger issued while trigger source is not Software".to_string(),
            });
        }
        state.pending_software += 1;
        if state.drives_bus {
            self.bus.pulse();
        }
        Ok(())
    }
}

/// The simulated SDK system object.
pub struct SimulatedSystem {
    devices: Vec<(String, Arc<Mutex<SimState>>)>,
    bus: Arc<TriggerBus>,
    epoch: Instant,
}

impl SimulatedSystem {
    pub fn new(devices: Vec<SimulatedDeviceConfig>) -> Self {
        let devices = devices
            .into_iter()
            .map(|device| (device.id.clone(), Arc::new(Mutex::new(SimState::new(device)))))
            .collect();
        SimulatedSystem { devices, bus: Arc::new(TriggerBus::default()), epoch: Instant::now() }
    }

    /// Devices with default geometry for each id.
    pub fn with_ids(ids: &[&str]) -> Self {
        Self::new(
            ids.iter()
                .map(|id| SimulatedDeviceConfig { id: id.to_string(), ..Default::default() })
                .collect(),
        )
    }

    /// The `simulation.devices` list, or one default device per configured camera.
    pub fn from_config(config: &MasterConfig) -> Self {
        if config.simulation.devices.is_empty() {
            let ids: Vec<&str> = config.cameras.iter().map(|c| c.id.as_str()).collect();
            Self::with_ids(&ids)
        } else {
            Self::new(config.simulation.devices.clone())
        }
    }

    pub fn probe(&self, id: &str) -> Option<SimProbe> {
        self.devices
            .iter()
            .find(|(dev_id, _)| dev_id == id)
            .map(|(_, state)| SimProbe { state: state.clone() })
    }

    pub fn remove_device(&mut self, id: &str) {
        self.devices.retain(|(dev_id, _)| dev_id != id);
    }

    /// Drives the shared sync line at `fps`, standing in for an external trigger source.
    pub fn start_external_trigger(&self, fps: f64) {
        info!("⏱️ Simulated external trigger running at {:.1} Hz", fps);
        self.bus.start_free_run(fps);
    }

    pub fn bus(&self) -> Arc<TriggerBus> {
        self.bus.clone()
    }
}

impl CameraSystem for SimulatedSystem {
    fn library_version(&self) -> String {
        format!("camarray-sim {}", env!("CARGO_PKG_VERSION"))
    }

    fn enumerate(&mut self) -> Result<Vec<Box<dyn CameraHandle>>, CameraError> {
        Ok(self
            .devices
            .iter()
            .map(|(id, state)| {
                Box::new(SimulatedCamera {
                    id: id.clone(),
                    state: state.clone(),
                    bus: self.bus.clone(),
                    epoch: self.epoch,
                }) as Box<dyn CameraHandle>
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(system: &mut SimulatedSystem, index: usize) -> Box<dyn CameraHandle> {
        system.enumerate().unwrap().remove(index)
    }

    #[test]
    fn software_trigger_fans_out_to_line_slaves() {
        let mut system = SimulatedSystem::with_ids(&["m", "s"]);
        let mut cams = system.enumerate().unwrap();
        for cam in cams.iter_mut() {
            cam.init().unwrap();
        }
        let (master, slave) = cams.split_at_mut(1);
        let (master, slave) = (&mut master[0], &mut slave[0]);
        for (name, value) in [("TriggerMode", "On"), ("LineMode", "Output"), ("TriggerSource", "Software")] {
            master.set_feature(name, FeatureValue::enumeration(value)).unwrap();
        }
        for (name, value) in [("TriggerMode", "On"), ("LineMode", "Input"), ("TriggerSource", "Line3")] {
            slave.set_feature(name, FeatureValue::enumeration(value)).unwrap();
        }
        slave.begin_acquisition().unwrap();
        master.begin_acquisition().unwrap();

        let short = Some(Duration::from_millis(20));
        assert!(matches!(slave.grab_frame(short), Err(CameraError::Timeout { .. })));
        master.trigger().unwrap();
        let m = master.grab_frame(short).unwrap();
        let s = slave.grab_frame(short).unwrap();
        assert_eq!(m.frame_id, s.frame_id);
    }

    #[test]
    fn gain_above_max_is_rejected() {
        let mut system = SimulatedSystem::new(vec![SimulatedDeviceConfig {
            id: "0".into(),
            max_gain: 30.0,
            ..Default::default()
        }]);
        let mut cam = camera(&mut system, 0);
        cam.init().unwrap();
        assert!(cam.set_feature("Gain", FeatureValue::Float(50.0)).is_err());
        assert!(cam.set_feature("Gain", FeatureValue::Float(30.0)).is_ok());
    }

    #[test]
    fn binning_shrinks_geometry() {
        let mut system = SimulatedSystem::with_ids(&["0"]);
        let mut cam = camera(&mut system, 0);
        cam.init().unwrap();
        cam.set_feature("BinningHorizontal", FeatureValue::Int(2)).unwrap();
        cam.set_feature("BinningVertical", FeatureValue::Int(2)).unwrap();
        assert_eq!(cam.get_feature("Width").unwrap(), FeatureValue::Int(320));
        assert!(cam.verify_binning(2).unwrap());
    }

    #[test]
    fn ignored_binning_fails_verification() {
        let mut system = SimulatedSystem::with_ids(&["0"]);
        system.probe("0").unwrap().set_faults(SimFaults { ignore_binning: true, ..Default::default() });
        let mut cam = camera(&mut system, 0);
        cam.init().unwrap();
        cam.set_feature("BinningHorizontal", FeatureValue::Int(2)).unwrap();
        assert!(!cam.verify_binning(2).unwrap());
    }

    #[test]
    fn free_running_camera_streams_without_trigger() {
        let mut system = SimulatedSystem::with_ids(&["0"]);
        let mut cam = camera(&mut system, 0);
        cam.init().unwrap();
        cam.begin_acquisition().unwrap();
        let first = cam.grab_frame(Some(Duration::from_millis(500))).unwrap();
        let second = cam.grab_frame(Some(Duration::from_millis(500))).unwrap();
        assert_eq!(second.frame_id, first.frame_id + 1);
        assert_eq!(first.data.len(), 640 * 480);
    }

    #[test]
    fn unknown_feature_is_reported() {
        let mut system = SimulatedSystem::with_ids(&["0"]);
        let mut cam = camera(&mut system, 0);
        cam.init().unwrap();
        assert!(matches!(
            cam.set_feature("Bogus", FeatureValue::Int(1)),
            Err(CameraError::UnknownFeature { .. })
        ));
    }
}
