use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApplicationConfig {
    pub save_path: String,
    pub log_level: Option<String>, // CLI --debug wins over this
    pub control_listen_addr: Option<String>, // UDP address for trigger/reconfigure messages
    pub require_usbfs_memory_mb: Option<u32>,
    pub tf_prefix: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            save_path: "./output".to_string(),
            log_level: Some("info".to_string()),
            control_listen_addr: None,
            require_usbfs_memory_mb: None,
            tf_prefix: String::new(),
        }
    }
}

/// What the producer does when a camera's queue is full.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    Block,
    DropOldest,
    DropNewest,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub policy: QueuePolicy,
    pub warn_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: 200,
            policy: QueuePolicy::Block,
            warn_depth: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub master_cam: Option<String>,
    pub external_trigger: bool,
    pub on_demand_trigger: bool,
    pub manual_trigger: bool,
    pub max_rate_save: bool,
    pub save: bool,
    pub save_type: String, // "bmp", "jpg", "png", "tiff" or "bin"
    pub jpeg_quality: u8,
    pub frames: u64, // 0 records until stopped
    pub soft_framerate: u32, // 0 disables software rate control
    pub master_timestamp_for_all: bool,
    pub time_benchmark: bool,
    pub export: bool,
    pub live: bool,
    pub live_grid: bool,
    pub init_delay_secs: f32,
    pub grab_timeout_ms: u64,
    pub require_trigger_context: bool,
    pub queue: QueueConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            master_cam: None,
            external_trigger: false,
            on_demand_trigger: false,
            manual_trigger: false,
            max_rate_save: false,
            save: false,
            save_type: "bmp".to_string(),
            jpeg_quality: 95,
            frames: 0,
            soft_framerate: 0,
            master_timestamp_for_all: true,
            time_benchmark: false,
            export: false,
            live: false,
            live_grid: false,
            init_delay_secs: 1.0,
            grab_timeout_ms: 2000,
            require_trigger_context: false,
            queue: QueueConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    /// File extension including the leading dot.
    pub fn extension(&self) -> String {
        format!(".{}", self.save_type.trim_start_matches('.').to_lowercase())
    }

    pub fn saves_raw_binary(&self) -> bool {
        self.save_type.trim_start_matches('.').eq_ignore_ascii_case("bin")
    }

    pub fn fixed_frame_count(&self) -> Option<u64> {
        (self.frames > 0).then_some(self.frames)
    }

    pub fn preview_enabled(&self) -> bool {
        self.live || self.live_grid
    }
}

/// Region of interest. A zero width or height keeps the device's full axis.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RegionOfInterest {
    pub width: i64,
    pub height: i64,
    pub x_offset: i64,
    pub y_offset: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeatureConfig {
    pub color: bool,
    pub exposure_time: f64, // 0 = continuous auto exposure
    pub gain: f64, // 0 = auto gain
    pub target_grey_value: f64, // <= 4.0 = auto
    pub binning: i64,
    pub buffer_size: i64,
    pub region_of_interest: Option<RegionOfInterest>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            color: false,
            exposure_time: 0.0,
            gain: 0.0,
            target_grey_value: 0.0,
            binning: 1,
            buffer_size: 100,
            region_of_interest: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CalibrationConfig {
    pub image_width: u32,
    pub image_height: u32,
    pub distortion_model: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatedDeviceConfig {
    pub id: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub max_gain: f64,
    pub max_exposure: f64,
    pub fps: f64,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        SimulatedDeviceConfig {
            id: String::new(),
            model: "Simulated BFS-U3".to_string(),
            width: 640,
            height: 480,
            max_gain: 47.99,
            max_exposure: 30_000.0,
            fps: 30.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    /// Devices the built-in backend reports. Empty means one per configured camera.
    pub devices: Vec<SimulatedDeviceConfig>,
    /// Pulse rate of the simulated trigger line when `external_trigger` is set.
    pub external_trigger_hz: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig { devices: Vec::new(), external_trigger_hz: 10.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_normalized() {
        let mut acq = AcquisitionConfig::default();
        assert_eq!(acq.extension(), ".bmp");
        acq.save_type = ".JPG".to_string();
        assert_eq!(acq.extension(), ".jpg");
        acq.save_type = "bin".to_string();
        assert!(acq.saves_raw_binary());
    }

    #[test]
    fn zero_frames_means_unbounded() {
        let mut acq = AcquisitionConfig::default();
        assert_eq!(acq.fixed_frame_count(), None);
        acq.frames = 5;
        assert_eq!(acq.fixed_frame_count(), Some(5));
    }
}
