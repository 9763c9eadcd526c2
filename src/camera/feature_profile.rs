//! Device configuration applied to every camera before streaming, plus the
//! live exposure/grey-value updates accepted while running.

use crate::app_config::FeatureConfig;
use crate::camera::camera_entity::CameraEntity;
use crate::core::capture_source::FeatureValue;
use crate::errors::CameraError;
use log::{error, info, warn};
use serde::Deserialize;

/// Grey value used whenever gain is fixed, so auto exposure has a stable target.
pub const FIXED_GAIN_TARGET_GREY: f64 = 50.0;
/// Target grey values at or below this leave the target on automatic.
pub const AUTO_TARGET_GREY_THRESHOLD: f64 = 4.0;

/// How a camera's trigger lines are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerWiring {
    /// Software-triggered master that drives Line2 for the slaves.
    MasterSoftware,
    /// Free-running master (max-rate mode) that drives Line2 on every exposure.
    MasterFreeRunning,
    /// Triggered by a rising edge on Line3.
    SlaveLine,
}

impl TriggerWiring {
    pub fn for_camera(is_master: bool, max_rate_save: bool, on_demand_trigger: bool) -> Self {
        match (is_master, max_rate_save && !on_demand_trigger) {
            (true, true) => TriggerWiring::MasterFreeRunning,
            (true, false) => TriggerWiring::MasterSoftware,
            (false, _) => TriggerWiring::SlaveLine,
        }
    }
}

/// Values the device refused and that were clamped to its maximum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileReport {
    pub gain_clamped_to: Option<f64>,
    pub exposure_clamped_to: Option<f64>,
}

impl ProfileReport {
    pub fn warnings(&self) -> usize {
        self.gain_clamped_to.iter().count() + self.exposure_clamped_to.iter().count()
    }
}

/// Applies the full feature profile. Re-applying the same profile leaves the
/// device in the same state, so this is safe to call after every re-init.
pub fn apply_feature_profile(
    camera: &mut CameraEntity,
    features: &FeatureConfig,
    wiring: TriggerWiring,
) -> Result<ProfileReport, CameraError> {
    let mut report = ProfileReport::default();
    let flip_horizontal = camera.config.flip_horizontal;
    let flip_vertical = camera.config.flip_vertical;

    camera.set_buffer_size(features.buffer_size)?;
    camera.set_feature("BinningHorizontal", FeatureValue::Int(features.binning))?;
    camera.set_feature("BinningVertical", FeatureValue::Int(features.binning))?;
    camera.set_enum("ExposureMode", "Timed")?;
    camera.set_feature("ReverseX", FeatureValue::Bool(flip_horizontal))?;
    camera.set_feature("ReverseY", FeatureValue::Bool(flip_vertical))?;

    if let Some(roi) = features.region_of_interest {
        if roi.width != 0 {
            camera.set_feature("Width", FeatureValue::Int(roi.width))?;
        }
        if roi.height != 0 {
            camera.set_feature("Height", FeatureValue::Int(roi.height))?;
        }
        camera.set_feature("OffsetX", FeatureValue::Int(roi.x_offset))?;
        camera.set_feature("OffsetY", FeatureValue::Int(roi.y_offset))?;
    }

    if features.exposure_time > 0.0 {
        camera.set_enum("ExposureAuto", "Off")?;
        let max_exposure = camera.feature_max("ExposureTime")?;
        let exposure = if features.exposure_time > max_exposure {
            warn!(
                "⚠️ [{}] Requested exposure {:.1} exceeds device max, setting exposure to {:.1}",
                camera.id(),
                features.exposure_time,
                max_exposure
            );
            report.exposure_clamped_to = Some(max_exposure);
            max_exposure
        } else {
            features.exposure_time
        };
        camera.set_feature("ExposureTime", FeatureValue::Float(exposure))?;
    } else {
        camera.set_enum("ExposureAuto", "Continuous")?;
    }

    let mut target_grey = features.target_grey_value;
    if features.gain > 0.0 {
        camera.set_enum("GainAuto", "Off")?;
        let max_gain = camera.feature_max("Gain")?;
        let gain = if features.gain > max_gain {
            warn!(
                "⚠️ [{}] Provided Gain value is higher than max allowed, setting gain to {:.2}",
                camera.id(),
                max_gain
            );
            report.gain_clamped_to = Some(max_gain);
            max_gain
        } else {
            features.gain
        };
        camera.set_feature("Gain", FeatureValue::Float(gain))?;
        target_grey = FIXED_GAIN_TARGET_GREY;
    } else {
        camera.set_enum("GainAuto", "Continuous")?;
    }

    apply_target_grey(camera, target_grey)?;

    camera.set_enum("PixelFormat", if features.color { "BayerRG8" } else { "Mono8" })?;
    camera.set_enum("AcquisitionMode", "Continuous")?;

    match wiring {
        TriggerWiring::MasterFreeRunning => {
            camera.set_enum("TriggerMode", "Off")?;
            camera.set_enum("LineSelector", "Line2")?;
            camera.set_enum("LineMode", "Output")?;
            camera.set_feature("AcquisitionFrameRateEnable", FeatureValue::Bool(false))?;
        }
        TriggerWiring::MasterSoftware => {
            camera.set_enum("TriggerMode", "On")?;
            camera.set_enum("LineSelector", "Line2")?;
            camera.set_enum("LineMode", "Output")?;
            camera.set_enum("TriggerSource", "Software")?;
        }
        TriggerWiring::SlaveLine => {
            camera.set_enum("TriggerMode", "On")?;
            camera.set_enum("LineSelector", "Line3")?;
            camera.set_enum("TriggerSource", "Line3")?;
            camera.set_enum("TriggerSelector", "FrameStart")?;
            camera.set_enum("LineMode", "Input")?;
            camera.set_enum("TriggerOverlap", "ReadOut")?;
            camera.set_enum("TriggerActivation", "RisingEdge")?;
        }
    }
    Ok(report)
}

fn apply_target_grey(camera: &mut CameraEntity, target_grey: f64) -> Result<(), CameraError> {
    if target_grey > AUTO_TARGET_GREY_THRESHOLD {
        camera.set_enum("AutoExposureTargetGreyValueAuto", "Off")?;
        camera.set_feature("AutoExposureTargetGreyValue", FeatureValue::Float(target_grey))
    } else {
        camera.set_enum("AutoExposureTargetGreyValueAuto", "Continuous")
    }
}

/// A live parameter update. Absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ReconfigureRequest {
    pub target_grey_value: Option<f64>,
    pub exposure_time: Option<f64>,
}

/// Applies a live update to every camera, slaves first. The caller runs this
/// between capture iterations so no grab observes a half-applied update.
///
/// The request is checked against every camera before anything is written:
/// an exposure above the smallest device maximum is clamped to it for the
/// whole array. If a device still rejects a write, every camera is restored
/// to the values it had before the request and the error is returned.
pub fn apply_reconfigure(
    cameras: &mut [CameraEntity],
    request: &ReconfigureRequest,
) -> Result<ProfileReport, CameraError> {
    let mut report = ProfileReport::default();
    let writes = planned_writes(cameras, request, &mut report)?;
    if writes.is_empty() || cameras.is_empty() {
        return Ok(report);
    }

    let previous = cameras
        .iter()
        .map(|camera| {
            writes
                .iter()
                .map(|(name, _)| camera.get_feature(name).map(|value| (*name, value)))
                .collect::<Result<Vec<_>, CameraError>>()
        })
        .collect::<Result<Vec<_>, CameraError>>()?;

    for index in (0..cameras.len()).rev() {
        for (name, value) in &writes {
            if let Err(e) = cameras[index].set_feature(name, value.clone()) {
                error!("❌ [{}] Rejected {} during live reconfigure: {}. Restoring previous settings", cameras[index].id(), name, e);
                restore(cameras, &previous);
                return Err(e);
            }
        }
    }
    Ok(report)
}

fn planned_writes(
    cameras: &[CameraEntity],
    request: &ReconfigureRequest,
    report: &mut ProfileReport,
) -> Result<Vec<(&'static str, FeatureValue)>, CameraError> {
    let mut writes = Vec::new();
    if let Some(target_grey) = request.target_grey_value {
        info!("🎛️ Target grey value: {}", target_grey);
        writes.push(("AutoExposureTargetGreyValueAuto", FeatureValue::enumeration("Off")));
        writes.push(("AutoExposureTargetGreyValue", FeatureValue::Float(target_grey)));
    }
    match request.exposure_time {
        Some(exposure) if exposure > 0.0 => {
            let mut max_exposure = f64::INFINITY;
            for camera in cameras {
                max_exposure = max_exposure.min(camera.feature_max("ExposureTime")?);
            }
            let exposure = if exposure > max_exposure {
                warn!(
                    "⚠️ Requested exposure {:.1} exceeds the array's device max, setting exposure to {:.1}",
                    exposure, max_exposure
                );
                report.exposure_clamped_to = Some(max_exposure);
                max_exposure
            } else {
                exposure
            };
            info!("🎛️ Exposure: {}", exposure);
            writes.push(("ExposureAuto", FeatureValue::enumeration("Off")));
            writes.push(("ExposureMode", FeatureValue::enumeration("Timed")));
            writes.push(("ExposureTime", FeatureValue::Float(exposure)));
        }
        Some(exposure) if exposure == 0.0 => {
            info!("🎛️ Exposure: continuous auto");
            writes.push(("ExposureAuto", FeatureValue::enumeration("Continuous")));
            writes.push(("ExposureMode", FeatureValue::enumeration("Timed")));
        }
        Some(exposure) => warn!("⚠️ Ignoring negative exposure_time {} in reconfigure request", exposure),
        None => {}
    }
    Ok(writes)
}

fn restore(cameras: &mut [CameraEntity], previous: &[Vec<(&'static str, FeatureValue)>]) {
    for (camera, values) in cameras.iter_mut().zip(previous) {
        for (name, value) in values {
            if let Err(e) = camera.set_feature(name, value.clone()) {
                warn!("⚠️ [{}] Could not restore {}: {}", camera.id(), name, e);
            }
        }
    }
}
