use crate::app_config::{CalibrationConfig, FeatureConfig, RegionOfInterest};
use crate::camera_config::CameraConfig;
use serde::Serialize;

/// Calibration record published next to every exported image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfo {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
    pub binning_x: i64,
    pub binning_y: i64,
    pub roi: Option<RegionOfInterest>,
}

/// `<prefix>/cam_<index>_optical_frame`, or without prefix when it is empty.
pub fn optical_frame_id(tf_prefix: &str, index: usize) -> String {
    if tf_prefix.is_empty() {
        format!("cam_{}_optical_frame", index)
    } else {
        format!("{}/cam_{}_optical_frame", tf_prefix, index)
    }
}

fn copy_into<const N: usize>(coeffs: &[f64]) -> [f64; N] {
    let mut out = [0.0; N];
    if coeffs.len() == N {
        out.copy_from_slice(coeffs);
    }
    out
}

pub fn build_camera_info(
    index: usize,
    camera: &CameraConfig,
    calibration: &CalibrationConfig,
    features: &FeatureConfig,
    tf_prefix: &str,
    single_camera: bool,
) -> CameraInfo {
    let k: [f64; 9] = copy_into(&camera.intrinsic_coeffs);
    let p = if !camera.projection_coeffs.is_empty() {
        copy_into(&camera.projection_coeffs)
    } else if single_camera && !camera.intrinsic_coeffs.is_empty() {
        // Monocular: P = [K | 0]
        [k[0], k[1], k[2], 0.0, k[3], k[4], k[5], 0.0, k[6], k[7], k[8], 0.0]
    } else {
        [0.0; 12]
    };
    let roi = features
        .region_of_interest
        .filter(|roi| roi.width != 0 || roi.height != 0);

    CameraInfo {
        frame_id: optical_frame_id(tf_prefix, index),
        width: calibration.image_width,
        height: calibration.image_height,
        distortion_model: calibration.distortion_model.clone(),
        d: camera.distortion_coeffs.clone(),
        k,
        r: copy_into(&camera.rectification_coeffs),
        p,
        binning_x: features.binning,
        binning_y: features.binning,
        roi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics() -> Vec<f64> {
        vec![800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0]
    }

    #[test]
    fn monocular_projection_is_derived_from_intrinsics() {
        let cam = CameraConfig { id: "0".into(), intrinsic_coeffs: intrinsics(), ..Default::default() };
        let info = build_camera_info(0, &cam, &CalibrationConfig::default(), &FeatureConfig::default(), "", true);
        assert_eq!(info.p, [800.0, 0.0, 320.0, 0.0, 0.0, 800.0, 240.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(info.frame_id, "cam_0_optical_frame");
    }

    #[test]
    fn stereo_without_projection_leaves_zeros() {
        let cam = CameraConfig { id: "0".into(), intrinsic_coeffs: intrinsics(), ..Default::default() };
        let info = build_camera_info(1, &cam, &CalibrationConfig::default(), &FeatureConfig::default(), "rig", false);
        assert_eq!(info.p, [0.0; 12]);
        assert_eq!(info.frame_id, "rig/cam_1_optical_frame");
    }

    #[test]
    fn roi_only_reported_when_it_resizes() {
        let cam = CameraConfig { id: "0".into(), ..Default::default() };
        let mut features = FeatureConfig::default();
        features.region_of_interest = Some(RegionOfInterest { width: 0, height: 0, x_offset: 4, y_offset: 4 });
        let info = build_camera_info(0, &cam, &CalibrationConfig::default(), &features, "", false);
        assert!(info.roi.is_none());
    }
}
