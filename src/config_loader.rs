use serde::Deserialize;
use std::fs;
use std::path::Path;
use crate::app_config::{
    AcquisitionConfig, ApplicationConfig, CalibrationConfig, FeatureConfig, SimulationConfig,
};
use crate::camera_config::{
    check_coeff_len, distortion_coeff_count, CameraConfig, INTRINSIC_COEFF_COUNT,
    PROJECTION_COEFF_COUNT, RECTIFICATION_COEFF_COUNT,
};
use anyhow::{Result, Context, bail};
use std::collections::HashSet;
use log::{debug, info, warn};
use std::time::Instant;

#[derive(Debug, Deserialize, Clone)]
pub struct MasterConfig {
    #[serde(rename = "application", default)]
    pub app_settings: ApplicationConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

pub fn load_config(path: &str) -> Result<MasterConfig> {
    debug!("📄 Attempting to load config from: {}", path);
    let start_time = Instant::now();

    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file '{}'. 📖", path))?;
    debug!("Read config file in {:?}", start_time.elapsed());

    let config = parse_config(&config_str)
        .with_context(|| format!("Invalid configuration in '{}'", path))?;

    info!("✅ Successfully loaded and validated configuration from '{}' in {:?}", path, start_time.elapsed());
    Ok(config)
}

/// Parses and validates a YAML document.
pub fn parse_config(config_str: &str) -> Result<MasterConfig> {
    let parse_start_time = Instant::now();
    let mut config: MasterConfig = serde_yaml::from_str(config_str)
        .context("Failed to parse YAML configuration. 💔")?;
    debug!("Parsed YAML in {:?}", parse_start_time.elapsed());

    normalize_master_config(&mut config);
    validate_master_config(&config).context("Master configuration validation failed 👎")?;
    Ok(config)
}

/// Replaces out-of-range values that have a safe default.
fn normalize_master_config(config: &mut MasterConfig) {
    let acq = &mut config.acquisition;
    if !(acq.init_delay_secs >= 0.0) {
        warn!("⚠️ Provided 'init_delay_secs' ({}) is not valid, using default of 1.0 s", acq.init_delay_secs);
        acq.init_delay_secs = 1.0;
    }
    if config.app_settings.save_path.starts_with('~') {
        if let Ok(home) = std::env::var("HOME") {
            config.app_settings.save_path = config.app_settings.save_path.replacen('~', &home, 1);
        }
    }
    if acq.on_demand_trigger && acq.external_trigger {
        warn!("⚠️ Both external and on-demand triggering requested; external trigger takes precedence.");
    }
}

fn validate_master_config(config: &MasterConfig) -> Result<()> {
    debug!("🕵️ Validating master configuration...");
    let validation_start_time = Instant::now();
    if config.app_settings.save_path.is_empty() {
        bail!("❌ Application save_path cannot be empty.");
    }
    let save_path = Path::new(&config.app_settings.save_path);
    if save_path.exists() && !save_path.is_dir() {
        bail!("❌ Save path '{}' exists but is not a directory.", config.app_settings.save_path);
    }

    let acq = &config.acquisition;
    match acq.save_type.trim_start_matches('.').to_lowercase().as_str() {
        "bmp" | "jpg" | "jpeg" | "png" | "tif" | "tiff" | "bin" => {}
        other => bail!("❌ Unsupported save_type '{}'.", other),
    }
    if acq.queue.capacity == 0 {
        bail!("❌ acquisition.queue.capacity must be greater than zero.");
    }
    if config.features.binning <= 0 {
        bail!("❌ features.binning must be positive, got {}.", config.features.binning);
    }

    if config.cameras.is_empty() {
        bail!("❌ No cameras defined in the configuration.");
    }

    let mut camera_ids = HashSet::new();
    let mut camera_names = HashSet::new();
    let distortion_count = distortion_coeff_count(&config.calibration.distortion_model);
    for (idx, camera) in config.cameras.iter().enumerate() {
        debug!("Validating camera #{}: {}", idx + 1, camera.id);
        if camera.id.is_empty() {
            bail!("❌ Camera id cannot be empty for camera #{}.", idx + 1);
        }
        if !camera_ids.insert(camera.id.as_str()) {
            bail!("❌ Duplicate camera id found: {}", camera.id);
        }
        if !camera_names.insert(camera.display_name()) {
            bail!("❌ Duplicate camera name found: {}", camera.display_name());
        }
        let checks = [
            check_coeff_len("intrinsic_coeffs", &camera.intrinsic_coeffs, Some(INTRINSIC_COEFF_COUNT)),
            check_coeff_len("distortion_coeffs", &camera.distortion_coeffs, distortion_count),
            check_coeff_len("rectification_coeffs", &camera.rectification_coeffs, Some(RECTIFICATION_COEFF_COUNT)),
            check_coeff_len("projection_coeffs", &camera.projection_coeffs, Some(PROJECTION_COEFF_COUNT)),
        ];
        for check in checks {
            if let Err(msg) = check {
                bail!("❌ Camera '{}': {}", camera.id, msg);
            }
        }
    }

    if !acq.external_trigger {
        match &acq.master_cam {
            None => bail!("❌ acquisition.master_cam is required unless external_trigger is set."),
            Some(master) if !camera_ids.contains(master.as_str()) => {
                bail!("❌ Specified master cam '{}' is not in the cameras list.", master)
            }
            Some(_) => {}
        }
    }
    info!("👍 Master configuration validated successfully in {:?}.", validation_start_time.elapsed());
    Ok(())
}
