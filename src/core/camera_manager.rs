use crate::app_config::{AcquisitionConfig, FeatureConfig};
use crate::camera::camera_entity::{CameraEntity, CameraState};
use crate::camera::feature_profile::{apply_feature_profile, ProfileReport, TriggerWiring};
use crate::config_loader::MasterConfig;
use crate::core::capture_source::CameraSystem;
use crate::errors::AppError;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// The resolved, index-stable camera set and its lifecycle.
pub struct CameraManager {
    cameras: Vec<CameraEntity>,
    master_index: Option<usize>,
    features: FeatureConfig,
    acquisition: AcquisitionConfig,
}

impl CameraManager {
    /// Enumerates attached devices and keeps those whose id is configured, in
    /// configuration order. Missing ids only warn; an empty result or a missing
    /// master (when the master is needed) is fatal.
    pub fn resolve(system: &mut dyn CameraSystem, config: &MasterConfig) -> Result<Self, AppError> {
        debug!("🛠️ Resolving camera set...");
        let start_time = Instant::now();
        info!("📚 Camera library version: {}", system.library_version());

        let mut available = system.enumerate()?;
        info!("🔍 Number of cameras detected: {}", available.len());
        for handle in &available {
            debug!("  Detected camera {} ({})", handle.id(), handle.model_name());
        }

        let acq = &config.acquisition;
        let mut cameras = Vec::with_capacity(config.cameras.len());
        let mut master_index = None;
        for cam_config in &config.cameras {
            match available.iter().position(|h| h.id() == cam_config.id) {
                Some(pos) => {
                    let handle = available.swap_remove(pos);
                    let mut entity = CameraEntity::new(cam_config.clone(), handle);
                    if !acq.external_trigger && acq.master_cam.as_deref() == Some(cam_config.id.as_str()) {
                        entity.make_master();
                        master_index = Some(cameras.len());
                    }
                    info!("📷 Camera {} '{}' found and attached", cam_config.id, entity.name());
                    cameras.push(entity);
                }
                None => warn!("⚠️ Camera {} not detected!!!", cam_config.id),
            }
        }

        if cameras.is_empty() {
            error!("❌ None of the connected cameras are in the config list!");
            return Err(AppError::NoCamerasFound);
        }
        if !acq.external_trigger && master_index.is_none() {
            let master = acq.master_cam.clone().unwrap_or_default();
            error!("❌ Master camera {} not detected!!!", master);
            return Err(AppError::MasterNotFound(master));
        }

        // Free-running grabs must be allowed to wait for an external or on-demand pulse.
        if !acq.external_trigger && !acq.on_demand_trigger {
            let timeout = Duration::from_millis(acq.grab_timeout_ms);
            for camera in cameras.iter_mut() {
                camera.set_grab_timeout(Some(timeout));
            }
        }

        info!(
            "✅ Resolved {} of {} configured cameras in {:?}",
            cameras.len(),
            config.cameras.len(),
            start_time.elapsed()
        );
        Ok(CameraManager {
            cameras,
            master_index,
            features: config.features.clone(),
            acquisition: config.acquisition.clone(),
        })
    }

    pub fn cameras(&self) -> &[CameraEntity] {
        &self.cameras
    }

    pub fn cameras_mut(&mut self) -> &mut [CameraEntity] {
        &mut self.cameras
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn master_index(&self) -> Option<usize> {
        self.master_index
    }

    pub fn names(&self) -> Vec<String> {
        self.cameras.iter().map(|c| c.name().to_string()).collect()
    }

    /// Initializes every camera, slaves before the master. A soft init only
    /// opens the device; a full init also applies the feature profile, and any
    /// failure there is fatal.
    pub fn init_cameras(&mut self, soft: bool) -> Result<Vec<ProfileReport>, AppError> {
        info!("🔌 Initializing cameras{}...", if soft { " (soft)" } else { "" });
        let start_time = Instant::now();
        let mut reports = Vec::new();
        for camera in self.cameras.iter_mut().rev() {
            debug!("  Initializing camera {}...", camera.id());
            camera.init().map_err(|source| AppError::FeatureProfile { camera_id: camera.id().to_string(), source })?;
            if soft {
                continue;
            }
            let wiring = TriggerWiring::for_camera(
                camera.is_master(),
                self.acquisition.max_rate_save,
                self.acquisition.on_demand_trigger,
            );
            let report = apply_feature_profile(camera, &self.features, wiring).map_err(|source| {
                error!("❌ Error configuring camera {}: {}", camera.id(), source);
                AppError::FeatureProfile { camera_id: camera.id().to_string(), source }
            })?;
            reports.push(report);
        }
        debug!("All cameras initialized in {:?}", start_time.elapsed());
        Ok(reports)
    }

    /// Begins streaming, slaves before the master so no trigger pulse is missed.
    pub fn start_acquisition(&mut self) -> Result<(), AppError> {
        for camera in self.cameras.iter_mut().rev() {
            camera.begin_acquisition()?;
        }
        info!("▶️ Acquisition started on {} cameras", self.cameras.len());
        Ok(())
    }

    pub fn end_acquisition(&mut self) -> Result<(), AppError> {
        for camera in self.cameras.iter_mut() {
            if camera.state == CameraState::Streaming {
                camera.end_acquisition()?;
            }
        }
        debug!("⏹️ Acquisition ended");
        Ok(())
    }

    pub fn deinit_cameras(&mut self) -> Result<(), AppError> {
        for camera in self.cameras.iter_mut().rev() {
            if camera.state != CameraState::Idle {
                camera.deinit()?;
            }
        }
        debug!("Cameras deinitialized");
        Ok(())
    }

    /// Cycles every camera through a soft init, a short stream and a deinit,
    /// then performs the full init. Devices otherwise hand out one stale frame
    /// left over from the previous process.
    pub fn flush(&mut self) -> Result<(), AppError> {
        info!("🚿 *** FLUSH SEQUENCE ***");
        let start_time = Instant::now();
        let delay = f64::from(self.acquisition.init_delay_secs.max(0.0));

        self.init_cameras(true)?;
        self.start_acquisition()?;
        std::thread::sleep(Duration::from_secs_f64(delay * 0.5));
        self.end_acquisition()?;
        std::thread::sleep(Duration::from_secs_f64(delay * 0.5));
        self.deinit_cameras()?;
        std::thread::sleep(Duration::from_secs_f64(delay * 2.0));
        let reports = self.init_cameras(false)?;

        let clamps: usize = reports.iter().map(ProfileReport::warnings).sum();
        if clamps > 0 {
            warn!("⚠️ {} feature value(s) were clamped to device limits", clamps);
        }
        debug!("Flush sequence done in {:?}.", start_time.elapsed());
        Ok(())
    }

    /// Stops streaming and deinitializes every camera, logging rather than
    /// propagating failures so every device gets its turn.
    pub fn release(&mut self) {
        debug!("🧹 Releasing {} cameras...", self.cameras.len());
        for camera in self.cameras.iter_mut() {
            if camera.state == CameraState::Streaming {
                if let Err(e) = camera.end_acquisition() {
                    warn!("⚠️ Failed to stop acquisition on camera {}: {}", camera.id(), e);
                }
            }
        }
        for camera in self.cameras.iter_mut().rev() {
            if camera.state != CameraState::Idle {
                if let Err(e) = camera.deinit() {
                    warn!("⚠️ Failed to deinitialize camera {}: {}", camera.id(), e);
                }
            }
        }
        info!("👋 All cameras released");
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        if self.cameras.iter().any(|c| c.state != CameraState::Idle) {
            self.release();
        }
    }
}
