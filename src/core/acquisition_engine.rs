use crate::camera::camera_info::build_camera_info;
use crate::config_loader::MasterConfig;
use crate::core::camera_manager::CameraManager;
use crate::core::capture_source::CameraSystem;
use crate::core::run_context::{ControlHandles, RunContext, RunMode, RunSummary};
use crate::core::system_check::{check_usbfs_memory, USBFS_MEMORY_PATH};
use crate::errors::AppError;
use crate::operations::pipeline_op::run_pipeline;
use crate::operations::preview::{NullPreview, PreviewSink};
use crate::operations::publisher::{LogPublisher, OutputSinks, Publisher};
use crate::operations::sync_capture_op::run_synchronous;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Owns the camera system, the resolved camera set and the run context.
///
/// `start` checks resources, resolves the camera set and flushes it; `run`
/// executes the configured mode; `stop` (or a clone of [`ControlHandles`])
/// asks a running loop to finish. Cameras are always released when `run`
/// returns.
pub struct AcquisitionEngine {
    config: MasterConfig,
    system: Box<dyn CameraSystem + Send>,
    manager: Option<CameraManager>,
    context: RunContext,
    controls: ControlHandles,
    publisher: Arc<dyn Publisher>,
    preview: Box<dyn PreviewSink>,
    usbfs_path: PathBuf,
}

impl AcquisitionEngine {
    pub fn new(config: MasterConfig, system: Box<dyn CameraSystem + Send>) -> Self {
        let mode = RunMode::from_config(&config.acquisition);
        let (context, controls) = RunContext::new(mode);
        let publisher: Arc<dyn Publisher> = Arc::new(LogPublisher { time_benchmark: config.acquisition.time_benchmark });
        AcquisitionEngine {
            config,
            system,
            manager: None,
            context,
            controls,
            publisher,
            preview: Box::new(NullPreview),
            usbfs_path: PathBuf::from(USBFS_MEMORY_PATH),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSink>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_usbfs_path(mut self, path: PathBuf) -> Self {
        self.usbfs_path = path;
        self
    }

    pub fn mode(&self) -> &RunMode {
        &self.context.mode
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn controls(&self) -> ControlHandles {
        self.controls.clone()
    }

    pub fn camera_manager(&self) -> Option<&CameraManager> {
        self.manager.as_ref()
    }

    /// Resource check, camera resolution and the flush sequence.
    pub fn start(&mut self) -> Result<(), AppError> {
        let start_time = Instant::now();
        info!("🚀 Starting acquisition engine in {} mode", self.context.mode.name());
        if let Some(required) = self.config.app_settings.require_usbfs_memory_mb {
            check_usbfs_memory(&self.usbfs_path, required)?;
        }
        let mut manager = CameraManager::resolve(self.system.as_mut(), &self.config)?;
        if let Err(e) = manager.flush() {
            error!("❌ Flush sequence failed: {}", e);
            manager.release();
            return Err(e);
        }
        self.manager = Some(manager);
        debug!("Engine started in {:?}", start_time.elapsed());
        Ok(())
    }

    /// Asks a running loop to finish after its current iteration.
    pub fn stop(&self) {
        self.controls.stop();
    }

    /// Runs the configured mode to completion, starting the engine first if
    /// needed. Cameras are released before returning, also on failure.
    pub fn run(&mut self) -> Result<RunSummary, AppError> {
        if self.manager.is_none() {
            self.start()?;
        }
        let Some(mut manager) = self.manager.take() else {
            return Err(AppError::NoCamerasFound);
        };

        let single_camera = self.config.cameras.len() == 1;
        let camera_infos = manager
            .cameras()
            .iter()
            .enumerate()
            .map(|(i, camera)| {
                build_camera_info(
                    i,
                    &camera.config,
                    &self.config.calibration,
                    &self.config.features,
                    &self.config.app_settings.tf_prefix,
                    single_camera,
                )
            })
            .collect();
        let sinks = OutputSinks::new(self.publisher.clone(), camera_infos);

        let result = match self.context.mode.clone() {
            RunMode::SynchronousTrigger { trigger } => run_synchronous(
                &mut manager,
                &self.config,
                &self.context,
                trigger,
                &sinks,
                self.preview.as_mut(),
            ),
            RunMode::MaxRateMultiThreaded { queue } => {
                run_pipeline(&mut manager, &self.config, &self.context, &queue, &sinks)
            }
        };
        manager.release();
        debug!("Run completed");
        result
    }

    /// Only the flush sequence, then release.
    pub fn flush_only(&mut self) -> Result<(), AppError> {
        self.start()?;
        if let Some(mut manager) = self.manager.take() {
            manager.release();
        }
        Ok(())
    }
}
