//! Single-threaded capture loop: trigger the master, grab every camera, then
//! persist, export and preview the set before the next iteration.

use crate::camera::camera_entity::CameraEntity;
use crate::camera::camera_media::DecodedFrame;
use crate::camera::feature_profile::apply_reconfigure;
use crate::common::file_utils::{create_camera_directories, ensure_output_directory, sync_frame_path};
use crate::common::timestamp_utils::device_timestamp_str;
use crate::config_loader::MasterConfig;
use crate::core::camera_manager::CameraManager;
use crate::core::capture_source::FeatureValue;
use crate::core::run_context::{LoopCommand, RunContext, RunSummary, TriggerMode};
use crate::core::trigger::TriggerContext;
use crate::errors::{AppError, CameraError};
use crate::operations::benchmark::{check_frame_ids, rate_hz, StageTimer};
use crate::operations::frame_writer::save_frame;
use crate::operations::preview::{compose_grid, PreviewSink};
use crate::operations::publisher::{GpsTaggedImage, OutputSinks};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How long an idle iteration waits for a trigger or command before
/// re-checking the keep-running flag.
const IDLE_WAIT: Duration = Duration::from_millis(50);

struct SyncLoop<'a> {
    config: &'a MasterConfig,
    sinks: &'a OutputSinks,
    save_root: PathBuf,
    frames: Vec<DecodedFrame>,
    has_frames: bool,
    dirs_created: bool,
    binning_verified: bool,
    active_camera: usize,
    summary: RunSummary,
}

impl<'a> SyncLoop<'a> {
    /// Grabs one frame from every camera, in index order.
    fn collect(&mut self, cameras: &mut [CameraEntity]) -> Result<f64, CameraError> {
        let mut timer = StageTimer::start();
        for (i, camera) in cameras.iter_mut().enumerate() {
            self.frames[i] = camera.grab_and_convert()?;
        }
        let ids: Vec<u64> = self.frames.iter().map(|f| f.frame_id).collect();
        check_frame_ids(&ids);
        self.has_frames = true;
        self.summary.cycles += 1;
        Ok(timer.lap_ms())
    }

    /// Runs once, on the first collected set.
    fn verify_geometry(&mut self, cameras: &[CameraEntity]) -> Result<(), AppError> {
        let features = &self.config.features;
        let calibration = &self.config.calibration;
        for (i, camera) in cameras.iter().enumerate() {
            if features.region_of_interest.is_none() && !camera.verify_binning(features.binning)? {
                let actual = camera
                    .get_feature("BinningHorizontal")
                    .ok()
                    .and_then(|v: FeatureValue| v.as_int())
                    .unwrap_or(-1);
                error!(
                    "❌ Failed to set Binning={} on camera {}. The value may be invalid, or the device kept a previous larger binning; re-plug the camera and retry.",
                    features.binning,
                    camera.id()
                );
                return Err(AppError::BinningMismatch {
                    camera_id: camera.id().to_string(),
                    requested: features.binning,
                    actual,
                });
            }
            if calibration.image_width != 0 && calibration.image_height != 0 {
                let frame = &self.frames[i];
                let full_width = frame.width as i64 * features.binning;
                let full_height = frame.height as i64 * features.binning;
                if full_width != i64::from(calibration.image_width) || full_height != i64::from(calibration.image_height) {
                    warn!(
                        "⚠️ Camera {} full resolution {}x{} differs from calibration resolution {}x{}",
                        camera.id(),
                        full_width,
                        full_height,
                        calibration.image_width,
                        calibration.image_height
                    );
                }
            }
        }
        self.binning_verified = true;
        Ok(())
    }

    fn persist(
        &mut self,
        cameras: &[CameraEntity],
        master_index: usize,
        trigger: Option<&TriggerContext>,
    ) -> Result<Vec<PathBuf>, AppError> {
        if !self.dirs_created {
            ensure_output_directory(&self.config.app_settings.save_path)?;
            let names: Vec<&str> = cameras.iter().map(|c| c.name()).collect();
            create_camera_directories(&self.save_root, &names);
            self.dirs_created = true;
        }
        let acq = &self.config.acquisition;
        let ext = acq.extension();
        let mut paths = Vec::with_capacity(cameras.len());
        for (i, camera) in cameras.iter().enumerate() {
            let timestamp = if acq.master_timestamp_for_all {
                cameras[master_index].timestamp()
            } else {
                camera.timestamp()
            };
            let path = sync_frame_path(&self.save_root, camera.name(), &device_timestamp_str(timestamp), &ext);
            save_frame(&path, &self.frames[i], acq)?;
            if let Some(context) = trigger {
                self.sinks.sidecar.attach(&path, context, i, &camera.model_name());
            }
            paths.push(path);
        }
        self.summary.frames_saved += paths.len() as u64;
        Ok(paths)
    }

    fn export(&self, trigger: Option<&TriggerContext>) {
        for (i, frame) in self.frames.iter().enumerate() {
            if let Some(info) = self.sinks.camera_infos.get(i) {
                self.sinks.publisher.publish_image(i, frame, info);
            }
            if let Some(context) = trigger {
                self.sinks.publisher.publish_gps_tagged(&GpsTaggedImage::new(i, context, frame));
            }
        }
    }

    fn display(&self, cameras: &[CameraEntity], preview: &mut dyn PreviewSink) {
        if self.config.acquisition.live_grid {
            preview.show("Acquisition", &compose_grid(&self.frames));
        } else if let Some(camera) = cameras.get(self.active_camera) {
            let title = format!(
                "cam # = {}, cam ID = {}, cam name = {}",
                self.active_camera,
                camera.id(),
                camera.name()
            );
            preview.show(&title, &self.frames[self.active_camera]);
        }
    }
}

/// Runs the loop until the frame count is reached, a quit command or stop
/// request arrives, or a device error occurs. Cameras are left streaming;
/// the caller releases them.
pub fn run_synchronous(
    manager: &mut CameraManager,
    config: &MasterConfig,
    ctx: &RunContext,
    trigger_mode: TriggerMode,
    sinks: &OutputSinks,
    preview: &mut dyn PreviewSink,
) -> Result<RunSummary, AppError> {
    info!("🎬 *** ACQUISITION ({:?} trigger) ***", trigger_mode);
    let acq = &config.acquisition;
    let master_index = manager.master_index().unwrap_or(0);
    manager.start_acquisition()?;

    let mut state = SyncLoop {
        config,
        sinks,
        save_root: PathBuf::from(&config.app_settings.save_path),
        frames: vec![DecodedFrame::default(); manager.len()],
        has_frames: false,
        dirs_created: false,
        binning_verified: false,
        active_camera: 0,
        summary: RunSummary::default(),
    };
    let target_period = (acq.soft_framerate > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(acq.soft_framerate)));
    let mut achieved = Instant::now();

    let result = loop {
        if !ctx.keep_running() {
            break Ok(());
        }
        let cycle_start = Instant::now();

        if let Some(request) = ctx.pending_reconfigure() {
            if let Err(e) = apply_reconfigure(manager.cameras_mut(), &request) {
                warn!("⚠️ Live reconfigure failed: {}", e);
            }
        }

        // Manual mode idles on the console; every other mode only peeks.
        let mut commands: Vec<LoopCommand> = Vec::new();
        if trigger_mode == TriggerMode::Manual {
            if let Ok(cmd) = ctx.commands.recv_timeout(IDLE_WAIT) {
                commands.push(cmd);
            }
        }
        commands.extend(ctx.commands.try_iter());

        let mut manual_fire = false;
        let mut save_once = false;
        for command in commands {
            match command {
                LoopCommand::NextCamera if state.active_camera + 1 < manager.len() => state.active_camera += 1,
                LoopCommand::PrevCamera if state.active_camera > 0 => state.active_camera -= 1,
                LoopCommand::NextCamera | LoopCommand::PrevCamera => {}
                LoopCommand::Trigger if trigger_mode == TriggerMode::Manual => manual_fire = true,
                LoopCommand::Trigger => debug!("Ignoring trigger command outside manual mode"),
                LoopCommand::SaveOnce if !acq.save => save_once = true,
                LoopCommand::SaveOnce => debug!("Ignoring save command, every set is already saved"),
                LoopCommand::Quit => {
                    info!("👋 Terminating...");
                    ctx.request_stop();
                }
            }
            debug!("active cam: {}", state.active_camera);
        }
        if !ctx.keep_running() {
            break Ok(());
        }

        let fire = match trigger_mode {
            TriggerMode::Software => true,
            TriggerMode::Manual => manual_fire,
            TriggerMode::OnDemand => ctx.capture_requests.recv_timeout(IDLE_WAIT).is_ok(),
            TriggerMode::External => false,
        };
        if fire {
            if let Err(e) = manager.cameras_mut()[master_index].trigger() {
                break Err(AppError::from(e));
            }
        }
        let should_collect = fire || trigger_mode == TriggerMode::External;
        let mut grab_ms = 0.0;
        let collected = if should_collect {
            match state.collect(manager.cameras_mut()) {
                Ok(ms) => {
                    grab_ms = ms;
                    true
                }
                Err(CameraError::Timeout { camera_id, .. }) if trigger_mode == TriggerMode::External => {
                    debug!("No external trigger pulse reached camera {} yet", camera_id);
                    false
                }
                Err(e) => break Err(AppError::from(e)),
            }
        } else {
            false
        };

        if collected && !state.binning_verified {
            if let Err(e) = state.verify_geometry(manager.cameras()) {
                break Err(e);
            }
        }

        let mut timer = StageTimer::start();
        let trigger_context = ctx.trigger_slot.snapshot();
        if state.has_frames && acq.preview_enabled() {
            state.display(manager.cameras(), preview);
        }
        let display_ms = timer.lap_ms();

        let mut save_ms = 0.0;
        if state.has_frames && ((collected && acq.save) || save_once) {
            if save_once {
                info!("💾 Saving frame...");
            }
            match state.persist(manager.cameras(), master_index, trigger_context.as_ref()) {
                Ok(paths) => sinks.publisher.publish_batch(&paths),
                Err(e) => break Err(e),
            }
            save_ms = timer.lap_ms();
        }

        let mut export_ms = 0.0;
        if state.has_frames && ((collected && acq.export) || save_once) {
            state.export(trigger_context.as_ref());
            export_ms = timer.lap_ms();
        }

        if collected {
            let total_ms = grab_ms + display_ms + save_ms + export_ms;
            let fps = rate_hz(achieved.elapsed());
            achieved = Instant::now();
            if acq.time_benchmark {
                info!(
                    "⏱️ total time (ms): {:.1} \tPossible FPS: {:.1}\tActual FPS: {:.1}",
                    total_ms,
                    1000.0 / total_ms.max(f64::EPSILON),
                    fps
                );
                info!(
                    "⏱️ Times (ms):- grab: {:.1}, disp: {:.1}, save: {:.1}, export: {:.1}",
                    grab_ms, display_ms, save_ms, export_ms
                );
            }
            sinks.publisher.publish_fps(fps);
        }

        if let Some(limit) = acq.fixed_frame_count() {
            let done = if acq.save { state.summary.frames_saved / manager.len() as u64 } else { state.summary.cycles };
            if done >= limit {
                info!("🏁 {} frames recorded. Terminating...", limit);
                break Ok(());
            }
        }

        if let Some(period) = target_period {
            if let Some(remaining) = period.checked_sub(cycle_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
    };

    match result {
        Ok(()) => {
            info!(
                "✅ Synchronous acquisition finished: {} sets collected, {} files saved",
                state.summary.cycles, state.summary.frames_saved
            );
            Ok(state.summary)
        }
        Err(e) => {
            error!("💀 Exception: {}. Exiting gracefully, possible reason could be camera disconnection...", e);
            Err(e)
        }
    }
}
