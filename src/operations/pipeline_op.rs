//! Max-rate mode: one producer grabs from every camera in turn and hands the
//! raw frames to one writer thread per camera through bounded queues.

use crate::app_config::{QueueConfig, QueuePolicy};
use crate::camera::camera_entity::CameraEntity;
use crate::camera::camera_media::{DecodedFrame, RawFrame};
use crate::camera::feature_profile::apply_reconfigure;
use crate::common::file_utils::{create_camera_directories, ensure_output_directory, pipeline_frame_path};
use crate::common::timestamp_utils::{device_timestamp_str, todays_date};
use crate::config_loader::MasterConfig;
use crate::core::camera_manager::CameraManager;
use crate::core::run_context::{RunContext, RunSummary};
use crate::core::trigger::TriggerContext;
use crate::errors::AppError;
use crate::operations::benchmark::{rate_hz, BenchmarkRecord, StageTimer};
use crate::operations::frame_writer::save_frame;
use crate::operations::publisher::{GpsTaggedImage, OutputSinks};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PUSH_RETRY: Duration = Duration::from_millis(100);
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// A raw frame plus the trigger context current when it was grabbed.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub frame: RawFrame,
    pub trigger: Option<TriggerContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest waiting entry.
    DroppedOldest,
    /// The new entry was discarded because the queue was full.
    DroppedNewest,
    /// The writer for this camera is gone, or shutdown interrupted a blocked push.
    Closed,
}

/// Producer side of one camera's queue.
pub struct FrameQueue {
    tx: Sender<QueueEntry>,
    // Held only to evict the oldest entry under `DropOldest`.
    rx: Receiver<QueueEntry>,
    policy: QueuePolicy,
    writer_gone: Arc<AtomicBool>,
}

/// Consumer side of one camera's queue.
pub struct QueueReceiver {
    pub rx: Receiver<QueueEntry>,
    writer_gone: Arc<AtomicBool>,
}

impl QueueReceiver {
    /// Marks the writer as gone when dropped, so the producer stops queueing.
    fn exit_guard(&self) -> WriterExitGuard {
        WriterExitGuard(self.writer_gone.clone())
    }
}

struct WriterExitGuard(Arc<AtomicBool>);

impl Drop for WriterExitGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub fn frame_queue(config: &QueueConfig) -> (FrameQueue, QueueReceiver) {
    let (tx, rx) = bounded(config.capacity.max(1));
    let writer_gone = Arc::new(AtomicBool::new(false));
    (
        FrameQueue { tx, rx: rx.clone(), policy: config.policy, writer_gone: writer_gone.clone() },
        QueueReceiver { rx, writer_gone },
    )
}

impl FrameQueue {
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn push(&self, entry: QueueEntry, keep_running: &AtomicBool) -> PushOutcome {
        if self.writer_gone.load(Ordering::SeqCst) {
            return PushOutcome::Closed;
        }
        match self.policy {
            QueuePolicy::Block => {
                let mut entry = entry;
                loop {
                    match self.tx.send_timeout(entry, PUSH_RETRY) {
                        Ok(()) => return PushOutcome::Queued,
                        Err(SendTimeoutError::Timeout(back)) => {
                            if !keep_running.load(Ordering::SeqCst) || self.writer_gone.load(Ordering::SeqCst) {
                                return PushOutcome::Closed;
                            }
                            entry = back;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return PushOutcome::Closed,
                    }
                }
            }
            QueuePolicy::DropNewest => match self.tx.try_send(entry) {
                Ok(()) => PushOutcome::Queued,
                Err(TrySendError::Full(_)) => PushOutcome::DroppedNewest,
                Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
            },
            QueuePolicy::DropOldest => {
                let mut entry = entry;
                let mut evicted = false;
                loop {
                    match self.tx.try_send(entry) {
                        Ok(()) => {
                            return if evicted { PushOutcome::DroppedOldest } else { PushOutcome::Queued };
                        }
                        Err(TrySendError::Full(back)) => {
                            evicted |= self.rx.try_recv().is_ok();
                            entry = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return PushOutcome::Closed,
                    }
                }
            }
        }
    }
}

struct WriterContext<'a> {
    index: usize,
    name: String,
    id: String,
    model: String,
    config: &'a MasterConfig,
    sinks: &'a OutputSinks,
    save_root: &'a Path,
    date: &'a str,
}

/// What one writer did with its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WriterTally {
    saved: u64,
    discarded: u64,
    depth_warnings: u64,
}

/// Drains one camera's queue until the producer hangs up and the queue is
/// empty. The first error ends this writer only.
fn run_writer(writer: WriterContext<'_>, queue: QueueReceiver) -> Result<WriterTally, AppError> {
    let _exit = queue.exit_guard();
    debug!("  Write Queue to Disk Thread Initiated for cam: {}", writer.index);
    let acq = &writer.config.acquisition;
    let ext = acq.extension();
    let mut image_count: u64 = 0;
    let mut tally = WriterTally::default();
    let mut untagged_warned = false;

    for entry in queue.rx.iter() {
        let mut timer = StageTimer::start();
        let depth = queue.rx.len();
        if depth > acq.queue.warn_depth {
            warn!("⚠️ Queue {} size is: {}", writer.index, depth);
            tally.depth_warnings += 1;
        }
        if entry.trigger.is_none() {
            if acq.require_trigger_context {
                debug!("Discarding frame {} of cam {}: no trigger context yet", entry.frame.frame_id, writer.index);
                tally.discarded += 1;
                continue;
            }
            if !untagged_warned {
                info!("ℹ️ Cam {} frames carry no trigger context; saving them without geotag", writer.index);
                untagged_warned = true;
            }
        }

        let path = pipeline_frame_path(
            writer.save_root,
            &writer.name,
            &writer.id,
            writer.date,
            image_count,
            &device_timestamp_str(entry.frame.timestamp_ns),
            &ext,
        );
        let mut record = BenchmarkRecord { camera: writer.name.clone(), grab_ms: timer.lap_ms(), ..Default::default() };

        let mut decoded: Option<DecodedFrame> = None;
        if acq.save {
            let frame = entry.frame.convert();
            record.convert_ms += timer.lap_ms();
            save_frame(&path, &frame, acq)?;
            debug!("Image saved at {}", path.display());
            tally.saved += 1;
            record.save_ms = timer.lap_ms();
            if let Some(context) = &entry.trigger {
                writer.sinks.sidecar.attach(&path, context, writer.index, &writer.model);
                record.write_metadata_ms = timer.lap_ms();
            }
            decoded = Some(frame);
        }
        if acq.export {
            let frame = match decoded.take() {
                Some(frame) => frame,
                None => {
                    let frame = entry.frame.convert();
                    record.convert_ms += timer.lap_ms();
                    frame
                }
            };
            if let Some(info) = writer.sinks.camera_infos.get(writer.index) {
                writer.sinks.publisher.publish_image(writer.index, &frame, info);
            }
            if let Some(context) = &entry.trigger {
                writer.sinks.publisher.publish_gps_tagged(&GpsTaggedImage::new(writer.index, context, &frame));
            }
            record.export_ms = timer.lap_ms();
        }

        image_count += 1;
        record.queue_size = queue.rx.len();
        writer.sinks.publisher.publish_benchmark(writer.index, &record.finish());
    }
    debug!("Writer for cam {} drained its queue after {} frames", writer.index, image_count);
    if tally.discarded > 0 {
        info!("🗑️ Cam {} discarded {} frames without trigger context", writer.index, tally.discarded);
    }
    Ok(tally)
}

/// Grabs from every camera in index order, once per cycle, until stopped or
/// until `max_cycles` cycles completed. Per-camera grab errors are logged and
/// skipped.
fn run_producer(
    cameras: &mut [CameraEntity],
    queues: Vec<FrameQueue>,
    ctx: &RunContext,
    sinks: &OutputSinks,
    on_demand_master: Option<usize>,
    max_cycles: Option<u64>,
) -> u64 {
    debug!("  Acquire Images to Queue Thread Initiated");
    let keep_running = ctx.keep_running_flag();
    let mut cycles: u64 = 0;
    let mut closed_reported = vec![false; queues.len()];

    while ctx.keep_running() {
        if let Some(request) = ctx.pending_reconfigure() {
            if let Err(e) = apply_reconfigure(cameras, &request) {
                warn!("⚠️ Live reconfigure failed: {}", e);
            }
        }
        if let Some(master) = on_demand_master {
            match ctx.capture_requests.recv_timeout(IDLE_WAIT) {
                Ok(_) => {
                    if let Err(e) = cameras[master].trigger() {
                        error!("❌ Failed to trigger master camera: {}", e);
                        continue;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for (i, camera) in cameras.iter_mut().enumerate() {
            let grab_start = Instant::now();
            match camera.grab_frame() {
                Ok(frame) => {
                    let entry = QueueEntry { frame, trigger: ctx.trigger_slot.snapshot() };
                    match queues[i].push(entry, &keep_running) {
                        PushOutcome::Queued => {}
                        PushOutcome::DroppedOldest => debug!("Queue {} full, dropped its oldest frame", i),
                        PushOutcome::DroppedNewest => debug!("Queue {} full, dropped the new frame", i),
                        PushOutcome::Closed => {
                            if !closed_reported[i] {
                                warn!("⚠️ Writer for camera {} is gone, its frames are discarded", camera.id());
                                closed_reported[i] = true;
                            }
                        }
                    }
                    debug!("Queue no. {} size: {}", i, queues[i].len());
                }
                Err(e) => error!("❌ Exception in acquire to queue thread for camera {}: {}", camera.id(), e),
            }
            if i == 0 {
                sinks.publisher.publish_fps(rate_hz(grab_start.elapsed()));
            }
        }
        cycles += 1;
        if max_cycles.is_some_and(|limit| cycles >= limit) {
            info!("🏁 {} frames acquired per camera. Stopping producer...", cycles);
            break;
        }
    }
    cycles
}

/// Runs the producer on the calling thread and one writer thread per camera.
/// Returns once every writer drained its queue.
pub fn run_pipeline(
    manager: &mut CameraManager,
    config: &MasterConfig,
    ctx: &RunContext,
    queue_config: &QueueConfig,
    sinks: &OutputSinks,
) -> Result<RunSummary, AppError> {
    info!("🎬 *** ACQUISITION MULTI-THREADED ***");
    let start_time = Instant::now();
    let save_root = PathBuf::from(&config.app_settings.save_path);
    if config.acquisition.save {
        ensure_output_directory(&config.app_settings.save_path)?;
        create_camera_directories(&save_root, &manager.names());
    }
    let date = todays_date();
    let writers_meta: Vec<(String, String, String)> = manager
        .cameras()
        .iter()
        .map(|c| (c.name().to_string(), c.id().to_string(), c.model_name()))
        .collect();
    let (queues, receivers): (Vec<FrameQueue>, Vec<QueueReceiver>) =
        (0..manager.len()).map(|_| frame_queue(queue_config)).unzip();
    info!(
        "📦 {} queues, capacity {} each, policy {:?}",
        queues.len(),
        queue_config.capacity,
        queue_config.policy
    );

    let on_demand_master = if config.acquisition.on_demand_trigger && !config.acquisition.external_trigger {
        manager.master_index()
    } else {
        None
    };
    manager.start_acquisition()?;

    let summary = std::thread::scope(|scope| -> Result<RunSummary, AppError> {
        let mut handles = Vec::with_capacity(receivers.len());
        for (index, (queue, (name, id, model))) in receivers.into_iter().zip(writers_meta).enumerate() {
            let writer = WriterContext {
                index,
                name: name.clone(),
                id,
                model,
                config,
                sinks,
                save_root: &save_root,
                date: &date,
            };
            let handle = std::thread::Builder::new()
                .name(format!("writer-{}", name))
                .spawn_scoped(scope, move || run_writer(writer, queue))
                .map_err(|e| AppError::Io(format!("Failed to spawn writer thread: {}", e)))?;
            handles.push((index, handle));
        }

        let cycles = run_producer(
            manager.cameras_mut(),
            queues,
            ctx,
            sinks,
            on_demand_master,
            config.acquisition.fixed_frame_count(),
        );
        debug!("Producer stopped after {} cycles, waiting for writers to drain", cycles);

        let mut summary = RunSummary { cycles, ..Default::default() };
        for (index, handle) in handles {
            match handle.join() {
                Ok(Ok(tally)) => {
                    summary.frames_saved += tally.saved;
                    summary.frames_discarded += tally.discarded;
                    summary.queue_depth_warnings += tally.depth_warnings;
                }
                Ok(Err(e)) => error!("💀 Writer for cam {} stopped: {}", index, e),
                Err(_) => error!("💀 Writer thread for cam {} panicked", index),
            }
        }
        Ok(summary)
    })?;

    debug!("All Threads Joined");
    info!(
        "✅ Multi-threaded acquisition finished in {:?}: {} cycles, {} files saved",
        start_time.elapsed(),
        summary.cycles,
        summary.frames_saved
    );
    Ok(summary)
}
