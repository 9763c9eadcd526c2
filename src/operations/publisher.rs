//! Outbound messages of a run. Transport belongs to whatever embeds the
//! engine; the shipped sink writes them to the log.

use crate::camera::camera_info::CameraInfo;
use crate::camera::camera_media::DecodedFrame;
use crate::core::trigger::TriggerContext;
use crate::operations::benchmark::BenchmarkRecord;
use crate::operations::exif_sidecar::SidecarWriter;
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Image tagged with the trigger context it was captured under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpsTaggedImage {
    pub camera_number: usize,
    pub image_number: u64,
    pub block_name: String,
    pub lat: f64,
    pub lon: f64,
    pub utm_x: f64,
    pub utm_y: f64,
    pub altitude: f64,
    pub heading: f64,
    pub width: u32,
    pub height: u32,
}

impl GpsTaggedImage {
    pub fn new(camera_number: usize, context: &TriggerContext, frame: &DecodedFrame) -> Self {
        GpsTaggedImage {
            camera_number,
            image_number: context.sequence,
            block_name: context.block_name.clone(),
            lat: context.lat,
            lon: context.lon,
            utm_x: context.utm_x,
            utm_y: context.utm_y,
            altitude: context.altitude,
            heading: context.heading,
            width: frame.width,
            height: frame.height,
        }
    }
}

pub trait Publisher: Send + Sync {
    /// One exported frame with its calibration record.
    fn publish_image(&self, camera_number: usize, frame: &DecodedFrame, info: &CameraInfo);
    /// Files persisted in one synchronous cycle.
    fn publish_batch(&self, filenames: &[PathBuf]);
    fn publish_gps_tagged(&self, image: &GpsTaggedImage);
    fn publish_benchmark(&self, camera_number: usize, record: &BenchmarkRecord);
    /// Achieved acquisition rate of the producer or capture loop.
    fn publish_fps(&self, fps: f64);
}

/// Everything a capture loop hands finished frames to.
#[derive(Clone)]
pub struct OutputSinks {
    pub publisher: Arc<dyn Publisher>,
    pub sidecar: Arc<SidecarWriter>,
    /// Indexed like the camera set.
    pub camera_infos: Vec<CameraInfo>,
}

impl OutputSinks {
    pub fn new(publisher: Arc<dyn Publisher>, camera_infos: Vec<CameraInfo>) -> Self {
        OutputSinks { publisher, sidecar: Arc::new(SidecarWriter::default()), camera_infos }
    }
}

/// Publishes to the log. Benchmarks are logged at info only when enabled.
#[derive(Debug, Default)]
pub struct LogPublisher {
    pub time_benchmark: bool,
}

impl Publisher for LogPublisher {
    fn publish_image(&self, camera_number: usize, frame: &DecodedFrame, info: &CameraInfo) {
        debug!(
            "📤 cam {} image {}x{} frame {} -> {}",
            camera_number, frame.width, frame.height, frame.frame_id, info.frame_id
        );
    }

    fn publish_batch(&self, filenames: &[PathBuf]) {
        debug!("📤 cycle wrote {} files", filenames.len());
    }

    fn publish_gps_tagged(&self, image: &GpsTaggedImage) {
        debug!(
            "📤 cam {} image #{} at ({:.6}, {:.6}) heading {:.1}",
            image.camera_number, image.image_number, image.lat, image.lon, image.heading
        );
    }

    fn publish_benchmark(&self, _camera_number: usize, record: &BenchmarkRecord) {
        if self.time_benchmark {
            record.log();
        }
    }

    fn publish_fps(&self, fps: f64) {
        if self.time_benchmark {
            info!("⏱️ Acquisition rate: {:.1} Hz", fps);
        } else {
            debug!("Acquisition rate: {:.1} Hz", fps);
        }
    }
}

/// Keeps every message, for inspecting a run after the fact.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pub images: Mutex<Vec<(usize, u64)>>,
    pub batches: Mutex<Vec<Vec<PathBuf>>>,
    pub gps_tagged: Mutex<Vec<GpsTaggedImage>>,
    pub benchmarks: Mutex<Vec<(usize, BenchmarkRecord)>>,
    pub fps: Mutex<Vec<f64>>,
}

impl Publisher for RecordingPublisher {
    fn publish_image(&self, camera_number: usize, frame: &DecodedFrame, _info: &CameraInfo) {
        self.images.lock().push((camera_number, frame.frame_id));
    }

    fn publish_batch(&self, filenames: &[PathBuf]) {
        self.batches.lock().push(filenames.to_vec());
    }

    fn publish_gps_tagged(&self, image: &GpsTaggedImage) {
        self.gps_tagged.lock().push(image.clone());
    }

    fn publish_benchmark(&self, camera_number: usize, record: &BenchmarkRecord) {
        self.benchmarks.lock().push((camera_number, record.clone()));
    }

    fn publish_fps(&self, fps: f64) {
        self.fps.lock().push(fps);
    }
}
