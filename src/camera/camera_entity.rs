use crate::camera::camera_media::{DecodedFrame, RawFrame};
use crate::camera_config::CameraConfig;
use crate::core::capture_source::{CameraHandle, FeatureValue};
use crate::errors::CameraError;
use log::{debug, info};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Initialized,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    Master,
    Slave,
}

/// One resolved member of the camera set: a device handle plus the
/// configuration and role it was matched to.
pub struct CameraEntity {
    pub config: CameraConfig,
    pub state: CameraState,
    role: CameraRole,
    handle: Box<dyn CameraHandle>,
    grab_timeout: Option<Duration>,
    last_timestamp_ns: u64,
    last_frame_id: u64,
}

impl CameraEntity {
    pub fn new(config: CameraConfig, handle: Box<dyn CameraHandle>) -> Self {
        CameraEntity {
            config,
            state: CameraState::Idle,
            role: CameraRole::Slave,
            handle,
            grab_timeout: None,
            last_timestamp_ns: 0,
            last_frame_id: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        self.config.display_name()
    }

    pub fn model_name(&self) -> String {
        self.handle.model_name()
    }

    pub fn is_master(&self) -> bool {
        self.role == CameraRole::Master
    }

    pub fn make_master(&mut self) {
        info!("👑 Camera '{}' ({}) is the master camera", self.name(), self.id());
        self.role = CameraRole::Master;
    }

    pub fn set_grab_timeout(&mut self, timeout: Option<Duration>) {
        self.grab_timeout = timeout;
    }

    pub fn grab_timeout(&self) -> Option<Duration> {
        self.grab_timeout
    }

    pub fn update_state(&mut self, new_state: CameraState) {
        debug!("Camera '{}' state changed from {:?} to {:?}", self.name(), self.state, new_state);
        self.state = new_state;
    }

    pub fn init(&mut self) -> Result<(), CameraError> {
        self.handle.init()?;
        self.update_state(CameraState::Initialized);
        Ok(())
    }

    pub fn deinit(&mut self) -> Result<(), CameraError> {
        self.handle.deinit()?;
        self.update_state(CameraState::Idle);
        Ok(())
    }

    pub fn begin_acquisition(&mut self) -> Result<(), CameraError> {
        self.handle.begin_acquisition()?;
        self.update_state(CameraState::Streaming);
        Ok(())
    }

    pub fn end_acquisition(&mut self) -> Result<(), CameraError> {
        self.handle.end_acquisition()?;
        self.update_state(CameraState::Initialized);
        Ok(())
    }

    pub fn trigger(&mut self) -> Result<(), CameraError> {
        self.handle.trigger()
    }

    /// Blocking grab using this camera's configured timeout.
    pub fn grab_frame(&mut self) -> Result<RawFrame, CameraError> {
        let frame = self.handle.grab_frame(self.grab_timeout)?;
        self.last_timestamp_ns = frame.timestamp_ns;
        self.last_frame_id = frame.frame_id;
        Ok(frame)
    }

    pub fn grab_and_convert(&mut self) -> Result<DecodedFrame, CameraError> {
        let frame = self.handle.grab_and_convert(self.grab_timeout)?;
        self.last_timestamp_ns = frame.timestamp_ns;
        self.last_frame_id = frame.frame_id;
        Ok(frame)
    }

    pub fn timestamp(&self) -> u64 {
        self.last_timestamp_ns
    }

    pub fn frame_id(&self) -> u64 {
        self.last_frame_id
    }

    pub fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        debug!("  [{}] {} = {}", self.id(), name, value);
        self.handle.set_feature(name, value)
    }

    pub fn set_enum(&mut self, name: &str, value: &str) -> Result<(), CameraError> {
        self.set_feature(name, FeatureValue::enumeration(value))
    }

    pub fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        self.handle.get_feature(name)
    }

    pub fn feature_max(&self, name: &str) -> Result<f64, CameraError> {
        self.handle.feature_max(name)
    }

    pub fn set_buffer_size(&mut self, frames: i64) -> Result<(), CameraError> {
        self.handle.set_buffer_size(frames)
    }

    pub fn verify_binning(&self, binning: i64) -> Result<bool, CameraError> {
        self.handle.verify_binning(binning)
    }
}
