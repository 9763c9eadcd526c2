use crate::camera::camera_media::{DecodedFrame, RawFrame};
use crate::errors::CameraError;
use std::fmt;
use std::time::Duration;

// --- Feature values as exposed by GenICam-style node maps ---

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Enum(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FeatureValue {
    pub fn enumeration(value: &str) -> Self {
        FeatureValue::Enum(value.to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            FeatureValue::Enum(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Enum(v) => write!(f, "{}", v),
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

// --- The CameraHandle Trait ---

/// One physical camera as seen through the vendor SDK.
///
/// Every call may block on the device. `grab_frame` waits for the next
/// frame in the device buffer; `None` means the device's own default wait.
pub trait CameraHandle: Send {
    fn id(&self) -> &str;
    fn model_name(&self) -> String;

    fn init(&mut self) -> Result<(), CameraError>;
    fn deinit(&mut self) -> Result<(), CameraError>;
    fn begin_acquisition(&mut self) -> Result<(), CameraError>;
    fn end_acquisition(&mut self) -> Result<(), CameraError>;

    fn grab_frame(&mut self, timeout: Option<Duration>) -> Result<RawFrame, CameraError>;

    fn grab_and_convert(&mut self, timeout: Option<Duration>) -> Result<DecodedFrame, CameraError> {
        self.grab_frame(timeout).map(|raw| raw.convert())
    }

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError>;
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError>;
    fn feature_max(&self, name: &str) -> Result<f64, CameraError>;

    fn trigger(&mut self) -> Result<(), CameraError>;

    fn set_buffer_size(&mut self, frames: i64) -> Result<(), CameraError> {
        self.set_feature("StreamBufferCountManual", FeatureValue::Int(frames))
    }

    /// True when the device reports the requested binning on both axes.
    fn verify_binning(&self, binning: i64) -> Result<bool, CameraError> {
        let horizontal = self.get_feature("BinningHorizontal")?.as_int();
        let vertical = self.get_feature("BinningVertical")?.as_int();
        Ok(horizontal == Some(binning) && vertical == Some(binning))
    }
}

/// Entry point of a camera SDK: hands out handles for every attached device.
pub trait CameraSystem {
    fn library_version(&self) -> String;
    fn enumerate(&mut self) -> Result<Vec<Box<dyn CameraHandle>>, CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_value_accessors() {
        assert_eq!(FeatureValue::Int(4).as_int(), Some(4));
        assert_eq!(FeatureValue::Int(4).as_float(), Some(4.0));
        assert_eq!(FeatureValue::enumeration("Off").as_enum(), Some("Off"));
        assert_eq!(FeatureValue::Bool(true).as_int(), None);
        assert_eq!(FeatureValue::Float(1.5).to_string(), "1.5");
    }
}
