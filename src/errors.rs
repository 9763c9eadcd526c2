use thiserror::Error;

/// Errors reported by a camera device handle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Timed out after {timeout_ms} ms waiting for a frame from camera {camera_id}")]
    Timeout { camera_id: String, timeout_ms: u64 },

    #[error("Camera {0} is not initialized")]
    NotInitialized(String),

    #[error("Camera {0} is not streaming")]
    NotStreaming(String),

    #[error("Camera {camera_id} has no feature named '{feature}'")]
    UnknownFeature { camera_id: String, feature: String },

    #[error("Camera {camera_id} rejected value for '{feature}': {details}")]
    InvalidFeatureValue { camera_id: String, feature: String, details: String },

    #[error("Device error on camera {camera_id}: {details}")]
    Device { camera_id: String, details: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Insufficient system resources for streaming: {0}")]
    InsufficientResources(String),

    #[error("None of the connected cameras are in the configured id list")]
    NoCamerasFound,

    #[error("Master camera '{0}' is not connected")]
    MasterNotFound(String),

    #[error("Failed to apply feature profile to camera {camera_id}: {source}")]
    FeatureProfile {
        camera_id: String,
        #[source]
        source: CameraError,
    },

    #[error("Camera {camera_id} did not apply binning {requested} (device reports {actual})")]
    BinningMismatch { camera_id: String, requested: i64, actual: i64 },

    #[error("Capture Error: {0}")]
    Capture(#[from] CameraError),

    #[error("File I/O Error: {0}")]
    Io(String),

    #[error("Metadata Error: {0}")]
    Metadata(String),

    #[error("Raw frame format Error: {0}")]
    RawFormat(String),

    #[error("Image encoding Error: {0}")]
    Image(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Image(err.to_string())
    }
}
