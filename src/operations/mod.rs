pub mod benchmark;
pub mod exif_sidecar;
pub mod frame_writer;
pub mod pipeline_op;
pub mod preview;
pub mod publisher;
pub mod run_op;
pub mod sync_capture_op;
