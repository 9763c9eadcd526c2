//! Persists decoded frames as encoded images or as raw `.bin` dumps.

use crate::app_config::AcquisitionConfig;
use crate::camera::camera_media::DecodedFrame;
use crate::errors::AppError;
use bytemuck::{Pod, Zeroable};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageEncoder, ImageFormat};
use log::debug;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

pub const RAW_MAGIC: [u8; 8] = *b"CAMARAW1";

/// Fixed little-endian header in front of the pixel bytes of a `.bin` file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 8],
    width: u32,
    height: u32,
    channels: u32,
    reserved: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<RawHeader>();

pub fn write_raw_frame(path: &Path, frame: &DecodedFrame) -> Result<(), AppError> {
    let header = RawHeader {
        magic: RAW_MAGIC,
        width: frame.width.to_le(),
        height: frame.height.to_le(),
        channels: u32::from(frame.channels).to_le(),
        reserved: 0,
    };
    let file = File::create(path)
        .map_err(|e| AppError::Io(format!("Failed to create raw frame '{}': {}", path.display(), e)))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytemuck::bytes_of(&header))?;
    writer.write_all(&frame.data)?;
    writer.flush()?;
    Ok(())
}

/// Reads a `.bin` frame back. Device timestamp and frame id are not stored.
pub fn read_raw_frame(path: &Path) -> Result<DecodedFrame, AppError> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| AppError::Io(format!("Failed to read raw frame '{}': {}", path.display(), e)))?;
    if bytes.len() < HEADER_LEN {
        return Err(AppError::RawFormat(format!("'{}' is shorter than the frame header", path.display())));
    }
    let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
    if header.magic != RAW_MAGIC {
        return Err(AppError::RawFormat(format!("'{}' has no raw frame magic", path.display())));
    }
    let (width, height, channels) =
        (u32::from_le(header.width), u32::from_le(header.height), u32::from_le(header.channels));
    if channels != 1 && channels != 3 {
        return Err(AppError::RawFormat(format!("unsupported channel count {}", channels)));
    }
    let expected = width as usize * height as usize * channels as usize;
    let data = bytes.split_off(HEADER_LEN);
    if data.len() != expected {
        return Err(AppError::RawFormat(format!(
            "'{}' holds {} pixel bytes, header describes {}",
            path.display(),
            data.len(),
            expected
        )));
    }
    Ok(DecodedFrame { width, height, channels: channels as u8, data, timestamp_ns: 0, frame_id: 0 })
}

/// Encodes the frame in the format implied by the path's extension.
pub fn save_image(path: &Path, frame: &DecodedFrame, jpeg_quality: u8) -> Result<(), AppError> {
    let format = ImageFormat::from_path(path)?;
    if format == ImageFormat::Jpeg {
        let file = File::create(path)
            .map_err(|e| AppError::Io(format!("Failed to create '{}': {}", path.display(), e)))?;
        let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), jpeg_quality);
        encoder.write_image(&frame.data, frame.width, frame.height, frame.color_type().into())?;
    } else {
        image::save_buffer_with_format(path, &frame.data, frame.width, frame.height, frame.color_type(), format)?;
    }
    Ok(())
}

/// Writes one frame per the acquisition settings.
pub fn save_frame(path: &Path, frame: &DecodedFrame, acq: &AcquisitionConfig) -> Result<(), AppError> {
    let start_time = Instant::now();
    if frame.is_empty() {
        return Err(AppError::Image(format!("refusing to save empty frame to '{}'", path.display())));
    }
    if acq.saves_raw_binary() {
        write_raw_frame(path, frame)?;
    } else {
        save_image(path, frame, acq.jpeg_quality)?;
    }
    debug!("💾 Saved {} in {:?}", path.display(), start_time.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(channels: u8) -> DecodedFrame {
        let (width, height) = (8u32, 4u32);
        let data = (0..width * height * channels as u32).map(|v| (v * 7 % 251) as u8).collect();
        DecodedFrame { width, height, channels, data, timestamp_ns: 5, frame_id: 2 }
    }

    #[test]
    fn raw_frame_round_trips_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let original = frame(3);
        write_raw_frame(&path, &original).unwrap();
        let restored = read_raw_frame(&path).unwrap();
        assert_eq!(restored.data, original.data);
        assert_eq!((restored.width, restored.height, restored.channels), (8, 4, 3));
    }

    #[test]
    fn truncated_raw_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        write_raw_frame(&path, &frame(1)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(read_raw_frame(&path), Err(AppError::RawFormat(_))));
    }

    #[test]
    fn saves_bmp_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        for (name, channels) in [("a.bmp", 1), ("b.jpg", 3), ("c.png", 1)] {
            let path = dir.path().join(name);
            save_image(&path, &frame(channels), 90).unwrap();
            let decoded = image::open(&path).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (8, 4));
        }
    }

    #[test]
    fn empty_frame_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bmp");
        let result = save_frame(&path, &DecodedFrame::default(), &AcquisitionConfig::default());
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
