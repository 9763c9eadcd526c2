//! Geotag sidecar embedded as EXIF inside saved JPEG files.
//!
//! The payload is a JSON object under the key `camera`, stored in the
//! `ImageDescription` tag of a minimal little-endian TIFF IFD0 inside an APP1
//! segment placed right after the SOI marker.

use crate::core::trigger::TriggerContext;
use crate::errors::AppError;
use log::{debug, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_MODEL: u16 = 0x0110;
const TYPE_ASCII: u16 = 2;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

#[derive(Debug, Serialize)]
struct CameraSidecar<'a> {
    block_name: &'a str,
    camera_number: usize,
    image_number: u64,
    lat: f64,
    lon: f64,
    utm_x: f64,
    utm_y: f64,
    altitude: f64,
    heading: f64,
}

#[derive(Debug, Serialize)]
struct SidecarDocument<'a> {
    camera: CameraSidecar<'a>,
}

pub fn sidecar_json(context: &TriggerContext, camera_number: usize) -> Result<String, AppError> {
    let doc = SidecarDocument {
        camera: CameraSidecar {
            block_name: &context.block_name,
            camera_number,
            image_number: context.sequence,
            lat: context.lat,
            lon: context.lon,
            utm_x: context.utm_x,
            utm_y: context.utm_y,
            altitude: context.altitude,
            heading: context.heading,
        },
    };
    serde_json::to_string(&doc).map_err(|e| AppError::Metadata(e.to_string()))
}

/// Builds a complete APP1 segment (marker included).
pub fn build_exif_segment(description: &str, model: &str) -> Result<Vec<u8>, AppError> {
    let entries = [(TAG_IMAGE_DESCRIPTION, description), (TAG_MODEL, model)];
    // TIFF header (8) + entry count (2) + entries (12 each) + next IFD offset (4)
    let ifd_end = 8 + 2 + 12 * entries.len() + 4;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&(entries.len() as u16).to_le_bytes());

    let mut data_area = Vec::new();
    for (tag, text) in entries {
        let mut value = text.as_bytes().to_vec();
        value.push(0);
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&TYPE_ASCII.to_le_bytes());
        tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
        if value.len() <= 4 {
            value.resize(4, 0);
            tiff.extend_from_slice(&value);
        } else {
            tiff.extend_from_slice(&((ifd_end + data_area.len()) as u32).to_le_bytes());
            data_area.extend_from_slice(&value);
            if data_area.len() % 2 == 1 {
                data_area.push(0);
            }
        }
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&data_area);

    let segment_len = 2 + EXIF_HEADER.len() + tiff.len();
    let segment_len = u16::try_from(segment_len)
        .map_err(|_| AppError::Metadata(format!("EXIF payload of {} bytes does not fit one APP1 segment", segment_len)))?;
    let mut app1 = vec![0xFF, 0xE1];
    app1.extend_from_slice(&segment_len.to_be_bytes());
    app1.extend_from_slice(EXIF_HEADER);
    app1.extend_from_slice(&tiff);
    Ok(app1)
}

/// Inserts an APP1 segment right after the SOI marker.
pub fn insert_app1_into_jpeg(jpeg: &mut Vec<u8>, app1: &[u8]) -> Result<(), AppError> {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return Err(AppError::Metadata("invalid JPEG header".to_string()));
    }
    jpeg.splice(2..2, app1.iter().copied());
    Ok(())
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

/// Embeds the sidecar into an already written image file.
pub fn attach_sidecar(path: &Path, context: &TriggerContext, camera_number: usize, model: &str) -> Result<(), AppError> {
    if !is_jpeg(path) {
        return Err(AppError::Metadata(format!("'{}' cannot carry EXIF metadata", path.display())));
    }
    let description = sidecar_json(context, camera_number)?;
    let app1 = build_exif_segment(&description, model)?;
    let mut jpeg = std::fs::read(path)?;
    insert_app1_into_jpeg(&mut jpeg, &app1)?;
    std::fs::write(path, jpeg)?;
    Ok(())
}

/// Reads back the `ImageDescription` tag written by [`attach_sidecar`].
pub fn read_image_description(path: &Path) -> Result<Option<String>, AppError> {
    let jpeg = std::fs::read(path)?;
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return Err(AppError::Metadata("invalid JPEG header".to_string()));
    }
    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let body_end = (pos + 2 + len).min(jpeg.len());
        let body = &jpeg[(pos + 4).min(body_end)..body_end];
        if marker == 0xE1 && body.starts_with(EXIF_HEADER) {
            return Ok(find_ascii_tag(&body[EXIF_HEADER.len()..], TAG_IMAGE_DESCRIPTION));
        }
        if marker == 0xDA {
            break;
        }
        pos = body_end;
    }
    Ok(None)
}

fn find_ascii_tag(tiff: &[u8], wanted: u16) -> Option<String> {
    let u16_at = |o: usize| tiff.get(o..o + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let u32_at = |o: usize| tiff.get(o..o + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
    if tiff.get(0..2)? != b"II" {
        return None;
    }
    let ifd = u32_at(4)? as usize;
    let count = u16_at(ifd)? as usize;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        if u16_at(entry)? != wanted {
            continue;
        }
        let len = u32_at(entry + 4)? as usize;
        let start = if len <= 4 { entry + 8 } else { u32_at(entry + 8)? as usize };
        let raw = tiff.get(start..start + len)?;
        let text = raw.strip_suffix(&[0]).unwrap_or(raw);
        return String::from_utf8(text.to_vec()).ok();
    }
    None
}

/// Best-effort sidecar attachment shared by every writer thread. Failures are
/// logged and never fail the frame; the unsupported-container warning is
/// emitted once per run.
#[derive(Debug, Default)]
pub struct SidecarWriter {
    warned_unsupported: AtomicBool,
}

impl SidecarWriter {
    pub fn attach(&self, path: &Path, context: &TriggerContext, camera_number: usize, model: &str) -> bool {
        if !is_jpeg(path) {
            if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
                warn!(
                    "⚠️ Geotag metadata can only be embedded in JPEG files; '{}' and later frames are saved without it",
                    path.display()
                );
            } else {
                debug!("Skipping metadata for {}", path.display());
            }
            return false;
        }
        match attach_sidecar(path, context, camera_number, model) {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ Failed to write metadata to {}: {}", path.display(), e);
                false
            }
        }
    }
}
