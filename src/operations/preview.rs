use crate::camera::camera_media::DecodedFrame;
use log::debug;

/// Hook for a live view. Rendering is left to the embedding application.
pub trait PreviewSink: Send {
    fn show(&mut self, title: &str, frame: &DecodedFrame);
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show(&mut self, title: &str, frame: &DecodedFrame) {
        debug!("🖥️ preview '{}' {}x{}", title, frame.width, frame.height);
    }
}

/// Places frames side by side, left to right in camera order. Frames shorter
/// than the tallest are padded with black; grey frames are expanded when any
/// frame is color.
pub fn compose_grid(frames: &[DecodedFrame]) -> DecodedFrame {
    let frames: Vec<&DecodedFrame> = frames.iter().filter(|f| !f.is_empty()).collect();
    if frames.is_empty() {
        return DecodedFrame::default();
    }
    let channels = if frames.iter().any(|f| f.channels == 3) { 3u8 } else { 1u8 };
    let height = frames.iter().map(|f| f.height).max().unwrap_or(0);
    let width: u32 = frames.iter().map(|f| f.width).sum();
    let row_bytes = width as usize * channels as usize;
    let mut data = vec![0u8; row_bytes * height as usize];

    let mut x_offset = 0usize;
    for frame in &frames {
        let src_row = frame.row_bytes();
        for y in 0..frame.height as usize {
            let Some(src) = frame.data.get(y * src_row..(y + 1) * src_row) else {
                debug!("Frame {} has {} bytes, short of {}x{}; stopping at row {}", frame.frame_id, frame.data.len(), frame.width, frame.height, y);
                break;
            };
            let dst_start = y * row_bytes + x_offset * channels as usize;
            if frame.channels == channels {
                if let Some(dst) = data.get_mut(dst_start..dst_start + src.len()) {
                    dst.copy_from_slice(src);
                }
            } else {
                for (x, value) in src.iter().enumerate() {
                    let px = dst_start + x * 3;
                    if let Some(dst) = data.get_mut(px..px + 3) {
                        dst.fill(*value);
                    }
                }
            }
        }
        x_offset += frame.width as usize;
    }
    DecodedFrame {
        width,
        height,
        channels,
        data,
        timestamp_ns: frames[0].timestamp_ns,
        frame_id: frames[0].frame_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey(width: u32, height: u32, value: u8) -> DecodedFrame {
        DecodedFrame { width, height, channels: 1, data: vec![value; (width * height) as usize], ..Default::default() }
    }

    #[test]
    fn grid_is_side_by_side() {
        let grid = compose_grid(&[grey(2, 2, 10), grey(3, 2, 20)]);
        assert_eq!((grid.width, grid.height, grid.channels), (5, 2, 1));
        assert_eq!(&grid.data[..5], &[10, 10, 20, 20, 20]);
    }

    #[test]
    fn mixed_channels_expand_to_color() {
        let color = DecodedFrame { width: 1, height: 1, channels: 3, data: vec![1, 2, 3], ..Default::default() };
        let grid = compose_grid(&[grey(1, 1, 9), color]);
        assert_eq!(grid.data, vec![9, 9, 9, 1, 2, 3]);
    }

    #[test]
    fn short_frame_keeps_the_rows_it_has() {
        let short = DecodedFrame { width: 2, height: 2, channels: 1, data: vec![7, 7, 7], ..Default::default() };
        let grid = compose_grid(&[short, grey(1, 2, 5)]);
        assert_eq!((grid.width, grid.height), (3, 2));
        assert_eq!(grid.data, vec![7, 7, 5, 0, 0, 5]);
    }

    #[test]
    fn empty_input_gives_empty_frame() {
        assert!(compose_grid(&[]).is_empty());
    }
}
