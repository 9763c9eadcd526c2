use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mono8,
    BayerRG8,
    Rgb8,
}

impl PixelFormat {
    pub fn from_feature(name: &str) -> Option<Self> {
        match name {
            "Mono8" => Some(PixelFormat::Mono8),
            "BayerRG8" => Some(PixelFormat::BayerRG8),
            "RGB8" | "RGB8Packed" => Some(PixelFormat::Rgb8),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8 | PixelFormat::BayerRG8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::Rgb8 => "RGB8",
        };
        f.write_str(name)
    }
}

/// A frame as delivered by the device, before any format conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp_ns: u64,
    pub frame_id: u64,
}

/// An 8-bit grey (1 channel) or RGB (3 channel) image ready for encoding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
    pub timestamp_ns: u64,
    pub frame_id: u64,
}

impl DecodedFrame {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn color_type(&self) -> image::ColorType {
        if self.channels == 3 {
            image::ColorType::Rgb8
        } else {
            image::ColorType::L8
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }
}

impl RawFrame {
    /// Converts to an 8-bit image. Bayer RGGB is demosaiced by replicating
    /// each 2x2 cell, matching the SDK's nearest-neighbour conversion.
    pub fn convert(&self) -> DecodedFrame {
        let (channels, data) = match self.pixel_format {
            PixelFormat::Mono8 => (1, self.data.clone()),
            PixelFormat::Rgb8 => (3, self.data.clone()),
            PixelFormat::BayerRG8 => (3, demosaic_rggb(&self.data, self.width as usize, self.height as usize)),
        };
        DecodedFrame {
            width: self.width,
            height: self.height,
            channels,
            data,
            timestamp_ns: self.timestamp_ns,
            frame_id: self.frame_id,
        }
    }
}

fn demosaic_rggb(bayer: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut rgb = vec![0u8; width * height * 3];
    if width == 0 || height == 0 || bayer.len() < width * height {
        return rgb;
    }
    let at = |x: usize, y: usize| bayer[y.min(height - 1) * width + x.min(width - 1)];
    for y in 0..height {
        let y0 = y & !1;
        for x in 0..width {
            let x0 = x & !1;
            let r = at(x0, y0);
            let g = ((at(x0 + 1, y0) as u16 + at(x0, y0 + 1) as u16) / 2) as u8;
            let b = at(x0 + 1, y0 + 1);
            let out = (y * width + x) * 3;
            rgb[out] = r;
            rgb[out + 1] = g;
            rgb[out + 2] = b;
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pixel_format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame { width, height, pixel_format, data, timestamp_ns: 7, frame_id: 3 }
    }

    #[test]
    fn mono_conversion_keeps_bytes() {
        let frame = raw(PixelFormat::Mono8, 2, 2, vec![1, 2, 3, 4]).convert();
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.data, vec![1, 2, 3, 4]);
        assert_eq!(frame.frame_id, 3);
        assert_eq!(frame.timestamp_ns, 7);
    }

    #[test]
    fn bayer_cell_is_replicated() {
        // R G
        // G B
        let frame = raw(PixelFormat::BayerRG8, 2, 2, vec![200, 100, 50, 10]).convert();
        assert_eq!(frame.channels, 3);
        assert_eq!(frame.data.len(), 12);
        for px in frame.data.chunks(3) {
            assert_eq!(px, &[200, 75, 10]);
        }
    }

    #[test]
    fn bayer_handles_odd_edges() {
        let frame = raw(PixelFormat::BayerRG8, 3, 1, vec![9, 8, 7]).convert();
        assert_eq!(frame.data.len(), 9);
        assert_eq!(frame.data[6], 7);
    }
}
