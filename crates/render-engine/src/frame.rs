//! Decoded frames and pixel formats.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::Timestamp;
use serde::{Deserialize, Serialize};

/// Kind of elementary stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Packed pixel layouts understood by the converter and compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    Bgra,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba | Self::Bgra => 4,
            Self::Gray8 => 1,
        }
    }

    /// Name ffmpeg uses for this layout in `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
            Self::Gray8 => "gray",
        }
    }

    /// Reads one pixel as RGBA.
    #[inline]
    pub fn read_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            Self::Rgb24 => [px[0], px[1], px[2], 255],
            Self::Rgba => [px[0], px[1], px[2], px[3]],
            Self::Bgra => [px[2], px[1], px[0], px[3]],
            Self::Gray8 => [px[0], px[0], px[0], 255],
        }
    }

    /// Writes one RGBA pixel in this layout.
    #[inline]
    pub fn write_rgba(self, rgba: [u8; 4], out: &mut [u8]) {
        match self {
            Self::Rgb24 => out[..3].copy_from_slice(&rgba[..3]),
            Self::Rgba => out[..4].copy_from_slice(&rgba),
            Self::Bgra => out[..4].copy_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]),
            Self::Gray8 => {
                let [r, g, b, _] = rgba;
                let luma = (u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8;
                out[0] = luma as u8;
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
            Self::Gray8 => "gray8",
        })
    }
}

impl FromStr for PixelFormat {
    type Err = CutlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            "rgba" | "rgba32" => Ok(Self::Rgba),
            "bgra" | "bgra32" => Ok(Self::Bgra),
            "gray8" | "gray" => Ok(Self::Gray8),
            other => Err(CutlineError::config(format!(
                "unknown pixel format '{other}'"
            ))),
        }
    }
}

/// A decoded or composited picture.
///
/// Pixel data is reference counted, so cloning a frame is cheap and clones
/// share the same buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation timestamp.
    pub pts: Timestamp,
    pub duration: Timestamp,
    pub data: Arc<Vec<u8>>,
}

impl Frame {
    /// Wraps `data`, checking it matches the declared geometry.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        pts: Timestamp,
        duration: Timestamp,
        data: Vec<u8>,
    ) -> CutlineResult<Self> {
        let expected = buffer_len(width, height, format);
        if data.len() != expected {
            return Err(CutlineError::decode(format!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height} {format}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            pts,
            duration,
            data: Arc::new(data),
        })
    }

    /// Zero-filled buffer for a `width` x `height` picture.
    ///
    /// Reports allocation failure instead of aborting.
    pub fn zeroed_buffer(width: u32, height: u32, format: PixelFormat) -> CutlineResult<Vec<u8>> {
        let bytes = buffer_len(width, height, format);
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| CutlineError::Allocation { bytes })?;
        data.resize(bytes, 0);
        Ok(data)
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// RGBA value of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let bpp = self.format.bytes_per_pixel();
        let offset = y as usize * self.stride() + x as usize * bpp;
        self.format.read_rgba(&self.data[offset..offset + bpp])
    }

    /// Whether both frames share one pixel buffer.
    pub fn shares_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

pub(crate) fn buffer_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_buffer_size() {
        let err = Frame::new(
            2,
            2,
            PixelFormat::Rgb24,
            Timestamp::ZERO,
            Timestamp::ZERO,
            vec![0; 11],
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected 12"));
    }

    #[test]
    fn test_clone_shares_buffer() {
        let frame = Frame::new(
            1,
            1,
            PixelFormat::Rgba,
            Timestamp::ZERO,
            Timestamp::ZERO,
            vec![1, 2, 3, 4],
        )
        .unwrap();
        let copy = frame.clone();
        assert!(copy.shares_buffer(&frame));
        assert_eq!(copy.pixel(0, 0), [1, 2, 3, 4]);
    }

    #[test]
    fn test_bgra_round_trips_channels() {
        let mut out = [0u8; 4];
        PixelFormat::Bgra.write_rgba([10, 20, 30, 40], &mut out);
        assert_eq!(out, [30, 20, 10, 40]);
        assert_eq!(PixelFormat::Bgra.read_rgba(&out), [10, 20, 30, 40]);
    }

    #[test]
    fn test_gray_luma_of_white_is_white() {
        let mut out = [0u8; 1];
        PixelFormat::Gray8.write_rgba([255, 255, 255, 255], &mut out);
        assert_eq!(out[0], 255);
    }

    #[test]
    fn test_parse_pixel_format() {
        assert_eq!("RGB24".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb24);
        assert_eq!("gray".parse::<PixelFormat>().unwrap(), PixelFormat::Gray8);
        assert!("yuv420p".parse::<PixelFormat>().is_err());
    }
}
