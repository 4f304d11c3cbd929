//! Per-track scaling and pixel-format conversion.
//!
//! A [`FrameConverter`] keeps its output buffer and scaling context between
//! calls. Converted frames share the buffer; it is rewritten in place once
//! the previous frame has been dropped, and reallocated only when the target
//! size changes or a caller still holds the previous frame. The
//! nearest-neighbour index maps are rebuilt only when the input geometry or
//! the target size changes.

use std::sync::Arc;

use cutline_common::error::{CutlineError, CutlineResult};

use crate::frame::{buffer_len, Frame, PixelFormat};

/// Allocation and rebuild counters of a converter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConverterStats {
    pub allocations: u64,
    pub scaler_builds: u64,
    pub conversions: u64,
}

/// Precomputed source offsets for one input/output geometry.
#[derive(Debug)]
struct Scaler {
    src_width: u32,
    src_height: u32,
    src_format: PixelFormat,
    dst_width: u32,
    dst_height: u32,
    /// Byte offset within a source row for each output column.
    x_offsets: Vec<usize>,
    /// Source row for each output row.
    y_rows: Vec<usize>,
}

impl Scaler {
    fn new(src: &Frame, dst_width: u32, dst_height: u32) -> Self {
        let bpp = src.format.bytes_per_pixel();
        let x_offsets = (0..dst_width)
            .map(|dx| nearest(dx, src.width, dst_width) * bpp)
            .collect();
        let y_rows = (0..dst_height)
            .map(|dy| nearest(dy, src.height, dst_height))
            .collect();
        Self {
            src_width: src.width,
            src_height: src.height,
            src_format: src.format,
            dst_width,
            dst_height,
            x_offsets,
            y_rows,
        }
    }

    fn matches(&self, src: &Frame, dst_width: u32, dst_height: u32) -> bool {
        self.src_width == src.width
            && self.src_height == src.height
            && self.src_format == src.format
            && self.dst_width == dst_width
            && self.dst_height == dst_height
    }

    fn scale(&self, src: &Frame, dst_format: PixelFormat, dst: &mut [u8]) {
        let src_stride = src.stride();
        let src_bpp = src.format.bytes_per_pixel();
        let dst_bpp = dst_format.bytes_per_pixel();
        let dst_stride = self.dst_width as usize * dst_bpp;

        if src.format == dst_format && src.width == self.dst_width && src.height == self.dst_height
        {
            dst.copy_from_slice(&src.data[..dst.len()]);
            return;
        }

        for (dy, dst_row) in dst.chunks_exact_mut(dst_stride).enumerate() {
            let row_start = self.y_rows[dy] * src_stride;
            let src_row = &src.data[row_start..row_start + src_stride];
            for (dx, out) in dst_row.chunks_exact_mut(dst_bpp).enumerate() {
                let offset = self.x_offsets[dx];
                let px = &src_row[offset..offset + src_bpp];
                if src.format == dst_format {
                    out.copy_from_slice(px);
                } else {
                    dst_format.write_rgba(src.format.read_rgba(px), out);
                }
            }
        }
    }
}

/// Source index sampled for output index `d` (pixel-centre mapping).
fn nearest(d: u32, src_len: u32, dst_len: u32) -> usize {
    let s = (2 * u64::from(d) + 1) * u64::from(src_len) / (2 * u64::from(dst_len));
    s.min(u64::from(src_len.saturating_sub(1))) as usize
}

/// Resizes frames into one pixel format, reusing buffers across calls.
#[derive(Debug)]
pub struct FrameConverter {
    format: PixelFormat,
    target: Option<(u32, u32)>,
    buffer: Arc<Vec<u8>>,
    scaler: Option<Scaler>,
    stats: ConverterStats,
}

impl FrameConverter {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            target: None,
            buffer: Arc::new(Vec::new()),
            scaler: None,
            stats: ConverterStats::default(),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats
    }

    /// `input` scaled to `width` x `height` in the converter's format.
    ///
    /// The result shares the converter's buffer and keeps the input's
    /// timestamps. Drop it before the next call to avoid a reallocation.
    pub fn convert(&mut self, input: &Frame, width: u32, height: u32) -> CutlineResult<Frame> {
        if width == 0 || height == 0 {
            return Err(CutlineError::render(format!(
                "cannot convert to an empty {width}x{height} frame"
            )));
        }
        if input.width == 0 || input.height == 0 {
            return Err(CutlineError::decode("input frame has no pixels"));
        }
        if input.data.len() < buffer_len(input.width, input.height, input.format) {
            return Err(CutlineError::decode(format!(
                "input frame buffer too small for {}x{} {}",
                input.width, input.height, input.format
            )));
        }

        let reusable =
            self.target == Some((width, height)) && Arc::get_mut(&mut self.buffer).is_some();
        if !reusable {
            self.buffer = Arc::new(Frame::zeroed_buffer(width, height, self.format)?);
            self.target = Some((width, height));
            self.stats.allocations += 1;
        }

        let rebuild = !self
            .scaler
            .as_ref()
            .is_some_and(|s| s.matches(input, width, height));
        if rebuild {
            tracing::trace!(
                src_width = input.width,
                src_height = input.height,
                src_format = %input.format,
                width,
                height,
                "rebuilding scaler"
            );
            self.scaler = Some(Scaler::new(input, width, height));
            self.stats.scaler_builds += 1;
        }

        if let Some(scaler) = &self.scaler {
            // Uniquely owned at this point, so this never copies.
            scaler.scale(input, self.format, Arc::<Vec<u8>>::make_mut(&mut self.buffer));
        }
        self.stats.conversions += 1;

        Ok(Frame {
            width,
            height,
            format: self.format,
            pts: input.pts,
            duration: input.duration,
            data: Arc::clone(&self.buffer),
        })
    }
}
