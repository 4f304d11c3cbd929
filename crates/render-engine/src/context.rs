//! Shared engine resources handed to compositors and sessions.

use std::sync::Arc;

use cutline_common::config::EngineConfig;
use cutline_common::error::CutlineResult;
use cutline_timeline::Timestamp;

use crate::cache::FrameCache;
use crate::frame::PixelFormat;
use crate::media::DecoderFactory;

/// How far ahead a request may jump before a source reopens its decoder.
pub const DEFAULT_SEEK_AHEAD_THRESHOLD: Timestamp = Timestamp::from_secs(3);

/// Decoder backend, frame cache and tuning shared by every compositor of
/// an editing session. Cloning shares the backend and cache.
#[derive(Clone)]
pub struct EngineContext {
    pub decoders: Arc<dyn DecoderFactory>,
    pub cache: Arc<FrameCache>,
    pub seek_ahead_threshold: Timestamp,
    /// Canvas layout of composited frames.
    pub pixel_format: PixelFormat,
}

impl EngineContext {
    pub fn new(decoders: Arc<dyn DecoderFactory>) -> Self {
        Self {
            decoders,
            cache: Arc::new(FrameCache::default()),
            seek_ahead_threshold: DEFAULT_SEEK_AHEAD_THRESHOLD,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    pub fn from_config(
        decoders: Arc<dyn DecoderFactory>,
        config: &EngineConfig,
    ) -> CutlineResult<Self> {
        let seek_ms = config
            .seek_ahead_threshold_ms
            .min((i64::MAX / 1_000_000) as u64) as i64;
        Ok(Self {
            decoders,
            cache: Arc::new(FrameCache::new(config.cache_capacity_frames)),
            seek_ahead_threshold: Timestamp::from_millis(seek_ms),
            pixel_format: config.canvas_pixel_format.parse()?,
        })
    }

    pub fn with_cache(mut self, cache: Arc<FrameCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    pub fn with_seek_ahead_threshold(mut self, threshold: Timestamp) -> Self {
        self.seek_ahead_threshold = threshold;
        self
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("decoders", &self.decoders.name())
            .field("cache", &self.cache)
            .field("seek_ahead_threshold", &self.seek_ahead_threshold)
            .field("pixel_format", &self.pixel_format)
            .finish()
    }
}
