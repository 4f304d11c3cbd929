//! Random-access frame lookup over a forward-only decoder.
//!
//! A [`SyncSource`] answers "which frame is shown at source time `t`?" for
//! one clip. Requests are served, in order of preference, from the previous
//! answer, the shared [`FrameCache`], the current decode session (decoding
//! forward), or a fresh decoder seeked to `t`.

use std::sync::Arc;

use cutline_common::error::CutlineResult;
use cutline_timeline::{MediaFile, Timestamp};

use crate::cache::FrameCache;
use crate::context::EngineContext;
use crate::frame::{Frame, StreamKind};
use crate::media::{DecoderFactory, MediaDecoder};

/// Counters describing how a source served its requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub decoder_opens: u64,
    pub seeks: u64,
    pub frames_decoded: u64,
    pub cache_hits: u64,
    pub repeats: u64,
}

struct DecodeSession {
    decoder: Box<dyn MediaDecoder>,
    /// Last timestamp this decoder was asked for.
    last_request: Option<Timestamp>,
    /// Last frame pulled from the decoder.
    head: Option<Frame>,
}

/// Frame-accurate access to one clip's media.
pub struct SyncSource {
    media: MediaFile,
    decoders: Arc<dyn DecoderFactory>,
    cache: Arc<FrameCache>,
    seek_ahead_threshold: Timestamp,
    session: DecodeSession,
    last_requested: Option<Timestamp>,
    last_returned: Option<Frame>,
    stats: SourceStats,
}

impl SyncSource {
    /// Opens a decoder for `media`. Fails if the decoder can't be created.
    pub fn open(media: MediaFile, ctx: &EngineContext) -> CutlineResult<Self> {
        let decoder = ctx.decoders.open(&media)?;
        tracing::debug!(
            media = %media.file_name(),
            backend = decoder.name(),
            "opened clip source"
        );
        Ok(Self {
            media,
            decoders: Arc::clone(&ctx.decoders),
            cache: Arc::clone(&ctx.cache),
            seek_ahead_threshold: ctx.seek_ahead_threshold,
            session: DecodeSession {
                decoder,
                last_request: None,
                head: None,
            },
            last_requested: None,
            last_returned: None,
            stats: SourceStats {
                decoder_opens: 1,
                ..SourceStats::default()
            },
        })
    }

    pub fn media(&self) -> &MediaFile {
        &self.media
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// First frame whose pts is `>= position`, or `None` past the end.
    ///
    /// Static images always answer with their single frame.
    pub fn frame_at(&mut self, position: Timestamp) -> CutlineResult<Option<Frame>> {
        let position = if self.media.is_image() {
            Timestamp::ZERO
        } else {
            position
        };

        // No frame starts in (last_requested, last_returned.pts], so the
        // previous answer still holds.
        if let (Some(requested), Some(returned)) = (self.last_requested, &self.last_returned) {
            if position > requested && position <= returned.pts {
                self.stats.repeats += 1;
                return Ok(Some(returned.clone()));
            }
        }

        if let Some(frame) = self.cache.get(self.media.path(), position) {
            self.stats.cache_hits += 1;
            self.remember(position, &frame);
            return Ok(Some(frame));
        }

        let Some(frame) = self.decode_at(position)? else {
            tracing::trace!(media = %self.media.file_name(), %position, "end of stream");
            return Ok(None);
        };
        self.cache
            .insert(self.media.path(), position, frame.clone());
        self.remember(position, &frame);
        Ok(Some(frame))
    }

    fn remember(&mut self, position: Timestamp, frame: &Frame) {
        self.last_requested = Some(position);
        self.last_returned = Some(frame.clone());
    }

    fn decode_at(&mut self, position: Timestamp) -> CutlineResult<Option<Frame>> {
        let continue_forward = self.session.last_request.is_some_and(|last| {
            position > last && position <= last.saturating_add(self.seek_ahead_threshold)
        });

        if continue_forward {
            if let Some(head) = &self.session.head {
                if position <= head.pts {
                    let frame = head.clone();
                    self.session.last_request = Some(position);
                    return Ok(Some(frame));
                }
            }
        } else {
            if self.session.last_request.is_some() {
                self.reopen()?;
            }
            tracing::trace!(media = %self.media.file_name(), %position, "seeking decoder");
            self.session.decoder.seek(position)?;
            self.session.head = None;
            self.stats.seeks += 1;
        }

        self.session.last_request = Some(position);
        while let Some(frame) = self.session.decoder.next_frame(StreamKind::Video)? {
            self.stats.frames_decoded += 1;
            self.session.head = Some(frame.clone());
            if frame.pts >= position {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn reopen(&mut self) -> CutlineResult<()> {
        tracing::debug!(
            media = %self.media.file_name(),
            last = ?self.session.last_request,
            "reopening decoder"
        );
        self.session = DecodeSession {
            decoder: self.decoders.open(&self.media)?,
            last_request: None,
            head: None,
        };
        self.stats.decoder_opens += 1;
        Ok(())
    }
}

impl std::fmt::Debug for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSource")
            .field("media", &self.media.path)
            .field("last_requested", &self.last_requested)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticDecoderFactory;
    use cutline_timeline::frame_interval;

    fn context(factory: &Arc<SyntheticDecoderFactory>) -> EngineContext {
        EngineContext::new(factory.clone())
    }

    fn clip_media() -> MediaFile {
        MediaFile::video("/media/source.mp4", Timestamp::from_secs(20))
    }

    #[test]
    fn test_first_request_seeks_without_reopening() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut source = SyncSource::open(clip_media(), &context(&factory)).unwrap();

        let frame = source.frame_at(Timestamp::from_secs(1)).unwrap().unwrap();
        assert_eq!(frame.pts, Timestamp::from_secs(1));
        assert_eq!(source.stats().decoder_opens, 1);
        assert_eq!(source.stats().seeks, 1);
    }

    #[test]
    fn test_pts_is_first_frame_at_or_after_request() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut source = SyncSource::open(clip_media(), &context(&factory)).unwrap();

        let frame = source.frame_at(Timestamp::from_millis(1_010)).unwrap().unwrap();
        assert_eq!(frame.pts, Timestamp::from_millis(1_040));
    }

    #[test]
    fn test_repeat_request_reuses_previous_frame() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut source = SyncSource::open(clip_media(), &context(&factory)).unwrap();

        let first = source.frame_at(Timestamp::from_millis(1_010)).unwrap().unwrap();
        let decoded = source.stats().frames_decoded;
        let again = source.frame_at(Timestamp::from_millis(1_030)).unwrap().unwrap();

        assert!(again.shares_buffer(&first));
        assert_eq!(source.stats().frames_decoded, decoded);
        assert_eq!(source.stats().repeats, 1);
    }

    #[test]
    fn test_backward_request_reopens() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let ctx = context(&factory).with_cache(Arc::new(FrameCache::new(1)));
        let mut source = SyncSource::open(clip_media(), &ctx).unwrap();

        source.frame_at(Timestamp::from_secs(2)).unwrap();
        source.frame_at(Timestamp::from_secs(3)).unwrap();
        let frame = source.frame_at(Timestamp::from_secs(1)).unwrap().unwrap();

        assert_eq!(frame.pts, Timestamp::from_secs(1));
        assert_eq!(source.stats().decoder_opens, 2);
        assert_eq!(factory.counters().opens(), 2);
    }

    #[test]
    fn test_past_end_is_none() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let media = MediaFile::video("/media/short.mp4", Timestamp::from_secs(1));
        let mut source = SyncSource::open(media, &context(&factory)).unwrap();
        assert!(source.frame_at(Timestamp::from_secs(2)).unwrap().is_none());
    }

    #[test]
    fn test_image_ignores_requested_time() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let media = MediaFile::image("/media/still.png");
        let mut source = SyncSource::open(media, &context(&factory)).unwrap();

        let a = source.frame_at(Timestamp::from_secs(5)).unwrap().unwrap();
        let b = source.frame_at(Timestamp::from_secs(9)).unwrap().unwrap();
        assert_eq!(a.pts, Timestamp::ZERO);
        assert!(b.shares_buffer(&a));
        assert_eq!(source.stats().frames_decoded, 1);
    }

    #[test]
    fn test_cache_hit_does_not_disturb_decoder_position() {
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let ctx = context(&factory);
        let dt = frame_interval(25);
        let mut warm = SyncSource::open(clip_media(), &ctx).unwrap();
        warm.frame_at(Timestamp::ZERO).unwrap();

        let mut source = SyncSource::open(clip_media(), &ctx).unwrap();
        source.frame_at(dt * 10).unwrap();
        // Served from the cache filled by `warm`.
        source.frame_at(Timestamp::ZERO).unwrap();
        let frame = source.frame_at(dt * 11).unwrap().unwrap();

        assert_eq!(frame.pts, dt * 11);
        assert_eq!(source.stats().cache_hits, 1);
        assert_eq!(source.stats().decoder_opens, 1);
    }
}
