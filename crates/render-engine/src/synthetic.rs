//! Deterministic in-memory media backend.
//!
//! [`SyntheticDecoderFactory`] fabricates frames whose colour encodes the
//! source file and frame index, so composited output can be checked pixel by
//! pixel without any media on disk. Seeks land on the preceding GOP boundary
//! like a real decoder would. [`CollectingSinkFactory`] records what a render
//! wrote.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::{frame_interval, MediaFile, Timestamp};
use parking_lot::Mutex;

use crate::frame::{Frame, PixelFormat, StreamKind};
use crate::media::{DecoderFactory, EncodeOptions, MediaDecoder, MediaSink, SinkFactory};

/// Counters shared by every decoder a factory opened.
#[derive(Debug, Default)]
pub struct DecodeCounters {
    opens: AtomicU64,
    seeks: AtomicU64,
    frames: AtomicU64,
}

impl DecodeCounters {
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// Colour of frame `index` of the file at `path`.
pub fn pattern_rgb(path: &Path, index: i64) -> [u8; 3] {
    let seed = path
        .to_string_lossy()
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    [
        index.rem_euclid(256) as u8,
        (seed % 251) as u8 + 1,
        (index / 256).rem_euclid(256) as u8,
    ]
}

/// Test-pattern decoder backend.
pub struct SyntheticDecoderFactory {
    width: u32,
    height: u32,
    fps: u32,
    gop: u32,
    format: PixelFormat,
    counters: Arc<DecodeCounters>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl SyntheticDecoderFactory {
    /// Sources of `width` x `height` at `fps`, keyframe every 12 frames.
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            gop: 12,
            format: PixelFormat::Rgb24,
            counters: Arc::new(DecodeCounters::default()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_gop(mut self, frames: u32) -> Self {
        self.gop = frames.max(1);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Makes every later `open` of `path` fail.
    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.failing.lock().insert(path.into());
    }

    pub fn counters(&self) -> Arc<DecodeCounters> {
        Arc::clone(&self.counters)
    }

    pub fn frame_interval(&self) -> Timestamp {
        frame_interval(self.fps)
    }
}

impl DecoderFactory for SyntheticDecoderFactory {
    fn open(&self, media: &MediaFile) -> CutlineResult<Box<dyn MediaDecoder>> {
        if self.failing.lock().contains(&media.path) {
            return Err(CutlineError::decode(format!(
                "cannot open {}",
                media.path.display()
            )));
        }
        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        let interval = frame_interval(self.fps);
        Ok(Box::new(SyntheticDecoder {
            media: media.clone(),
            width: self.width,
            height: self.height,
            format: self.format,
            interval,
            gop_interval: interval * i64::from(self.gop),
            next_index: 0,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticDecoder {
    media: MediaFile,
    width: u32,
    height: u32,
    format: PixelFormat,
    interval: Timestamp,
    gop_interval: Timestamp,
    next_index: i64,
    counters: Arc<DecodeCounters>,
}

impl SyntheticDecoder {
    fn render(&self, index: i64, pts: Timestamp) -> CutlineResult<Frame> {
        let [r, g, b] = pattern_rgb(&self.media.path, index);
        let bpp = self.format.bytes_per_pixel();
        let mut data = Frame::zeroed_buffer(self.width, self.height, self.format)?;
        for px in data.chunks_exact_mut(bpp) {
            self.format.write_rgba([r, g, b, 255], px);
        }
        Frame::new(
            self.width,
            self.height,
            self.format,
            pts,
            self.interval,
            data,
        )
    }
}

impl MediaDecoder for SyntheticDecoder {
    fn seek(&mut self, position: Timestamp) -> CutlineResult<bool> {
        self.counters.seeks.fetch_add(1, Ordering::Relaxed);
        let keyframe = position.max(Timestamp::ZERO).align_down(self.gop_interval);
        self.next_index = keyframe.as_nanos() / self.interval.as_nanos();
        Ok(true)
    }

    fn next_frame(&mut self, kind: StreamKind) -> CutlineResult<Option<Frame>> {
        if kind == StreamKind::Audio {
            return Ok(None);
        }
        let pts = self.interval * self.next_index;
        let exhausted = if self.media.is_image() {
            self.next_index > 0
        } else {
            pts >= self.media.duration
        };
        if exhausted {
            return Ok(None);
        }
        let frame = self.render(self.next_index, pts)?;
        self.next_index += 1;
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

/// What a [`CollectingSinkFactory`] saw.
#[derive(Debug, Clone, Default)]
pub struct SinkRecord {
    pub path: Option<PathBuf>,
    pub options: Option<EncodeOptions>,
    pub frames: Vec<Frame>,
    pub finished: bool,
}

/// Sink backend that keeps written frames in memory.
#[derive(Default)]
pub struct CollectingSinkFactory {
    record: Arc<Mutex<SinkRecord>>,
    fail_open: bool,
}

impl CollectingSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose `open` always fails.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Copy of everything recorded so far.
    pub fn record(&self) -> SinkRecord {
        self.record.lock().clone()
    }
}

impl SinkFactory for CollectingSinkFactory {
    fn open(&self, path: &Path, options: &EncodeOptions) -> CutlineResult<Box<dyn MediaSink>> {
        if self.fail_open {
            return Err(CutlineError::sink(format!(
                "cannot create {}",
                path.display()
            )));
        }
        {
            let mut record = self.record.lock();
            record.path = Some(path.to_path_buf());
            record.options = Some(options.clone());
        }
        Ok(Box::new(CollectingSink {
            record: Arc::clone(&self.record),
        }))
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

struct CollectingSink {
    record: Arc<Mutex<SinkRecord>>,
}

impl MediaSink for CollectingSink {
    fn write_frame(&mut self, kind: StreamKind, frame: &Frame) -> CutlineResult<()> {
        let mut record = self.record.lock();
        if record.finished {
            return Err(CutlineError::sink("write after finish"));
        }
        if kind == StreamKind::Video {
            record.frames.push(frame.clone());
        }
        Ok(())
    }

    fn finish(&mut self) -> CutlineResult<()> {
        self.record.lock().finished = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "collecting"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_lands_on_gop_boundary() {
        let factory = SyntheticDecoderFactory::new(2, 2, 10).with_gop(5);
        let media = MediaFile::video("/media/a.mp4", Timestamp::from_secs(3));
        let mut decoder = factory.open(&media).unwrap();

        decoder.seek(Timestamp::from_millis(1_230)).unwrap();
        let frame = decoder.next_frame(StreamKind::Video).unwrap().unwrap();
        assert_eq!(frame.pts, Timestamp::from_millis(1_000));
        assert_eq!(factory.counters().seeks(), 1);
    }

    #[test]
    fn test_frames_encode_index() {
        let factory = SyntheticDecoderFactory::new(2, 2, 10).with_format(PixelFormat::Bgra);
        let media = MediaFile::video("/media/a.mp4", Timestamp::from_secs(1));
        let mut decoder = factory.open(&media).unwrap();
        decoder.next_frame(StreamKind::Video).unwrap();
        let second = decoder.next_frame(StreamKind::Video).unwrap().unwrap();
        let [r, g, b] = pattern_rgb(&media.path, 1);
        assert_eq!(second.pixel(1, 1), [r, g, b, 255]);
        assert!(decoder.next_frame(StreamKind::Audio).unwrap().is_none());
    }

    #[test]
    fn test_stream_ends_at_duration() {
        let factory = SyntheticDecoderFactory::new(1, 1, 10);
        let media = MediaFile::video("/media/a.mp4", Timestamp::from_millis(250));
        let mut decoder = factory.open(&media).unwrap();
        let mut count = 0;
        while decoder.next_frame(StreamKind::Video).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(factory.counters().frames(), 3);
    }

    #[test]
    fn test_failing_path() {
        let factory = SyntheticDecoderFactory::new(1, 1, 10);
        factory.fail_on("/media/broken.mp4");
        let media = MediaFile::video("/media/broken.mp4", Timestamp::from_secs(1));
        assert!(factory.open(&media).is_err());
        assert_eq!(factory.counters().opens(), 0);
    }

    #[test]
    fn test_collecting_sink_rejects_write_after_finish() {
        let factory = CollectingSinkFactory::new();
        let mut sink = factory
            .open(Path::new("/tmp/out.mp4"), &EncodeOptions::new(1, 1, 10))
            .unwrap();
        let frame = Frame::new(
            1,
            1,
            PixelFormat::Rgb24,
            Timestamp::ZERO,
            Timestamp::ZERO,
            vec![0, 0, 0],
        )
        .unwrap();
        sink.write_frame(StreamKind::Video, &frame).unwrap();
        sink.finish().unwrap();
        assert!(sink.write_frame(StreamKind::Video, &frame).is_err());

        let record = factory.record();
        assert_eq!(record.frames.len(), 1);
        assert!(record.finished);
    }
}
