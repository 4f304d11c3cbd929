//! Frame compositor: turns a timeline mirror into a stream of canvas frames.
//!
//! The compositor owns a private copy of the tracks it renders, one
//! [`SyncSource`] per clip and one [`FrameConverter`] per track. Each call to
//! [`Compositor::next_frame`] paints the clip active on every track, in track
//! id order, onto a fresh canvas and advances the cursor by one frame.
//!
//! The mirror is kept current either with clip-level [`TimelineEvent`]s
//! ([`Compositor::apply_event`]) or track snapshots
//! ([`Compositor::apply_track_edit`]).

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use cutline_common::error::CutlineResult;
use cutline_timeline::{
    Clip, ClipId, ClipTransform, MediaFile, ProjectSettings, TimelineEvent, TimelineSnapshot,
    Timestamp, Track, TrackEdit, TrackId,
};

use crate::context::EngineContext;
use crate::converter::{ConverterStats, FrameConverter};
use crate::frame::{Frame, StreamKind};
use crate::sync_source::{SourceStats, SyncSource};

/// Offsets are kept within this many canvas sizes of the origin, which
/// places far-away clips safely off-canvas.
const MAX_OFFSET_CANVASES: f64 = 4.0;

/// Placement of a converted clip frame on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Canvas rectangle for `transform`; `None` when it covers no pixels.
    ///
    /// Rotation is not applied.
    pub fn for_transform(
        transform: &ClipTransform,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Option<Self> {
        let width = (f64::from(canvas_width) * f64::from(transform.scale_x)).round();
        let height = (f64::from(canvas_height) * f64::from(transform.scale_y)).round();
        if !(width >= 1.0 && height >= 1.0) {
            return None;
        }
        Some(Self {
            x: offset(canvas_width, transform.translate_x),
            y: offset(canvas_height, transform.translate_y),
            width: width.min(f64::from(u32::MAX)) as u32,
            height: height.min(f64::from(u32::MAX)) as u32,
        })
    }

    /// Whether any pixel lands inside a `canvas_width` x `canvas_height` canvas.
    pub fn overlaps_canvas(&self, canvas_width: u32, canvas_height: u32) -> bool {
        self.x < i64::from(canvas_width)
            && self.y < i64::from(canvas_height)
            && self.x.saturating_add(i64::from(self.width)) > 0
            && self.y.saturating_add(i64::from(self.height)) > 0
    }
}

fn offset(canvas_len: u32, translate: f32) -> i64 {
    let limit = f64::from(canvas_len) * MAX_OFFSET_CANVASES;
    let value = (f64::from(canvas_len) * f64::from(translate)).round();
    if value.is_nan() {
        return 0;
    }
    value.clamp(-limit, limit) as i64
}

/// Timeline-driven frame producer.
pub struct Compositor {
    settings: ProjectSettings,
    frame_interval: Timestamp,
    tracks: BTreeMap<TrackId, Track>,
    /// Duration set on the timeline; zero means "until the last clip ends".
    explicit_duration: Timestamp,
    duration: Timestamp,
    cursor: Timestamp,
    origin: Timestamp,
    sources: HashMap<ClipId, SyncSource>,
    converters: HashMap<TrackId, FrameConverter>,
    unreadable: HashSet<ClipId>,
    ctx: EngineContext,
}

impl Compositor {
    /// Builds a compositor positioned at zero and opens sources for every
    /// clip. Clips whose media can't be opened are skipped when rendering.
    pub fn new(snapshot: TimelineSnapshot, ctx: EngineContext) -> Self {
        let duration = snapshot.end();
        let converters = snapshot
            .tracks
            .keys()
            .map(|id| (*id, FrameConverter::new(ctx.pixel_format)))
            .collect();
        let mut compositor = Self {
            settings: snapshot.settings,
            frame_interval: snapshot.settings.frame_interval(),
            tracks: snapshot.tracks,
            explicit_duration: snapshot.duration,
            duration,
            cursor: Timestamp::ZERO,
            origin: Timestamp::ZERO,
            sources: HashMap::new(),
            converters,
            unreadable: HashSet::new(),
            ctx,
        };
        let reachable: Vec<(ClipId, MediaFile)> = compositor
            .tracks
            .values()
            .flat_map(Track::clips)
            .filter(|clip| clip.end_position() >= compositor.origin)
            .map(|clip| (clip.id, clip.media.clone()))
            .collect();
        for (id, media) in reachable {
            compositor.open_source(id, &media);
        }
        tracing::debug!(
            tracks = compositor.tracks.len(),
            sources = compositor.sources.len(),
            width = compositor.settings.width,
            height = compositor.settings.height,
            fps = compositor.settings.frame_rate,
            "compositor ready"
        );
        compositor
    }

    /// Moves the cursor to the frame boundary at or before `position`.
    pub fn seek(&mut self, position: Timestamp) -> bool {
        let aligned = position.align_down(self.frame_interval);
        tracing::trace!(requested = %position, %aligned, "compositor seek");
        self.cursor = aligned;
        self.origin = aligned;
        true
    }

    /// Composites the frame at the cursor and advances by one frame.
    ///
    /// Audio is not composited; asking for it yields `None`. Failing clips
    /// are logged and left out of the frame; only canvas allocation failure
    /// is returned as an error.
    pub fn next_frame(&mut self, kind: StreamKind) -> CutlineResult<Option<Frame>> {
        if kind == StreamKind::Audio {
            return Ok(None);
        }

        let Self {
            settings,
            frame_interval,
            tracks,
            cursor,
            sources,
            converters,
            unreadable,
            ctx,
            ..
        } = self;
        let (width, height, format) = (settings.width, settings.height, ctx.pixel_format);
        let position = *cursor;
        let mut canvas = Frame::zeroed_buffer(width, height, format)?;

        for track in tracks.values() {
            let Some(clip) = track.clip_at(position) else {
                continue;
            };
            if unreadable.contains(&clip.id) {
                continue;
            }

            let source = match sources.entry(clip.id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match SyncSource::open(clip.media.clone(), ctx) {
                    Ok(source) => entry.insert(source),
                    Err(err) => {
                        tracing::warn!(clip = %clip.id, error = %err, "cannot open clip media");
                        unreadable.insert(clip.id);
                        continue;
                    }
                },
            };
            let frame = match source.frame_at(clip.source_time(position)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(clip = %clip.id, error = %err, "clip decode failed");
                    sources.remove(&clip.id);
                    unreadable.insert(clip.id);
                    continue;
                }
            };

            let Some(placement) = Placement::for_transform(clip.transform_at(position), width, height)
            else {
                continue;
            };
            if !placement.overlaps_canvas(width, height) {
                continue;
            }
            let converter = converters
                .entry(track.id)
                .or_insert_with(|| FrameConverter::new(format));
            let scaled = match converter.convert(&frame, placement.width, placement.height) {
                Ok(scaled) => scaled,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(clip = %clip.id, error = %err, "clip conversion failed");
                    continue;
                }
            };
            blit(&mut canvas, width, height, &scaled, placement.x, placement.y);
        }

        let frame = Frame {
            width,
            height,
            format,
            pts: position,
            duration: *frame_interval,
            data: Arc::new(canvas),
        };
        *cursor += *frame_interval;
        Ok(Some(frame))
    }

    /// Only video is produced.
    pub fn has_stream(&self, kind: StreamKind) -> bool {
        kind == StreamKind::Video
    }

    /// Applies a clip- or track-level change to the mirror.
    pub fn apply_event(&mut self, event: &TimelineEvent) {
        match event {
            TimelineEvent::TrackAdded(id) => {
                self.tracks.entry(*id).or_insert_with(|| Track::empty(*id));
                self.ensure_converter(*id);
            }
            TimelineEvent::TrackRemoved(id) => self.remove_track(*id),
            TimelineEvent::TrackModified(_) => {}
            TimelineEvent::ClipAdded(clip) => {
                self.upsert_clip(clip.clone());
                if self.is_reachable(clip) {
                    self.open_source(clip.id, &clip.media);
                }
            }
            TimelineEvent::ClipRemoved(clip) => {
                if let Some(track) = self.tracks.get_mut(&clip.track_id) {
                    track.take_clip(clip.id);
                }
                self.drop_source(clip.id);
            }
            TimelineEvent::ClipMoved(clip) => {
                self.upsert_clip(clip.clone());
                self.drop_source(clip.id);
                self.open_source(clip.id, &clip.media);
            }
            TimelineEvent::ClipResized(clip) | TimelineEvent::ClipTransformed(clip) => {
                self.upsert_clip(clip.clone());
            }
            TimelineEvent::DurationChanged(duration) => self.explicit_duration = *duration,
        }
        self.refresh_duration();
    }

    /// Replaces mirrored tracks with a snapshot and reconciles sources.
    pub fn apply_track_edit(&mut self, edit: TrackEdit) {
        match edit {
            TrackEdit::Added { track } => {
                let id = track.id;
                self.ensure_converter(id);
                self.tracks.insert(id, track);
                self.open_new_sources(id, None);
            }
            TrackEdit::Removed { id } => self.remove_track(id),
            TrackEdit::DurationChanged { duration } => self.explicit_duration = duration,
            TrackEdit::Modified { track } => {
                let id = track.id;
                self.ensure_converter(id);
                let previous = self.tracks.insert(id, track);
                if let Some(previous) = &previous {
                    for clip in previous.clips() {
                        if !self.contains_clip(clip.id) {
                            self.drop_source(clip.id);
                        }
                    }
                }
                self.open_new_sources(id, previous.as_ref());
            }
        }
        self.refresh_duration();
        tracing::trace!(
            sources = self.sources.len(),
            duration = %self.duration,
            "track edit applied"
        );
    }

    pub fn position(&self) -> Timestamp {
        self.cursor
    }

    /// Position of the last seek.
    pub fn origin(&self) -> Timestamp {
        self.origin
    }

    /// End of the composition: the explicit duration, or the latest end of
    /// the mirrored clips when none is set.
    pub fn duration(&self) -> Timestamp {
        self.duration
    }

    pub fn frame_interval(&self) -> Timestamp {
        self.frame_interval
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn has_source(&self, clip: ClipId) -> bool {
        self.sources.contains_key(&clip)
    }

    pub fn source_stats(&self, clip: ClipId) -> Option<SourceStats> {
        self.sources.get(&clip).map(SyncSource::stats)
    }

    pub fn converter_stats(&self, track: TrackId) -> Option<ConverterStats> {
        self.converters.get(&track).map(FrameConverter::stats)
    }

    pub fn is_unreadable(&self, clip: ClipId) -> bool {
        self.unreadable.contains(&clip)
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn refresh_duration(&mut self) {
        self.duration = if self.explicit_duration > Timestamp::ZERO {
            self.explicit_duration
        } else {
            self.tracks
                .values()
                .filter_map(Track::bounds)
                .map(|(_, end)| end)
                .max()
                .unwrap_or(Timestamp::ZERO)
        };
    }

    fn is_reachable(&self, clip: &Clip) -> bool {
        clip.end_position() >= self.origin
    }

    fn contains_clip(&self, id: ClipId) -> bool {
        self.tracks.values().any(|track| track.clip(id).is_some())
    }

    fn ensure_converter(&mut self, id: TrackId) {
        let format = self.ctx.pixel_format;
        self.converters
            .entry(id)
            .or_insert_with(|| FrameConverter::new(format));
    }

    fn upsert_clip(&mut self, clip: Clip) {
        let id = clip.track_id;
        self.ensure_converter(id);
        self.tracks
            .entry(id)
            .or_insert_with(|| Track::empty(id))
            .upsert_clip(clip);
    }

    fn remove_track(&mut self, id: TrackId) {
        self.converters.remove(&id);
        if let Some(track) = self.tracks.remove(&id) {
            for clip in track.clips() {
                self.drop_source(clip.id);
            }
        }
    }

    /// Opens sources for reachable clips of `track` that are new, or whose
    /// placement or media differ from `previous`.
    fn open_new_sources(&mut self, track: TrackId, previous: Option<&Track>) {
        let Some(current) = self.tracks.get(&track) else {
            return;
        };
        let changed: Vec<(ClipId, MediaFile)> = current
            .clips()
            .filter(|clip| self.is_reachable(clip))
            .filter(|clip| match previous.and_then(|p| p.clip(clip.id)) {
                None => !self.sources.contains_key(&clip.id),
                Some(old) => {
                    old.position != clip.position
                        || old.start_time != clip.start_time
                        || old.media != clip.media
                }
            })
            .map(|clip| (clip.id, clip.media.clone()))
            .collect();
        for (id, media) in changed {
            self.drop_source(id);
            self.open_source(id, &media);
        }
    }

    fn open_source(&mut self, id: ClipId, media: &MediaFile) -> bool {
        match SyncSource::open(media.clone(), &self.ctx) {
            Ok(source) => {
                self.sources.insert(id, source);
                true
            }
            Err(err) => {
                tracing::warn!(clip = %id, media = %media.file_name(), error = %err, "cannot open clip media");
                self.unreadable.insert(id);
                false
            }
        }
    }

    fn drop_source(&mut self, id: ClipId) {
        self.sources.remove(&id);
        self.unreadable.remove(&id);
    }
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("settings", &self.settings)
            .field("cursor", &self.cursor)
            .field("duration", &self.duration)
            .field("tracks", &self.tracks.len())
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Copies `src` onto `canvas` at `(x, y)`, clipped to the canvas bounds.
/// Both buffers must share a pixel format.
fn blit(canvas: &mut [u8], canvas_width: u32, canvas_height: u32, src: &Frame, x: i64, y: i64) {
    let bpp = src.format.bytes_per_pixel();
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = x
        .saturating_add(i64::from(src.width))
        .min(i64::from(canvas_width));
    let y1 = y
        .saturating_add(i64::from(src.height))
        .min(i64::from(canvas_height));
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let canvas_stride = canvas_width as usize * bpp;
    let src_stride = src.stride();
    let run = (x1 - x0) as usize * bpp;
    let src_x = (x0 - x) as usize * bpp;
    for cy in y0..y1 {
        let sy = (cy - y) as usize;
        let src_start = sy * src_stride + src_x;
        let dst_start = cy as usize * canvas_stride + x0 as usize * bpp;
        canvas[dst_start..dst_start + run].copy_from_slice(&src.data[src_start..src_start + run]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::synthetic::{pattern_rgb, SyntheticDecoderFactory};
    use cutline_timeline::{frame_interval, ProjectSettings, Timeline};
    use proptest::prelude::*;
    use std::path::Path;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(
            width,
            height,
            PixelFormat::Gray8,
            Timestamp::ZERO,
            Timestamp::ZERO,
            vec![value; (width * height) as usize],
        )
        .unwrap()
    }

    #[test]
    fn test_blit_clips_to_canvas() {
        let mut canvas = vec![0u8; 16];
        blit(&mut canvas, 4, 4, &solid(3, 3, 9), -1, 2);
        #[rustfmt::skip]
        let expected = [
            0, 0, 0, 0,
            0, 0, 0, 0,
            9, 9, 0, 0,
            9, 9, 0, 0,
        ];
        assert_eq!(canvas, expected);
    }

    #[test]
    fn test_blit_fully_outside_is_noop() {
        let mut canvas = vec![0u8; 4];
        blit(&mut canvas, 2, 2, &solid(2, 2, 5), 2, 0);
        blit(&mut canvas, 2, 2, &solid(2, 2, 5), 0, -2);
        assert_eq!(canvas, vec![0; 4]);
    }

    #[test]
    fn test_placement_from_transform() {
        let t = ClipTransform::IDENTITY
            .with_scale(0.5, 0.25)
            .with_translate(0.5, -0.1);
        let p = Placement::for_transform(&t, 640, 360).unwrap();
        assert_eq!(
            p,
            Placement {
                x: 320,
                y: -36,
                width: 320,
                height: 90
            }
        );
        let zero = ClipTransform::IDENTITY.with_scale(0.0, 1.0);
        assert!(Placement::for_transform(&zero, 640, 360).is_none());
    }

    #[test]
    fn test_placement_offsets_are_bounded() {
        let far = ClipTransform::IDENTITY.with_translate(1e30, -1e30);
        let p = Placement::for_transform(&far, 640, 360).unwrap();
        assert_eq!((p.x, p.y), (2_560, -1_440));
        assert!(!p.overlaps_canvas(640, 360));

        let nan = ClipTransform::IDENTITY.with_translate(f32::NAN, 0.25);
        let p = Placement::for_transform(&nan, 640, 360).unwrap();
        assert_eq!((p.x, p.y), (0, 90));
        assert!(p.overlaps_canvas(640, 360));
    }

    fn compositor_for(timeline: &Timeline, factory: Arc<SyntheticDecoderFactory>) -> Compositor {
        Compositor::new(timeline.snapshot(), EngineContext::new(factory))
    }

    #[test]
    fn test_seek_aligns_to_frame_grid() {
        let timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let mut compositor =
            compositor_for(&timeline, Arc::new(SyntheticDecoderFactory::new(4, 4, 25)));
        assert!(compositor.seek(Timestamp::from_millis(1_019)));
        assert_eq!(compositor.position(), Timestamp::from_millis(1_000));
        assert!(compositor.seek(Timestamp::from_millis(-10)));
        assert_eq!(compositor.position(), Timestamp::from_millis(-40));
    }

    #[test]
    fn test_audio_is_not_produced() {
        let timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let mut compositor =
            compositor_for(&timeline, Arc::new(SyntheticDecoderFactory::new(4, 4, 25)));
        assert!(compositor.has_stream(StreamKind::Video));
        assert!(!compositor.has_stream(StreamKind::Audio));
        assert!(compositor.next_frame(StreamKind::Audio).unwrap().is_none());
        assert_eq!(compositor.position(), Timestamp::ZERO);
    }

    #[test]
    fn test_later_track_paints_over_earlier() {
        let mut timeline = Timeline::new(ProjectSettings::new(8, 8, 25));
        let below = timeline.add_track();
        let above = timeline.add_track();
        let bottom = MediaFile::video("/media/bottom.mp4", Timestamp::from_secs(1));
        let top = MediaFile::video("/media/top.mp4", Timestamp::from_secs(1));
        timeline.add_clip(below, bottom, Timestamp::ZERO, None).unwrap();
        timeline
            .add_clip(
                above,
                top,
                Timestamp::ZERO,
                Some(ClipTransform::IDENTITY.with_scale(0.5, 0.5)),
            )
            .unwrap();

        let mut compositor =
            compositor_for(&timeline, Arc::new(SyntheticDecoderFactory::new(4, 4, 25)));
        let frame = compositor.next_frame(StreamKind::Video).unwrap().unwrap();

        let [r, g, b] = pattern_rgb(Path::new("/media/top.mp4"), 0);
        assert_eq!(frame.pixel(0, 0), [r, g, b, 255]);
        assert_eq!(frame.pixel(3, 3), [r, g, b, 255]);
        let [r, g, b] = pattern_rgb(Path::new("/media/bottom.mp4"), 0);
        assert_eq!(frame.pixel(4, 4), [r, g, b, 255]);
        assert_eq!(frame.pixel(7, 0), [r, g, b, 255]);
    }

    #[test]
    fn test_unreadable_clip_is_skipped() {
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let track = timeline.add_track();
        let media = MediaFile::video("/media/broken.mp4", Timestamp::from_secs(1));
        let clip = timeline.add_clip(track, media, Timestamp::ZERO, None).unwrap();

        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        factory.fail_on("/media/broken.mp4");
        let mut compositor = compositor_for(&timeline, factory);

        assert!(compositor.is_unreadable(clip));
        let frame = compositor.next_frame(StreamKind::Video).unwrap().unwrap();
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_clip_events_keep_mirror_current() {
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let events = timeline.subscribe();
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut compositor = compositor_for(&timeline, factory.clone());

        let track = timeline.add_track();
        let media = MediaFile::video("/media/a.mp4", Timestamp::from_secs(2));
        let clip = timeline.add_clip(track, media, Timestamp::ZERO, None).unwrap();
        timeline.move_clip(track, clip, Timestamp::from_secs(1)).unwrap();
        for event in events.try_iter() {
            compositor.apply_event(&event);
        }

        assert!(compositor.has_source(clip));
        assert_eq!(factory.counters().opens(), 2);
        assert_eq!(
            compositor.track(track).and_then(|t| t.clip(clip)).map(|c| c.position),
            Some(Timestamp::from_secs(1))
        );

        timeline.remove_track(track).unwrap();
        for event in events.try_iter() {
            compositor.apply_event(&event);
        }
        assert!(!compositor.has_source(clip));
        assert!(compositor.converter_stats(track).is_none());
    }

    #[test]
    fn test_track_edits_reconcile_sources() {
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let track = timeline.add_track();
        let a = timeline
            .add_clip(
                track,
                MediaFile::video("/media/a.mp4", Timestamp::from_secs(2)),
                Timestamp::ZERO,
                None,
            )
            .unwrap();
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut compositor = compositor_for(&timeline, factory.clone());
        assert_eq!(compositor.source_count(), 1);

        let b = timeline
            .add_clip(
                track,
                MediaFile::video("/media/b.mp4", Timestamp::from_secs(2)),
                Timestamp::from_secs(2),
                None,
            )
            .unwrap();
        timeline.remove_clip(track, a).unwrap();
        let edit = timeline
            .track_edit_for(&TimelineEvent::TrackModified(track))
            .unwrap();
        compositor.apply_track_edit(edit);

        assert!(!compositor.has_source(a));
        assert!(compositor.has_source(b));
        assert_eq!(factory.counters().opens(), 2);

        // Transform-only change: nothing reopened.
        timeline.translate_clip(track, b, 0.1, 0.0).unwrap();
        let edit = timeline
            .track_edit_for(&TimelineEvent::TrackModified(track))
            .unwrap();
        compositor.apply_track_edit(edit);
        assert_eq!(factory.counters().opens(), 2);

        compositor.apply_track_edit(TrackEdit::Removed { id: track });
        assert_eq!(compositor.source_count(), 0);
    }

    #[test]
    fn test_far_translated_clip_is_left_out() {
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let below = timeline.add_track();
        let above = timeline.add_track();
        timeline
            .add_clip(
                below,
                MediaFile::video("/media/bottom.mp4", Timestamp::from_secs(1)),
                Timestamp::ZERO,
                None,
            )
            .unwrap();
        timeline
            .add_clip(
                above,
                MediaFile::video("/media/away.mp4", Timestamp::from_secs(1)),
                Timestamp::ZERO,
                Some(ClipTransform::IDENTITY.with_translate(1e30, 0.0)),
            )
            .unwrap();

        let mut compositor =
            compositor_for(&timeline, Arc::new(SyntheticDecoderFactory::new(4, 4, 25)));
        let frame = compositor.next_frame(StreamKind::Video).unwrap().unwrap();

        let [r, g, b] = pattern_rgb(Path::new("/media/bottom.mp4"), 0);
        assert_eq!(frame.pixel(3, 3), [r, g, b, 255]);
        assert_eq!(compositor.converter_stats(above).map(|s| s.conversions), Some(0));
    }

    #[test]
    fn test_clip_added_behind_origin_opens_lazily() {
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let events = timeline.subscribe();
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut compositor = compositor_for(&timeline, factory.clone());
        compositor.seek(Timestamp::from_secs(5));

        let track = timeline.add_track();
        let clip = timeline
            .add_clip(
                track,
                MediaFile::video("/media/early.mp4", Timestamp::from_secs(1)),
                Timestamp::ZERO,
                None,
            )
            .unwrap();
        for event in events.try_iter() {
            compositor.apply_event(&event);
        }
        assert!(!compositor.has_source(clip));
        assert_eq!(factory.counters().opens(), 0);

        compositor.seek(Timestamp::ZERO);
        let frame = compositor.next_frame(StreamKind::Video).unwrap().unwrap();
        assert!(compositor.has_source(clip));
        assert_eq!(factory.counters().opens(), 1);
        let [r, g, b] = pattern_rgb(Path::new("/media/early.mp4"), 0);
        assert_eq!(frame.pixel(0, 0), [r, g, b, 255]);
    }

    #[test]
    fn test_duration_follows_timeline_edits() {
        let secs = Timestamp::from_secs;
        let mut timeline = Timeline::new(ProjectSettings::new(4, 4, 25));
        let track = timeline.add_track();
        timeline
            .add_clip(track, MediaFile::video("/media/a.mp4", secs(2)), secs(0), None)
            .unwrap();
        let events = timeline.subscribe();
        let factory = Arc::new(SyntheticDecoderFactory::new(4, 4, 25));
        let mut by_event = compositor_for(&timeline, factory.clone());
        let mut by_edit = compositor_for(&timeline, factory);
        assert_eq!(by_event.duration(), secs(2));

        let sync = |timeline: &Timeline, by_event: &mut Compositor, by_edit: &mut Compositor| {
            for event in events.try_iter() {
                by_event.apply_event(&event);
                if let Some(edit) = timeline.track_edit_for(&event) {
                    by_edit.apply_track_edit(edit);
                }
            }
        };

        timeline
            .add_clip(track, MediaFile::video("/media/b.mp4", secs(3)), secs(2), None)
            .unwrap();
        sync(&timeline, &mut by_event, &mut by_edit);
        assert_eq!(by_event.duration(), secs(5));
        assert_eq!(by_edit.duration(), secs(5));

        timeline.set_duration(secs(1));
        sync(&timeline, &mut by_event, &mut by_edit);
        assert_eq!(by_event.duration(), secs(1));
        assert_eq!(by_edit.duration(), secs(1));

        timeline.set_duration(Timestamp::ZERO);
        sync(&timeline, &mut by_event, &mut by_edit);
        assert_eq!(by_event.duration(), secs(5));
        assert_eq!(by_edit.duration(), secs(5));
    }

    proptest! {
        #[test]
        fn seek_lands_on_preceding_frame_boundary(
            p in -100_000_000_000i64..100_000_000_000i64,
            fps in 1u32..120,
        ) {
            let timeline = Timeline::new(ProjectSettings::new(2, 2, fps));
            let mut compositor =
                compositor_for(&timeline, Arc::new(SyntheticDecoderFactory::new(2, 2, fps)));
            compositor.seek(Timestamp::from_nanos(p));

            let dt = frame_interval(fps).as_nanos();
            prop_assert_eq!(compositor.position().as_nanos(), p - p.rem_euclid(dt));
            prop_assert_eq!(compositor.origin(), compositor.position());
        }
    }
}
