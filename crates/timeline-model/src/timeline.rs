//! The editable arrangement of clips on tracks.
//!
//! The [`Timeline`] owns every track and clip. Tracks and clips are stored in
//! id-ordered maps and refer to each other by id only; ids come from
//! monotonic counters and are never reused.

use std::collections::BTreeMap;
use std::fmt;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::event::{EventBus, TimelineEvent, TrackEdit};
use crate::media::MediaFile;
use crate::time::{frame_interval, Timestamp};
use crate::transform::{ClipTransform, TransformSet};

/// Identifier of a track, unique for the lifetime of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

/// Identifier of a clip, unique for the lifetime of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

/// Errors raised by timeline edits.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimelineError {
    #[error("unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("{clip} is not on {track}")]
    UnknownClip { track: TrackId, clip: ClipId },

    #[error("cannot split {clip} at {at}: outside ({start}, {end})")]
    InvalidSplit {
        clip: ClipId,
        at: Timestamp,
        start: Timestamp,
        end: Timestamp,
    },

    #[error("media {path} has no usable duration")]
    InvalidDuration { path: String },

    #[error("{clip} has no keyframe at {at}")]
    UnknownKeyframe { clip: ClipId, at: Timestamp },

    #[error("the origin keyframe of {0} cannot be removed")]
    OriginKeyframe(ClipId),
}

/// Canvas and clock settings of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub width: u32,
    pub height: u32,
    /// Frames per second of the composition clock.
    pub frame_rate: u32,
}

impl ProjectSettings {
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_rate: frame_rate.max(1),
        }
    }

    /// Duration of one composition frame.
    pub fn frame_interval(&self) -> Timestamp {
        frame_interval(self.frame_rate)
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self::new(1920, 1080, 30)
    }
}

/// A media segment placed on a track.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub id: ClipId,
    /// Owning track.
    pub track_id: TrackId,
    /// Where the clip starts on the timeline.
    pub position: Timestamp,
    /// Offset into the source media.
    pub start_time: Timestamp,
    pub duration: Timestamp,
    pub media: MediaFile,
    pub transforms: TransformSet,
}

impl Clip {
    pub fn end_position(&self) -> Timestamp {
        self.position + self.duration
    }

    /// Longest duration the source allows from `start_time`; `None` for images.
    pub fn max_duration(&self) -> Option<Timestamp> {
        if self.media.is_image() {
            None
        } else {
            Some(self.media.duration - self.start_time)
        }
    }

    /// Closed-span containment: both ends are inclusive.
    pub fn contains(&self, position: Timestamp) -> bool {
        self.position <= position && position <= self.end_position()
    }

    /// Source-media timestamp shown at timeline `position`.
    pub fn source_time(&self, position: Timestamp) -> Timestamp {
        position - self.position + self.start_time
    }

    /// Transform keyframe in effect at timeline `position`.
    pub fn transform_at(&self, position: Timestamp) -> &ClipTransform {
        self.transforms.active(position - self.position)
    }
}

/// A horizontal lane of clips.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    clips: BTreeMap<ClipId, Clip>,
}

impl Track {
    fn new(id: TrackId) -> Self {
        Self {
            id,
            clips: BTreeMap::new(),
        }
    }

    /// Clips in id order.
    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips.values()
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// First clip (in id order) whose closed span contains `position`.
    pub fn clip_at(&self, position: Timestamp) -> Option<&Clip> {
        self.clips.values().find(|clip| clip.contains(position))
    }

    /// Earliest start and latest end over all clips.
    pub fn bounds(&self) -> Option<(Timestamp, Timestamp)> {
        let start = self.clips.values().map(|c| c.position).min()?;
        let end = self.clips.values().map(Clip::end_position).max()?;
        Some((start, end))
    }

    /// Inserts or replaces a clip copy. Used by mirrors of the timeline.
    pub fn upsert_clip(&mut self, clip: Clip) {
        self.clips.insert(clip.id, clip);
    }

    pub fn take_clip(&mut self, id: ClipId) -> Option<Clip> {
        self.clips.remove(&id)
    }

    /// An empty track with the given id, for mirrors of the timeline.
    pub fn empty(id: TrackId) -> Self {
        Self::new(id)
    }
}

/// Owned copy of a timeline's arrangement, safe to move to another thread.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSnapshot {
    pub settings: ProjectSettings,
    pub tracks: BTreeMap<TrackId, Track>,
    pub duration: Timestamp,
}

impl TimelineSnapshot {
    /// Same arrangement rendered at a different canvas size and frame rate.
    pub fn with_output(mut self, width: u32, height: u32, frame_rate: u32) -> Self {
        self.settings = ProjectSettings::new(width, height, frame_rate);
        self
    }

    pub fn frame_interval(&self) -> Timestamp {
        self.settings.frame_interval()
    }

    /// End of the composition: the explicit duration, or the latest clip end
    /// when no duration was set.
    pub fn end(&self) -> Timestamp {
        if self.duration > Timestamp::ZERO {
            return self.duration;
        }
        self.tracks
            .values()
            .filter_map(Track::bounds)
            .map(|(_, end)| end)
            .max()
            .unwrap_or(Timestamp::ZERO)
    }
}

/// The editable timeline: tracks, clips, settings and the event bus.
#[derive(Debug)]
pub struct Timeline {
    settings: ProjectSettings,
    tracks: BTreeMap<TrackId, Track>,
    next_track_id: u32,
    next_clip_id: u32,
    duration: Timestamp,
    events: EventBus,
}

impl Timeline {
    pub fn new(settings: ProjectSettings) -> Self {
        Self {
            settings,
            tracks: BTreeMap::new(),
            next_track_id: 0,
            next_clip_id: 0,
            duration: Timestamp::ZERO,
            events: EventBus::default(),
        }
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn frame_interval(&self) -> Timestamp {
        self.settings.frame_interval()
    }

    /// Registers a new listener. Events are queued until received.
    pub fn subscribe(&mut self) -> Receiver<TimelineEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn duration(&self) -> Timestamp {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Timestamp) {
        self.duration = duration;
        self.emit(TimelineEvent::DurationChanged(duration));
    }

    /// Latest clip end across all tracks.
    pub fn content_end(&self) -> Timestamp {
        self.tracks
            .values()
            .filter_map(Track::bounds)
            .map(|(_, end)| end)
            .max()
            .unwrap_or(Timestamp::ZERO)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Looks a clip up across all tracks.
    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.tracks.values().find_map(|track| track.clip(id))
    }

    pub fn clip_at(&self, track: TrackId, position: Timestamp) -> Option<&Clip> {
        self.tracks.get(&track)?.clip_at(position)
    }

    pub fn add_track(&mut self) -> TrackId {
        let id = TrackId(self.next_track_id);
        self.next_track_id += 1;
        self.tracks.insert(id, Track::new(id));
        tracing::debug!(track = %id, "track added");
        self.emit(TimelineEvent::TrackAdded(id));
        id
    }

    /// Removes a track together with its clips.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Track, TimelineError> {
        let track = self
            .tracks
            .remove(&id)
            .ok_or(TimelineError::UnknownTrack(id))?;
        tracing::debug!(track = %id, clips = track.len(), "track removed");
        self.emit(TimelineEvent::TrackRemoved(id));
        Ok(track)
    }

    /// Places `media` on `track` at `position`.
    ///
    /// Images last one frame interval; other media span their full duration.
    /// The clip starts with `origin` (or the identity) as its only keyframe.
    pub fn add_clip(
        &mut self,
        track: TrackId,
        media: MediaFile,
        position: Timestamp,
        origin: Option<ClipTransform>,
    ) -> Result<ClipId, TimelineError> {
        if !self.tracks.contains_key(&track) {
            return Err(TimelineError::UnknownTrack(track));
        }
        let duration = if media.is_image() {
            self.frame_interval()
        } else {
            media.duration
        };
        if duration <= Timestamp::ZERO {
            return Err(TimelineError::InvalidDuration {
                path: media.path.display().to_string(),
            });
        }

        let clip = Clip {
            id: self.allocate_clip_id(),
            track_id: track,
            position,
            start_time: Timestamp::ZERO,
            duration,
            media,
            transforms: TransformSet::new(origin.unwrap_or_default()),
        };
        let id = clip.id;
        tracing::debug!(
            clip = %id,
            track = %track,
            position = %position,
            duration = %duration,
            media = %clip.media.file_name(),
            "clip added"
        );
        self.insert_clip(clip);
        Ok(id)
    }

    pub fn remove_clip(&mut self, track: TrackId, clip: ClipId) -> Result<Clip, TimelineError> {
        let removed = self
            .track_mut(track)?
            .clips
            .remove(&clip)
            .ok_or(TimelineError::UnknownClip { track, clip })?;
        tracing::debug!(clip = %clip, track = %track, "clip removed");
        self.emit(TimelineEvent::ClipRemoved(removed.clone()));
        Ok(removed)
    }

    /// Moves a clip, snapping its position to the nearest frame boundary.
    pub fn move_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        new_position: Timestamp,
    ) -> Result<Timestamp, TimelineError> {
        let snapped = new_position.snap_nearest(self.frame_interval());
        let moved = {
            let c = self.clip_mut(track, clip)?;
            c.position = snapped;
            c.clone()
        };
        self.emit(TimelineEvent::ClipMoved(moved));
        Ok(snapped)
    }

    /// Splits a clip in two at `split_position`, returning the tail's id.
    ///
    /// The head keeps the original id and transforms; the tail continues the
    /// source where the head stops and starts from a copy of the head's last
    /// keyframe.
    pub fn split_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        split_position: Timestamp,
    ) -> Result<ClipId, TimelineError> {
        let original = self.clip_mut(track, clip)?.clone();
        if split_position <= original.position || split_position >= original.end_position() {
            return Err(TimelineError::InvalidSplit {
                clip,
                at: split_position,
                start: original.position,
                end: original.end_position(),
            });
        }

        let head_duration = split_position - original.position;
        let tail = Clip {
            id: self.allocate_clip_id(),
            track_id: track,
            position: split_position,
            start_time: original.start_time + head_duration,
            duration: original.duration - head_duration,
            media: original.media.clone(),
            transforms: TransformSet::new(*original.transforms.last()),
        };
        let tail_id = tail.id;
        self.insert_clip(tail);

        let head = {
            let c = self.clip_mut(track, clip)?;
            c.duration = head_duration;
            c.clone()
        };
        tracing::debug!(clip = %clip, tail = %tail_id, at = %split_position, "clip split");
        self.emit(TimelineEvent::ClipResized(head));
        Ok(tail_id)
    }

    /// Changes a clip's duration, clamped to what its source allows.
    pub fn trim_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        new_duration: Timestamp,
    ) -> Result<Timestamp, TimelineError> {
        let resized = {
            let c = self.clip_mut(track, clip)?;
            let mut duration = new_duration.max(Timestamp::from_nanos(1));
            if let Some(max) = c.max_duration() {
                duration = duration.min(max);
            }
            c.duration = duration;
            c.clone()
        };
        let duration = resized.duration;
        self.emit(TimelineEvent::ClipResized(resized));
        Ok(duration)
    }

    /// Moves a clip to another track, keeping its id and placement.
    pub fn relocate_clip(
        &mut self,
        from: TrackId,
        clip: ClipId,
        to: TrackId,
    ) -> Result<(), TimelineError> {
        if !self.tracks.contains_key(&to) {
            return Err(TimelineError::UnknownTrack(to));
        }
        let removed = self.remove_clip(from, clip)?;
        let relocated = Clip {
            track_id: to,
            ..removed
        };
        self.insert_clip(relocated);
        Ok(())
    }

    /// Adds a translation delta to the clip's first keyframe.
    pub fn translate_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        dx: f32,
        dy: f32,
    ) -> Result<(), TimelineError> {
        self.update_origin(track, clip, |t| {
            t.translate_x += dx;
            t.translate_y += dy;
        })
    }

    /// Adds a scale delta to the clip's first keyframe.
    pub fn scale_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        dx: f32,
        dy: f32,
    ) -> Result<(), TimelineError> {
        self.update_origin(track, clip, |t| {
            t.scale_x += dx;
            t.scale_y += dy;
        })
    }

    /// Adds a rotation delta (degrees) to the clip's first keyframe.
    pub fn rotate_clip(
        &mut self,
        track: TrackId,
        clip: ClipId,
        degrees: f32,
    ) -> Result<(), TimelineError> {
        self.update_origin(track, clip, |t| t.rotation += degrees)
    }

    /// Inserts or replaces a keyframe at `transform.relative_position`.
    pub fn set_keyframe(
        &mut self,
        track: TrackId,
        clip: ClipId,
        transform: ClipTransform,
    ) -> Result<(), TimelineError> {
        let updated = {
            let c = self.clip_mut(track, clip)?;
            c.transforms.insert(transform);
            c.clone()
        };
        self.emit(TimelineEvent::ClipTransformed(updated));
        Ok(())
    }

    pub fn remove_keyframe(
        &mut self,
        track: TrackId,
        clip: ClipId,
        relative_position: Timestamp,
    ) -> Result<ClipTransform, TimelineError> {
        if relative_position == Timestamp::ZERO {
            return Err(TimelineError::OriginKeyframe(clip));
        }
        let (removed, updated) = {
            let c = self.clip_mut(track, clip)?;
            let removed =
                c.transforms
                    .remove(relative_position)
                    .ok_or(TimelineError::UnknownKeyframe {
                        clip,
                        at: relative_position,
                    })?;
            (removed, c.clone())
        };
        self.emit(TimelineEvent::ClipTransformed(updated));
        Ok(removed)
    }

    /// Deep copy of the current arrangement.
    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            settings: self.settings,
            tracks: self.tracks.clone(),
            duration: self.duration,
        }
    }

    /// Track-granular message describing `event`, for worker mirrors.
    ///
    /// Returns `None` when the event's track no longer exists.
    pub fn track_edit_for(&self, event: &TimelineEvent) -> Option<TrackEdit> {
        match event {
            TimelineEvent::TrackAdded(id) => self
                .tracks
                .get(id)
                .map(|track| TrackEdit::Added { track: track.clone() }),
            TimelineEvent::TrackRemoved(id) => Some(TrackEdit::Removed { id: *id }),
            TimelineEvent::DurationChanged(duration) => Some(TrackEdit::DurationChanged {
                duration: *duration,
            }),
            other => {
                let id = other.track_id()?;
                self.tracks
                    .get(&id)
                    .map(|track| TrackEdit::Modified { track: track.clone() })
            }
        }
    }

    fn allocate_clip_id(&mut self) -> ClipId {
        let id = ClipId(self.next_clip_id);
        self.next_clip_id += 1;
        id
    }

    fn insert_clip(&mut self, clip: Clip) {
        let event = TimelineEvent::ClipAdded(clip.clone());
        if let Some(track) = self.tracks.get_mut(&clip.track_id) {
            track.clips.insert(clip.id, clip);
            self.emit(event);
        }
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, TimelineError> {
        self.tracks
            .get_mut(&id)
            .ok_or(TimelineError::UnknownTrack(id))
    }

    fn clip_mut(&mut self, track: TrackId, clip: ClipId) -> Result<&mut Clip, TimelineError> {
        self.track_mut(track)?
            .clips
            .get_mut(&clip)
            .ok_or(TimelineError::UnknownClip { track, clip })
    }

    fn update_origin(
        &mut self,
        track: TrackId,
        clip: ClipId,
        update: impl FnOnce(&mut ClipTransform),
    ) -> Result<(), TimelineError> {
        let updated = {
            let c = self.clip_mut(track, clip)?;
            update(c.transforms.first_mut());
            c.clone()
        };
        self.emit(TimelineEvent::ClipTransformed(updated));
        Ok(())
    }

    /// Publishes `event`, followed by `TrackModified` for clip events.
    fn emit(&mut self, event: TimelineEvent) {
        let modified = if event.is_clip_event() {
            event.track_id()
        } else {
            None
        };
        self.events.publish(event);
        if let Some(track) = modified {
            self.events.publish(TimelineEvent::TrackModified(track));
        }
    }
}
