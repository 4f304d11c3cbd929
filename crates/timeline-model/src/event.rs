//! Timeline change notifications.
//!
//! Every mutation of a [`Timeline`](crate::Timeline) is published as a
//! [`TimelineEvent`] to all subscribers, in emission order. Clip-level events
//! are always followed by an aggregate [`TimelineEvent::TrackModified`] for
//! the owning track.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::time::Timestamp;
use crate::timeline::{Clip, ClipId, Track, TrackId};

/// A single timeline change.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    TrackAdded(TrackId),
    TrackRemoved(TrackId),
    /// Something inside the track changed.
    TrackModified(TrackId),
    ClipAdded(Clip),
    ClipRemoved(Clip),
    ClipMoved(Clip),
    ClipResized(Clip),
    ClipTransformed(Clip),
    DurationChanged(Timestamp),
}

impl TimelineEvent {
    /// Track the event concerns, if any.
    pub fn track_id(&self) -> Option<TrackId> {
        match self {
            Self::TrackAdded(id) | Self::TrackRemoved(id) | Self::TrackModified(id) => Some(*id),
            Self::ClipAdded(clip)
            | Self::ClipRemoved(clip)
            | Self::ClipMoved(clip)
            | Self::ClipResized(clip)
            | Self::ClipTransformed(clip) => Some(clip.track_id),
            Self::DurationChanged(_) => None,
        }
    }

    pub fn clip_id(&self) -> Option<ClipId> {
        match self {
            Self::ClipAdded(clip)
            | Self::ClipRemoved(clip)
            | Self::ClipMoved(clip)
            | Self::ClipResized(clip)
            | Self::ClipTransformed(clip) => Some(clip.id),
            _ => None,
        }
    }

    pub fn is_clip_event(&self) -> bool {
        self.clip_id().is_some()
    }
}

/// Track-granular edit handed to a worker thread that mirrors the timeline.
///
/// Carries owned copies so the receiver never touches the live timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEdit {
    Added { track: Track },
    Removed { id: TrackId },
    Modified { track: Track },
    /// New explicit duration; zero means "until the last clip ends".
    DurationChanged { duration: Timestamp },
}

impl TrackEdit {
    pub fn track_id(&self) -> Option<TrackId> {
        match self {
            Self::Added { track } | Self::Modified { track } => Some(track.id),
            Self::Removed { id } => Some(*id),
            Self::DurationChanged { .. } => None,
        }
    }
}

/// Fan-out of timeline events to channel subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<TimelineEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Receiver<TimelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber, dropping disconnected ones.
    pub(crate) fn publish(&mut self, event: TimelineEvent) {
        tracing::trace!(?event, subscribers = self.subscribers.len(), "timeline event");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
