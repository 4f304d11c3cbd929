//! Live preview: a worker thread that plays the timeline from the latest seek.
//!
//! The worker owns its [`Compositor`] and talks to the UI only through
//! channels: seek requests and [`TrackEdit`]s (including duration changes)
//! in, `(seek id, frame)` pairs out through a single-slot channel. Pending seeks are coalesced to the most
//! recent one; edits are applied in arrival order, and all edits queued
//! before a frame is composed are applied first. Dropping the
//! [`PreviewWorker`] closes the inputs, which ends the thread.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::{Timeline, TimelineEvent, Timestamp, TrackEdit};

use crate::compositor::Compositor;
use crate::frame::{Frame, StreamKind};

/// Reposition request; ids increase with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub id: u64,
    pub position: Timestamp,
}

/// A frame produced in response to seek `seek_id`.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub seek_id: u64,
    pub frame: Frame,
}

/// UI-side handle of a preview worker.
#[derive(Debug)]
pub struct PreviewWorker {
    seek_tx: Option<Sender<SeekRequest>>,
    edit_tx: Option<Sender<TrackEdit>>,
    frames_rx: Receiver<PreviewFrame>,
    last_seek_id: u64,
    thread: Option<JoinHandle<()>>,
}

impl PreviewWorker {
    /// Moves `compositor` onto a new worker thread. The worker stays idle
    /// until the first seek.
    pub fn spawn(compositor: Compositor) -> CutlineResult<Self> {
        let (seek_tx, seek_rx) = unbounded();
        let (edit_tx, edit_rx) = unbounded();
        let (frames_tx, frames_rx) = bounded(1);

        let thread = std::thread::Builder::new()
            .name("preview-worker".to_string())
            .spawn(move || run_preview(compositor, seek_rx, edit_rx, frames_tx))
            .map_err(|e| CutlineError::render(format!("Failed to spawn preview thread: {e}")))?;

        Ok(Self {
            seek_tx: Some(seek_tx),
            edit_tx: Some(edit_tx),
            frames_rx,
            last_seek_id: 0,
            thread: Some(thread),
        })
    }

    /// Requests playback from `position`; returns the request id.
    pub fn seek(&mut self, position: Timestamp) -> u64 {
        self.last_seek_id += 1;
        let request = SeekRequest {
            id: self.last_seek_id,
            position,
        };
        if let Some(tx) = &self.seek_tx {
            if tx.send(request).is_err() {
                tracing::warn!("preview worker is gone; seek dropped");
            }
        }
        self.last_seek_id
    }

    /// Queues a track edit. Returns false if the worker has stopped.
    pub fn send_edit(&self, edit: TrackEdit) -> bool {
        self.edit_tx
            .as_ref()
            .is_some_and(|tx| tx.send(edit).is_ok())
    }

    /// Forwards a timeline event as a track edit, if it carries one.
    pub fn forward_event(&self, timeline: &Timeline, event: &TimelineEvent) -> bool {
        match timeline.track_edit_for(event) {
            Some(edit) => self.send_edit(edit),
            None => false,
        }
    }

    pub fn last_seek_id(&self) -> u64 {
        self.last_seek_id
    }

    /// Next current frame if one is ready, discarding frames from older seeks.
    pub fn try_frame(&self) -> Option<PreviewFrame> {
        self.frames_rx
            .try_iter()
            .find(|frame| frame.seek_id >= self.last_seek_id)
    }

    /// Waits up to `timeout` for a current frame, discarding stale ones.
    pub fn recv_frame_timeout(&self, timeout: Duration) -> Option<PreviewFrame> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.frames_rx.recv_deadline(deadline) {
                Ok(frame) if frame.seek_id >= self.last_seek_id => return Some(frame),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Raw frame channel for callers doing their own selection.
    pub fn frames(&self) -> &Receiver<PreviewFrame> {
        &self.frames_rx
    }

    /// Closes the inputs and waits for the worker to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.seek_tx.take();
        self.edit_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("preview worker panicked");
            }
        }
    }
}

impl Drop for PreviewWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop. Returns when an input channel closes or the output
/// receiver is gone.
pub(crate) fn run_preview(
    mut compositor: Compositor,
    seek_rx: Receiver<SeekRequest>,
    edit_rx: Receiver<TrackEdit>,
    frames_tx: Sender<PreviewFrame>,
) {
    let mut active: Option<u64> = None;
    let mut produced_since_seek = 0u64;
    let mut pending: Option<PreviewFrame> = None;

    loop {
        if pending.is_none() {
            if let Some(seek_id) = active {
                for edit in edit_rx.try_iter() {
                    compositor.apply_track_edit(edit);
                }
                // The frame at the seek position is always shown.
                let playing = produced_since_seek == 0
                    || compositor.position() < compositor.duration();
                if playing {
                    match compositor.next_frame(StreamKind::Video) {
                        Ok(Some(frame)) => {
                            produced_since_seek += 1;
                            pending = Some(PreviewFrame { seek_id, frame });
                        }
                        Ok(None) => active = None,
                        Err(e) => {
                            tracing::error!(error = %e, "preview composition failed");
                            active = None;
                        }
                    }
                } else {
                    tracing::trace!(position = %compositor.position(), "preview reached end");
                    active = None;
                }
            }
        }

        let mut select = Select::new();
        let seek_op = select.recv(&seek_rx);
        let edit_op = select.recv(&edit_rx);
        let send_op = pending.as_ref().map(|_| select.send(&frames_tx));
        let oper = select.select();

        match oper.index() {
            i if i == seek_op => {
                let Ok(request) = oper.recv(&seek_rx) else {
                    break;
                };
                let latest = seek_rx.try_iter().last().unwrap_or(request);
                tracing::trace!(id = latest.id, position = %latest.position, "preview seek");
                compositor.seek(latest.position);
                active = Some(latest.id);
                produced_since_seek = 0;
                pending = None;
            }
            i if i == edit_op => {
                let Ok(edit) = oper.recv(&edit_rx) else {
                    break;
                };
                compositor.apply_track_edit(edit);
            }
            i if Some(i) == send_op => {
                let Some(frame) = pending.take() else {
                    break;
                };
                if oper.send(&frames_tx, frame).is_err() {
                    break;
                }
            }
            _ => unreachable!("unregistered select operation"),
        }
    }
    tracing::debug!("preview worker stopped");
}
