//! Offline render: drives a compositor to completion into a media sink.
//!
//! ```text
//! RenderSession::start()
//!   |
//!   +-- open sink (failure aborts startup)
//!   +-- spawn "render-session" thread
//!   |     |
//!   |     +-- until cancelled, out of frames, or pts >= duration:
//!   |     |     1. compositor.next_frame(Video)
//!   |     |     2. notify FrameReady (+ offer frame to preview slot)
//!   |     |     3. sink.write_frame(frame)
//!   |     |
//!   |     +-- sink.finish()
//!   |     +-- notify Finished / Cancelled / Failed
//!   |
//!   +-- returns RenderSession (events, cancel, wait)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use cutline_common::error::{CutlineError, CutlineResult};
use cutline_timeline::{TimelineSnapshot, Timestamp};

use crate::compositor::Compositor;
use crate::context::EngineContext;
use crate::frame::{Frame, StreamKind};
use crate::media::{EncodeOptions, MediaSink, SinkFactory};

/// Where and how to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub output_path: PathBuf,
    pub encode: EncodeOptions,
}

/// Final accounting of a render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSummary {
    pub frames_written: u64,
    /// Timeline span that was rendered.
    pub duration: Timestamp,
    pub elapsed_secs: f64,
    pub cancelled: bool,
}

/// Lifecycle notifications of a render session.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Started { total_frames: u64 },
    /// Frame `index` is about to be written.
    FrameReady { index: u64, pts: Timestamp },
    Finished(RenderSummary),
    Cancelled { frames_written: u64 },
    Failed { error: String },
}

impl RenderEvent {
    /// Whether no further events will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished(_) | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

/// Handle to a running render. Dropping it cancels and joins the thread.
#[derive(Debug)]
pub struct RenderSession {
    output_path: PathBuf,
    events: Receiver<RenderEvent>,
    preview: Receiver<Frame>,
    cancel_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<CutlineResult<RenderSummary>>>,
}

impl RenderSession {
    /// Opens the output and starts rendering `snapshot` at the encode
    /// resolution and frame rate.
    pub fn start(
        snapshot: TimelineSnapshot,
        settings: RenderSettings,
        ctx: EngineContext,
        sinks: &dyn SinkFactory,
    ) -> CutlineResult<Self> {
        let encode = &settings.encode;
        let sink = sinks.open(&settings.output_path, encode)?;

        let snapshot = snapshot.with_output(encode.width, encode.height, encode.fps);
        let duration = snapshot.end();
        let mut compositor = Compositor::new(
            snapshot,
            ctx.with_pixel_format(encode.pixel_format),
        );
        compositor.seek(Timestamp::ZERO);

        let (event_tx, events) = unbounded();
        let (preview_tx, preview) = bounded(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel = Arc::clone(&cancel_flag);

        tracing::info!(
            output = %settings.output_path.display(),
            sink = sink.name(),
            codec = ?encode.codec,
            width = encode.width,
            height = encode.height,
            fps = encode.fps,
            duration = %duration,
            "Starting render"
        );

        let thread = std::thread::Builder::new()
            .name("render-session".to_string())
            .spawn(move || run_render(compositor, sink, duration, cancel, event_tx, preview_tx))
            .map_err(|e| CutlineError::render(format!("Failed to spawn render thread: {e}")))?;

        Ok(Self {
            output_path: settings.output_path,
            events,
            preview,
            cancel_flag,
            thread: Some(thread),
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Lifecycle notifications, in order.
    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    /// Most recent rendered frame not yet taken; older ones are dropped.
    pub fn preview_frames(&self) -> &Receiver<Frame> {
        &self.preview
    }

    /// Drain all pending notifications.
    pub fn drain_events(&self) -> Vec<RenderEvent> {
        self.events.try_iter().collect()
    }

    /// Request cancellation; the sink is still finished cleanly.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        tracing::info!(output = %self.output_path.display(), "Render cancellation requested");
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Blocks until the render thread exits.
    pub fn wait(mut self) -> CutlineResult<RenderSummary> {
        self.join()
            .unwrap_or_else(|| Err(CutlineError::render("render session already joined")))
    }

    fn join(&mut self) -> Option<CutlineResult<RenderSummary>> {
        let thread = self.thread.take()?;
        Some(
            thread
                .join()
                .unwrap_or_else(|_| Err(CutlineError::render("render thread panicked"))),
        )
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel_flag.store(true, Ordering::SeqCst);
            if let Some(Err(e)) = self.join() {
                tracing::warn!(error = %e, "render session ended with an error");
            }
        }
    }
}

fn run_render(
    mut compositor: Compositor,
    mut sink: Box<dyn MediaSink>,
    duration: Timestamp,
    cancel: Arc<AtomicBool>,
    events: Sender<RenderEvent>,
    preview: Sender<Frame>,
) -> CutlineResult<RenderSummary> {
    let started = Instant::now();
    let total_frames = duration.frames_ceil(compositor.frame_interval());
    let _ = events.send(RenderEvent::Started { total_frames });

    let outcome = render_frames(
        &mut compositor,
        sink.as_mut(),
        duration,
        &cancel,
        &events,
        &preview,
    );
    let finished = sink.finish();

    let (frames_written, cancelled) = match (outcome, finished) {
        (Ok(progress), Ok(())) => progress,
        (Err(e), finish) => {
            if let Err(finish_err) = finish {
                tracing::warn!(error = %finish_err, "sink finish failed after render error");
            }
            tracing::error!(error = %e, "Render failed");
            let _ = events.send(RenderEvent::Failed {
                error: e.to_string(),
            });
            return Err(e);
        }
        (Ok(_), Err(e)) => {
            tracing::error!(error = %e, "Failed to finish output");
            let _ = events.send(RenderEvent::Failed {
                error: e.to_string(),
            });
            return Err(e);
        }
    };

    let summary = RenderSummary {
        frames_written,
        duration,
        elapsed_secs: started.elapsed().as_secs_f64(),
        cancelled,
    };
    if cancelled {
        tracing::info!(frames = frames_written, "Render cancelled");
        let _ = events.send(RenderEvent::Cancelled { frames_written });
    } else {
        tracing::info!(
            frames = frames_written,
            elapsed_secs = summary.elapsed_secs,
            "Render complete"
        );
        let _ = events.send(RenderEvent::Finished(summary));
    }
    Ok(summary)
}

/// Writes frames until the timeline ends; returns `(frames, cancelled)`.
fn render_frames(
    compositor: &mut Compositor,
    sink: &mut dyn MediaSink,
    duration: Timestamp,
    cancel: &AtomicBool,
    events: &Sender<RenderEvent>,
    preview: &Sender<Frame>,
) -> CutlineResult<(u64, bool)> {
    let mut index = 0u64;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok((index, true));
        }
        if compositor.position() >= duration {
            break;
        }
        let Some(frame) = compositor.next_frame(StreamKind::Video)? else {
            break;
        };

        let _ = preview.try_send(frame.clone());
        let _ = events.send(RenderEvent::FrameReady {
            index,
            pts: frame.pts,
        });
        sink.write_frame(StreamKind::Video, &frame)?;
        index += 1;
    }
    Ok((index, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(!RenderEvent::Started { total_frames: 3 }.is_terminal());
        assert!(!RenderEvent::FrameReady {
            index: 0,
            pts: Timestamp::ZERO
        }
        .is_terminal());
        assert!(RenderEvent::Cancelled { frames_written: 1 }.is_terminal());
        assert!(RenderEvent::Failed {
            error: "x".to_string()
        }
        .is_terminal());
    }
}
