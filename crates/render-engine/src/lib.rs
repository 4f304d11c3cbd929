//! Cutline Render Engine
//!
//! Turns a timeline into frames: per-clip synchronized decoding, a shared
//! frame cache, layer compositing, and the two drivers that consume the
//! compositor (offline render sessions and the live preview worker).
//!
//! # Pipeline Architecture
//!
//! ```text
//! clip.mp4 ── DecoderFactory ── SyncSource ──┐   (shared FrameCache)
//!                                            │
//! clip.png ── DecoderFactory ── SyncSource ──┤
//!                                            ├── FrameConverter (per track)
//! timeline ── TimelineSnapshot ──────────────┘         │
//!                                                      ▼
//!                                           Compositor (bottom → top)
//!                                                      │
//!                              ┌───────────────────────┴─────────┐
//!                              ▼                                 ▼
//!                       RenderSession                      PreviewWorker
//!                              │                                 │
//!                              ▼                                 ▼
//!                   MediaSink (output.mp4)              (seek id, frame)
//! ```

pub mod cache;
pub mod compositor;
pub mod context;
pub mod converter;
pub mod ffmpeg;
pub mod frame;
pub mod media;
pub mod preview;
pub mod render_session;
pub mod sync_source;
pub mod synthetic;

pub use cache::{CacheStats, FrameCache};
pub use compositor::{Compositor, Placement};
pub use context::EngineContext;
pub use converter::FrameConverter;
pub use ffmpeg::{inspect_media, FfmpegDecoderFactory, FfmpegSinkFactory};
pub use frame::{Frame, PixelFormat, StreamKind};
pub use media::{
    DecoderFactory, EncodeOptions, MediaDecoder, MediaSink, SinkFactory, VideoCodec,
};
pub use preview::{PreviewFrame, PreviewWorker, SeekRequest};
pub use render_session::{RenderEvent, RenderSession, RenderSettings, RenderSummary};
pub use sync_source::{SourceStats, SyncSource};
