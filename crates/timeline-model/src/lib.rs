//! Cutline Timeline Model
//!
//! Defines the editable data model of a Cutline composition:
//! - **Time:** Signed nanosecond timestamps and frame-grid arithmetic
//! - **Media:** Immutable descriptors of source files
//! - **Transforms:** Per-clip geometric keyframes
//! - **Timeline:** Tracks, clips and the edit operations on them
//! - **Events:** Change notifications and track-edit messages for workers
//!
//! Transform translation and scale are normalized to the canvas size so a
//! timeline renders the same at any output resolution.

pub mod event;
pub mod media;
pub mod time;
pub mod timeline;
pub mod transform;

pub use event::{TimelineEvent, TrackEdit};
pub use media::*;
pub use time::*;
pub use timeline::*;
pub use transform::*;
