//! Source media descriptors.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// What kind of content a media file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    StaticImage,
}

/// An immutable description of a source file.
///
/// For static images `duration` is not meaningful: clips made from images
/// last exactly one frame interval and may be trimmed to any length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub duration: Timestamp,
}

impl MediaFile {
    pub fn new(kind: MediaKind, path: impl Into<PathBuf>, duration: Timestamp) -> Self {
        Self {
            kind,
            path: path.into(),
            duration,
        }
    }

    pub fn video(path: impl Into<PathBuf>, duration: Timestamp) -> Self {
        Self::new(MediaKind::Video, path, duration)
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::new(MediaKind::StaticImage, path, Timestamp::ZERO)
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::StaticImage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
