//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CutlineResult;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults for newly created timelines.
    pub project: ProjectDefaults,

    /// Composition engine tuning.
    pub engine: EngineConfig,

    /// Default encode parameters.
    pub render: RenderDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Canvas parameters used when a timeline is created without explicit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectDefaults {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Composition engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of decoded frames kept in the shared frame cache.
    pub cache_capacity_frames: usize,

    /// How far ahead (ms) a request may jump before the decoder is reopened
    /// instead of decoding forward.
    pub seek_ahead_threshold_ms: u64,

    /// Canvas pixel format ("rgb24", "rgba", "bgra", "gray8").
    pub canvas_pixel_format: String,
}

/// Default encode parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Default video codec ("h264", "h265", "vp9", "mpeg4").
    pub video_codec: String,

    /// Target video bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Constant rate factor; overrides the bitrate when set.
    pub crf: Option<u8>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cutline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ProjectDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity_frames: 120,
            seek_ahead_threshold_ms: 3_000,
            canvas_pixel_format: "rgb24".to_string(),
        }
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            video_codec: "h264".to_string(),
            bitrate_kbps: 8_000,
            crf: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    ///
    /// Read and parse failures are logged, so logging should already be
    /// initialized. Before that, use [`AppConfig::try_load`].
    pub fn load_from(config_path: &Path) -> Self {
        match Self::try_load_from(config_path) {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                Self::default()
            }
        }
    }

    /// Load config from the standard location, reporting failures to the caller.
    pub fn try_load() -> CutlineResult<Option<Self>> {
        Self::try_load_from(&config_file_path())
    }

    /// Load config from an explicit path. `Ok(None)` when no file exists.
    pub fn try_load_from(config_path: &Path) -> CutlineResult<Option<Self>> {
        if !config_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(config_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("cutline").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CutlineError;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"engine": {"cache_capacity_frames": 8}}"#).unwrap();
        assert_eq!(config.engine.cache_capacity_frames, 8);
        assert_eq!(config.engine.seek_ahead_threshold_ms, 3_000);
        assert_eq!(config.project.frame_rate, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("cutline-config-does-not-exist.json");
        let config = AppConfig::load_from(&path);
        assert_eq!(config.render.video_codec, "h264");
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!(
            "cutline-config-invalid-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ not json").unwrap();
        let config = AppConfig::load_from(&path);
        assert_eq!(config.project.width, 1920);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_try_load_reports_missing_and_invalid_files() {
        let missing = std::env::temp_dir().join("cutline-config-absent.json");
        assert!(AppConfig::try_load_from(&missing).unwrap().is_none());

        let invalid = std::env::temp_dir().join(format!(
            "cutline-config-broken-{}.json",
            std::process::id()
        ));
        std::fs::write(&invalid, "{ not json").unwrap();
        let result = AppConfig::try_load_from(&invalid);
        let _ = std::fs::remove_file(&invalid);
        assert!(matches!(result, Err(CutlineError::Json(_))));
    }

    #[test]
    fn test_try_load_parses_existing_file() {
        let path = std::env::temp_dir().join(format!(
            "cutline-config-valid-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{"logging": {"level": "debug"}}"#).unwrap();
        let config = AppConfig::try_load_from(&path).unwrap().unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.project.width, 1920);
    }
}
