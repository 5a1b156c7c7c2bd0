//! Configuration management for reelcap.
//!
//! Handles loading and saving recorder configuration to platform-standard config directories:
//! - Linux: `~/.config/reelcap/config.json`
//! - macOS: `~/Library/Application Support/reelcap/config.json`
//! - Windows: `%APPDATA%\reelcap\config\config.json`

use crate::error::{RecorderError, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Custom output directory. If None, uses system default (Videos folder).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Capture tool location.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FfmpegConfig {
    /// Explicit ffmpeg binary. If None, the platform default is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Source-specific capture parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Smallest accepted region edge in pixels.
    pub min_region_size: u32,
    /// Rate forced on virtual-class cameras.
    pub virtual_camera_framerate: u32,
    /// Resolutions tried after the requested one and the driver default.
    pub camera_fallback_resolutions: Vec<String>,
    /// Capture resolution requested from cameras when the request has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_camera_resolution: Option<String>,
    /// `-probesize` for offset (region) capture.
    pub probe_size: String,
    /// `-analyzeduration` for offset (region) capture, in microseconds.
    pub analyze_duration_us: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_region_size: 16,
            virtual_camera_framerate: 30,
            camera_fallback_resolutions: vec!["640x480".to_string()],
            default_camera_resolution: None,
            probe_size: "50M".to_string(),
            analyze_duration_us: 10_000_000,
        }
    }
}

/// Fixed encoding parameters applied to every capture command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncodingConfig {
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            crf: 23,
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

/// Session supervision policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of the camera fallback ladder.
    pub max_camera_attempts: u32,
    /// Delay before the next camera attempt.
    pub retry_backoff_ms: u64,
    /// Deadline after a stop request before the process is killed outright.
    pub force_kill_timeout_ms: u64,
    /// How long a shell-style process gets to honour `q` before its tree is killed.
    pub graceful_stop_timeout_ms: u64,
    /// Output files at or below this size are treated as invalid.
    pub min_output_bytes: u64,
    /// Try an in-band quit on shell-style processes before the tree kill.
    pub graceful_shell_stop: bool,
    /// Diagnostic substrings that abandon the current attempt.
    pub io_error_markers: Vec<String>,
    /// Exit codes read as "stopped on request" when a stop was issued.
    pub expected_stop_exit_codes: Vec<i32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_camera_attempts: 3,
            retry_backoff_ms: 1000,
            force_kill_timeout_ms: 3000,
            graceful_stop_timeout_ms: 800,
            min_output_bytes: 1024,
            graceful_shell_stop: true,
            io_error_markers: vec![
                "I/O error during demuxing".to_string(),
                "no filtered frames".to_string(),
            ],
            expected_stop_exit_codes: vec![1, 255],
        }
    }
}

impl SessionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn force_kill_timeout(&self) -> Duration {
        Duration::from_millis(self.force_kill_timeout_ms)
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_timeout_ms)
    }
}

/// External command used to hand finished recordings to a timeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TimelineConfig {
    /// Program to run. If None, timeline integration is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments placed before the recording path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RecorderConfig {
    /// Output settings group.
    #[serde(default)]
    pub output: OutputConfig,
    /// Capture tool settings group.
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    /// Capture settings group.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Encoding settings group.
    #[serde(default)]
    pub encoding: EncodingConfig,
    /// Session supervision settings group.
    #[serde(default)]
    pub session: SessionConfig,
    /// Timeline integration settings group.
    #[serde(default)]
    pub timeline: TimelineConfig,
}

impl RecorderConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configured output directory, falling back to the user's Videos folder.
    pub fn output_dir(&self) -> Result<PathBuf> {
        match &self.output.directory {
            Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
            _ => default_output_dir(),
        }
    }
}

/// Get the path to the config file.
pub fn config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", "reelcap")
        .ok_or_else(|| RecorderError::Config("Could not determine config directory".into()))?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> RecorderConfig {
    match config_path() {
        Ok(path) => load_config_from(&path),
        Err(e) => {
            warn!("Failed to get config path: {}", e);
            RecorderConfig::default()
        }
    }
}

/// Load configuration from an explicit path, with the same fallback rules as [`load_config`].
pub fn load_config_from(path: &Path) -> RecorderConfig {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return RecorderConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<RecorderConfig>(&contents) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                RecorderConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}. Using defaults.", e);
            RecorderConfig::default()
        }
    }
}

/// Save configuration to disk.
/// Creates the config directory if it doesn't exist.
pub fn save_config(config: &RecorderConfig) -> Result<PathBuf> {
    let path = config_path()?;
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &RecorderConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| RecorderError::Config(format!("Failed to serialize config: {}", e)))?;
    fs::write(path, json)?;

    info!("Saved config to {}", path.display());
    Ok(())
}

/// Get the default output directory (system Videos folder).
pub fn default_output_dir() -> Result<PathBuf> {
    let user_dirs = UserDirs::new()
        .ok_or_else(|| RecorderError::Config("Could not determine user directories".into()))?;

    // Try Videos directory first, fall back to home directory
    let output_dir = user_dirs
        .video_dir()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| {
            let home = user_dirs.home_dir().to_path_buf();
            let videos = home.join("Videos");
            if !videos.exists() && fs::create_dir_all(&videos).is_ok() {
                return videos;
            }
            home
        });

    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert!(config.output.directory.is_none());
        assert!(config.ffmpeg.path.is_none());
        assert_eq!(config.capture.min_region_size, 16);
        assert_eq!(config.capture.virtual_camera_framerate, 30);
        assert_eq!(config.session.max_camera_attempts, 3);
        assert_eq!(config.session.force_kill_timeout(), Duration::from_secs(3));
        assert_eq!(config.session.min_output_bytes, 1024);
        assert_eq!(config.session.expected_stop_exit_codes, vec![1, 255]);
        assert_eq!(config.encoding.video_codec, "libx264");
        assert!(config.timeline.command.is_none());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"session": {"max_camera_attempts": 5}, "output": {"directory": "/tmp/rec"}}"#;
        let config: RecorderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session.max_camera_attempts, 5);
        assert_eq!(config.session.retry_backoff_ms, 1000);
        assert_eq!(config.output_dir().unwrap(), PathBuf::from("/tmp/rec"));
        assert_eq!(config.capture.probe_size, "50M");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = RecorderConfig::default();
        config.timeline.command = Some("resolve-import".to_string());
        config.capture.default_camera_resolution = Some("1280x720".to_string());

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);
    }

    #[test]
    fn test_malformed_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config_from(&path), RecorderConfig::default());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json"));
        assert_eq!(config, RecorderConfig::default());
    }
}
