//! Capture tool location and output file handling.
//!
//! On Windows and macOS, FFmpeg is shipped alongside the application. On Linux,
//! the system-installed FFmpeg is used instead.

use crate::config::FfmpegConfig;
use crate::error::{RecorderError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Resolve the path to the FFmpeg binary.
///
/// An explicit `ffmpeg.path` in the config always wins. Otherwise Linux uses
/// the system FFmpeg from PATH, and other platforms use the binary placed next
/// to the current executable (ffmpeg-sidecar's own resolution rule).
pub fn resolve_ffmpeg_path(config: &FfmpegConfig) -> PathBuf {
    if let Some(path) = config.path.as_deref().filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("ffmpeg")
    }
    #[cfg(not(target_os = "linux"))]
    {
        ffmpeg_sidecar::paths::ffmpeg_path()
    }
}

/// Where `ffmpeg` would be found on PATH, if anywhere.
pub fn ffmpeg_on_path() -> Option<PathBuf> {
    which::which("ffmpeg").ok()
}

/// A verified capture tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegInfo {
    pub path: PathBuf,
    /// First line of `ffmpeg -version`
    pub version: String,
}

fn probe_version(ffmpeg: &Path) -> std::io::Result<Option<String>> {
    let output = Command::new(ffmpeg)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(Some(stdout.lines().next().unwrap_or("ffmpeg").trim().to_string()))
}

/// Verify that the capture tool at `ffmpeg` runs.
///
/// On Linux a missing binary triggers an ffmpeg-sidecar download as a last
/// resort (the system package may be absent in development environments).
pub fn ensure_ffmpeg_available(ffmpeg: &Path) -> Result<FfmpegInfo> {
    debug!("Resolved FFmpeg path: {}", ffmpeg.display());

    match probe_version(ffmpeg) {
        Ok(Some(version)) => {
            info!(path = %ffmpeg.display(), "FFmpeg binary verified: {}", version);
            Ok(FfmpegInfo {
                path: ffmpeg.to_path_buf(),
                version,
            })
        }
        Ok(None) => Err(RecorderError::SpawnFailure(format!(
            "FFmpeg binary at {} did not run successfully",
            ffmpeg.display()
        ))),
        Err(e) => {
            warn!("FFmpeg binary not found at {}: {}", ffmpeg.display(), e);

            #[cfg(target_os = "linux")]
            {
                info!("Attempting FFmpeg auto-download as fallback...");
                ffmpeg_sidecar::download::auto_download().map_err(|e| {
                    RecorderError::SpawnFailure(format!(
                        "FFmpeg not found and auto-download failed: {}",
                        e
                    ))
                })?;
                let downloaded = ffmpeg_sidecar::paths::ffmpeg_path();
                let version = probe_version(&downloaded)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "ffmpeg (downloaded)".to_string());
                Ok(FfmpegInfo {
                    path: downloaded,
                    version,
                })
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(RecorderError::SpawnFailure(format!(
                    "Bundled FFmpeg not found at {}. The application may not be installed correctly.",
                    ffmpeg.display()
                )))
            }
        }
    }
}

const OUTPUT_EXTENSION: &str = "mp4";

fn output_stem(at: DateTime<Local>) -> String {
    format!("recording_{}", at.format("%Y-%m-%d_%H%M%S"))
}

/// Timestamp-derived recording file name.
pub fn output_file_name(at: DateTime<Local>) -> String {
    format!("{}.{}", output_stem(at), OUTPUT_EXTENSION)
}

/// Generate a unique output filename in `dir`, creating the directory if needed.
pub fn generate_output_path(dir: &Path) -> Result<PathBuf> {
    generate_output_path_at(dir, Local::now())
}

/// Like [`generate_output_path`] for a fixed timestamp.
///
/// Names are second-resolution, so a name already used by an earlier
/// recording (or by one of its fallback attempts) gets a `_N` suffix.
pub fn generate_output_path_at(dir: &Path, at: DateTime<Local>) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let base = output_stem(at);
    let mut stem = base.clone();
    let mut n = 1;
    while stem_in_use(dir, &stem)? {
        n += 1;
        stem = format!("{}_{}", base, n);
    }
    let path = dir.join(format!("{}.{}", stem, OUTPUT_EXTENSION));
    debug!("Output path: {}", path.display());
    Ok(path)
}

/// Whether any file in `dir` is `stem.*` or one of its `stem_attemptN` siblings.
fn stem_in_use(dir: &Path, stem: &str) -> Result<bool> {
    let dotted = format!("{}.", stem);
    let attempt = format!("{}_attempt", stem);
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&dotted) || name.starts_with(&attempt) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Output path for a given attempt.
///
/// The first attempt writes to `base`; later attempts get an `_attemptN`
/// suffix so a partially written file is never overwritten.
pub fn attempt_output_path(base: &Path, attempt: u32) -> PathBuf {
    if attempt <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let name = match base.extension() {
        Some(ext) => format!("{}_attempt{}.{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{}_attempt{}", stem, attempt),
    };
    base.with_file_name(name)
}

/// Size of the output file in bytes, 0 when it does not exist.
pub fn output_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Whether `path` holds a recording larger than `min_bytes`.
pub fn is_valid_output(path: &Path, min_bytes: u64) -> bool {
    output_size(path) > min_bytes
}
