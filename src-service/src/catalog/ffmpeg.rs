//! Device enumeration through the capture tool and platform utilities.
//!
//! - Windows: `ffmpeg -list_devices true -f dshow -i dummy` for cameras and
//!   microphones, PowerShell main-window titles for windows.
//! - X11: `/sys/class/video4linux` for cameras, `pactl` for audio inputs,
//!   `wmctrl -l` for windows.

use super::DeviceSource;
use crate::command::CaptureBackend;
use crate::error::{RecorderError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reelcap_common::{Device, WindowInfo};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// A quoted device line, with the device kind suffix newer FFmpeg builds print.
static DSHOW_DEVICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\[dshow @ [^\]]+\]\s+"(.+)"(?:\s+\((video|audio|none)\))?\s*$"#).unwrap());

static DSHOW_ALTERNATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\[dshow @ [^\]]+\]\s+Alternative name "(.+)"\s*$"#).unwrap());

static WMCTRL_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x[0-9a-fA-F]+)\s+(-?\d+)\s+(\S+)\s*(.*)$").unwrap());

#[derive(Clone, Copy, PartialEq, Eq)]
enum DshowKind {
    Video,
    Audio,
}

/// Parse the stderr of `ffmpeg -list_devices true -f dshow -i dummy`.
///
/// Returns `(cameras, audio_inputs)`. Handles both the sectioned layout of
/// older builds and the per-line `(video)` / `(audio)` suffix of newer ones.
pub fn parse_dshow_devices(output: &str) -> (Vec<Device>, Vec<Device>) {
    let mut cameras: Vec<Device> = Vec::new();
    let mut audio: Vec<Device> = Vec::new();
    let mut section: Option<DshowKind> = None;
    let mut last: Option<DshowKind> = None;

    for line in output.lines() {
        if line.contains("DirectShow video devices") {
            section = Some(DshowKind::Video);
            continue;
        }
        if line.contains("DirectShow audio devices") {
            section = Some(DshowKind::Audio);
            continue;
        }

        if let Some(caps) = DSHOW_ALTERNATIVE.captures(line) {
            let target = match last {
                Some(DshowKind::Video) => cameras.last_mut(),
                Some(DshowKind::Audio) => audio.last_mut(),
                None => None,
            };
            if let Some(device) = target {
                device.alternate_name = Some(caps[1].to_string());
            }
            continue;
        }

        if let Some(caps) = DSHOW_DEVICE.captures(line) {
            let kind = match caps.get(2).map(|m| m.as_str()) {
                Some("video") => Some(DshowKind::Video),
                Some("audio") => Some(DshowKind::Audio),
                Some(_) => None,
                None => section,
            };
            let device = Device::new(&caps[1]);
            match kind {
                Some(DshowKind::Video) => cameras.push(device),
                Some(DshowKind::Audio) => audio.push(device),
                None => {}
            }
            last = kind;
        }
    }

    (cameras, audio)
}

/// Parse one window title per line, dropping blanks and duplicates.
pub fn parse_window_titles(output: &str) -> Vec<WindowInfo> {
    let mut windows: Vec<WindowInfo> = Vec::new();
    for title in output.lines().map(str::trim).filter(|t| !t.is_empty()) {
        if !windows.iter().any(|w| w.title == title) {
            windows.push(WindowInfo {
                title: title.to_string(),
                id: None,
            });
        }
    }
    windows
}

/// Parse `wmctrl -l` output: `<id> <desktop> <host> <title>`.
pub fn parse_wmctrl_windows(output: &str) -> Vec<WindowInfo> {
    output
        .lines()
        .filter_map(|line| WMCTRL_LINE.captures(line.trim()))
        .filter_map(|caps| {
            let title = caps[4].trim();
            // Desktop -1 holds panels and docks.
            if title.is_empty() || &caps[2] == "-1" {
                return None;
            }
            Some(WindowInfo {
                title: title.to_string(),
                id: Some(caps[1].to_string()),
            })
        })
        .collect()
}

/// Parse `pactl list short sources` into audio inputs named by source name.
pub fn parse_pactl_sources(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Device::new)
        .collect()
}

/// Scan a `video4linux` class directory for capture nodes.
///
/// Cameras are identified by their device node (`/dev/videoN`), which is what
/// the `v4l2` input takes; the card label becomes the alternate name. Only the
/// primary node of each card (`index` 0) is reported.
pub fn scan_video4linux(root: &Path) -> Vec<Device> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut nodes: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("video"))
        .collect();
    nodes.sort_by_key(|name| name.trim_start_matches("video").parse::<u32>().unwrap_or(u32::MAX));

    nodes
        .into_iter()
        .filter(|node| {
            std::fs::read_to_string(root.join(node).join("index"))
                .map(|idx| idx.trim() == "0")
                .unwrap_or(true)
        })
        .map(|node| {
            let label = std::fs::read_to_string(root.join(&node).join("name"))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Device {
                display_name: format!("/dev/{}", node),
                alternate_name: label,
                is_default: false,
                is_virtual: false,
            }
        })
        .collect()
}

/// Enumerates devices by running the capture tool and platform utilities.
pub struct FfmpegDeviceSource {
    backend: CaptureBackend,
    ffmpeg: PathBuf,
    video4linux_root: PathBuf,
}

impl FfmpegDeviceSource {
    pub fn new(backend: CaptureBackend, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            ffmpeg: ffmpeg.into(),
            video4linux_root: PathBuf::from("/sys/class/video4linux"),
        }
    }

    async fn run(&self, program: &Path, args: &[&str]) -> Result<std::process::Output> {
        debug!("Running {} {}", program.display(), args.join(" "));
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                RecorderError::Io(std::io::Error::new(
                    e.kind(),
                    format!("{}: {}", program.display(), e),
                ))
            })
    }

    async fn dshow_devices(&self) -> Result<(Vec<Device>, Vec<Device>)> {
        // The dummy input always fails; the listing is on stderr regardless.
        let output = self
            .run(
                &self.ffmpeg,
                &["-hide_banner", "-list_devices", "true", "-f", "dshow", "-i", "dummy"],
            )
            .await?;
        Ok(parse_dshow_devices(&String::from_utf8_lossy(&output.stderr)))
    }
}

#[async_trait]
impl DeviceSource for FfmpegDeviceSource {
    async fn windows(&self) -> Result<Vec<WindowInfo>> {
        match self.backend {
            CaptureBackend::Windows => {
                let script = "Get-Process | Where-Object { $_.MainWindowTitle } | \
                              Select-Object -ExpandProperty MainWindowTitle";
                let output = self
                    .run(
                        Path::new("powershell"),
                        &["-NoProfile", "-NonInteractive", "-Command", script],
                    )
                    .await?;
                Ok(parse_window_titles(&String::from_utf8_lossy(&output.stdout)))
            }
            CaptureBackend::X11 { .. } => {
                let output = self.run(Path::new("wmctrl"), &["-l"]).await?;
                Ok(parse_wmctrl_windows(&String::from_utf8_lossy(&output.stdout)))
            }
        }
    }

    async fn cameras(&self) -> Result<Vec<Device>> {
        match self.backend {
            CaptureBackend::Windows => Ok(self.dshow_devices().await?.0),
            CaptureBackend::X11 { .. } => Ok(scan_video4linux(&self.video4linux_root)),
        }
    }

    async fn audio_devices(&self) -> Result<Vec<Device>> {
        match self.backend {
            CaptureBackend::Windows => Ok(self.dshow_devices().await?.1),
            CaptureBackend::X11 { .. } => {
                let output = self
                    .run(Path::new("pactl"), &["list", "short", "sources"])
                    .await?;
                Ok(parse_pactl_sources(&String::from_utf8_lossy(&output.stdout)))
            }
        }
    }
}
