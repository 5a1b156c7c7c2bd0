//! Shared types for capture requests, devices and session reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of source a capture request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Full primary screen
    Desktop,
    /// A single top-level window, addressed by title
    Window,
    /// A camera device, addressed by display name
    Camera,
    /// A fixed rectangle of the screen
    Region,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Desktop => "desktop",
            SourceType::Window => "window",
            SourceType::Camera => "camera",
            SourceType::Region => "region",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "desktop" | "screen" => Some(SourceType::Desktop),
            "window" => Some(SourceType::Window),
            "camera" | "webcam" => Some(SourceType::Camera),
            "region" => Some(SourceType::Region),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pixel size such as `1920x1080`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WxH` string. Returns `None` for anything else, including `"desktop"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().to_lowercase().split_once('x').map(|(w, h)| {
            (w.trim().parse::<u32>(), h.trim().parse::<u32>())
        })?;
        match (w, h) {
            (Ok(width), Ok(height)) if width > 0 && height > 0 => Some(Self { width, height }),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Screen rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Round width and height down to the nearest even number.
    ///
    /// H.264 with yuv420p needs even dimensions; the size is never increased.
    pub fn floor_even(self) -> Self {
        Self {
            width: self.width & !1,
            height: self.height & !1,
            ..self
        }
    }

    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// A capture request as issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub source_type: SourceType,
    /// Frames per second, 1..=120
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// `"WxH"` or `"desktop"` (native size, no scaling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Rect>,
}

fn default_framerate() -> u32 {
    30
}

impl CaptureRequest {
    fn with_source(source_type: SourceType, framerate: u32) -> Self {
        Self {
            source_type,
            framerate,
            resolution: None,
            window_title: None,
            camera_name: None,
            audio_device_name: None,
            region: None,
        }
    }

    pub fn desktop(framerate: u32) -> Self {
        Self::with_source(SourceType::Desktop, framerate)
    }

    pub fn window(title: impl Into<String>, framerate: u32) -> Self {
        Self {
            window_title: Some(title.into()),
            ..Self::with_source(SourceType::Window, framerate)
        }
    }

    pub fn camera(name: impl Into<String>, framerate: u32) -> Self {
        Self {
            camera_name: Some(name.into()),
            ..Self::with_source(SourceType::Camera, framerate)
        }
    }

    /// Region capture. A `None` region is resolved interactively at start.
    pub fn region(region: Option<Rect>, framerate: u32) -> Self {
        Self {
            region,
            ..Self::with_source(SourceType::Region, framerate)
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn with_audio_device(mut self, name: impl Into<String>) -> Self {
        self.audio_device_name = Some(name.into());
        self
    }

    /// The scale target, or `None` when the native size should be kept.
    pub fn target_resolution(&self) -> Option<Resolution> {
        self.resolution.as_deref().and_then(Resolution::parse)
    }
}

/// A discovered capture device (camera or audio input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Human-readable name; the only name ever passed to the capture tool
    pub display_name: String,
    /// Platform-internal identifier (e.g. a DirectShow moniker)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// Software-emulated device with a fixed native rate
    #[serde(default)]
    pub is_virtual: bool,
}

impl Device {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            alternate_name: None,
            is_default: false,
            is_virtual: false,
        }
    }
}

/// A capturable top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    /// Window title, used verbatim for title-based capture
    pub title: String,
    /// Platform window id when the enumeration source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Outcome of handing a finished recording to the host timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimelineResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_new_timeline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final report for one capture session. Delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_result: Option<TimelineResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl CompletionResult {
    pub fn succeeded(output_path: impl Into<String>) -> Self {
        Self {
            success: true,
            output_path: Some(output_path.into()),
            timeline_result: None,
            error: None,
            warning: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_path: None,
            timeline_result: None,
            error: Some(error.into()),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_output_path(mut self, output_path: impl Into<String>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }
}

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
    Terminated,
}

impl SessionState {
    /// Whether a session in this state blocks a new start.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Recording | SessionState::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
        }
    }
}

/// Snapshot returned by `get_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub is_recording: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_recording_path: Option<String>,
    pub has_process: bool,
    pub state: SessionState,
    /// 1-based attempt number of the live process, 0 when idle
    pub attempt: u32,
    pub elapsed_seconds: u64,
}

/// Response to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("1920x1080"), Some(Resolution::new(1920, 1080)));
        assert_eq!(Resolution::parse(" 640X480 "), Some(Resolution::new(640, 480)));
        assert_eq!(Resolution::parse("desktop"), None);
        assert_eq!(Resolution::parse("0x480"), None);
        assert_eq!(Resolution::parse("1920by1080"), None);
        assert_eq!(Resolution::new(1280, 720).to_string(), "1280x720");
    }

    #[test]
    fn test_floor_even_never_grows() {
        let rect = Rect::new(3, 5, 801, 601).floor_even();
        assert_eq!(rect, Rect::new(3, 5, 800, 600));

        let even = Rect::new(0, 0, 640, 480).floor_even();
        assert_eq!(even, Rect::new(0, 0, 640, 480));
    }

    #[test]
    fn test_request_serialization_is_camel_case() {
        let request = CaptureRequest::window("My App", 30);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"sourceType\":\"window\""));
        assert!(json.contains("\"windowTitle\":\"My App\""));
        assert!(!json.contains("cameraName"));
    }

    #[test]
    fn test_request_defaults_framerate() {
        let parsed: CaptureRequest = serde_json::from_str(r#"{"sourceType":"desktop"}"#).unwrap();
        assert_eq!(parsed.framerate, 30);
        assert_eq!(parsed.source_type, SourceType::Desktop);
    }

    #[test]
    fn test_target_resolution() {
        let request = CaptureRequest::desktop(30).with_resolution("desktop");
        assert_eq!(request.target_resolution(), None);
        let request = CaptureRequest::desktop(30).with_resolution("1280x720");
        assert_eq!(request.target_resolution(), Some(Resolution::new(1280, 720)));
    }

    #[test]
    fn test_session_state_liveness() {
        assert!(!SessionState::Idle.is_live());
        assert!(SessionState::Starting.is_live());
        assert!(SessionState::Recording.is_live());
        assert!(SessionState::Stopping.is_live());
        assert!(!SessionState::Terminated.is_live());
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!(SourceType::parse("Camera"), Some(SourceType::Camera));
        assert_eq!(SourceType::parse("screen"), Some(SourceType::Desktop));
        assert_eq!(SourceType::parse("tab"), None);
    }
}
