//! Capture command construction.
//!
//! Translates a [`CaptureRequest`] into an FFmpeg invocation. Screen sources
//! (desktop, window, region) become argument vectors for a direct spawn.
//! Camera sources become a single shell command line, since device names with
//! spaces, parentheses or non-ASCII characters are unreliable as discrete
//! arguments to the platform's device input.

use crate::config::{CaptureConfig, EncodingConfig, RecorderConfig};
use crate::error::{RecorderError, Result};
use reelcap_common::validation::validate_request;
use reelcap_common::{CaptureRequest, Rect, Resolution, SourceType};
use std::fmt;
use std::path::{Path, PathBuf};

/// Platform input devices the capture tool reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureBackend {
    /// `gdigrab` for the screen, `dshow` for cameras and microphones.
    Windows,
    /// `x11grab` for the screen, `v4l2` for cameras, `pulse` for audio.
    X11 { display: String },
}

impl CaptureBackend {
    /// Backend for the running platform.
    pub fn detect() -> Self {
        if cfg!(windows) {
            CaptureBackend::Windows
        } else {
            let display = std::env::var("DISPLAY")
                .ok()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| ":0.0".to_string());
            CaptureBackend::X11 { display }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureBackend::Windows => "windows",
            CaptureBackend::X11 { .. } => "x11",
        }
    }

    /// Quote a token for this backend's shell.
    fn quote(&self, value: &str) -> String {
        match self {
            CaptureBackend::Windows => format!("\"{}\"", value),
            CaptureBackend::X11 { .. } => format!("'{}'", value.replace('\'', r"'\''")),
        }
    }
}

/// How the capture tool is to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Argument vector for a direct spawn.
    Direct { program: PathBuf, args: Vec<String> },
    /// One composed command line for a shell spawn.
    Shell { line: String },
}

impl CommandSpec {
    pub fn is_shell(&self) -> bool {
        matches!(self, CommandSpec::Shell { .. })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Direct { program, args } => {
                write!(f, "{}", program.display())?;
                for arg in args {
                    if arg.contains(' ') {
                        write!(f, " \"{}\"", arg)?;
                    } else {
                        write!(f, " {}", arg)?;
                    }
                }
                Ok(())
            }
            CommandSpec::Shell { line } => f.write_str(line),
        }
    }
}

/// A command bound to the file it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub spec: CommandSpec,
    pub output_path: PathBuf,
    /// 1-based attempt index
    pub attempt: u32,
}

/// Per-attempt inputs resolved outside the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInputs {
    /// Validated rectangle for region capture; takes precedence over `request.region`.
    pub region: Option<Rect>,
    /// The requested camera is a virtual-class device.
    pub camera_is_virtual: bool,
    /// Capture resolution declared to a physical camera for this attempt.
    pub camera_resolution: Option<Resolution>,
    /// Audio input to add; takes precedence over `request.audio_device_name`.
    pub audio_device: Option<String>,
}

/// Builds capture tool invocations.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    backend: CaptureBackend,
    ffmpeg: PathBuf,
    capture: CaptureConfig,
    encoding: EncodingConfig,
}

impl CommandBuilder {
    pub fn new(backend: CaptureBackend, ffmpeg: impl Into<PathBuf>, config: &RecorderConfig) -> Self {
        Self {
            backend,
            ffmpeg: ffmpeg.into(),
            capture: config.capture.clone(),
            encoding: config.encoding.clone(),
        }
    }

    pub fn backend(&self) -> &CaptureBackend {
        &self.backend
    }

    /// Capture resolutions tried, in order, for a physical camera.
    ///
    /// The requested (or configured default) resolution comes first, then the
    /// driver's own default, then the configured fallbacks. Duplicates are
    /// dropped and the ladder is cut to `max_attempts`.
    pub fn camera_ladder(&self, request: &CaptureRequest, max_attempts: u32) -> Vec<Option<Resolution>> {
        let primary = request.target_resolution().or_else(|| {
            self.capture
                .default_camera_resolution
                .as_deref()
                .and_then(Resolution::parse)
        });

        let mut ladder: Vec<Option<Resolution>> = Vec::new();
        let candidates = std::iter::once(primary)
            .chain(std::iter::once(None))
            .chain(
                self.capture
                    .camera_fallback_resolutions
                    .iter()
                    .map(|r| Resolution::parse(r)),
            );
        for candidate in candidates {
            if !ladder.contains(&candidate) {
                ladder.push(candidate);
            }
        }
        ladder.truncate(max_attempts.max(1) as usize);
        ladder
    }

    /// Build the invocation for `request`, writing to `output`.
    pub fn build(&self, request: &CaptureRequest, inputs: &BuildInputs, output: &Path) -> Result<CommandSpec> {
        validate_request(request)?;

        let audio = inputs
            .audio_device
            .as_deref()
            .or(request.audio_device_name.as_deref());

        match request.source_type {
            SourceType::Desktop => Ok(self.build_screen(request, ScreenTarget::Desktop, audio, output)),
            SourceType::Window => {
                let title = request
                    .window_title
                    .as_deref()
                    .ok_or_else(|| RecorderError::InvalidRequest("windowTitle is required".into()))?;
                if !matches!(self.backend, CaptureBackend::Windows) {
                    return Err(RecorderError::InvalidRequest(format!(
                        "window capture by title is not supported on the {} backend",
                        self.backend.name()
                    )));
                }
                Ok(self.build_screen(request, ScreenTarget::Window(title), audio, output))
            }
            SourceType::Region => {
                let region = inputs
                    .region
                    .or(request.region)
                    .ok_or_else(|| RecorderError::InvalidRequest("region is required".into()))?;
                Ok(self.build_screen(request, ScreenTarget::Region(region), audio, output))
            }
            SourceType::Camera => {
                let camera = request
                    .camera_name
                    .as_deref()
                    .ok_or_else(|| RecorderError::InvalidRequest("cameraName is required".into()))?;
                Ok(self.build_camera(request, camera, inputs, audio, output))
            }
        }
    }

    fn build_screen(
        &self,
        request: &CaptureRequest,
        target: ScreenTarget<'_>,
        audio: Option<&str>,
        output: &Path,
    ) -> CommandSpec {
        let fps = request.framerate.to_string();
        let mut args: Vec<String> = vec!["-hide_banner".into()];

        match &self.backend {
            CaptureBackend::Windows => {
                args.extend(["-f".into(), "gdigrab".into(), "-framerate".into(), fps]);
                match target {
                    ScreenTarget::Desktop => args.extend(["-i".into(), "desktop".into()]),
                    ScreenTarget::Window(title) => {
                        args.extend(["-i".into(), format!("title={}", title)])
                    }
                    ScreenTarget::Region(rect) => {
                        args.extend(self.probe_args());
                        args.extend([
                            "-offset_x".into(),
                            rect.x.to_string(),
                            "-offset_y".into(),
                            rect.y.to_string(),
                            "-video_size".into(),
                            rect.size().to_string(),
                            "-i".into(),
                            "desktop".into(),
                        ]);
                    }
                }
                if let Some(device) = audio {
                    args.extend(["-f".into(), "dshow".into(), "-i".into(), format!("audio={}", device)]);
                }
            }
            CaptureBackend::X11 { display } => {
                args.extend(["-f".into(), "x11grab".into(), "-framerate".into(), fps]);
                match target {
                    // Window targets are rejected before reaching here.
                    ScreenTarget::Desktop | ScreenTarget::Window(_) => {
                        args.extend(["-i".into(), display.clone()])
                    }
                    ScreenTarget::Region(rect) => {
                        args.extend(self.probe_args());
                        args.extend([
                            "-video_size".into(),
                            rect.size().to_string(),
                            "-i".into(),
                            format!("{}+{},{}", display, rect.x, rect.y),
                        ]);
                    }
                }
                if let Some(device) = audio {
                    args.extend(["-f".into(), "pulse".into(), "-i".into(), device.to_string()]);
                }
            }
        }

        // Region size is authoritative, so only full-screen sources are scaled.
        if !matches!(target, ScreenTarget::Region(_)) {
            if let Some(res) = request.target_resolution() {
                args.extend(["-vf".into(), scale_filter(res)]);
            }
        }

        args.extend(self.encoding_args(audio.is_some()));
        args.extend(["-y".into(), output.to_string_lossy().into_owned()]);

        CommandSpec::Direct {
            program: self.ffmpeg.clone(),
            args,
        }
    }

    fn build_camera(
        &self,
        request: &CaptureRequest,
        camera: &str,
        inputs: &BuildInputs,
        audio: Option<&str>,
        output: &Path,
    ) -> CommandSpec {
        // Virtual cameras only deliver their native rate; the requested size is
        // reached by scaling after capture instead.
        let (framerate, capture_size, scale) = if inputs.camera_is_virtual {
            (
                self.capture.virtual_camera_framerate,
                None,
                request.target_resolution(),
            )
        } else {
            (request.framerate, inputs.camera_resolution, None)
        };

        let q = |s: &str| self.backend.quote(s);
        let mut tokens: Vec<String> = vec![q(self.ffmpeg.to_string_lossy().as_ref()), "-hide_banner".into()];

        match &self.backend {
            CaptureBackend::Windows => {
                tokens.extend(["-f".into(), "dshow".into(), "-framerate".into(), framerate.to_string()]);
                if let Some(size) = capture_size {
                    tokens.extend(["-video_size".into(), size.to_string()]);
                }
                // dshow only accepts a combined source with the audio half first.
                let source = match audio {
                    Some(device) => format!("audio={}:video={}", q(device), q(camera)),
                    None => format!("video={}", q(camera)),
                };
                tokens.extend(["-i".into(), source]);
            }
            CaptureBackend::X11 { .. } => {
                if let Some(device) = audio {
                    tokens.extend(["-f".into(), "pulse".into(), "-i".into(), q(device)]);
                }
                tokens.extend(["-f".into(), "v4l2".into(), "-framerate".into(), framerate.to_string()]);
                if let Some(size) = capture_size {
                    tokens.extend(["-video_size".into(), size.to_string()]);
                }
                tokens.extend(["-i".into(), q(camera)]);
            }
        }

        if let Some(res) = scale {
            tokens.extend(["-vf".into(), scale_filter(res)]);
        }

        tokens.extend(self.encoding_args(audio.is_some()));
        tokens.extend(["-y".into(), q(output.to_string_lossy().as_ref())]);

        CommandSpec::Shell {
            line: tokens.join(" "),
        }
    }

    fn probe_args(&self) -> [String; 4] {
        [
            "-probesize".into(),
            self.capture.probe_size.clone(),
            "-analyzeduration".into(),
            self.capture.analyze_duration_us.to_string(),
        ]
    }

    fn encoding_args(&self, with_audio: bool) -> Vec<String> {
        let enc = &self.encoding;
        let mut args = vec![
            "-c:v".to_string(),
            enc.video_codec.clone(),
            "-preset".to_string(),
            enc.preset.clone(),
            "-crf".to_string(),
            enc.crf.to_string(),
            "-pix_fmt".to_string(),
            enc.pixel_format.clone(),
        ];
        if with_audio {
            args.extend([
                "-c:a".to_string(),
                enc.audio_codec.clone(),
                "-b:a".to_string(),
                enc.audio_bitrate.clone(),
            ]);
        }
        args
    }
}

#[derive(Clone, Copy)]
enum ScreenTarget<'a> {
    Desktop,
    Window(&'a str),
    Region(Rect),
}

fn scale_filter(res: Resolution) -> String {
    format!("scale={}:{}", res.width, res.height)
}
