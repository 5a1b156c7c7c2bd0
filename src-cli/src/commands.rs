//! CLI command implementations.

use crate::colors;
use crate::exit_codes::ExitCode;
use crate::platform;
use crate::{RecordOptions, RecordTarget};
use reelcap_common::logging::log_dir;
use reelcap_common::{CaptureRequest, CompletionResult, Rect};
use reelcap_service::catalog::FfmpegDeviceSource;
use reelcap_service::config::{self, RecorderConfig};
use reelcap_service::encoder::{self, FfmpegInfo};
use reelcap_service::{CaptureBackend, Collaborators, DeviceCatalog, RecorderError, SessionSupervisor};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Platform catalog for the list commands.
fn device_catalog() -> DeviceCatalog {
    let config = config::load_config();
    let ffmpeg = encoder::resolve_ffmpeg_path(&config.ffmpeg);
    DeviceCatalog::new(Arc::new(FfmpegDeviceSource::new(CaptureBackend::detect(), ffmpeg)))
}

/// Verify the capture tool off the async runtime.
async fn verify_ffmpeg(config: &RecorderConfig) -> Result<FfmpegInfo, RecorderError> {
    let ffmpeg = encoder::resolve_ffmpeg_path(&config.ffmpeg);
    tokio::task::spawn_blocking(move || encoder::ensure_ffmpeg_available(&ffmpeg))
        .await
        .map_err(|e| RecorderError::SpawnFailure(format!("FFmpeg check did not complete: {}", e)))?
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{}", colors::error(&format!("Failed to serialize output: {}", e))),
    }
}

/// List available windows.
pub async fn list_windows(json: bool, quiet: bool) -> ExitCode {
    let windows = match device_catalog().list_windows().await {
        Ok(windows) => windows,
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::GeneralError;
        }
    };

    if json {
        print_json(&windows);
    } else if windows.is_empty() {
        if !quiet {
            println!("{}", colors::dim("No capturable windows found."));
        }
    } else {
        let id_width = windows
            .iter()
            .map(|w| w.id.as_deref().map_or(1, str::len))
            .max()
            .unwrap_or(2)
            .max(2);

        println!(
            "{}  {}",
            colors::pad_left("ID", id_width, colors::header),
            colors::header("TITLE")
        );
        println!("{}  {}", "-".repeat(id_width), "-".repeat(5));

        for window in windows {
            let title = if window.title.chars().count() > 60 {
                format!("{}...", window.title.chars().take(57).collect::<String>())
            } else {
                window.title.clone()
            };
            println!(
                "{}  {}",
                colors::pad_left(window.id.as_deref().unwrap_or("-"), id_width, colors::dim),
                title
            );
        }
    }
    ExitCode::Success
}

/// List available cameras.
pub async fn list_cameras(json: bool, quiet: bool) -> ExitCode {
    let cameras = match device_catalog().list_cameras().await {
        Ok(cameras) => cameras,
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
            return ExitCode::GeneralError;
        }
    };

    if json {
        print_json(&cameras);
    } else if cameras.is_empty() {
        if !quiet {
            println!("{}", colors::dim("No cameras found."));
        }
    } else {
        let name_width = cameras
            .iter()
            .map(|c| c.display_name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        println!(
            "{}  {}  {}",
            colors::pad_left("NAME", name_width, colors::header),
            colors::pad_left("VIRTUAL", 7, colors::header),
            colors::header("DEVICE")
        );
        println!("{}  {}  {}", "-".repeat(name_width), "-".repeat(7), "-".repeat(6));

        for camera in cameras {
            let is_virtual = if camera.is_virtual { colors::yes() } else { colors::no() };
            // yes/no are 2-3 chars; pad to the column manually since they may carry ANSI codes.
            let padding = " ".repeat(7 - if camera.is_virtual { 3 } else { 2 });
            println!(
                "{:<name_width$}  {}{}  {}",
                camera.display_name,
                is_virtual,
                padding,
                colors::dim(camera.alternate_name.as_deref().unwrap_or(""))
            );
        }
    }
    ExitCode::Success
}

/// List available audio inputs.
pub async fn list_audio(json: bool, quiet: bool) -> ExitCode {
    let catalog = device_catalog();
    let devices = catalog.list_audio_devices().await;
    let best = catalog.get_best_audio_device().await;

    if json {
        print_json(&devices);
    } else if devices.is_empty() {
        if !quiet {
            println!("{}", colors::dim("No audio inputs found."));
        }
    } else {
        let name_width = devices
            .iter()
            .map(|d| d.display_name.len())
            .max()
            .unwrap_or(4)
            .max(4);

        println!(
            "{}  {}",
            colors::pad_left("NAME", name_width, colors::header),
            colors::header("PREFERRED")
        );
        println!("{}  {}", "-".repeat(name_width), "-".repeat(9));

        for device in &devices {
            let preferred = if best.as_ref() == Some(device) {
                colors::yes()
            } else {
                colors::no()
            };
            println!("{:<name_width$}  {}", device.display_name, preferred);
        }
    }
    ExitCode::Success
}

/// Turn a record target into a capture request.
pub fn build_request(target: &RecordTarget) -> Result<CaptureRequest, String> {
    let (request, options) = match target {
        RecordTarget::Desktop { options } => (CaptureRequest::desktop(options.fps), options),
        RecordTarget::Window { title, options } => {
            (CaptureRequest::window(title.clone(), options.fps), options)
        }
        RecordTarget::Camera { name, options } => {
            (CaptureRequest::camera(name.clone(), options.fps), options)
        }
        RecordTarget::Region {
            x,
            y,
            width,
            height,
            select,
            options,
        } => {
            let region = match (x, y, width, height) {
                _ if *select => None,
                (Some(x), Some(y), Some(width), Some(height)) => {
                    Some(Rect::new(*x, *y, *width, *height))
                }
                _ => return Err("give --x, --y, --width and --height, or use --select".to_string()),
            };
            (CaptureRequest::region(region, options.fps), options)
        }
    };

    let mut request = request;
    if let Some(resolution) = &options.resolution {
        request = request.with_resolution(resolution.clone());
    }
    if let Some(audio) = &options.audio {
        request = request.with_audio_device(audio.clone());
    }
    Ok(request)
}

/// Load configuration and apply per-run overrides.
fn recorder_config(options: &RecordOptions) -> RecorderConfig {
    let mut config = config::load_config();
    if let Some(dir) = &options.output_dir {
        config.output.directory = Some(shellexpand::tilde(dir).into_owned());
    }
    config
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to install signal handlers: {}", e);
                std::future::pending::<()>().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

async fn request_stop(supervisor: &SessionSupervisor, verbose: bool) {
    // NotRecording here means the session already ended; its completion is on the way.
    if let Err(e) = supervisor.stop().await {
        debug!("Stop request rejected: {}", e);
        if verbose {
            eprintln!("{}", colors::dim(&format!("Stop not sent: {}", e)));
        }
    }
}

/// Record until stopped, the duration elapses, or capture ends on its own.
pub async fn record(target: RecordTarget, json: bool, quiet: bool, verbose: bool) -> ExitCode {
    let request = match build_request(&target) {
        Ok(request) => request,
        Err(msg) => {
            if !quiet {
                eprintln!("{}", colors::error(&msg));
            }
            return ExitCode::InvalidArguments;
        }
    };
    let options = target.options();
    let config = recorder_config(options);
    let backend = CaptureBackend::detect();

    if matches!(backend, CaptureBackend::X11 { .. }) && platform::is_wayland_session() && !quiet {
        eprintln!(
            "{}",
            colors::warning(&format!(
                "{} is a Wayland session; screen capture only sees X11 windows.",
                platform::desktop_name().unwrap_or_else(|| "This desktop".to_string())
            ))
        );
    }

    let ffmpeg = match verify_ffmpeg(&config).await {
        Ok(info) => {
            if verbose && !quiet {
                eprintln!("{}", colors::dim(&info.version));
            }
            info.path
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::warning(&e.to_string()));
            }
            encoder::resolve_ffmpeg_path(&config.ffmpeg)
        }
    };

    let collaborators = Collaborators::platform(&config, &backend, &ffmpeg);
    let supervisor = SessionSupervisor::new(config, backend, ffmpeg, collaborators);
    let mut completions = supervisor.subscribe();

    match supervisor.start(request).await {
        Ok(path) => {
            let path = path.to_string_lossy();
            if json {
                print_json(&serde_json::json!({ "status": "recording_started", "filePath": path }));
            } else if !quiet {
                println!("{} {}", colors::success("Recording to"), colors::path(&path));
                println!("{}", colors::dim("Press Ctrl+C to stop."));
            }
        }
        Err(RecorderError::Cancelled) => {
            if json {
                print_json(&serde_json::json!({ "status": "cancelled" }));
            } else if !quiet {
                println!("{}", colors::dim("Region selection cancelled."));
            }
            return ExitCode::UserCancelled;
        }
        Err(e) => {
            if json {
                print_json(&serde_json::json!({ "status": "failed", "error": e.response_message() }));
            } else if !quiet {
                eprintln!("{}", colors::error(&format!("Error starting recording: {}", e)));
            }
            return ExitCode::for_start_error(&e);
        }
    }

    let started = Instant::now();
    let duration_limit = options.duration.map(Duration::from_secs);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut stopping = false;

    let result = loop {
        tokio::select! {
            received = completions.recv() => match received {
                Ok(result) => break Some(result),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break None,
            },
            _ = &mut shutdown, if !stopping => {
                stopping = true;
                if !quiet && !json {
                    eprintln!("\n{}", colors::info("Stopping recording..."));
                }
                request_stop(&supervisor, verbose).await;
            }
            _ = ticker.tick() => {
                if let Some(limit) = duration_limit {
                    if !stopping && started.elapsed() >= limit {
                        stopping = true;
                        if !quiet && !json {
                            eprintln!("\n{}", colors::info("Duration limit reached. Stopping recording..."));
                        }
                        request_stop(&supervisor, verbose).await;
                    }
                }

                let status = supervisor.get_state().await;
                if !quiet && !json && !stopping && status.is_recording {
                    print!(
                        "\r{} {}",
                        colors::recording("Recording:"),
                        colors::elapsed_time(status.elapsed_seconds)
                    );
                    std::io::stdout().flush().ok();
                }
            }
        }
    };

    match result {
        Some(result) => report_completion(&result, json, quiet),
        None => {
            if !quiet {
                eprintln!("\n{}", colors::error("Recording ended without a result."));
            }
            ExitCode::GeneralError
        }
    }
}

/// Print a completion and map it to an exit code.
fn report_completion(result: &CompletionResult, json: bool, quiet: bool) -> ExitCode {
    let code = completion_exit_code(result);

    if json {
        print_json(result);
        return code;
    }
    if quiet {
        return code;
    }

    if let Some(warning) = &result.warning {
        eprintln!("\n{}", colors::warning(warning));
    }
    if result.success {
        let path = result.output_path.as_deref().unwrap_or("");
        println!("\n{} {}", colors::success("Recording saved:"), colors::path(path));
        if let Some(timeline) = result.timeline_result.as_ref().filter(|t| t.success) {
            if let Some(name) = &timeline.timeline_name {
                println!("{} {}", colors::bold("Timeline:"), name);
            }
        }
        if let Some(error) = &result.error {
            eprintln!("{}", colors::warning(error));
        }
    } else {
        eprintln!(
            "\n{}",
            colors::error(result.error.as_deref().unwrap_or("Recording failed"))
        );
    }
    code
}

pub fn completion_exit_code(result: &CompletionResult) -> ExitCode {
    match (result.success, &result.error) {
        (true, None) => ExitCode::Success,
        (true, Some(_)) => ExitCode::IntegrationFailed,
        (false, _) => ExitCode::RecordingFailedDuringCapture,
    }
}

/// Verify the capture tool and print the environment the recorder would use.
pub async fn check(json: bool, quiet: bool) -> ExitCode {
    let config = config::load_config();
    let backend = CaptureBackend::detect();
    let verified = verify_ffmpeg(&config).await;
    let on_path = encoder::ffmpeg_on_path();
    let output_dir = config.output_dir().ok();
    let config_file = config::config_path().ok();

    let code = if verified.is_ok() {
        ExitCode::Success
    } else {
        ExitCode::CaptureToolUnavailable
    };

    if json {
        let (ffmpeg, version, error) = match &verified {
            Ok(info) => (Some(info.path.clone()), Some(info.version.clone()), None),
            Err(e) => (None, None, Some(e.to_string())),
        };
        print_json(&serde_json::json!({
            "ffmpeg": ffmpeg,
            "version": version,
            "error": error,
            "ffmpegOnPath": on_path,
            "backend": backend.name(),
            "outputDirectory": output_dir,
            "configFile": config_file,
            "logDirectory": log_dir(),
        }));
        return code;
    }

    let show = |label: &str, value: Option<PathBuf>| {
        let value = value
            .map(|p| colors::path(&p.to_string_lossy()))
            .unwrap_or_else(|| colors::dim("unknown"));
        println!("{} {}", colors::bold(label), value);
    };

    match &verified {
        Ok(info) => {
            println!("{} {}", colors::bold("FFmpeg:"), colors::path(&info.path.to_string_lossy()));
            println!("{} {}", colors::bold("Version:"), info.version);
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e.to_string()));
            }
        }
    }
    if quiet {
        return code;
    }
    println!(
        "{} {}",
        colors::bold("On PATH:"),
        if on_path.is_some() { colors::yes() } else { colors::no() }
    );
    println!("{} {}", colors::bold("Backend:"), backend.name());
    show("Output:", output_dir);
    show("Config:", config_file);
    show("Logs:", Some(log_dir()));
    code
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        print_json(&serde_json::json!({ "version": version }));
    } else {
        println!("{} {}", colors::bold("reelcap"), version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcap_common::{SourceType, TimelineResult};

    fn options() -> RecordOptions {
        RecordOptions {
            fps: 30,
            resolution: None,
            audio: None,
            output_dir: None,
            duration: None,
        }
    }

    #[test]
    fn region_needs_coordinates_or_select() {
        let partial = RecordTarget::Region {
            x: Some(0),
            y: Some(0),
            width: None,
            height: None,
            select: false,
            options: options(),
        };
        assert!(build_request(&partial).is_err());

        let interactive = RecordTarget::Region {
            x: None,
            y: None,
            width: None,
            height: None,
            select: true,
            options: options(),
        };
        let request = build_request(&interactive).unwrap();
        assert_eq!(request.source_type, SourceType::Region);
        assert!(request.region.is_none());
    }

    #[test]
    fn record_options_flow_into_request() {
        let target = RecordTarget::Camera {
            name: "HD Webcam (USB)".to_string(),
            options: RecordOptions {
                fps: 25,
                resolution: Some("1280x720".to_string()),
                audio: Some("Microphone (USB Audio)".to_string()),
                ..options()
            },
        };
        let request = build_request(&target).unwrap();
        assert_eq!(request.camera_name.as_deref(), Some("HD Webcam (USB)"));
        assert_eq!(request.framerate, 25);
        assert_eq!(request.resolution.as_deref(), Some("1280x720"));
        assert_eq!(request.audio_device_name.as_deref(), Some("Microphone (USB Audio)"));
    }

    #[test]
    fn completion_outcomes_map_to_exit_codes() {
        assert_eq!(
            completion_exit_code(&CompletionResult::succeeded("a.mp4")),
            ExitCode::Success
        );
        assert_eq!(
            completion_exit_code(&CompletionResult::failed("All fallback attempts failed")),
            ExitCode::RecordingFailedDuringCapture
        );

        let mut integration_failed = CompletionResult::succeeded("a.mp4");
        integration_failed.error = Some("Timeline integration failed: offline".to_string());
        integration_failed.timeline_result = Some(TimelineResult::default());
        assert_eq!(
            completion_exit_code(&integration_failed),
            ExitCode::IntegrationFailed
        );
    }
}
