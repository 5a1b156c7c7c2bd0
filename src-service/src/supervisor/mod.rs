//! Recording session supervision.
//!
//! The [`SessionSupervisor`] owns the single live capture session. It
//! validates and starts requests, forwards stop requests to the session's
//! event loop, and reports state. Everything that happens after a successful
//! spawn (retries, stop escalation, completion) is driven by the session task
//! in [`session`].

mod session;

use crate::catalog::{is_virtual_camera_name, DeviceCatalog, DeviceSource, FfmpegDeviceSource};
use crate::command::{BuildInputs, CaptureBackend, CommandBuilder};
use crate::config::RecorderConfig;
use crate::encoder::generate_output_path;
use crate::error::{RecorderError, Result};
use crate::process::{FfmpegLauncher, ProcessLauncher};
use crate::region::{RegionNegotiator, RegionOutcome, RegionSelector, SlopSelector};
use crate::relay::{CompletionRelay, ExternalCommandTimeline, TimelineIntegration};
use reelcap_common::validation::validate_request;
use reelcap_common::{
    CaptureRequest, CompletionResult, RecordingStatus, SessionState, SourceType, StartResponse,
    StopResponse,
};
use session::{AttemptPlan, Session, SessionEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

/// Shared view of the live session, read by `get_state` and written by both
/// the supervisor and the session task.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot {
    state: SessionState,
    output_path: Option<PathBuf>,
    attempt: u32,
    has_process: bool,
    started_at: Option<Instant>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

/// External collaborators of the supervisor.
pub struct Collaborators {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub devices: Arc<dyn DeviceSource>,
    pub selector: Option<Arc<dyn RegionSelector>>,
    pub timeline: Option<Arc<dyn TimelineIntegration>>,
}

impl Collaborators {
    /// Real processes and platform enumeration for `backend`.
    pub fn platform(config: &RecorderConfig, backend: &CaptureBackend, ffmpeg: &Path) -> Self {
        let selector: Option<Arc<dyn RegionSelector>> = match backend {
            CaptureBackend::X11 { .. } if SlopSelector::available() => Some(Arc::new(SlopSelector::new())),
            _ => None,
        };
        let timeline: Option<Arc<dyn TimelineIntegration>> = config
            .timeline
            .command
            .as_ref()
            .filter(|c| !c.is_empty())
            .map(|command| {
                Arc::new(ExternalCommandTimeline::new(command, config.timeline.args.clone()))
                    as Arc<dyn TimelineIntegration>
            });

        Self {
            launcher: Arc::new(FfmpegLauncher::new()),
            devices: Arc::new(FfmpegDeviceSource::new(backend.clone(), ffmpeg)),
            selector,
            timeline,
        }
    }
}

/// Owner of the recording lifecycle.
pub struct SessionSupervisor {
    config: RecorderConfig,
    builder: CommandBuilder,
    launcher: Arc<dyn ProcessLauncher>,
    catalog: Arc<DeviceCatalog>,
    regions: RegionNegotiator,
    relay: Arc<CompletionRelay>,
    slot: Arc<Mutex<SessionSlot>>,
}

impl SessionSupervisor {
    pub fn new(
        config: RecorderConfig,
        backend: CaptureBackend,
        ffmpeg: impl Into<PathBuf>,
        collaborators: Collaborators,
    ) -> Self {
        let builder = CommandBuilder::new(backend, ffmpeg, &config);
        let regions = RegionNegotiator::new(collaborators.selector, config.capture.min_region_size);
        Self {
            builder,
            launcher: collaborators.launcher,
            catalog: Arc::new(DeviceCatalog::new(collaborators.devices)),
            regions,
            relay: Arc::new(CompletionRelay::new(collaborators.timeline)),
            slot: Arc::new(Mutex::new(SessionSlot::default())),
            config,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Register a callback for every session completion.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: Fn(&CompletionResult) + Send + Sync + 'static,
    {
        self.relay.on_completion(callback);
    }

    /// Subscribe to session completions.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionResult> {
        self.relay.subscribe()
    }

    /// Start a capture session.
    ///
    /// Returns the output path of the first attempt once the capture process
    /// is running. Failures after that point are reported through completion.
    pub async fn start(&self, request: CaptureRequest) -> Result<PathBuf> {
        {
            let mut slot = self.slot.lock().await;
            if slot.state.is_live() {
                return Err(RecorderError::AlreadyRecording);
            }
            *slot = SessionSlot {
                state: SessionState::Starting,
                ..Default::default()
            };
        }

        match self.launch_session(request).await {
            Ok(path) => Ok(path),
            Err(e) => {
                *self.slot.lock().await = SessionSlot::default();
                Err(e)
            }
        }
    }

    async fn launch_session(&self, request: CaptureRequest) -> Result<PathBuf> {
        validate_request(&request)?;

        let output_dir = self.config.output_dir()?;
        let base_output = generate_output_path(&output_dir)?;

        let mut inputs = BuildInputs::default();
        let is_camera = request.source_type == SourceType::Camera;

        if request.source_type == SourceType::Region {
            match self.regions.resolve(request.region).await? {
                RegionOutcome::Region(rect) => inputs.region = Some(rect),
                RegionOutcome::Cancelled => return Err(RecorderError::Cancelled),
            }
        }

        let ladder = if is_camera {
            let name = request.camera_name.as_deref().unwrap_or_default();
            inputs.camera_is_virtual = match self.catalog.find_camera(name).await {
                Ok(Some(device)) => device.is_virtual,
                Ok(None) => is_virtual_camera_name(name),
                Err(e) => {
                    warn!("Camera lookup failed, guessing from the name: {}", e);
                    is_virtual_camera_name(name)
                }
            };
            if request.audio_device_name.is_none() {
                inputs.audio_device = self
                    .catalog
                    .get_best_audio_device()
                    .await
                    .map(|device| device.display_name);
            }
            self.builder
                .camera_ladder(&request, self.config.session.max_camera_attempts)
        } else {
            vec![None]
        };

        info!(
            source = request.source_type.as_str(),
            attempts = ladder.len(),
            backend = self.builder.backend().name(),
            "Starting recording"
        );

        let plan = AttemptPlan {
            request,
            inputs,
            base_output,
            ladder,
            is_camera,
        };
        let mut session = Session::new(
            plan,
            self.builder.clone(),
            self.launcher.clone(),
            self.relay.clone(),
            self.slot.clone(),
            self.config.session.clone(),
        );
        let path = session.launch_attempt(1)?;

        {
            let mut slot = self.slot.lock().await;
            slot.state = SessionState::Recording;
            slot.output_path = Some(path.clone());
            slot.attempt = 1;
            slot.has_process = true;
            slot.started_at = Some(Instant::now());
            slot.events = Some(session.sender());
        }

        tokio::spawn(session.run());
        Ok(path)
    }

    /// Ask the live session to stop.
    ///
    /// The outcome arrives through completion. Only a session in the
    /// recording state can be stopped; a repeated stop is rejected.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.state != SessionState::Recording {
            return Err(RecorderError::NotRecording);
        }
        let events = slot.events.clone().ok_or(RecorderError::NotRecording)?;
        if events.send(SessionEvent::StopRequested).is_err() {
            return Err(RecorderError::NotRecording);
        }
        slot.state = SessionState::Stopping;
        info!("Stop requested");
        Ok(())
    }

    /// Snapshot of the session state.
    pub async fn get_state(&self) -> RecordingStatus {
        let slot = self.slot.lock().await;
        RecordingStatus {
            is_recording: matches!(slot.state, SessionState::Recording | SessionState::Stopping),
            current_recording_path: slot
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            has_process: slot.has_process,
            state: slot.state,
            attempt: if slot.state.is_live() { slot.attempt } else { 0 },
            elapsed_seconds: slot
                .started_at
                .filter(|_| slot.state.is_live())
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
        }
    }

    /// Start, reporting the outcome as a response value.
    pub async fn start_recording(&self, request: CaptureRequest) -> StartResponse {
        match self.start(request).await {
            Ok(path) => StartResponse {
                success: true,
                file_path: Some(path.to_string_lossy().into_owned()),
                error: None,
            },
            Err(e) => StartResponse {
                success: false,
                file_path: None,
                error: Some(e.response_message()),
            },
        }
    }

    /// Stop, reporting the outcome as a response value.
    pub async fn stop_recording(&self) -> StopResponse {
        match self.stop().await {
            Ok(()) => StopResponse {
                success: true,
                error: None,
            },
            Err(e) => StopResponse {
                success: false,
                error: Some(e.response_message()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CaptureCommand, CommandSpec};
    use crate::process::{ExitInfo, ProcessEvent, ProcessEvents, ProcessHandle, StopSignal};
    use async_trait::async_trait;
    use reelcap_common::{Device, Rect, WindowInfo};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Behaviour of one fake capture process.
    #[derive(Debug, Clone)]
    struct Script {
        /// Bytes written to the output file at launch.
        bytes: usize,
        diagnostics: Vec<String>,
        /// Exit on its own after a delay.
        exit_after: Option<(Duration, ExitInfo)>,
        /// Exit when asked to quit; None ignores quit.
        on_quit: Option<ExitInfo>,
        /// Exit on a tree kill; None ignores it.
        on_kill_tree: Option<ExitInfo>,
        /// Exit on a single-process kill; None models a shell whose child survives it.
        on_kill: Option<ExitInfo>,
    }

    impl Script {
        /// Records until asked to quit, then exits cleanly.
        fn recording(bytes: usize) -> Self {
            Self {
                bytes,
                diagnostics: Vec::new(),
                exit_after: None,
                on_quit: Some(ExitInfo::code(0)),
                on_kill_tree: Some(ExitInfo::signal(9)),
                on_kill: Some(ExitInfo::signal(9)),
            }
        }

        /// Exits on its own.
        fn exits(after_ms: u64, exit: ExitInfo, bytes: usize) -> Self {
            Self {
                exit_after: Some((Duration::from_millis(after_ms), exit)),
                ..Self::recording(bytes)
            }
        }

        /// Only an outright kill ends it.
        fn unresponsive(bytes: usize) -> Self {
            Self {
                on_quit: None,
                on_kill_tree: None,
                ..Self::recording(bytes)
            }
        }

        fn with_diagnostic(mut self, line: &str) -> Self {
            self.diagnostics.push(line.to_string());
            self
        }
    }

    /// Runs scripts in launch order; an exhausted queue is a spawn failure.
    #[derive(Default)]
    struct ScriptedLauncher {
        scripts: std::sync::Mutex<VecDeque<Script>>,
        commands: std::sync::Mutex<Vec<CaptureCommand>>,
        signals: Arc<std::sync::Mutex<Vec<(u32, StopSignal)>>>,
    }

    impl ScriptedLauncher {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: std::sync::Mutex::new(scripts.into()),
                ..Default::default()
            })
        }

        fn commands(&self) -> Vec<CaptureCommand> {
            self.commands.lock().unwrap().clone()
        }

        fn signals(&self) -> Vec<(u32, StopSignal)> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(&self, command: &CaptureCommand, events: ProcessEvents) -> Result<ProcessHandle> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| RecorderError::SpawnFailure("executable not found: ffmpeg".into()))?;
            self.commands.lock().unwrap().push(command.clone());
            if script.bytes > 0 {
                std::fs::write(&command.output_path, vec![0u8; script.bytes]).unwrap();
            }

            let (control_tx, mut control_rx) = mpsc::unbounded_channel();
            let signals = self.signals.clone();
            let attempt = command.attempt;
            tokio::spawn(async move {
                for line in &script.diagnostics {
                    let _ = events.send(ProcessEvent::Diagnostic(line.clone()));
                }
                let spontaneous = async {
                    match script.exit_after {
                        Some((delay, exit)) => {
                            tokio::time::sleep(delay).await;
                            exit
                        }
                        None => std::future::pending::<ExitInfo>().await,
                    }
                };
                tokio::pin!(spontaneous);
                let mut control_open = true;
                let exit = loop {
                    tokio::select! {
                        exit = &mut spontaneous => break exit,
                        signal = control_rx.recv(), if control_open => {
                            let Some(signal) = signal else {
                                control_open = false;
                                continue;
                            };
                            signals.lock().unwrap().push((attempt, signal));
                            let reaction = match signal {
                                StopSignal::Quit => script.on_quit,
                                StopSignal::KillTree => script.on_kill_tree,
                                StopSignal::Kill => script.on_kill,
                            };
                            if let Some(exit) = reaction {
                                break exit;
                            }
                        }
                    }
                };
                let _ = events.send(ProcessEvent::Exited(exit));
            });

            Ok(ProcessHandle::new(
                Some(1000 + attempt),
                command.spec.is_shell(),
                control_tx,
            ))
        }
    }

    struct StubDevices;

    #[async_trait]
    impl DeviceSource for StubDevices {
        async fn windows(&self) -> Result<Vec<WindowInfo>> {
            Ok(Vec::new())
        }

        async fn cameras(&self) -> Result<Vec<Device>> {
            let mut webcam = Device::new("HD Webcam (USB)");
            webcam.alternate_name = Some(r"@device_pnp_\\?\usb#vid_046d&pid_0825".to_string());
            Ok(vec![webcam, Device::new("OBS Virtual Camera")])
        }

        async fn audio_devices(&self) -> Result<Vec<Device>> {
            Ok(vec![
                Device::new("Stereo Mix (Realtek Audio)"),
                Device::new("Microphone (USB Audio)"),
            ])
        }
    }

    struct CancellingSelector;

    #[async_trait]
    impl RegionSelector for CancellingSelector {
        async fn select(&self) -> Result<crate::region::SelectionOutcome> {
            Ok(crate::region::SelectionOutcome::Cancelled)
        }
    }

    struct Harness {
        supervisor: SessionSupervisor,
        launcher: Arc<ScriptedLauncher>,
        completions: Arc<AtomicUsize>,
        rx: broadcast::Receiver<CompletionResult>,
        _dir: TempDir,
    }

    impl Harness {
        async fn next_completion(&mut self) -> CompletionResult {
            tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("no completion within 5s")
                .unwrap()
        }

        fn completions(&self) -> usize {
            self.completions.load(Ordering::SeqCst)
        }
    }

    fn test_config(dir: &TempDir) -> RecorderConfig {
        let mut config = RecorderConfig::default();
        config.output.directory = Some(dir.path().to_string_lossy().into_owned());
        config.session.retry_backoff_ms = 20;
        config.session.force_kill_timeout_ms = 300;
        config.session.graceful_stop_timeout_ms = 50;
        config
    }

    fn harness_with(
        backend: CaptureBackend,
        scripts: Vec<Script>,
        selector: Option<Arc<dyn RegionSelector>>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let launcher = ScriptedLauncher::new(scripts);
        let supervisor = SessionSupervisor::new(
            test_config(&dir),
            backend,
            "ffmpeg",
            Collaborators {
                launcher: launcher.clone(),
                devices: Arc::new(StubDevices),
                selector,
                timeline: None,
            },
        );
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        supervisor.on_completion(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let rx = supervisor.subscribe();
        Harness {
            supervisor,
            launcher,
            completions,
            rx,
            _dir: dir,
        }
    }

    fn harness(scripts: Vec<Script>) -> Harness {
        harness_with(CaptureBackend::Windows, scripts, None)
    }

    fn failing_camera() -> Script {
        Script::exits(5, ExitInfo::code(1), 0)
    }

    fn shell_line(command: &CaptureCommand) -> &str {
        match &command.spec {
            CommandSpec::Shell { line } => line,
            CommandSpec::Direct { .. } => panic!("expected a shell command"),
        }
    }

    #[tokio::test]
    async fn test_camera_ladder_succeeds_on_third_attempt() {
        let mut h = harness(vec![
            failing_camera(),
            failing_camera(),
            Script::exits(20, ExitInfo::code(0), 4096),
        ]);
        let request = CaptureRequest::camera("HD Webcam (USB)", 30).with_resolution("1920x1080");
        let first = h.supervisor.start(request).await.unwrap();

        let result = h.next_completion().await;
        assert!(result.success, "{:?}", result);
        let path = result.output_path.unwrap();
        assert!(path.ends_with("_attempt3.mp4"), "{}", path);

        let commands = h.launcher.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].output_path, first);
        assert!(shell_line(&commands[0]).contains("-video_size 1920x1080"));
        assert!(!shell_line(&commands[1]).contains("-video_size"));
        assert!(shell_line(&commands[2]).contains("-video_size 640x480"));
        assert_eq!(h.supervisor.get_state().await.state, SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_all_camera_attempts_fail() {
        let mut h = harness(vec![failing_camera(), failing_camera(), failing_camera()]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30).with_resolution("1280x720"))
            .await
            .unwrap();

        let result = h.next_completion().await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("All fallback attempts failed"));
        assert_eq!(h.launcher.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_io_error_marker_abandons_attempt() {
        // The first attempt would exit 0 with data, but reported a demux error.
        let mut h = harness(vec![
            Script::exits(200, ExitInfo::code(0), 4096).with_diagnostic("[dshow] I/O error during demuxing"),
            Script::exits(20, ExitInfo::code(0), 4096),
        ]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();

        let result = h.next_completion().await;
        assert!(result.success);
        assert!(result.output_path.unwrap().ends_with("_attempt2.mp4"));
        assert!(h.launcher.signals().contains(&(1, StopSignal::KillTree)));
    }

    #[tokio::test]
    async fn test_io_error_kill_reaches_the_shell_tree() {
        // Killing only the shell would leave the capture tool running.
        let mut h = harness(vec![
            Script {
                on_kill: None,
                ..Script::recording(4096).with_diagnostic("I/O error during demuxing")
            },
            Script::exits(20, ExitInfo::code(0), 4096),
        ]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();

        let result = h.next_completion().await;
        assert!(result.success, "{:?}", result);
        assert!(result.output_path.unwrap().ends_with("_attempt2.mp4"));
        let signals = h.launcher.signals();
        assert!(signals.contains(&(1, StopSignal::KillTree)));
        assert!(!signals.contains(&(1, StopSignal::Kill)));
    }

    #[tokio::test]
    async fn test_io_error_attempt_that_never_exits_is_abandoned() {
        let mut h = harness(vec![
            Script {
                on_kill: None,
                ..Script::unresponsive(4096).with_diagnostic("I/O error during demuxing")
            },
            Script::exits(20, ExitInfo::code(0), 4096),
        ]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();

        let result = h.next_completion().await;
        assert!(result.success, "{:?}", result);
        assert!(result.output_path.unwrap().ends_with("_attempt2.mp4"));
        assert_eq!(h.launcher.commands().len(), 2);
        assert_eq!(h.completions(), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut h = harness(vec![Script::recording(4096)]);
        h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();

        let err = h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap_err();
        assert_eq!(err.code(), "AlreadyRecording");
        let response = h.supervisor.start_recording(CaptureRequest::desktop(30)).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("AlreadyRecording"));

        h.supervisor.stop().await.unwrap();
        assert!(h.next_completion().await.success);
        assert_eq!(h.launcher.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_double_stop_completes_once() {
        let mut h = harness(vec![Script::recording(4096)]);
        h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();

        assert!(h.supervisor.stop_recording().await.success);
        let second = h.supervisor.stop_recording().await;
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("NotRecording"));

        let result = h.next_completion().await;
        assert!(result.success);
        assert!(result.warning.is_none());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.completions(), 1);
        assert_eq!(h.launcher.signals(), vec![(1, StopSignal::Quit)]);
    }

    #[tokio::test]
    async fn test_unresponsive_process_is_force_killed() {
        let mut h = harness(vec![Script::unresponsive(4096)]);
        h.supervisor
            .start(CaptureRequest::window("My App", 30))
            .await
            .unwrap();
        h.supervisor.stop().await.unwrap();

        let result = h.next_completion().await;
        assert!(result.success);
        assert!(result.warning.unwrap().contains("killed"));
        assert_eq!(h.supervisor.get_state().await.state, SessionState::Terminated);
        assert!(h.launcher.signals().contains(&(1, StopSignal::Kill)));

        // The late exit from the kill must not produce a second completion.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.completions(), 1);
    }

    #[tokio::test]
    async fn test_force_kill_without_valid_output_fails() {
        let mut h = harness(vec![Script::unresponsive(100)]);
        h.supervisor
            .start(CaptureRequest::window("My App", 30))
            .await
            .unwrap();
        h.supervisor.stop().await.unwrap();

        let result = h.next_completion().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("killed"));
    }

    #[tokio::test]
    async fn test_exit_racing_force_kill_completes_once() {
        // Exits on its own right around the force-kill deadline.
        let mut h = harness(vec![Script {
            on_quit: None,
            on_kill_tree: None,
            ..Script::exits(300, ExitInfo::code(255), 4096)
        }]);
        h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();
        h.supervisor.stop().await.unwrap();

        assert!(h.next_completion().await.success);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.completions(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_returns_to_idle() {
        let mut h = harness(Vec::new());
        let response = h.supervisor.start_recording(CaptureRequest::desktop(30)).await;
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("SpawnFailure"));

        let status = h.supervisor.get_state().await;
        assert_eq!(status.state, SessionState::Idle);
        assert!(!status.is_recording);
        assert!(!status.has_process);

        assert!(tokio::time::timeout(Duration::from_millis(50), h.rx.recv()).await.is_err());
        assert_eq!(h.completions(), 0);
    }

    #[tokio::test]
    async fn test_region_cancel_is_benign() {
        let h = harness_with(
            CaptureBackend::X11 {
                display: ":0.0".to_string(),
            },
            vec![Script::recording(4096)],
            Some(Arc::new(CancellingSelector)),
        );
        let err = h.supervisor.start(CaptureRequest::region(None, 30)).await.unwrap_err();
        assert_eq!(err.code(), "Cancelled");
        assert!(h.launcher.commands().is_empty());
        assert_eq!(h.supervisor.get_state().await.state, SessionState::Idle);
        assert_eq!(h.completions(), 0);
    }

    #[tokio::test]
    async fn test_region_is_normalized_before_capture() {
        let mut h = harness(vec![Script::recording(4096)]);
        h.supervisor
            .start(CaptureRequest::region(Some(Rect::new(10, 20, 641, 481)), 30))
            .await
            .unwrap();

        let command = &h.launcher.commands()[0];
        let CommandSpec::Direct { args, .. } = &command.spec else {
            panic!("expected a direct command");
        };
        let size = args.iter().position(|a| a == "-video_size").unwrap();
        assert_eq!(args[size + 1], "640x480");

        h.supervisor.stop().await.unwrap();
        h.next_completion().await;
    }

    #[tokio::test]
    async fn test_region_too_small_is_rejected() {
        let h = harness(vec![Script::recording(4096)]);
        let err = h
            .supervisor
            .start(CaptureRequest::region(Some(Rect::new(0, 0, 9, 9)), 30))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RegionTooSmall");
        assert!(h.launcher.commands().is_empty());
    }

    #[tokio::test]
    async fn test_shell_stop_escalates_to_tree_kill() {
        let mut h = harness(vec![Script {
            on_quit: None,
            ..Script::recording(4096)
        }]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();
        h.supervisor.stop().await.unwrap();

        let result = h.next_completion().await;
        assert!(result.success);
        assert!(result.warning.is_some());
        assert_eq!(
            h.launcher.signals(),
            vec![(1, StopSignal::Quit), (1, StopSignal::KillTree)]
        );
    }

    #[tokio::test]
    async fn test_camera_names_survive_the_command_line() {
        let mut h = harness(vec![Script::recording(4096)]);
        h.supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();

        let line = shell_line(&h.launcher.commands()[0]).to_string();
        assert!(
            line.contains(r#"-i audio="Microphone (USB Audio)":video="HD Webcam (USB)""#),
            "{}",
            line
        );

        h.supervisor.stop().await.unwrap();
        h.next_completion().await;
    }

    #[tokio::test]
    async fn test_virtual_camera_uses_native_rate() {
        let mut h = harness(vec![Script::recording(4096)]);
        h.supervisor
            .start(CaptureRequest::camera("OBS Virtual Camera", 60).with_resolution("1280x720"))
            .await
            .unwrap();

        let line = shell_line(&h.launcher.commands()[0]).to_string();
        assert!(line.contains("-framerate 30"));
        assert!(!line.contains("-video_size"));
        assert!(line.contains("scale=1280:720"));

        h.supervisor.stop().await.unwrap();
        h.next_completion().await;
    }

    #[tokio::test]
    async fn test_screen_capture_recovers_usable_file() {
        let mut h = harness(vec![Script::exits(20, ExitInfo::code(3), 4096)]);
        h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();

        let result = h.next_completion().await;
        assert!(result.success);
        assert!(result.warning.unwrap().contains("recovered"));
    }

    #[tokio::test]
    async fn test_screen_capture_failure_without_file() {
        let mut h = harness(vec![Script::exits(20, ExitInfo::code(3), 0)]);
        h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();

        let result = h.next_completion().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exit code 3"));
        assert_eq!(h.launcher.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_during_backoff_ends_session() {
        let dir = TempDir::new().unwrap();
        let launcher = ScriptedLauncher::new(vec![failing_camera(), Script::recording(4096)]);
        let mut config = test_config(&dir);
        config.session.retry_backoff_ms = 300;
        let supervisor = SessionSupervisor::new(
            config,
            CaptureBackend::Windows,
            "ffmpeg",
            Collaborators {
                launcher: launcher.clone(),
                devices: Arc::new(StubDevices),
                selector: None,
                timeline: None,
            },
        );
        let mut rx = supervisor.subscribe();
        supervisor
            .start(CaptureRequest::camera("HD Webcam (USB)", 30))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!supervisor.get_state().await.has_process);
        supervisor.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!result.success);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(launcher.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_status_while_recording() {
        let mut h = harness(vec![Script::recording(4096), Script::recording(4096)]);
        assert_eq!(h.supervisor.get_state().await, RecordingStatus::default());

        let path = h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();
        let status = h.supervisor.get_state().await;
        assert!(status.is_recording);
        assert!(status.has_process);
        assert_eq!(status.state, SessionState::Recording);
        assert_eq!(status.attempt, 1);
        assert_eq!(
            status.current_recording_path,
            Some(path.to_string_lossy().into_owned())
        );

        h.supervisor.stop().await.unwrap();
        h.next_completion().await;
        let status = h.supervisor.get_state().await;
        assert!(!status.is_recording);
        assert!(status.current_recording_path.is_none());

        // A terminated session does not block the next one, and never reuses its file.
        let next = h.supervisor.start(CaptureRequest::desktop(30)).await.unwrap();
        assert_ne!(next, path);
        h.supervisor.stop().await.unwrap();
        h.next_completion().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_up_front() {
        let h = harness(vec![Script::recording(4096)]);
        let err = h.supervisor.start(CaptureRequest::desktop(0)).await.unwrap_err();
        assert_eq!(err.code(), "InvalidRequest");
        assert!(h.launcher.commands().is_empty());
    }
}
