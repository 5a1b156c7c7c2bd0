//! One capture session, driven as an event loop.
//!
//! Process output, process exits, stop requests and deferred timers all
//! arrive on one queue and are handled in order by a single task. Events that
//! belong to an attempt which is no longer running are dropped.

use super::SessionSlot;
use crate::command::{BuildInputs, CaptureCommand, CommandBuilder};
use crate::config::SessionConfig;
use crate::encoder::{attempt_output_path, is_valid_output, output_size};
use crate::error::{RecorderError, Result};
use crate::process::{
    ExitInfo, ExitKind, ExitPolicy, ProcessEvent, ProcessHandle, ProcessLauncher, StopSignal,
};
use crate::relay::{CompletionLatch, CompletionRelay};
use reelcap_common::{CaptureRequest, CompletionResult, Resolution, SessionState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(super) enum SessionEvent {
    Process { attempt: u32, event: ProcessEvent },
    StopRequested,
    GracefulTimeout { attempt: u32 },
    ForceKillDue { attempt: u32 },
    RetryDue { attempt: u32 },
}

/// Everything needed to (re)build a command for any attempt.
pub(super) struct AttemptPlan {
    pub request: CaptureRequest,
    pub inputs: BuildInputs,
    pub base_output: PathBuf,
    /// Capture resolution per attempt; a single entry for non-camera sources.
    pub ladder: Vec<Option<Resolution>>,
    pub is_camera: bool,
}

struct RunningAttempt {
    attempt: u32,
    handle: ProcessHandle,
    output_path: PathBuf,
    io_error: bool,
}

pub(super) struct Session {
    plan: AttemptPlan,
    builder: CommandBuilder,
    launcher: Arc<dyn ProcessLauncher>,
    relay: Arc<CompletionRelay>,
    slot: Arc<Mutex<SessionSlot>>,
    config: SessionConfig,
    policy: ExitPolicy,
    latch: CompletionLatch,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    running: Option<RunningAttempt>,
    stop_requested: bool,
    timers: Vec<JoinHandle<()>>,
}

impl Session {
    pub(super) fn new(
        plan: AttemptPlan,
        builder: CommandBuilder,
        launcher: Arc<dyn ProcessLauncher>,
        relay: Arc<CompletionRelay>,
        slot: Arc<Mutex<SessionSlot>>,
        config: SessionConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let policy = ExitPolicy::new(config.expected_stop_exit_codes.clone());
        Self {
            plan,
            builder,
            launcher,
            relay,
            slot,
            config,
            policy,
            latch: CompletionLatch::new(),
            events_tx,
            events_rx,
            running: None,
            stop_requested: false,
            timers: Vec::new(),
        }
    }

    pub(super) fn sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events_tx.clone()
    }

    pub(super) fn attempts(&self) -> u32 {
        self.plan.ladder.len() as u32
    }

    /// Build and spawn the command for `attempt` (1-based).
    pub(super) fn launch_attempt(&mut self, attempt: u32) -> Result<PathBuf> {
        let output = attempt_output_path(&self.plan.base_output, attempt);
        let mut inputs = self.plan.inputs.clone();
        inputs.camera_resolution = self
            .plan
            .ladder
            .get(attempt.saturating_sub(1) as usize)
            .copied()
            .flatten();

        let spec = self.builder.build(&self.plan.request, &inputs, &output)?;
        let command = CaptureCommand {
            spec,
            output_path: output.clone(),
            attempt,
        };

        let (process_tx, mut process_rx) = mpsc::unbounded_channel();
        let handle = self.launcher.launch(&command, process_tx)?;

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = process_rx.recv().await {
                if events.send(SessionEvent::Process { attempt, event }).is_err() {
                    break;
                }
            }
        });

        info!(
            attempt,
            pid = ?handle.pid(),
            path = %output.display(),
            "Capture attempt started"
        );
        self.running = Some(RunningAttempt {
            attempt,
            handle,
            output_path: output.clone(),
            io_error: false,
        });
        Ok(output)
    }

    pub(super) async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            let outcome = match event {
                SessionEvent::Process { attempt, event } => self.on_process_event(attempt, event).await,
                SessionEvent::StopRequested => self.on_stop_requested(),
                SessionEvent::GracefulTimeout { attempt } => {
                    self.on_graceful_timeout(attempt);
                    None
                }
                SessionEvent::ForceKillDue { attempt } => self.on_force_kill(attempt).await,
                SessionEvent::RetryDue { attempt } => self.on_retry(attempt).await,
            };

            if let Some(result) = outcome {
                self.finish(result).await;
                return;
            }
        }
    }

    async fn on_process_event(&mut self, attempt: u32, event: ProcessEvent) -> Option<CompletionResult> {
        let Some(running) = self.running.as_mut().filter(|r| r.attempt == attempt) else {
            debug!(attempt, "Ignoring event from a finished attempt: {:?}", event);
            return None;
        };

        match event {
            ProcessEvent::Diagnostic(line) => {
                debug!(attempt, "ffmpeg: {}", line);
                let marker = self
                    .config
                    .io_error_markers
                    .iter()
                    .find(|m| line.contains(m.as_str()));
                let mut abandon = false;
                if let Some(marker) = marker {
                    if !running.io_error {
                        warn!(attempt, marker = %marker, "Capture tool reported an I/O error");
                        running.io_error = true;
                        if self.plan.is_camera && !self.stop_requested {
                            running.handle.signal(kill_signal(&running.handle));
                            abandon = true;
                        }
                    }
                }
                if abandon {
                    // The attempt is given up even if the process never reports its exit.
                    let deadline = self.config.force_kill_timeout();
                    self.schedule(deadline, SessionEvent::ForceKillDue { attempt });
                }
                None
            }
            ProcessEvent::Exited(exit) => {
                let finished = self.running.take()?;
                self.cancel_timers();
                self.on_exit(finished, exit).await
            }
        }
    }

    async fn on_exit(&mut self, finished: RunningAttempt, exit: ExitInfo) -> Option<CompletionResult> {
        let attempt = finished.attempt;
        let kind = self.policy.classify(&exit, self.stop_requested);
        info!(attempt, exit = %exit.describe(), ?kind, "Capture process exited");

        // A kill issued after an I/O error abandons the attempt; it is not a stop.
        if self.stop_requested || (kind == ExitKind::Stopped && !finished.io_error) {
            return Some(self.stopped_result(&finished.output_path, &exit));
        }

        if self.plan.is_camera {
            if kind == ExitKind::Clean && !finished.io_error && output_size(&finished.output_path) > 0 {
                return Some(CompletionResult::succeeded(path_string(&finished.output_path)));
            }
            warn!(
                attempt,
                io_error = finished.io_error,
                "Camera attempt failed with {}",
                exit.describe()
            );
            return self.retry_or_give_up(attempt).await;
        }

        if kind == ExitKind::Clean && output_size(&finished.output_path) > 0 {
            return Some(CompletionResult::succeeded(path_string(&finished.output_path)));
        }

        // Best-effort recovery: a usable file outlives a bad exit.
        if is_valid_output(&finished.output_path, self.config.min_output_bytes) {
            warn!(attempt, "Capture process ended with {}, output file recovered", exit.describe());
            return Some(
                CompletionResult::succeeded(path_string(&finished.output_path)).with_warning(format!(
                    "Capture process ended with {}; the output file was recovered",
                    exit.describe()
                )),
            );
        }

        Some(CompletionResult::failed(
            RecorderError::ProcessRuntimeFailure(format!(
                "capture process ended with {} and left no valid output",
                exit.describe()
            ))
            .to_string(),
        ))
    }

    fn stopped_result(&self, output: &Path, exit: &ExitInfo) -> CompletionResult {
        let min = self.config.min_output_bytes;
        if !is_valid_output(output, min) {
            return CompletionResult::failed(format!(
                "Recording stopped but the output file is missing or not larger than {} bytes",
                min
            ));
        }
        let result = CompletionResult::succeeded(path_string(output));
        if exit.success() {
            result
        } else {
            result.with_warning(format!(
                "Recording was stopped ({}); the output file was validated",
                exit.describe()
            ))
        }
    }

    async fn retry_or_give_up(&mut self, failed_attempt: u32) -> Option<CompletionResult> {
        let next = failed_attempt + 1;
        if next > self.attempts() {
            error!(attempts = failed_attempt, "Camera capture failed on every attempt");
            return Some(CompletionResult::failed(
                RecorderError::AllFallbackAttemptsFailed.to_string(),
            ));
        }

        let backoff = self.config.retry_backoff();
        info!(next, "Retrying camera capture in {:?}", backoff);
        self.slot.lock().await.has_process = false;
        self.schedule(backoff, SessionEvent::RetryDue { attempt: next });
        None
    }

    async fn on_retry(&mut self, attempt: u32) -> Option<CompletionResult> {
        if self.stop_requested || self.running.is_some() {
            return None;
        }

        match self.launch_attempt(attempt) {
            Ok(path) => {
                let mut slot = self.slot.lock().await;
                slot.attempt = attempt;
                slot.output_path = Some(path);
                slot.has_process = true;
                None
            }
            Err(e) => {
                warn!(attempt, "Camera attempt could not start: {}", e);
                self.retry_or_give_up(attempt).await
            }
        }
    }

    fn on_stop_requested(&mut self) -> Option<CompletionResult> {
        if self.stop_requested {
            return None;
        }
        self.stop_requested = true;

        let Some(running) = &self.running else {
            info!("Stop requested between camera attempts");
            return Some(CompletionResult::failed(
                "Recording stopped before any camera attempt succeeded",
            ));
        };

        let attempt = running.attempt;
        if running.handle.is_shell() {
            // A shell may have spawned the capture tool as a child; only a tree
            // kill is sure to reach it.
            if self.config.graceful_shell_stop {
                info!(attempt, "Stopping shell capture process (quit, then tree kill)");
                running.handle.signal(StopSignal::Quit);
                let grace = self.config.graceful_stop_timeout();
                self.schedule(grace, SessionEvent::GracefulTimeout { attempt });
            } else {
                info!(attempt, "Stopping shell capture process (tree kill)");
                running.handle.signal(StopSignal::KillTree);
            }
        } else {
            info!(attempt, "Stopping capture process (quit)");
            running.handle.signal(StopSignal::Quit);
        }

        let deadline = self.config.force_kill_timeout();
        self.schedule(deadline, SessionEvent::ForceKillDue { attempt });
        None
    }

    fn on_graceful_timeout(&mut self, attempt: u32) {
        if let Some(running) = self.running.as_ref().filter(|r| r.attempt == attempt) {
            warn!(attempt, "Capture process ignored quit, killing process tree");
            running.handle.signal(StopSignal::KillTree);
        }
    }

    async fn on_force_kill(&mut self, attempt: u32) -> Option<CompletionResult> {
        if self.running.as_ref().map(|r| r.attempt) != Some(attempt) {
            return None;
        }
        let running = self.running.take()?;
        running.handle.signal(kill_signal(&running.handle));

        if !self.stop_requested && running.io_error {
            warn!(attempt, pid = ?running.handle.pid(), "Abandoned camera attempt did not exit, moving on");
            self.cancel_timers();
            return self.retry_or_give_up(attempt).await;
        }

        let deadline = self.config.force_kill_timeout_ms;
        warn!(attempt, pid = ?running.handle.pid(), "Capture process did not exit within {}ms, killed", deadline);

        let output = &running.output_path;
        if is_valid_output(output, self.config.min_output_bytes) {
            Some(
                CompletionResult::succeeded(path_string(output)).with_warning(format!(
                    "Capture process did not exit within {}ms and was killed",
                    deadline
                )),
            )
        } else {
            Some(CompletionResult::failed(format!(
                "Capture process did not exit within {}ms and was killed; no valid output",
                deadline
            )))
        }
    }

    fn schedule(&mut self, delay: Duration, event: SessionEvent) {
        let events = self.events_tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        }));
    }

    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    async fn finish(&mut self, result: CompletionResult) {
        self.cancel_timers();
        if let Some(running) = self.running.take() {
            running.handle.signal(kill_signal(&running.handle));
        }
        if self.latch.is_fired() {
            return;
        }

        {
            let mut slot = self.slot.lock().await;
            slot.state = SessionState::Terminated;
            slot.has_process = false;
            slot.output_path = None;
            slot.events = None;
        }

        self.relay.fire(&self.latch, result).await;
    }
}

/// Strongest kill for `handle`; a shell's children are only reached by a tree kill.
fn kill_signal(handle: &ProcessHandle) -> StopSignal {
    if handle.is_shell() {
        StopSignal::KillTree
    } else {
        StopSignal::Kill
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
