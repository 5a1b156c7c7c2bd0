//! Capture process launching and control.
//!
//! A launched process is observed through a stream of [`ProcessEvent`]s
//! (diagnostic lines, then exactly one exit) and controlled through a
//! [`ProcessHandle`] that accepts [`StopSignal`]s.

use crate::command::{CaptureCommand, CommandSpec};
use crate::error::{RecorderError, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long trailing diagnostics may drain once the process has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a capture process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Observations from a running capture process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of diagnostic (stderr) output.
    Diagnostic(String),
    /// The process is gone. Always the last event.
    Exited(ExitInfo),
}

pub type ProcessEvents = mpsc::UnboundedSender<ProcessEvent>;

/// Ways to ask a capture process to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// In-band quit: `q` on the capture tool's input.
    Quit,
    /// Kill the process and everything it spawned.
    KillTree,
    /// Unconditional kill of the process itself.
    Kill,
}

/// Control side of a launched process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    is_shell: bool,
    control: mpsc::UnboundedSender<StopSignal>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, is_shell: bool, control: mpsc::UnboundedSender<StopSignal>) -> Self {
        Self {
            pid,
            is_shell,
            control,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Spawned through a shell from a composed command line.
    pub fn is_shell(&self) -> bool {
        self.is_shell
    }

    /// Deliver a stop signal. Returns false once the process is gone.
    pub fn signal(&self, signal: StopSignal) -> bool {
        self.control.send(signal).is_ok()
    }
}

/// Starts capture processes.
pub trait ProcessLauncher: Send + Sync {
    /// Spawn `command`, reporting its output and exit on `events`.
    ///
    /// Must be called from within a tokio runtime. Only spawn errors are
    /// returned; everything after a successful spawn arrives as events.
    fn launch(&self, command: &CaptureCommand, events: ProcessEvents) -> Result<ProcessHandle>;
}

/// Outcome classes for a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0.
    Clean,
    /// Ended by a signal or by an exit code known to follow a stop request.
    Stopped,
    /// Anything else.
    Failed,
}

/// Exit classification table.
///
/// Which exit codes mean "stopped on request" is platform behaviour observed
/// in the field, not a documented contract: a tree kill on Windows leaves exit
/// code 1, an interrupted FFmpeg commonly reports 255.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicy {
    pub expected_stop_exit_codes: Vec<i32>,
}

impl ExitPolicy {
    pub fn new(expected_stop_exit_codes: Vec<i32>) -> Self {
        Self {
            expected_stop_exit_codes,
        }
    }

    pub fn classify(&self, exit: &ExitInfo, stop_requested: bool) -> ExitKind {
        if exit.signal.is_some() {
            return ExitKind::Stopped;
        }
        match exit.code {
            Some(0) => ExitKind::Clean,
            Some(code) if stop_requested && self.expected_stop_exit_codes.contains(&code) => {
                ExitKind::Stopped
            }
            None if stop_requested => ExitKind::Stopped,
            _ => ExitKind::Failed,
        }
    }
}

/// Launches the capture tool as a real child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }

    fn command_for(spec: &CommandSpec) -> Command {
        let mut std_command = match spec {
            CommandSpec::Direct { program, args } => {
                let mut command = std::process::Command::new(program);
                command.args(args);
                command
            }
            #[cfg(windows)]
            CommandSpec::Shell { line } => {
                use std::os::windows::process::CommandExt;
                let mut command = std::process::Command::new("cmd");
                // /S keeps the inner quoting of the line intact.
                command.raw_arg(format!("/S /C \"{}\"", line));
                command
            }
            #[cfg(not(windows))]
            CommandSpec::Shell { line } => {
                let mut command = std::process::Command::new("sh");
                command.arg("-c").arg(line);
                command
            }
        };

        std_command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Own process group, so a tree kill reaches whatever the shell started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            std_command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut command = Command::from(std_command);
        command.kill_on_drop(true);
        command
    }
}

impl ProcessLauncher for FfmpegLauncher {
    fn launch(&self, command: &CaptureCommand, events: ProcessEvents) -> Result<ProcessHandle> {
        let program = match &command.spec {
            CommandSpec::Direct { program, .. } => program.display().to_string(),
            CommandSpec::Shell { .. } => "shell".to_string(),
        };
        debug!(attempt = command.attempt, "Launching: {}", command.spec);

        let mut child = Self::command_for(&command.spec)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RecorderError::SpawnFailure(format!("executable not found: {}", program))
                }
                std::io::ErrorKind::PermissionDenied => {
                    RecorderError::SpawnFailure(format!("permission denied: {}", program))
                }
                _ => RecorderError::SpawnFailure(format!("{}: {}", program, e)),
            })?;

        let pid = child.id();
        info!(attempt = command.attempt, pid = ?pid, "Capture process started");

        let stdin = child.stdin.take();
        let stderr_task = child.stderr.take().map(|stderr| {
            let events = events.clone();
            tokio::spawn(async move {
                // Progress lines are terminated by '\r', everything else by '\n'.
                let mut segments = BufReader::new(stderr).split(b'\r');
                while let Ok(Some(segment)) = segments.next_segment().await {
                    for line in String::from_utf8_lossy(&segment).lines() {
                        let line = line.trim();
                        if !line.is_empty() && events.send(ProcessEvent::Diagnostic(line.to_string())).is_err() {
                            return;
                        }
                    }
                }
            })
        });

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let is_shell = command.spec.is_shell();

        tokio::spawn(async move {
            let exit = supervise_child(child, stdin, control_rx, pid).await;
            if let Some(mut task) = stderr_task {
                // A surviving grandchild can hold the pipe open indefinitely.
                if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await.is_err() {
                    debug!(pid = ?pid, "Diagnostic stream still open after exit, detaching");
                    task.abort();
                }
            }
            let _ = events.send(ProcessEvent::Exited(exit));
        });

        Ok(ProcessHandle::new(pid, is_shell, control_tx))
    }
}

/// Wait for the child while serving stop signals.
async fn supervise_child(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut control: mpsc::UnboundedReceiver<StopSignal>,
    pid: Option<u32>,
) -> ExitInfo {
    let mut control_open = true;
    loop {
        let signal = tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => ExitInfo::from(status),
                    Err(e) => {
                        warn!(pid = ?pid, "Failed to wait for capture process: {}", e);
                        ExitInfo::default()
                    }
                };
            }
            signal = control.recv(), if control_open => signal,
        };

        match signal {
            None => control_open = false,
            Some(StopSignal::Quit) => {
                if let Some(mut input) = stdin.take() {
                    if let Err(e) = input.write_all(b"q\n").await {
                        debug!(pid = ?pid, "Could not send quit to capture process: {}", e);
                    }
                    let _ = input.flush().await;
                    // Dropping stdin closes the pipe, which FFmpeg also treats as quit.
                }
            }
            Some(StopSignal::KillTree) => {
                kill_tree(&mut child, pid).await;
            }
            Some(StopSignal::Kill) => {
                if let Err(e) = child.start_kill() {
                    debug!(pid = ?pid, "Kill failed: {}", e);
                }
            }
        }
    }
}

#[cfg(unix)]
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child leads its own process group; a negative pid addresses the group.
        let result = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if result != 0 {
            debug!(pid, "Process group kill failed: {}", std::io::Error::last_os_error());
        }
    }
    let _ = child.start_kill();
}

#[cfg(windows)]
async fn kill_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let pid = pid.to_string();
        match Command::new("taskkill")
            .args(["/PID", pid.as_str(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if !status.success() => debug!("taskkill exited with {}", status),
            Ok(_) => {}
            Err(e) => debug!("taskkill failed: {}", e),
        }
    }
    let _ = child.start_kill();
}
