//! Completion delivery.
//!
//! Every capture session reports exactly one [`CompletionResult`]. The
//! [`CompletionLatch`] makes that hold no matter how many exit paths race to
//! report; the [`CompletionRelay`] hands successful recordings to the timeline
//! collaborator and delivers the final result to listeners.

use crate::error::{RecorderError, Result};
use async_trait::async_trait;
use reelcap_common::{CompletionResult, TimelineResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Single-fire guard for one capture session.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    fired: AtomicBool,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the latch. Only the first caller gets `true`.
    pub fn try_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Host timeline that finished recordings are imported into.
#[async_trait]
pub trait TimelineIntegration: Send + Sync {
    async fn add_recording_to_timeline(&self, path: &Path) -> Result<TimelineResult>;
}

/// Timeline integration through an external program.
///
/// The program is run with the configured arguments followed by the
/// recording path. Exit status 0 is success and the first line of stdout, if
/// any, names the timeline.
pub struct ExternalCommandTimeline {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalCommandTimeline {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TimelineIntegration for ExternalCommandTimeline {
    async fn add_recording_to_timeline(&self, path: &Path) -> Result<TimelineResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                RecorderError::IntegrationFailure(format!("{}: {}", self.program.display(), e))
            })?;

        let first_line = |bytes: &[u8]| {
            String::from_utf8_lossy(bytes)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string)
        };

        if output.status.success() {
            Ok(TimelineResult {
                success: true,
                timeline_name: first_line(&output.stdout[..]),
                created_new_timeline: None,
                error: None,
            })
        } else {
            Ok(TimelineResult {
                success: false,
                timeline_name: None,
                created_new_timeline: None,
                error: Some(
                    first_line(&output.stderr[..])
                        .unwrap_or_else(|| format!("timeline command exited with {}", output.status)),
                ),
            })
        }
    }
}

type Listener = Box<dyn Fn(&CompletionResult) + Send + Sync>;

/// Delivers completion results.
pub struct CompletionRelay {
    timeline: Option<Arc<dyn TimelineIntegration>>,
    listeners: Mutex<Vec<Listener>>,
    events: broadcast::Sender<CompletionResult>,
}

impl CompletionRelay {
    pub fn new(timeline: Option<Arc<dyn TimelineIntegration>>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            timeline,
            listeners: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Register a callback for every delivered completion.
    pub fn on_completion<F>(&self, callback: F)
    where
        F: Fn(&CompletionResult) + Send + Sync + 'static,
    {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(Box::new(callback)),
            Err(poisoned) => poisoned.into_inner().push(Box::new(callback)),
        }
    }

    /// Subscribe to delivered completions.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionResult> {
        self.events.subscribe()
    }

    /// Report `result` for the session guarded by `latch`.
    ///
    /// Only the first call per latch has any effect; later calls return `None`.
    /// A successful recording is handed to the timeline collaborator first. Its
    /// outcome is attached to the result but never changes `success`.
    pub async fn fire(&self, latch: &CompletionLatch, result: CompletionResult) -> Option<CompletionResult> {
        if !latch.try_fire() {
            debug!("Completion already delivered for this session, suppressing");
            return None;
        }

        let result = self.integrate(result).await;

        if result.success {
            info!(path = ?result.output_path, "Recording complete");
        } else {
            error!("Recording failed: {}", result.error.as_deref().unwrap_or("unknown error"));
        }

        self.deliver(&result);
        Some(result)
    }

    async fn integrate(&self, mut result: CompletionResult) -> CompletionResult {
        let Some(timeline) = &self.timeline else {
            return result;
        };
        if !result.success {
            return result;
        }
        let Some(path) = result.output_path.clone().filter(|p| !p.is_empty()) else {
            return result;
        };

        let timeline_result = match timeline.add_recording_to_timeline(Path::new(&path)).await {
            Ok(timeline_result) => timeline_result,
            Err(e) => TimelineResult {
                success: false,
                error: Some(e.to_string()),
                ..Default::default()
            },
        };

        if timeline_result.success {
            info!(
                timeline = timeline_result.timeline_name.as_deref().unwrap_or("<unnamed>"),
                "Recording added to timeline"
            );
        } else {
            let reason = timeline_result.error.as_deref().unwrap_or("unknown error");
            warn!("Timeline integration failed: {}", reason);
            result.error = Some(format!(
                "{}; import {} manually",
                RecorderError::IntegrationFailure(reason.to_string()),
                path
            ));
        }

        result.timeline_result = Some(timeline_result);
        result
    }

    fn deliver(&self, result: &CompletionResult) {
        {
            let listeners = match self.listeners.lock() {
                Ok(listeners) => listeners,
                Err(poisoned) => poisoned.into_inner(),
            };
            for listener in listeners.iter() {
                listener(result);
            }
        }
        // Ignore send errors (no subscribers)
        let _ = self.events.send(result.clone());
    }
}
