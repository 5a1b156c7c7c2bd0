//! Reelcap recording engine.
//!
//! Builds capture tool invocations from [`CaptureRequest`]s, supervises the
//! resulting processes (fallback retries, stop escalation) and reports every
//! session exactly once through completion callbacks.

pub mod catalog;
pub mod command;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod process;
pub mod region;
pub mod relay;
pub mod supervisor;

pub use catalog::{DeviceCatalog, DeviceSource};
pub use command::{CaptureBackend, CommandBuilder, CommandSpec};
pub use config::RecorderConfig;
pub use error::{RecorderError, Result};
pub use region::{RegionNegotiator, RegionOutcome};
pub use relay::{CompletionLatch, CompletionRelay, TimelineIntegration};
pub use supervisor::{Collaborators, SessionSupervisor};

pub use reelcap_common::{CaptureRequest, CompletionResult, RecordingStatus, SessionState, SourceType};
