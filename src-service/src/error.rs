//! Error types for the recording engine.

use reelcap_common::ValidationError;
use thiserror::Error;

/// Errors returned synchronously by recording operations.
///
/// Process-lifetime outcomes (non-zero exits, exhausted fallbacks, timeline
/// failures) travel through [`reelcap_common::CompletionResult`] instead; the
/// matching variants exist so they can be rendered with the same codes.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not currently recording")]
    NotRecording,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Region too small: {width}x{height} (minimum {min}px)")]
    RegionTooSmall { width: u32, height: u32, min: u32 },

    #[error("Failed to start capture process: {0}")]
    SpawnFailure(String),

    #[error("Capture process failed: {0}")]
    ProcessRuntimeFailure(String),

    #[error("All fallback attempts failed")]
    AllFallbackAttemptsFailed,

    #[error("Timeline integration failed: {0}")]
    IntegrationFailure(String),

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Stable machine-readable code used in caller-facing responses.
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::AlreadyRecording => "AlreadyRecording",
            RecorderError::NotRecording => "NotRecording",
            RecorderError::InvalidRequest(_) => "InvalidRequest",
            RecorderError::RegionTooSmall { .. } => "RegionTooSmall",
            RecorderError::SpawnFailure(_) => "SpawnFailure",
            RecorderError::ProcessRuntimeFailure(_) => "ProcessRuntimeFailure",
            RecorderError::AllFallbackAttemptsFailed => "AllFallbackAttemptsFailed",
            RecorderError::IntegrationFailure(_) => "IntegrationFailure",
            RecorderError::Cancelled => "Cancelled",
            RecorderError::Config(_) => "Config",
            RecorderError::Io(_) => "Io",
        }
    }

    /// Text for the `error` field of caller-facing responses: the code, plus
    /// the detail when the variant carries one.
    pub fn response_message(&self) -> String {
        match self {
            RecorderError::InvalidRequest(detail)
            | RecorderError::SpawnFailure(detail)
            | RecorderError::ProcessRuntimeFailure(detail)
            | RecorderError::IntegrationFailure(detail)
            | RecorderError::Config(detail) => format!("{}: {}", self.code(), detail),
            RecorderError::RegionTooSmall { .. } | RecorderError::Io(_) => {
                format!("{}: {}", self.code(), self)
            }
            _ => self.code().to_string(),
        }
    }
}

impl From<ValidationError> for RecorderError {
    fn from(err: ValidationError) -> Self {
        RecorderError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
