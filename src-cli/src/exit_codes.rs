//! Exit codes for the CLI.
//!
//! These codes enable scripting integration by providing structured
//! feedback about operation results.

use reelcap_service::RecorderError;

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments or capture request
    InvalidArguments = 2,
    /// The capture tool is missing or unusable
    CaptureToolUnavailable = 3,
    /// Recording failed to start
    RecordingFailedToStart = 4,
    /// Recording failed during capture
    RecordingFailedDuringCapture = 5,
    /// Recording saved but timeline integration failed
    IntegrationFailed = 6,
    /// User cancelled (region selection)
    UserCancelled = 8,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Exit code for an error returned by a start request.
    pub fn for_start_error(err: &RecorderError) -> Self {
        match err {
            RecorderError::InvalidRequest(_) | RecorderError::RegionTooSmall { .. } => {
                ExitCode::InvalidArguments
            }
            RecorderError::Cancelled => ExitCode::UserCancelled,
            _ => ExitCode::RecordingFailedToStart,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::CaptureToolUnavailable => write!(f, "capture tool unavailable"),
            ExitCode::RecordingFailedToStart => write!(f, "recording failed to start"),
            ExitCode::RecordingFailedDuringCapture => write!(f, "recording failed during capture"),
            ExitCode::IntegrationFailed => write!(f, "timeline integration failed"),
            ExitCode::UserCancelled => write!(f, "user cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_errors_map_to_outcome_classes() {
        assert_eq!(
            ExitCode::for_start_error(&RecorderError::Cancelled),
            ExitCode::UserCancelled
        );
        assert_eq!(
            ExitCode::for_start_error(&RecorderError::InvalidRequest("fps".into())),
            ExitCode::InvalidArguments
        );
        assert_eq!(
            ExitCode::for_start_error(&RecorderError::SpawnFailure("ffmpeg".into())),
            ExitCode::RecordingFailedToStart
        );
        assert_eq!(ExitCode::UserCancelled.as_i32(), 8);
    }
}
