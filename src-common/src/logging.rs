//! Platform-specific logging directory resolution.

use std::path::PathBuf;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "reelcap")
}

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/reelcap/logs` or `~/.local/state/reelcap/logs` |
/// | macOS | `~/Library/Logs/reelcap` |
/// | Windows | `%LOCALAPPDATA%\reelcap\reelcap\logs` |
///
/// Falls back to `<temp>/reelcap/logs` when no home directory can be found.
pub fn log_dir() -> PathBuf {
    let Some(base) = project_dirs() else {
        return std::env::temp_dir().join("reelcap").join("logs");
    };

    #[cfg(target_os = "linux")]
    {
        base.state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs")
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir is ~/Library/Application Support/reelcap; walk up to ~/Library.
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        library.join("Logs").join("reelcap")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        base.data_local_dir().join("logs")
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File name prefix for the rolling log appender.
///
/// The appender creates dated files such as `reelcap.log.2026-03-01`.
pub const LOG_FILE_PREFIX: &str = "reelcap.log";
