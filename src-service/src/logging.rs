//! Tracing setup: console output plus a daily rolling log file.

use reelcap_common::logging::{ensure_log_dir, LOG_FILE_PREFIX};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Also write to the rolling log file.
    pub file: bool,
    /// Colourise console output.
    pub ansi: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            file: true,
            ansi: true,
        }
    }
}

// Keeps the file writer flushing until process exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` overrides `options.default_filter`. If the log directory cannot
/// be created, logging continues on stderr only.
pub fn init(options: &LogOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .with_target(false);

    let file = if options.file && FILE_GUARD.get().is_none() {
        match ensure_log_dir() {
            Ok(dir) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            Err(e) => {
                eprintln!("Failed to create log directory: {}", e);
                None
            }
        }
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}
