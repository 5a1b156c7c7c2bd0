//! Reelcap Command-Line Interface
//!
//! Records the desktop, a window, a camera or a screen region through FFmpeg,
//! with scriptable output and exit codes.

mod colors;
mod commands;
mod exit_codes;
mod platform;

use clap::{Parser, Subcommand};
use exit_codes::ExitCode;
use reelcap_service::logging::{self, LogOptions};

/// Reelcap - Recording Session CLI
#[derive(Parser, Debug)]
#[command(name = "reelcap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available capture sources
    List {
        #[command(subcommand)]
        source: ListSource,
    },
    /// Record until Ctrl+C, the duration limit, or the capture ends
    Record {
        #[command(subcommand)]
        target: RecordTarget,
    },
    /// Verify FFmpeg and show the recording environment
    Check,
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ListSource {
    /// List capturable windows
    Windows,
    /// List cameras
    Cameras,
    /// List audio inputs
    Audio,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RecordTarget {
    /// Record the whole desktop
    Desktop {
        #[command(flatten)]
        options: RecordOptions,
    },
    /// Record a window by title (use 'reelcap list windows' to find)
    Window {
        /// Window title
        title: String,

        #[command(flatten)]
        options: RecordOptions,
    },
    /// Record a camera by name (use 'reelcap list cameras' to find)
    Camera {
        /// Camera display name
        name: String,

        #[command(flatten)]
        options: RecordOptions,
    },
    /// Record a screen region
    Region {
        /// X coordinate (pixels)
        #[arg(long, requires_all = ["y", "width", "height"])]
        x: Option<u32>,

        /// Y coordinate (pixels)
        #[arg(long)]
        y: Option<u32>,

        /// Width (pixels)
        #[arg(long)]
        width: Option<u32>,

        /// Height (pixels)
        #[arg(long)]
        height: Option<u32>,

        /// Pick the region interactively
        #[arg(long, conflicts_with_all = ["x", "y", "width", "height"])]
        select: bool,

        #[command(flatten)]
        options: RecordOptions,
    },
}

impl RecordTarget {
    pub fn options(&self) -> &RecordOptions {
        match self {
            RecordTarget::Desktop { options }
            | RecordTarget::Window { options, .. }
            | RecordTarget::Camera { options, .. }
            | RecordTarget::Region { options, .. } => options,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RecordOptions {
    /// Capture framerate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Output resolution (WxH) or 'desktop' for native size
    #[arg(short, long)]
    resolution: Option<String>,

    /// Audio input name (use 'reelcap list audio' to find)
    #[arg(long)]
    audio: Option<String>,

    /// Output directory (overrides configured output directory)
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Auto-stop after duration (seconds)
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    logging::init(&LogOptions {
        default_filter: if cli.verbose { "debug" } else { "warn" }.to_string(),
        file: true,
        ansi: colors::is_stderr_interactive(),
    });

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", colors::error(&format!("Failed to create Tokio runtime: {}", e)));
            std::process::exit(ExitCode::GeneralError.as_i32());
        }
    };

    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::List { source } => match source {
            ListSource::Windows => commands::list_windows(cli.json, cli.quiet).await,
            ListSource::Cameras => commands::list_cameras(cli.json, cli.quiet).await,
            ListSource::Audio => commands::list_audio(cli.json, cli.quiet).await,
        },
        Commands::Record { target } => {
            commands::record(target, cli.json, cli.quiet, cli.verbose).await
        }
        Commands::Check => commands::check(cli.json, cli.quiet).await,
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}
