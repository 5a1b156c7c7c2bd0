//! Terminal styling for reelcap output.
//!
//! Styles apply only when the target stream is a terminal, so piped output
//! and `--json` consumers see plain text.

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::fmt::Display;

/// Stdout is a terminal.
pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

/// Stderr is a terminal.
pub fn is_stderr_interactive() -> bool {
    std::io::stderr().is_terminal()
}

fn styled<D: Display>(plain: &str, interactive: bool, paint: impl FnOnce(&str) -> D) -> String {
    if interactive {
        paint(plain).to_string()
    } else {
        plain.to_string()
    }
}

/// Left-align `msg` in `width` columns, then style it.
///
/// Padding first keeps escape codes out of the width calculation.
pub fn pad_left(msg: &str, width: usize, style: impl FnOnce(&str) -> String) -> String {
    style(&format!("{:<width$}", msg))
}

/// `error:` prefixed line for stderr.
pub fn error(msg: &str) -> String {
    format!("{} {}", styled("error:", is_stderr_interactive(), |s| s.red().bold().to_string()), msg)
}

/// `warning:` prefixed line for stderr.
pub fn warning(msg: &str) -> String {
    format!("{} {}", styled("warning:", is_stderr_interactive(), |s| s.yellow().bold().to_string()), msg)
}

pub fn success(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.green().to_string())
}

pub fn info(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.cyan().to_string())
}

pub fn dim(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.dimmed().to_string())
}

pub fn bold(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.bold().to_string())
}

/// Table column headers.
pub fn header(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.bold().blue().to_string())
}

/// Live recording indicator.
pub fn recording(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.red().bold().to_string())
}

/// Recording output paths.
pub fn path(msg: &str) -> String {
    styled(msg, is_interactive(), |s| s.underline().to_string())
}

pub fn yes() -> String {
    styled("yes", is_interactive(), |s| s.green().to_string())
}

pub fn no() -> String {
    dim("no")
}

/// `MM:SS` recording clock; minutes keep counting past the hour.
pub fn elapsed_time(seconds: u64) -> String {
    let clock = format!("{:02}:{:02}", seconds / 60, seconds % 60);
    styled(&clock, is_interactive(), |s| s.yellow().bold().to_string())
}
