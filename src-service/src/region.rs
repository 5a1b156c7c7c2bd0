//! Region negotiation: interactive selection and validation of capture rectangles.

use crate::error::{RecorderError, Result};
use async_trait::async_trait;
use reelcap_common::Rect;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Re-prompts allowed for undersized drags before giving up.
pub const MAX_SELECTION_PROMPTS: u32 = 5;

/// One answer from an interactive selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionOutcome {
    /// Rectangle in logical (unscaled) coordinates.
    Selected { rect: Rect, scale_factor: f64 },
    /// The user dismissed the selector.
    Cancelled,
}

/// Result of negotiating a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// Validated rectangle in physical pixels with even dimensions.
    Region(Rect),
    Cancelled,
}

/// Interactive rectangle picker (overlay, external tool, ...).
#[async_trait]
pub trait RegionSelector: Send + Sync {
    async fn select(&self) -> Result<SelectionOutcome>;
}

/// Produces capture rectangles that satisfy the encoder's constraints.
pub struct RegionNegotiator {
    selector: Option<Arc<dyn RegionSelector>>,
    min_size: u32,
    max_prompts: u32,
}

impl RegionNegotiator {
    pub fn new(selector: Option<Arc<dyn RegionSelector>>, min_size: u32) -> Self {
        Self {
            selector,
            min_size,
            max_prompts: MAX_SELECTION_PROMPTS,
        }
    }

    pub fn with_max_prompts(mut self, max_prompts: u32) -> Self {
        self.max_prompts = max_prompts.max(1);
        self
    }

    /// Floor odd dimensions to even and enforce the minimum size.
    pub fn validate(&self, rect: Rect) -> Result<Rect> {
        let even = rect.floor_even();
        if even.width < self.min_size || even.height < self.min_size {
            return Err(RecorderError::RegionTooSmall {
                width: rect.width,
                height: rect.height,
                min: self.min_size,
            });
        }
        if even != rect {
            debug!(
                "Adjusted region {}x{} to {}x{}",
                rect.width, rect.height, even.width, even.height
            );
        }
        Ok(even)
    }

    /// Scale a logical rectangle to physical pixels, then validate it.
    pub fn normalize(&self, rect: Rect, scale_factor: f64) -> Result<Rect> {
        let scale = if scale_factor.is_finite() && scale_factor > 0.0 {
            scale_factor
        } else {
            1.0
        };
        let scaled = Rect::new(
            (rect.x as f64 * scale).round() as u32,
            (rect.y as f64 * scale).round() as u32,
            (rect.width as f64 * scale).floor() as u32,
            (rect.height as f64 * scale).floor() as u32,
        );
        self.validate(scaled)
    }

    /// Ask the selector for a rectangle, re-prompting while the drag is too small.
    pub async fn select_region(&self) -> Result<RegionOutcome> {
        let selector = self.selector.as_ref().ok_or_else(|| {
            RecorderError::InvalidRequest(
                "no region given and interactive selection is unavailable".into(),
            )
        })?;

        let mut last_error = None;
        for prompt in 1..=self.max_prompts {
            match selector.select().await? {
                SelectionOutcome::Cancelled => {
                    info!("Region selection cancelled");
                    return Ok(RegionOutcome::Cancelled);
                }
                SelectionOutcome::Selected { rect, scale_factor } => {
                    match self.normalize(rect, scale_factor) {
                        Ok(region) => return Ok(RegionOutcome::Region(region)),
                        Err(e @ RecorderError::RegionTooSmall { .. }) => {
                            warn!(prompt, "Selected region too small, asking again: {}", e);
                            last_error = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Err(last_error.unwrap_or(RecorderError::RegionTooSmall {
            width: 0,
            height: 0,
            min: self.min_size,
        }))
    }

    /// Validate a supplied rectangle, or select one interactively.
    pub async fn resolve(&self, supplied: Option<Rect>) -> Result<RegionOutcome> {
        match supplied {
            Some(rect) => self.validate(rect).map(RegionOutcome::Region),
            None => self.select_region().await,
        }
    }
}

/// X11 selection through `slop`.
pub struct SlopSelector {
    program: String,
}

impl SlopSelector {
    pub fn new() -> Self {
        Self {
            program: "slop".to_string(),
        }
    }

    /// Whether `slop` is installed.
    pub fn available() -> bool {
        which::which("slop").is_ok()
    }
}

impl Default for SlopSelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `slop -f "%x %y %w %h"` output.
pub fn parse_slop_output(output: &str) -> Option<Rect> {
    let values: Vec<u32> = output
        .split_whitespace()
        .map(|v| v.parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, w, h] => Some(Rect::new(*x, *y, *w, *h)),
        _ => None,
    }
}

#[async_trait]
impl RegionSelector for SlopSelector {
    async fn select(&self) -> Result<SelectionOutcome> {
        let output = Command::new(&self.program)
            .args(["-f", "%x %y %w %h"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RecorderError::SpawnFailure(format!("{}: {}", self.program, e)))?;

        // slop exits non-zero when the selection is aborted.
        if !output.status.success() {
            return Ok(SelectionOutcome::Cancelled);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_slop_output(&stdout)
            .map(|rect| SelectionOutcome::Selected {
                rect,
                scale_factor: 1.0,
            })
            .ok_or_else(|| {
                RecorderError::InvalidRequest(format!("unexpected slop output: {}", stdout.trim()))
            })
    }
}
