//! Input validation for capture requests.

use crate::types::{CaptureRequest, Resolution, SourceType};
use once_cell::sync::Lazy;
use regex::Regex;

/// Characters that cannot survive a quoted capture-tool token: control
/// characters and the double quote itself.
static UNQUOTABLE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\x00-\x1f\x7f"]"#).unwrap());

/// Lowest accepted framerate.
pub const MIN_FRAMERATE: u32 = 1;

/// Highest accepted framerate.
pub const MAX_FRAMERATE: u32 = 120;

/// Maximum dimension value (must be positive)
pub const MAX_DIMENSION: u32 = 16384;

/// Maximum length of window titles and device names.
pub const MAX_NAME_LENGTH: usize = 256;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field required by the source type is absent or blank
    MissingField(&'static str),
    /// Framerate outside `MIN_FRAMERATE..=MAX_FRAMERATE`
    FramerateOutOfRange(u32),
    /// Resolution is neither `WxH` nor `desktop`
    InvalidResolution(String),
    /// Name contains characters that cannot be quoted for the capture tool
    InvalidName { field: &'static str, value: String },
    /// String field exceeds maximum length
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    /// Dimension (width/height) is out of valid range
    DimensionOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "{} is required", field),
            ValidationError::FramerateOutOfRange(fps) => write!(
                f,
                "framerate out of range: {} (expected {}-{})",
                fps, MIN_FRAMERATE, MAX_FRAMERATE
            ),
            ValidationError::InvalidResolution(value) => {
                write!(f, "Invalid resolution '{}': expected WxH or 'desktop'", value)
            }
            ValidationError::InvalidName { field, value } => {
                write!(f, "{} contains unsupported characters: {:?}", field, value)
            }
            ValidationError::StringTooLong { field, len, max } => {
                write!(f, "{} too long: {} chars (max {})", field, len, max)
            }
            ValidationError::DimensionOutOfRange { field, value, max } => {
                write!(f, "{} out of range: {} (max {})", field, value, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a window title or device name that will be quoted into a
/// capture-tool token.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    let len = value.chars().count();
    if len > MAX_NAME_LENGTH {
        return Err(ValidationError::StringTooLong {
            field,
            len,
            max: MAX_NAME_LENGTH,
        });
    }
    if UNQUOTABLE_PATTERN.is_match(value) {
        return Err(ValidationError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate a resolution string: `WxH` or `desktop`.
pub fn validate_resolution(value: &str) -> Result<Option<Resolution>, ValidationError> {
    if value.trim().eq_ignore_ascii_case("desktop") {
        return Ok(None);
    }
    let resolution = Resolution::parse(value)
        .ok_or_else(|| ValidationError::InvalidResolution(value.to_string()))?;
    validate_dimensions(resolution.width, resolution.height)?;
    Ok(Some(resolution))
}

/// Validate dimension values (width, height).
///
/// Dimensions must be positive and not exceed MAX_DIMENSION (16384).
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    if width == 0 || width > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "width",
            value: width,
            max: MAX_DIMENSION,
        });
    }
    if height == 0 || height > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "height",
            value: height,
            max: MAX_DIMENSION,
        });
    }
    Ok(())
}

/// Validate a capture request before any command is built.
///
/// Region minimum sizes are not checked here; they depend on configuration
/// and are enforced when the region is negotiated.
pub fn validate_request(request: &CaptureRequest) -> Result<(), ValidationError> {
    if !(MIN_FRAMERATE..=MAX_FRAMERATE).contains(&request.framerate) {
        return Err(ValidationError::FramerateOutOfRange(request.framerate));
    }

    if let Some(resolution) = &request.resolution {
        validate_resolution(resolution)?;
    }

    match request.source_type {
        SourceType::Window => {
            let title = request
                .window_title
                .as_deref()
                .ok_or(ValidationError::MissingField("windowTitle"))?;
            validate_name("windowTitle", title)?;
        }
        SourceType::Camera => {
            let name = request
                .camera_name
                .as_deref()
                .ok_or(ValidationError::MissingField("cameraName"))?;
            validate_name("cameraName", name)?;
        }
        SourceType::Region => {
            if let Some(region) = &request.region {
                validate_dimensions(region.width, region.height)?;
            }
        }
        SourceType::Desktop => {}
    }

    if let Some(audio) = &request.audio_device_name {
        validate_name("audioDeviceName", audio)?;
    }

    Ok(())
}
