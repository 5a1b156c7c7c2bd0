//! reelcap common library
//!
//! Shared capture types and request validation used by the recording engine
//! and its front ends.

pub mod logging;
pub mod types;
pub mod validation;

pub use types::*;
pub use validation::ValidationError;
