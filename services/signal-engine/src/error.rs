//! Engine error type

use thiserror::Error;

/// Errors raised for genuinely invalid input.
///
/// Expected rejections (insufficient data, no consensus, lockout active) are
/// not errors; they surface as no-decision results carrying a reason string.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed feature frame: {0}")]
    MalformedFrame(String),
}
