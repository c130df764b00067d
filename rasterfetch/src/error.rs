//! Error types for materialization.
//!
//! Errors that happen while producer messages are applied are captured by the
//! sink and only returned to the caller once the blocking wait has finished,
//! so the original cause always surfaces on the caller's thread.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type FactoryResult<T> = Result<T, FactoryError>;

/// Top-level error returned by [`ImageFactory`](crate::ImageFactory) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// A required argument was missing or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The source could not be turned into an image.
    #[error("Image conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The source delivered more than one encoding or element kind in one cycle.
    #[error("Inconsistent source: {0}")]
    InconsistentSource(String),
}

impl FactoryError {
    /// Returns true if this is a conversion failure.
    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::Conversion(_))
    }

    /// Returns true if the source broke the single-encoding invariant.
    pub fn is_inconsistent_source(&self) -> bool {
        matches!(self, Self::InconsistentSource(_))
    }
}

/// Reasons a fetch cycle failed to produce an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The producer completed with an error status.
    #[error("source reported an error: {0}")]
    SourceFailed(String),

    /// The waiting thread was cancelled before the source completed.
    #[error("conversion interrupted before the source completed")]
    Interrupted,

    /// The resolved region has no pixels.
    #[error("resolved region is empty ({width}×{height})")]
    EmptyImage { width: i32, height: i32 },

    /// Every producer handle was dropped without a completion message.
    #[error("source disconnected without completing")]
    Disconnected,

    /// A tile could not be copied as described by its geometry.
    #[error("malformed tile: {0}")]
    MalformedTile(String),
}
