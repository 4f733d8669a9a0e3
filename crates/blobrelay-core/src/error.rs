//! Attachment store error types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the upload pipeline and its collaborators.
///
/// Client mistakes (`TooLarge`, `LengthMismatch`) and admission refusals
/// (`RateLimited`) are distinct from capacity exhaustion so the HTTP layer
/// can map them to the right status class.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Declared length exceeds the per-upload ceiling
    #[error("declared length {declared} exceeds maximum {max}")]
    TooLarge { declared: u64, max: u64 },

    /// Source has exhausted its upload budget for the current window
    #[error("rate limited: {identity} has exhausted its upload budget")]
    RateLimited { identity: String },

    /// Reservation failed even after eviction
    #[error("insufficient space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    /// Space pressure with nothing stored to evict
    #[error("no stored attachment to evict")]
    NoEvictableBlob,

    /// Oldest attachment is still inside the retention floor
    #[error("oldest attachment is {age_secs}s old, inside the retention floor")]
    RetentionFloor { age_secs: u64 },

    /// Body ended before (or stream failed short of) the declared length
    #[error("upload declared {declared} bytes but delivered {received}")]
    LengthMismatch { declared: u64, received: u64 },

    /// Identifier collision retries exhausted
    #[error("could not assign an unused identifier")]
    IdExhausted,

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
