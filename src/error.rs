//! Custom error types for bookrecs.
//!
//! This module defines the error type used throughout the library.
//! Per-record problems during an import are not errors here: they are
//! collected into the [`ImportReport`](crate::pipeline::ImportReport)
//! as [`RecordFailure`](crate::pipeline::RecordFailure) values.

use thiserror::Error;

/// Main error type for bookrecs operations.
#[derive(Debug, Error)]
pub enum BookrecsError {
    /// The source page could not be fetched or had no shelf structure
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML or API payload parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message
        message: String,
    },

    /// Storage error
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using `BookrecsError`
pub type Result<T> = std::result::Result<T, BookrecsError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BookrecsError::Parse(msg.to_string()))
    }
}
