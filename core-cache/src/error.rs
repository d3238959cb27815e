//! # Cache Error Types

use thiserror::Error;

/// Errors surfaced by the response cache.
///
/// Storage failures on the request path never reach callers: the request
/// degrades to a network pass-through. They only surface from administrative
/// operations (invalidation, initialization).
#[derive(Error, Debug)]
pub enum CacheError {
    /// Network failed and no cached response could stand in for it.
    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

impl From<regex::Error> for CacheError {
    fn from(err: regex::Error) -> Self {
        CacheError::InvalidPattern(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
