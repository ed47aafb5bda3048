//! Error types for the refresh cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the refresh cache.
///
/// Loader failures, cache misses and capacity pressure are absorbed by the
/// engine and never show up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Configuration rejected at start
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The cache has been stopped
    #[error("Cache is stopped")]
    Stopped,

    /// `start` was called outside of a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

// == Result Type Alias ==
/// Convenience Result type for the refresh cache.
pub type Result<T> = std::result::Result<T, CacheError>;
