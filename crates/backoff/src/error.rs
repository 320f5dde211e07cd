//! Error types for limiter construction
//!
//! Runtime operations on the limiters cannot fail; the only fallible surface
//! is configuration validation at construction time.

use thiserror::Error;

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;
