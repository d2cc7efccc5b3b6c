//! Core error types for herd-core

use thiserror::Error;

/// Errors raised while preparing a run
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invocation configuration is incomplete or inconsistent
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Unknown output format name
    #[error("unknown output format: {0} (expected text or json)")]
    UnknownFormat(String),
}
