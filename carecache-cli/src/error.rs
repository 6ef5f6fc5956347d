//! Error types for the carecache CLI.

use carecache_store::StoreError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types.
#[derive(Debug, Error)]
pub enum CliError {
    /// Cache store error (connection, configuration, ...)
    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    /// Output encoding error
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend answered but the operation did not succeed
    #[error("Command error: {0}")]
    Command(String),
}
