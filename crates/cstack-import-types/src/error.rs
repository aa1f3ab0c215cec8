//! Error types for the import system

use std::path::PathBuf;
use thiserror::Error;

/// Result type for import operations
pub type ImportResult<T> = Result<T, ImportError>;

/// Errors that can occur during import operations
#[derive(Error, Debug)]
pub enum ImportError {
    /// Source backup directory is missing or unreadable; aborts the run
    #[error("Backup directory not found: {0}")]
    MissingBackupDir(PathBuf),

    /// Authentication/authorization failure against the destination stack
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Unknown module name passed to the single-module filter
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Schema nesting exceeded the walker depth limit
    #[error("Schema too deep in content type '{content_type}' (limit {limit})")]
    SchemaTooDeep { content_type: String, limit: usize },

    /// Management API failure that is fatal for the whole run
    #[error("Management API error: {0}")]
    Api(#[from] cstack_api::ApiError),

    /// File store failure
    #[error(transparent)]
    Core(#[from] cstack_core::CoreError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
