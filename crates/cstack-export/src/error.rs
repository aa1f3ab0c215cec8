//! Error types for the export tools

use std::path::PathBuf;
use thiserror::Error;

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Management API error: {0}")]
    Api(#[from] cstack_api::ApiError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unexpected response shape: {0}")]
    UnexpectedResponse(String),
}
