//! Error types for grid processing.

use thiserror::Error;

/// Errors that can occur while normalising or regridding a file.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// The file does not have the structure we expect (variables,
    /// coordinates, dimensions).
    #[error("schema error: {0}")]
    Schema(String),

    /// The source grid cannot be mapped onto the requested destination.
    #[error("grid error: {0}")]
    Grid(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zarr store read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid processor configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// No reader is available for this file type.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}

impl GridProcessorError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn grid(msg: impl Into<String>) -> Self {
        Self::Grid(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Wrap a Zarr library error.
    pub fn storage_err(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<projection::ProjectionError> for GridProcessorError {
    fn from(err: projection::ProjectionError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
