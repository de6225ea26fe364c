//! Error types for the download pipeline.

use grid_processor::GridProcessorError;
use thiserror::Error;

/// Failure of a single archive request.
///
/// These never abort an operation on their own; the worker pool records
/// them against the request and moves on.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no data available: {0}")]
    NoData(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Operation-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request itself is unsatisfiable. Raised before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("grid error: {0}")]
    Grid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every attempted item of a non-empty operation failed.
    #[error("{operation}: all {attempted} attempted items failed")]
    TotalFailure { operation: String, attempted: usize },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<GridProcessorError> for PipelineError {
    fn from(err: GridProcessorError) -> Self {
        match err {
            GridProcessorError::Schema(msg) => Self::Schema(msg),
            GridProcessorError::UnsupportedFormat(msg) => Self::Schema(msg),
            GridProcessorError::Grid(msg) => Self::Grid(msg),
            GridProcessorError::Config(msg) => Self::Configuration(msg),
            GridProcessorError::Io(e) => Self::Io(e),
            GridProcessorError::Storage(msg) => Self::Io(std::io::Error::other(msg)),
        }
    }
}

impl From<projection::ProjectionError> for PipelineError {
    fn from(err: projection::ProjectionError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
