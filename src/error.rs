use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data, training or persisting artifacts.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// None of the expected dataset files could be found.
    #[error("dataset file '{name}' not found in any of {searched:?}")]
    MissingDatasetFile { name: String, searched: Vec<PathBuf> },
    /// A dataset file exists but its content is not valid.
    #[error("invalid dataset file '{path}': {reason}")]
    InvalidDataset { path: PathBuf, reason: String },
    /// Tensor data could not be converted to host values.
    #[error("tensor data error: {0}")]
    TensorData(String),
    /// A module record could not be saved or loaded.
    #[error("record error: {0}")]
    Record(String),
    /// A configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(String),
    /// The learning rate scheduler configuration is invalid.
    #[error("invalid learning rate scheduler: {0}")]
    Scheduler(String),
    /// Drawing a plot failed.
    #[error("plot error: {0}")]
    Plot(String),
    /// Encoding a plot failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_dataset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
