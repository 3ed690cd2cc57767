//! Error types for imgcalc

use thiserror::Error;

/// Main error type for imgcalc operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Raster access error: {0}")]
    Raster(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Raster grid mismatch on input {index}: {reason}")]
    GridMismatch { index: usize, reason: String },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{function} does not implement calculation mode {mode}")]
    NotImplemented { function: &'static str, mode: String },

    #[error("Clustering did not converge: {0}")]
    Convergence(String),
}

/// Coarse error category, used by callers that only care about the failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotImplemented,
    Convergence,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Raster(_) => ErrorKind::Io,
            Error::Configuration(_)
            | Error::SizeMismatch { .. }
            | Error::GridMismatch { .. }
            | Error::InvalidParameter { .. } => ErrorKind::Configuration,
            Error::NotImplemented { .. } => ErrorKind::NotImplemented,
            Error::Convergence(_) => ErrorKind::Convergence,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub(crate) fn tiff(context: &str, e: tiff::TiffError) -> Self {
        Error::Raster(format!("{context}: {e}"))
    }
}

/// Result type alias for imgcalc operations
pub type Result<T> = std::result::Result<T, Error>;
