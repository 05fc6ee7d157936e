//! Errors raised at the data source boundary.

use thiserror::Error;
use wmts_common::WmtsError;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The path could not be opened or read as a dataset.
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// The dataset opened but does not have the expected grid layout.
    #[error("invalid layout in {path}: {reason}")]
    InvalidLayout { path: String, reason: String },

    #[error("variable '{0}' not found")]
    UnknownVariable(String),

    #[error("dimension '{0}' not found")]
    UnknownDimension(String),

    /// A window outside the array bounds was requested.
    #[error("window out of bounds for '{variable}': {reason}")]
    Window { variable: String, reason: String },

    #[error("read failed: {0}")]
    Read(String),

    #[error("dataset already closed")]
    Closed,
}

impl SourceError {
    pub fn open(path: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn layout(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::InvalidLayout {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn read(reason: impl ToString) -> Self {
        SourceError::Read(reason.to_string())
    }

    /// True for failures that make the whole dataset unusable.
    pub fn is_open_failure(&self) -> bool {
        matches!(self, SourceError::Open { .. } | SourceError::InvalidLayout { .. })
    }
}

impl From<SourceError> for WmtsError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Open { path, reason } | SourceError::InvalidLayout { path, reason } => {
                WmtsError::unavailable(path, reason)
            }
            SourceError::UnknownVariable(name) => WmtsError::not_found(format!("variable '{}'", name)),
            SourceError::UnknownDimension(name) => {
                WmtsError::not_found(format!("dimension '{}'", name))
            }
            other => WmtsError::Internal(other.to_string()),
        }
    }
}
