//! Error types for the tile server.

use thiserror::Error;

/// Result type alias using WmtsError.
pub type WmtsResult<T> = Result<T, WmtsError>;

/// Primary error type for tile serving operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WmtsError {
    // === Request Errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    // === Lookup Errors ===
    #[error("{0} not found")]
    NotFound(String),

    #[error("Unknown tile matrix set: {0}")]
    UnknownTileMatrixSet(String),

    #[error("Unknown color bar: {0}")]
    UnknownColorBar(String),

    #[error("Tile {level}/{row}/{col} is outside of the tile matrix")]
    OutOfRange { level: u32, row: u32, col: u32 },

    // === Data Errors ===
    #[error("Dataset '{dataset}' is unavailable: {reason}")]
    DatasetUnavailable { dataset: String, reason: String },

    // === Infrastructure Errors ===
    #[error("Operation not supported: {0}")]
    NotImplemented(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl WmtsError {
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        WmtsError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        WmtsError::NotFound(what.into())
    }

    pub fn unavailable(dataset: impl Into<String>, reason: impl ToString) -> Self {
        WmtsError::DatasetUnavailable {
            dataset: dataset.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the OWS exception code for this error.
    pub fn exception_code(&self) -> &'static str {
        match self {
            WmtsError::MissingParameter(_) => "MissingParameterValue",
            WmtsError::InvalidParameter { .. } | WmtsError::UnknownColorBar(_) => {
                "InvalidParameterValue"
            }
            WmtsError::NotFound(_) | WmtsError::UnknownTileMatrixSet(_) => {
                "InvalidParameterValue"
            }
            WmtsError::OutOfRange { .. } => "TileOutOfRange",
            WmtsError::NotImplemented(_) => "OperationNotSupported",
            WmtsError::DatasetUnavailable { .. } | WmtsError::Internal(_) => "NoApplicableCode",
        }
    }

    /// Name of the request parameter the error refers to, if any.
    pub fn locator(&self) -> Option<&str> {
        match self {
            WmtsError::MissingParameter(param) => Some(param),
            WmtsError::InvalidParameter { param, .. } => Some(param),
            WmtsError::UnknownTileMatrixSet(_) => Some("TileMatrixSet"),
            WmtsError::UnknownColorBar(_) => Some("cbar"),
            WmtsError::OutOfRange { .. } => Some("TileRow"),
            WmtsError::NotImplemented(_) => Some("Request"),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            WmtsError::MissingParameter(_)
            | WmtsError::InvalidParameter { .. }
            | WmtsError::OutOfRange { .. } => 400,

            WmtsError::NotFound(_)
            | WmtsError::UnknownTileMatrixSet(_)
            | WmtsError::UnknownColorBar(_) => 404,

            WmtsError::NotImplemented(_) => 501,
            WmtsError::DatasetUnavailable { .. } => 503,
            WmtsError::Internal(_) => 500,
        }
    }

    /// Whether the caller caused the error.
    pub fn is_client_error(&self) -> bool {
        self.http_status_code() < 500
    }
}

impl From<std::io::Error> for WmtsError {
    fn from(err: std::io::Error) -> Self {
        WmtsError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WmtsError {
    fn from(err: serde_json::Error) -> Self {
        WmtsError::Internal(format!("JSON error: {}", err))
    }
}
