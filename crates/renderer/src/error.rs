//! Rendering errors.

use thiserror::Error;
use wmts_common::WmtsError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Unknown color bar: {0}")]
    UnknownColorBar(String),

    #[error("Invalid value range [{vmin}, {vmax}]: {reason}")]
    InvalidRange { vmin: f64, vmax: f64, reason: String },

    #[error("Raster of {len} values does not match {width}x{height}")]
    ShapeMismatch { len: usize, width: usize, height: usize },

    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

impl From<RenderError> for WmtsError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::UnknownColorBar(name) => WmtsError::UnknownColorBar(name),
            RenderError::InvalidRange { vmin, vmax, reason } => WmtsError::invalid(
                "vmin",
                format!("[{}, {}] {}", vmin, vmax, reason),
            ),
            other => WmtsError::Internal(other.to_string()),
        }
    }
}
