//! Image rendering for gridded data tiles.
//!
//! - Color bars and value-to-color mapping
//! - PNG encoding (indexed when the tile has few colors, RGBA otherwise)
//! - Color bar legend images

pub mod colormap;
pub mod error;
pub mod legend;
pub mod png;

pub use colormap::{colorize, Color, ColorBar, ColorMapping, ValueScale};
pub use error::RenderError;
