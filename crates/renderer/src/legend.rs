//! Color bar legend images and listings.

use serde::Serialize;

use crate::colormap::ColorBar;
use crate::png::encode_rgba;
use crate::RenderError;

/// Default legend size in pixels.
pub const LEGEND_WIDTH: usize = 256;
pub const LEGEND_HEIGHT: usize = 16;

/// Serializable description of a color bar.
#[derive(Debug, Clone, Serialize)]
pub struct ColorBarInfo {
    pub name: String,
    pub category: &'static str,
    pub stops: Vec<ColorStopInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColorStopInfo {
    pub position: f32,
    pub color: String,
}

impl From<&ColorBar> for ColorBarInfo {
    fn from(bar: &ColorBar) -> Self {
        Self {
            name: bar.name.clone(),
            category: bar.category,
            stops: bar
                .stops
                .iter()
                .map(|(position, color)| ColorStopInfo {
                    position: *position,
                    color: color.to_hex(),
                })
                .collect(),
        }
    }
}

/// Describe every built-in color bar, grouped by category order of definition.
pub fn list_color_bars() -> Vec<ColorBarInfo> {
    ColorBar::names()
        .filter_map(|name| ColorBar::by_name(name).ok())
        .map(|bar| ColorBarInfo::from(&bar))
        .collect()
}

/// Render a horizontal legend strip, low values on the left.
pub fn render_legend(bar: &ColorBar, width: usize, height: usize) -> Result<Vec<u8>, RenderError> {
    let denom = width.saturating_sub(1).max(1) as f32;
    let row: Vec<u8> = (0..width)
        .flat_map(|x| {
            let c = bar.color_at(x as f32 / denom);
            [c.r, c.g, c.b, c.a]
        })
        .collect();

    let pixels = row.repeat(height);
    encode_rgba(&pixels, width, height)
}
