//! Color bars and value-to-color mapping.
//!
//! Color bars are static gradients looked up by name. Appending `_r` to a name
//! selects the reversed gradient. Mapping goes through a 256-entry lookup
//! table, so the top of the value range always lands on the last stop.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::RenderError;

/// Number of entries in a color lookup table.
const LUT_SIZE: usize = 256;

/// Rows per parallel work unit in [`colorize`].
const ROWS_PER_TASK: usize = 16;

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn transparent() -> Self {
        Self { r: 0, g: 0, b: 0, a: 0 }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    fn lerp(self, other: Color, t: f32) -> Color {
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Color::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
            mix(self.a, other.a),
        )
    }
}

/// A named gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBar {
    pub name: String,
    pub category: &'static str,
    /// `(position in [0, 1], color)`, ascending positions
    pub stops: Vec<(f32, Color)>,
}

struct ColorBarDef {
    name: &'static str,
    category: &'static str,
    stops: &'static [(f32, [u8; 3])],
}

const SEQUENTIAL_UNIFORM: &str = "Perceptually Uniform Sequential";
const SEQUENTIAL: &str = "Sequential";
const DIVERGING: &str = "Diverging";
const MISC: &str = "Miscellaneous";

static COLOR_BARS: &[ColorBarDef] = &[
    ColorBarDef {
        name: "viridis",
        category: SEQUENTIAL_UNIFORM,
        stops: &[
            (0.0, [68, 1, 84]),
            (0.25, [59, 82, 139]),
            (0.5, [33, 145, 140]),
            (0.75, [94, 201, 98]),
            (1.0, [253, 231, 37]),
        ],
    },
    ColorBarDef {
        name: "plasma",
        category: SEQUENTIAL_UNIFORM,
        stops: &[
            (0.0, [13, 8, 135]),
            (0.25, [126, 3, 168]),
            (0.5, [204, 71, 120]),
            (0.75, [248, 149, 64]),
            (1.0, [240, 249, 33]),
        ],
    },
    ColorBarDef {
        name: "inferno",
        category: SEQUENTIAL_UNIFORM,
        stops: &[
            (0.0, [0, 0, 4]),
            (0.25, [87, 16, 110]),
            (0.5, [188, 55, 84]),
            (0.75, [249, 142, 9]),
            (1.0, [252, 255, 164]),
        ],
    },
    ColorBarDef {
        name: "magma",
        category: SEQUENTIAL_UNIFORM,
        stops: &[
            (0.0, [0, 0, 4]),
            (0.25, [81, 18, 124]),
            (0.5, [183, 55, 121]),
            (0.75, [252, 137, 97]),
            (1.0, [252, 253, 191]),
        ],
    },
    ColorBarDef {
        name: "Greys",
        category: SEQUENTIAL,
        stops: &[(0.0, [255, 255, 255]), (1.0, [0, 0, 0])],
    },
    ColorBarDef {
        name: "gray",
        category: SEQUENTIAL,
        stops: &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])],
    },
    ColorBarDef {
        name: "YlGnBu",
        category: SEQUENTIAL,
        stops: &[
            (0.0, [255, 255, 217]),
            (0.25, [199, 233, 180]),
            (0.5, [65, 182, 196]),
            (0.75, [34, 94, 168]),
            (1.0, [8, 29, 88]),
        ],
    },
    ColorBarDef {
        name: "coolwarm",
        category: DIVERGING,
        stops: &[(0.0, [59, 76, 192]), (0.5, [221, 221, 221]), (1.0, [180, 4, 38])],
    },
    ColorBarDef {
        name: "RdYlBu",
        category: DIVERGING,
        stops: &[
            (0.0, [165, 0, 38]),
            (0.25, [244, 109, 67]),
            (0.5, [255, 255, 191]),
            (0.75, [116, 173, 209]),
            (1.0, [49, 54, 149]),
        ],
    },
    ColorBarDef {
        name: "jet",
        category: MISC,
        stops: &[
            (0.0, [0, 0, 128]),
            (0.125, [0, 0, 255]),
            (0.375, [0, 255, 255]),
            (0.625, [255, 255, 0]),
            (0.875, [255, 0, 0]),
            (1.0, [128, 0, 0]),
        ],
    },
    ColorBarDef {
        name: "rainbow",
        category: MISC,
        stops: &[
            (0.0, [127, 0, 255]),
            (0.25, [0, 180, 236]),
            (0.5, [128, 254, 179]),
            (0.75, [255, 180, 98]),
            (1.0, [255, 0, 0]),
        ],
    },
];

impl ColorBar {
    /// Look up a color bar by name, e.g. `"viridis"` or `"viridis_r"`.
    pub fn by_name(name: &str) -> Result<ColorBar, RenderError> {
        let (base, reversed) = match name.strip_suffix("_r") {
            Some(base) => (base, true),
            None => (name, false),
        };
        let def = COLOR_BARS
            .iter()
            .find(|def| def.name == base)
            .ok_or_else(|| RenderError::UnknownColorBar(name.to_string()))?;

        let mut stops: Vec<(f32, Color)> = def
            .stops
            .iter()
            .map(|(pos, [r, g, b])| (*pos, Color::rgb(*r, *g, *b)))
            .collect();
        if reversed {
            stops = stops.into_iter().rev().map(|(pos, c)| (1.0 - pos, c)).collect();
        }

        Ok(ColorBar {
            name: name.to_string(),
            category: def.category,
            stops,
        })
    }

    /// Names of all built-in color bars, without the reversed variants.
    pub fn names() -> impl Iterator<Item = &'static str> {
        COLOR_BARS.iter().map(|def| def.name)
    }

    /// Color at a position in `[0, 1]`.
    pub fn color_at(&self, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        let (first, last) = match (self.stops.first(), self.stops.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Color::transparent(),
        };
        if t <= first.0 {
            return first.1;
        }
        if t >= last.0 {
            return last.1;
        }
        for pair in self.stops.windows(2) {
            let (p0, c0) = pair[0];
            let (p1, c1) = pair[1];
            if t <= p1 {
                let span = p1 - p0;
                let local = if span > 0.0 { (t - p0) / span } else { 0.0 };
                return c0.lerp(c1, local);
            }
        }
        last.1
    }

    /// 256-entry lookup table spanning the gradient.
    pub fn lut(&self) -> Vec<Color> {
        (0..LUT_SIZE)
            .map(|i| self.color_at(i as f32 / (LUT_SIZE - 1) as f32))
            .collect()
    }
}

/// How values are spread over the color bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueScale {
    #[default]
    Linear,
    Log,
}

/// Palette, value range and no-data sentinel for one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorMapping {
    pub color_bar: String,
    pub vmin: f64,
    pub vmax: f64,
    pub no_data: Option<f64>,
    pub scale: ValueScale,
}

impl ColorMapping {
    pub fn new(color_bar: impl Into<String>, vmin: f64, vmax: f64) -> Self {
        Self {
            color_bar: color_bar.into(),
            vmin,
            vmax,
            no_data: None,
            scale: ValueScale::Linear,
        }
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    pub fn with_scale(mut self, scale: ValueScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        let invalid = |reason: &str| RenderError::InvalidRange {
            vmin: self.vmin,
            vmax: self.vmax,
            reason: reason.to_string(),
        };
        if !self.vmin.is_finite() || !self.vmax.is_finite() {
            return Err(invalid("bounds must be finite"));
        }
        if self.vmin >= self.vmax {
            return Err(invalid("vmin must be less than vmax"));
        }
        if self.scale == ValueScale::Log && self.vmin <= 0.0 {
            return Err(invalid("log scale needs a positive vmin"));
        }
        Ok(())
    }
}

/// Precomputed state for mapping values to colors.
struct Colorizer {
    lut: Vec<Color>,
    lo: f64,
    hi: f64,
    no_data: Option<f32>,
    scale: ValueScale,
}

impl Colorizer {
    fn new(mapping: &ColorMapping) -> Result<Self, RenderError> {
        mapping.validate()?;
        let bar = ColorBar::by_name(&mapping.color_bar)?;
        let (lo, hi) = match mapping.scale {
            ValueScale::Linear => (mapping.vmin, mapping.vmax),
            ValueScale::Log => (mapping.vmin.log10(), mapping.vmax.log10()),
        };
        Ok(Self {
            lut: bar.lut(),
            lo,
            hi,
            no_data: mapping.no_data.filter(|v| !v.is_nan()).map(|v| v as f32),
            scale: mapping.scale,
        })
    }

    #[inline]
    fn color(&self, value: f32) -> Color {
        if !value.is_finite() || self.no_data == Some(value) {
            return Color::transparent();
        }
        let v = match self.scale {
            ValueScale::Linear => value as f64,
            ValueScale::Log if value > 0.0 => (value as f64).log10(),
            ValueScale::Log => self.lo,
        };
        let t = ((v - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0);
        self.lut[(t * (LUT_SIZE - 1) as f64).round() as usize]
    }
}

/// Map a row-major raster to RGBA pixels.
///
/// Values equal to the no-data sentinel and non-finite values become fully
/// transparent; values outside `[vmin, vmax]` take the nearest end color.
pub fn colorize(
    values: &[f32],
    width: usize,
    height: usize,
    mapping: &ColorMapping,
) -> Result<Vec<u8>, RenderError> {
    if values.len() != width * height {
        return Err(RenderError::ShapeMismatch {
            len: values.len(),
            width,
            height,
        });
    }
    let colorizer = Colorizer::new(mapping)?;
    let mut pixels = vec![0u8; width * height * 4];
    if width == 0 {
        return Ok(pixels);
    }

    pixels
        .par_chunks_mut(width * 4 * ROWS_PER_TASK)
        .zip(values.par_chunks(width * ROWS_PER_TASK))
        .for_each(|(out, row_values)| {
            for (px, &value) in out.chunks_exact_mut(4).zip(row_values) {
                let c = colorizer.color(value);
                px.copy_from_slice(&[c.r, c.g, c.b, c.a]);
            }
        });

    Ok(pixels)
}
