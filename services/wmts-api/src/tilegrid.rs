//! Tile grid descriptions for web map clients.

use serde::Serialize;
use std::str::FromStr;

use wmts_common::{BoundingBox, LayerId, TileConvention, TileGrid, WmtsError};

/// Client flavour of a tile grid description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileGridFormat {
    /// Options for an OpenLayers XYZ source
    Ol4,
    /// Options for a Cesium `UrlTemplateImageryProvider`
    Cesium,
}

impl FromStr for TileGridFormat {
    type Err = WmtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(".json").to_ascii_lowercase().as_str() {
            "ol4" => Ok(TileGridFormat::Ol4),
            "cesium" => Ok(TileGridFormat::Cesium),
            _ => Err(WmtsError::invalid(
                "format",
                format!("unknown tile grid format '{}', expected ol4 or cesium", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ol4SourceOptions {
    pub url: String,
    pub projection: &'static str,
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub tile_grid: Ol4TileGrid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ol4TileGrid {
    pub extent: [f64; 4],
    pub origin: [f64; 2],
    pub tile_size: [u32; 2],
    pub resolutions: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl From<BoundingBox> for Rectangle {
    fn from(b: BoundingBox) -> Self {
        Self {
            west: b.min_x,
            south: b.min_y,
            east: b.max_x,
            north: b.max_y,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CesiumSourceOptions {
    pub url: String,
    pub rectangle: Rectangle,
    pub minimum_level: u32,
    pub maximum_level: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiling_scheme: CesiumTilingScheme,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CesiumTilingScheme {
    pub rectangle: Rectangle,
    pub number_of_level_zero_tiles_x: u32,
    pub number_of_level_zero_tiles_y: u32,
}

/// XYZ tile URL template of a layer.
pub fn tile_url(base_url: &str, layer: &LayerId) -> String {
    format!(
        "{}/tile/{}/{}/{{z}}/{{x}}/{{y}}.png",
        base_url.trim_end_matches('/'),
        layer.dataset,
        layer.variable
    )
}

pub fn ol4_options(grid: &TileGrid, base_url: &str, layer: &LayerId) -> Ol4SourceOptions {
    let set = grid.matrix_set(TileConvention::Xyz);
    let coverage = set.coverage();
    Ol4SourceOptions {
        url: tile_url(base_url, layer),
        projection: "EPSG:4326",
        min_zoom: 0,
        max_zoom: set.max_level(),
        tile_grid: Ol4TileGrid {
            extent: coverage.to_array(),
            origin: [coverage.min_x, coverage.max_y],
            tile_size: [grid.tile_size, grid.tile_size],
            resolutions: set.resolutions(),
        },
    }
}

/// Cesium addresses rows bottom-up via `{reverseY}`, served by the TMS convention.
pub fn cesium_options(grid: &TileGrid, base_url: &str, layer: &LayerId) -> CesiumSourceOptions {
    let set = grid.matrix_set(TileConvention::Tms);
    let rectangle = Rectangle::from(set.coverage());
    let url = format!(
        "{}/tile/{}/{}/{{z}}/{{x}}/{{reverseY}}.png?convention=tms",
        base_url.trim_end_matches('/'),
        layer.dataset,
        layer.variable
    );
    CesiumSourceOptions {
        url,
        rectangle,
        minimum_level: 0,
        maximum_level: set.max_level(),
        tile_width: grid.tile_size,
        tile_height: grid.tile_size,
        tiling_scheme: CesiumTilingScheme {
            rectangle,
            number_of_level_zero_tiles_x: set.level_zero_tiles.0,
            number_of_level_zero_tiles_y: set.level_zero_tiles.1,
        },
    }
}

/// Tile grid description in the requested format as JSON.
pub fn tile_grid_json(
    grid: &TileGrid,
    format: TileGridFormat,
    base_url: &str,
    layer: &LayerId,
) -> serde_json::Result<serde_json::Value> {
    match format {
        TileGridFormat::Ol4 => serde_json::to_value(ol4_options(grid, base_url, layer)),
        TileGridFormat::Cesium => serde_json::to_value(cesium_options(grid, base_url, layer)),
    }
}
