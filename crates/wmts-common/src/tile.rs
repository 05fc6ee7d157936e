//! WMTS tile matrix sets fitted to gridded datasets.
//!
//! A tile matrix set is a power-of-two pyramid: level 0 covers the whole
//! dataset extent and every following level halves the pixel size. All levels
//! of one set share the origin and the tile size. Coordinates are WGS84
//! degrees (EPSG:4326).

use crate::{BoundingBox, WmtsError, WmtsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Meters per degree at the equator, used for OGC scale denominators.
const METERS_PER_DEGREE: f64 = 6_378_137.0 * 2.0 * std::f64::consts::PI / 360.0;

/// Standardized rendering pixel size (0.28mm) from the WMTS spec.
const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// Upper bound on pyramid depth.
pub const MAX_LEVELS: u32 = 24;

/// How tile rows are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileConvention {
    /// Top-left origin, rows increase southwards (WMTS, OpenLayers).
    Xyz,
    /// Bottom-left origin, rows increase northwards (TMS-style globe clients).
    Tms,
}

impl TileConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileConvention::Xyz => "xyz",
            TileConvention::Tms => "tms",
        }
    }
}

impl fmt::Display for TileConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileConvention {
    type Err = WmtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xyz" | "wmts" | "ol4" => Ok(TileConvention::Xyz),
            "tms" | "cesium" => Ok(TileConvention::Tms),
            other => Err(WmtsError::invalid(
                "convention",
                format!("'{}' is not one of xyz, tms", other),
            )),
        }
    }
}

/// A single tile matrix (pyramid level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrix {
    /// Zoom level index
    pub level: u32,

    /// Identifier (the level as a decimal string)
    pub identifier: String,

    /// Pixel size in degrees
    pub pixel_size: f64,

    /// Tile width in pixels
    pub tile_width: u32,

    /// Tile height in pixels
    pub tile_height: u32,

    /// Number of tile columns
    pub matrix_width: u32,

    /// Number of tile rows
    pub matrix_height: u32,

    /// Corner row 0 starts from: top-left for XYZ, bottom-left for TMS
    pub origin: (f64, f64),

    pub convention: TileConvention,
}

impl TileMatrix {
    /// OGC scale denominator for this level.
    pub fn scale_denominator(&self) -> f64 {
        self.pixel_size * METERS_PER_DEGREE / STANDARD_PIXEL_SIZE
    }

    /// Width and height of one tile in degrees.
    pub fn tile_span(&self) -> (f64, f64) {
        (
            self.pixel_size * self.tile_width as f64,
            self.pixel_size * self.tile_height as f64,
        )
    }

    /// Whether `(row, col)` addresses a tile of this matrix.
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row < self.matrix_height && col < self.matrix_width
    }

    /// Top-left corner of the matrix, whatever the row convention.
    pub fn top_left_corner(&self) -> (f64, f64) {
        match self.convention {
            TileConvention::Xyz => self.origin,
            TileConvention::Tms => {
                let (_, span_y) = self.tile_span();
                (
                    self.origin.0,
                    self.origin.1 + span_y * self.matrix_height as f64,
                )
            }
        }
    }

    /// Geographic extent of a tile.
    ///
    /// Pure affine transform of the indices, no clamping: indices beyond the
    /// matrix produce extents beyond the matrix. Use [`TileMatrix::tile_extent`]
    /// for validated access.
    pub fn tile_extent_unchecked(&self, row: u32, col: u32) -> BoundingBox {
        let (span_x, span_y) = self.tile_span();
        let min_x = self.origin.0 + col as f64 * span_x;
        let max_x = min_x + span_x;

        match self.convention {
            TileConvention::Xyz => {
                let max_y = self.origin.1 - row as f64 * span_y;
                BoundingBox::new(min_x, max_y - span_y, max_x, max_y)
            }
            TileConvention::Tms => {
                let min_y = self.origin.1 + row as f64 * span_y;
                BoundingBox::new(min_x, min_y, max_x, min_y + span_y)
            }
        }
    }

    /// Geographic extent of a tile, failing for indices outside the matrix.
    pub fn tile_extent(&self, row: u32, col: u32) -> WmtsResult<BoundingBox> {
        if !self.contains(row, col) {
            return Err(WmtsError::OutOfRange {
                level: self.level,
                row,
                col,
            });
        }
        Ok(self.tile_extent_unchecked(row, col))
    }

    /// Find the `(row, col)` of the tile containing a coordinate.
    pub fn coord_to_tile(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let (span_x, span_y) = self.tile_span();

        let col = ((x - self.origin.0) / span_x).floor();
        let row = match self.convention {
            TileConvention::Xyz => ((self.origin.1 - y) / span_y).floor(),
            TileConvention::Tms => ((y - self.origin.1) / span_y).floor(),
        };

        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as u64, col as u64);
        if col >= self.matrix_width as u64 || row >= self.matrix_height as u64 {
            return None;
        }

        Some((row as u32, col as u32))
    }
}

/// An ordered pyramid of tile matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMatrixSet {
    /// Identifier advertised to clients
    pub identifier: String,

    pub convention: TileConvention,

    /// Extent of the data the set was fitted to
    pub extent: BoundingBox,

    /// Tile columns and rows at level 0
    pub level_zero_tiles: (u32, u32),

    /// Levels, index equals zoom level
    pub tile_matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
    /// Get a tile matrix by zoom level number.
    pub fn matrix(&self, level: u32) -> Option<&TileMatrix> {
        self.tile_matrices.get(level as usize)
    }

    pub fn max_level(&self) -> u32 {
        self.tile_matrices.len().saturating_sub(1) as u32
    }

    pub fn tile_size(&self) -> (u32, u32) {
        self.tile_matrices
            .first()
            .map(|m| (m.tile_width, m.tile_height))
            .unwrap_or((0, 0))
    }

    /// Pixel sizes per level, coarsest first.
    pub fn resolutions(&self) -> Vec<f64> {
        self.tile_matrices.iter().map(|m| m.pixel_size).collect()
    }

    /// Area covered by the tiles, which may overhang the data extent.
    pub fn coverage(&self) -> BoundingBox {
        match self.tile_matrices.first() {
            Some(m) => {
                let (left, top) = m.top_left_corner();
                let (span_x, span_y) = m.tile_span();
                BoundingBox::new(
                    left,
                    top - span_y * m.matrix_height as f64,
                    left + span_x * m.matrix_width as f64,
                    top,
                )
            }
            None => self.extent,
        }
    }

    /// Extent of the tile at `(level, row, col)`.
    ///
    /// Fails with `OutOfRange` when the level or the indices fall outside the
    /// pyramid.
    pub fn tile_extent(&self, level: u32, row: u32, col: u32) -> WmtsResult<BoundingBox> {
        self.matrix(level)
            .ok_or(WmtsError::OutOfRange { level, row, col })?
            .tile_extent(row, col)
    }
}

/// Resolve a query value to the nearest entry of a monotonic coordinate array.
///
/// Works for ascending and descending arrays. When the query lies exactly
/// halfway between two samples the lower index wins, which for time axes means
/// the earlier timestamp. Queries beyond either end resolve to that end.
/// Returns `None` for an empty array or a NaN query.
pub fn nearest_index(coords: &[f64], value: f64) -> Option<usize> {
    if coords.is_empty() || value.is_nan() {
        return None;
    }
    let last = coords.len() - 1;
    let ascending = coords[last] >= coords[0];

    let pos = if ascending {
        coords.partition_point(|&c| c < value)
    } else {
        coords.partition_point(|&c| c > value)
    };

    if pos == 0 {
        return Some(0);
    }
    if pos > last {
        return Some(last);
    }

    let lower = pos - 1;
    let d_lower = (value - coords[lower]).abs();
    let d_upper = (coords[pos] - value).abs();
    Some(if d_upper < d_lower { pos } else { lower })
}

/// Fit a tile matrix set to a dataset.
///
/// `shape` is `(width, height)` in native pixels. Level 0 covers the extent
/// with the fewest square-pixel tiles (2x1 for a global 2:1 grid); each next
/// level halves the pixel size, stopping at the first level whose pixel size
/// is not coarser than the native one.
pub fn matrix_set_for_dataset(
    identifier: impl Into<String>,
    shape: (u64, u64),
    extent: BoundingBox,
    tile_size: u32,
    convention: TileConvention,
) -> WmtsResult<TileMatrixSet> {
    let (width, height) = shape;
    if width == 0 || height == 0 {
        return Err(WmtsError::invalid("shape", "grid has no pixels"));
    }
    if !extent.is_valid() {
        return Err(WmtsError::invalid(
            "extent",
            format!("degenerate extent {}", extent.cache_key()),
        ));
    }
    if tile_size == 0 {
        return Err(WmtsError::invalid("tile_size", "must be positive"));
    }

    let aspect = extent.width() / extent.height();
    let tiles_x0 = aspect.round().max(1.0) as u32;
    let tiles_y0 = aspect.recip().round().max(1.0) as u32;

    let tile = tile_size as f64;
    let res0 = (extent.width() / (tiles_x0 as f64 * tile))
        .max(extent.height() / (tiles_y0 as f64 * tile));
    let native = (extent.width() / width as f64).min(extent.height() / height as f64);

    let mut num_levels = 1;
    while num_levels < MAX_LEVELS && res0 / 2f64.powi(num_levels as i32 - 1) > native * (1.0 + 1e-9) {
        num_levels += 1;
    }

    let total_height0 = res0 * tile * tiles_y0 as f64;
    let origin = match convention {
        TileConvention::Xyz => (extent.min_x, extent.max_y),
        TileConvention::Tms => (extent.min_x, extent.max_y - total_height0),
    };

    let tile_matrices = (0..num_levels)
        .map(|level| {
            let factor = 1u32 << level;
            TileMatrix {
                level,
                identifier: level.to_string(),
                pixel_size: res0 / factor as f64,
                tile_width: tile_size,
                tile_height: tile_size,
                matrix_width: tiles_x0 * factor,
                matrix_height: tiles_y0 * factor,
                origin,
                convention,
            }
        })
        .collect();

    Ok(TileMatrixSet {
        identifier: identifier.into(),
        convention,
        extent,
        level_zero_tiles: (tiles_x0, tiles_y0),
        tile_matrices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_set(convention: TileConvention) -> TileMatrixSet {
        matrix_set_for_dataset(
            "global",
            (720, 360),
            BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            256,
            convention,
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_index_tie_breaks_low() {
        let coords = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(nearest_index(&coords, 2.5), Some(1));
        assert_eq!(nearest_index(&coords, 2.49), Some(1));
        assert_eq!(nearest_index(&coords, 2.51), Some(2));
    }

    #[test]
    fn test_nearest_index_descending() {
        let coords = [4.0, 3.0, 2.0, 1.0];
        assert_eq!(nearest_index(&coords, 2.5), Some(1));
        assert_eq!(nearest_index(&coords, 2.4), Some(2));
        assert_eq!(nearest_index(&coords, 10.0), Some(0));
        assert_eq!(nearest_index(&coords, -10.0), Some(3));
    }

    #[test]
    fn test_nearest_index_edges() {
        assert_eq!(nearest_index(&[], 1.0), None);
        assert_eq!(nearest_index(&[5.0], 100.0), Some(0));
        assert_eq!(nearest_index(&[1.0, 2.0], f64::NAN), None);
        assert_eq!(nearest_index(&[1.0, 2.0], 2.0), Some(1));
    }

    #[test]
    fn test_global_level_zero_is_two_by_one() {
        let set = global_set(TileConvention::Xyz);
        assert_eq!(set.level_zero_tiles, (2, 1));
        let m0 = set.matrix(0).unwrap();
        assert_eq!((m0.matrix_width, m0.matrix_height), (2, 1));
        assert!((m0.pixel_size - 0.703125).abs() < 1e-12);
        // 0.703125 -> 0.3515625 reaches the native 0.5 degree grid
        assert_eq!(set.tile_matrices.len(), 2);
    }

    #[test]
    fn test_levels_halve_pixel_size() {
        let set = matrix_set_for_dataset(
            "fine",
            (8192, 4096),
            BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            256,
            TileConvention::Xyz,
        )
        .unwrap();
        for pair in set.tile_matrices.windows(2) {
            assert!((pair[0].pixel_size / pair[1].pixel_size - 2.0).abs() < 1e-12);
            assert_eq!(pair[1].matrix_width, pair[0].matrix_width * 2);
            assert_eq!(pair[0].origin, pair[1].origin);
        }
        let finest = set.tile_matrices.last().unwrap();
        assert!(finest.pixel_size <= 360.0 / 8192.0 + 1e-12);
    }

    #[test]
    fn test_tile_extent_xyz() {
        let set = global_set(TileConvention::Xyz);
        let bbox = set.tile_extent(0, 0, 1).unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, -90.0, 180.0, 90.0));
    }

    #[test]
    fn test_tile_extent_tms_matches_flipped_xyz() {
        let xyz = global_set(TileConvention::Xyz);
        let tms = global_set(TileConvention::Tms);
        let m_xyz = xyz.matrix(1).unwrap();
        let m_tms = tms.matrix(1).unwrap();
        for row in 0..m_xyz.matrix_height {
            for col in 0..m_xyz.matrix_width {
                let flipped = m_xyz.matrix_height - 1 - row;
                assert_eq!(
                    m_xyz.tile_extent(row, col).unwrap(),
                    m_tms.tile_extent(flipped, col).unwrap()
                );
            }
        }
        assert_eq!(m_tms.top_left_corner(), m_xyz.top_left_corner());
    }

    #[test]
    fn test_tile_extent_out_of_range() {
        let set = global_set(TileConvention::Xyz);
        assert_eq!(
            set.tile_extent(0, 999, 999),
            Err(WmtsError::OutOfRange { level: 0, row: 999, col: 999 })
        );
        assert!(matches!(
            set.tile_extent(7, 0, 0),
            Err(WmtsError::OutOfRange { level: 7, .. })
        ));
    }

    #[test]
    fn test_extent_round_trips_through_inverse() {
        for convention in [TileConvention::Xyz, TileConvention::Tms] {
            let set = global_set(convention);
            for matrix in &set.tile_matrices {
                for row in 0..matrix.matrix_height {
                    for col in 0..matrix.matrix_width {
                        let bbox = matrix.tile_extent(row, col).unwrap();
                        let x = bbox.min_x + bbox.width() * 0.25;
                        let y = bbox.min_y + bbox.height() * 0.75;
                        assert_eq!(matrix.coord_to_tile(x, y), Some((row, col)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_regional_grid_overhangs_east() {
        let set = matrix_set_for_dataset(
            "regional",
            (2000, 1000),
            BoundingBox::new(0.0, 50.0, 5.0, 52.5),
            250,
            TileConvention::Xyz,
        )
        .unwrap();
        assert_eq!(set.level_zero_tiles, (2, 1));
        assert_eq!(set.tile_matrices.len(), 3);
        let coverage = set.coverage();
        assert!((coverage.max_x - 5.0).abs() < 1e-9);
        assert!((coverage.min_y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        let extent = BoundingBox::new(0.0, 0.0, 0.0, 1.0);
        assert!(matrix_set_for_dataset("x", (10, 10), extent, 256, TileConvention::Xyz).is_err());
        let extent = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(matrix_set_for_dataset("x", (0, 10), extent, 256, TileConvention::Xyz).is_err());
    }
}
