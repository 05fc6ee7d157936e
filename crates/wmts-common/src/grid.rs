//! Tile grids: the tiling geometry derived for one dataset variable.

use crate::tile::{matrix_set_for_dataset, TileConvention, TileMatrixSet};
use crate::{BoundingBox, WmtsError, WmtsResult};
use serde::{Deserialize, Serialize};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Content address of a tile grid.
///
/// Geometry depends only on the physical resource and its array layout, so
/// differently named datasets pointing at the same path share one grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileGridKey {
    pub path: String,
    /// Array shape in `(time, lat, lon)` order
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
}

impl TileGridKey {
    pub fn new(path: impl Into<String>, shape: Vec<u64>, chunk_shape: Vec<u64>) -> Self {
        Self {
            path: path.into(),
            shape,
            chunk_shape,
        }
    }

    /// Native `(width, height)` in pixels, taken from the two trailing dimensions.
    pub fn spatial_shape(&self) -> Option<(u64, u64)> {
        match self.shape.as_slice() {
            [.., height, width] => Some((*width, *height)),
            _ => None,
        }
    }
}

/// Tiling geometry for a dataset variable, one matrix set per convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub key: TileGridKey,
    pub extent: BoundingBox,
    pub width: u64,
    pub height: u64,
    pub tile_size: u32,
    pub xyz: TileMatrixSet,
    pub tms: TileMatrixSet,
}

impl TileGrid {
    pub fn new(key: TileGridKey, extent: BoundingBox, tile_size: u32) -> WmtsResult<Self> {
        let (width, height) = key.spatial_shape().ok_or_else(|| {
            WmtsError::invalid("shape", format!("expected at least 2 dimensions, got {:?}", key.shape))
        })?;

        let identifier = format!(
            "TileGrid_{}_{}_{:08x}",
            width,
            height,
            crc32fast::hash(format!("{}_{}", extent.cache_key(), tile_size).as_bytes())
        );
        let xyz = matrix_set_for_dataset(
            identifier.clone(),
            (width, height),
            extent,
            tile_size,
            TileConvention::Xyz,
        )?;
        let tms = matrix_set_for_dataset(
            format!("{}_tms", identifier),
            (width, height),
            extent,
            tile_size,
            TileConvention::Tms,
        )?;

        Ok(Self {
            key,
            extent,
            width,
            height,
            tile_size,
            xyz,
            tms,
        })
    }

    /// Identifier of the set advertised in capabilities documents.
    pub fn identifier(&self) -> &str {
        &self.xyz.identifier
    }

    pub fn matrix_set(&self, convention: TileConvention) -> &TileMatrixSet {
        match convention {
            TileConvention::Xyz => &self.xyz,
            TileConvention::Tms => &self.tms,
        }
    }

    /// Look up one of this grid's matrix sets by identifier.
    pub fn matrix_set_by_id(&self, identifier: &str) -> WmtsResult<&TileMatrixSet> {
        [&self.xyz, &self.tms]
            .into_iter()
            .find(|set| set.identifier == identifier)
            .ok_or_else(|| WmtsError::UnknownTileMatrixSet(identifier.to_string()))
    }

    pub fn num_levels(&self) -> u32 {
        self.xyz.tile_matrices.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TileGridKey {
        TileGridKey::new("/data/cube.zarr", vec![3, 180, 360], vec![1, 90, 90])
    }

    #[test]
    fn test_grid_builds_both_conventions() {
        let grid = TileGrid::new(key(), BoundingBox::new(-180.0, -90.0, 180.0, 90.0), 256).unwrap();
        assert_eq!((grid.width, grid.height), (360, 180));
        assert!(grid.identifier().starts_with("TileGrid_360_180_"));
        assert_eq!(grid.xyz.tile_matrices.len(), grid.tms.tile_matrices.len());
        assert_eq!(grid.tms.convention, TileConvention::Tms);
    }

    #[test]
    fn test_identifier_depends_on_extent() {
        let a = TileGrid::new(key(), BoundingBox::new(-180.0, -90.0, 180.0, 90.0), 256).unwrap();
        let b = TileGrid::new(key(), BoundingBox::new(0.0, 0.0, 20.0, 10.0), 256).unwrap();
        assert_ne!(a.identifier(), b.identifier());
    }

    #[test]
    fn test_matrix_set_lookup() {
        let grid = TileGrid::new(key(), BoundingBox::new(-180.0, -90.0, 180.0, 90.0), 256).unwrap();
        let id = grid.identifier().to_string();
        assert_eq!(grid.matrix_set_by_id(&id).unwrap().convention, TileConvention::Xyz);
        assert_eq!(
            grid.matrix_set_by_id("WebMercatorQuad"),
            Err(WmtsError::UnknownTileMatrixSet("WebMercatorQuad".into()))
        );
    }

    #[test]
    fn test_key_requires_spatial_dims() {
        let key = TileGridKey::new("p", vec![5], vec![5]);
        assert!(TileGrid::new(key, BoundingBox::new(0.0, 0.0, 1.0, 1.0), 256).is_err());
    }
}
