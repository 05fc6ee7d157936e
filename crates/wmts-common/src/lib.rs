//! Common types shared across the gridded-data tile server crates.

pub mod bbox;
pub mod error;
pub mod grid;
pub mod layer;
pub mod tile;
pub mod time;

pub use bbox::BoundingBox;
pub use error::{WmtsError, WmtsResult};
pub use grid::{TileGrid, TileGridKey, DEFAULT_TILE_SIZE};
pub use layer::LayerId;
pub use tile::{
    matrix_set_for_dataset, nearest_index, TileConvention, TileMatrix, TileMatrixSet,
};
pub use time::{CfTimeUnits, TimeSelector};
