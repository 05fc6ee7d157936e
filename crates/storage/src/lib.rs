//! Data access for the tile server.
//!
//! Provides:
//! - The [`DataSource`] boundary with Zarr (filesystem) and in-memory backends
//! - The dataset cache: shared, reference-counted open datasets with idle eviction
//! - A content-addressed cache of tile grids

pub mod cache;
pub mod dataset;
pub mod error;
pub mod grid_cache;
pub mod memory;
pub mod source;
pub mod testdata;
pub mod zarr;

pub use cache::{
    DatasetCache, DatasetCacheStats, DatasetHandle, DatasetOpener, SourceOpener, DEFAULT_IDLE_TIMEOUT,
};
pub use dataset::{DatasetDescriptor, OpenDataset, SourceFormat};
pub use error::SourceError;
pub use grid_cache::{GridCacheStats, TileGridCache};
pub use memory::MemorySource;
pub use source::{CoordinateArray, DataSource, Dimension, Slice, VariableInfo};
pub use zarr::ZarrSource;
