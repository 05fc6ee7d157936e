//! In-memory LRU cache for tile grids.
//!
//! Grids are content-addressed by [`TileGridKey`] (path, array shape, chunk
//! shape), so datasets configured under different names but backed by the
//! same resource share one geometry. Computation happens outside the lock;
//! two callers racing on the same key both compute and the last insert wins.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;
use wmts_common::{BoundingBox, TileGrid, TileGridKey, WmtsResult};

/// Default number of grids kept.
pub const DEFAULT_GRID_CACHE_CAPACITY: usize = 256;

/// Statistics for the tile grid cache
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GridCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of grid computations performed
    pub computations: u64,
    pub entries: usize,
}

impl GridCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub struct TileGridCache {
    cache: Mutex<LruCache<TileGridKey, Arc<TileGrid>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    capacity: usize,
}

impl TileGridCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let cache_size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Mutex::new(LruCache::new(cache_size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn get(&self, key: &TileGridKey) -> Option<Arc<TileGrid>> {
        self.cache.lock().get(key).cloned()
    }

    /// Return the cached grid for `key`, computing it on a miss.
    ///
    /// A cached grid built for a different tile size is recomputed.
    pub fn get_or_compute(
        &self,
        key: &TileGridKey,
        extent: BoundingBox,
        tile_size: u32,
    ) -> WmtsResult<Arc<TileGrid>> {
        if let Some(grid) = self.get(key).filter(|g| g.tile_size == tile_size) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(grid);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let grid = Arc::new(TileGrid::new(key.clone(), extent, tile_size)?);
        self.computations.fetch_add(1, Ordering::Relaxed);
        debug!(
            path = %key.path,
            identifier = %grid.identifier(),
            levels = grid.num_levels(),
            "computed tile grid"
        );

        self.cache.lock().put(key.clone(), grid.clone());
        Ok(grid)
    }

    pub fn stats(&self) -> GridCacheStats {
        GridCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for TileGridCache {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> TileGridKey {
        TileGridKey::new(path, vec![3, 180, 360], vec![1, 90, 90])
    }

    fn global() -> BoundingBox {
        BoundingBox::new(-180.0, -90.0, 180.0, 90.0)
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = TileGridCache::new(10);
        assert!(cache.get(&key("a.zarr")).is_none());

        let first = cache.get_or_compute(&key("a.zarr"), global(), 256).unwrap();
        let second = cache.get_or_compute(&key("a.zarr"), global(), 256).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_tile_size_change_recomputes() {
        let cache = TileGridCache::new(10);
        cache.get_or_compute(&key("a.zarr"), global(), 256).unwrap();
        let grid = cache.get_or_compute(&key("a.zarr"), global(), 512).unwrap();
        assert_eq!(grid.tile_size, 512);
        assert_eq!(cache.stats().computations, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = TileGridCache::new(2);
        for i in 0..3 {
            cache
                .get_or_compute(&key(&format!("cube_{}.zarr", i)), global(), 256)
                .unwrap();
        }
        assert!(cache.get(&key("cube_0.zarr")).is_none());
        assert!(cache.get(&key("cube_1.zarr")).is_some());
        assert!(cache.get(&key("cube_2.zarr")).is_some());
    }

    #[test]
    fn test_invalid_shape_is_not_cached() {
        let cache = TileGridCache::new(2);
        let bad = TileGridKey::new("flat.zarr", vec![5], vec![5]);
        assert!(cache.get_or_compute(&bad, global(), 256).is_err());
        assert!(cache.is_empty());
    }
}
