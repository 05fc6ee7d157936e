//! In-memory LRU cache for rendered tiles.
//!
//! Entries are keyed by everything that influences the encoded bytes,
//! including the configuration generation, so tiles rendered before a reload
//! are never served afterwards. They simply age out of the LRU.

use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use wmts_common::TileConvention;

/// Identity of an encoded tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub generation: u64,
    pub dataset: String,
    pub variable: String,
    pub time_index: usize,
    pub convention: TileConvention,
    pub level: u32,
    pub row: u32,
    pub col: u32,
    pub color_bar: String,
    /// `f64::to_bits` of the value range
    pub vmin_bits: u64,
    pub vmax_bits: u64,
}

/// Statistics for the tile cache.
///
/// All fields are atomic for lock-free reads from metrics endpoints.
#[derive(Default)]
pub struct TileCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    /// Current cache size in bytes
    pub size_bytes: AtomicU64,
    pub entry_count: AtomicU64,
}

impl TileCacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

/// Entry-bounded LRU of encoded tiles. A capacity of zero disables caching.
pub struct TileCache {
    cache: Option<Arc<RwLock<LruCache<TileCacheKey, Bytes>>>>,
    stats: Arc<TileCacheStats>,
}

impl TileCache {
    pub fn new(capacity: usize) -> Self {
        let cache = NonZeroUsize::new(capacity).map(|cap| Arc::new(RwLock::new(LruCache::new(cap))));
        if cache.is_some() {
            info!(capacity, "Initializing tile cache");
        } else {
            info!("Tile cache disabled");
        }
        Self {
            cache,
            stats: Arc::new(TileCacheStats::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub async fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.write().await;

        match cache.get(key) {
            Some(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                counter!("wmts_tile_cache_hits_total").increment(1);
                Some(data.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: TileCacheKey, data: Bytes) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let size = data.len() as u64;
        let mut cache = cache.write().await;

        match cache.push(key, data) {
            // Same key replaced
            Some((old_key, old)) if cache.contains(&old_key) => {
                self.stats.size_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
            }
            // Least recently used entry evicted
            Some((_, old)) => {
                self.stats.size_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.size_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub async fn clear(&self) {
        if let Some(cache) = self.cache.as_ref() {
            cache.write().await.clear();
            self.stats.size_bytes.store(0, Ordering::Relaxed);
            self.stats.entry_count.store(0, Ordering::Relaxed);
        }
    }

    pub async fn len(&self) -> usize {
        match self.cache.as_ref() {
            Some(cache) => cache.read().await.len(),
            None => 0,
        }
    }

    pub fn stats(&self) -> &TileCacheStats {
        &self.stats
    }
}
