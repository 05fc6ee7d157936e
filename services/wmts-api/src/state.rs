//! Application state and shared resources.
//!
//! The configured dataset set lives in an immutable [`ConfigSnapshot`] that
//! is swapped atomically on reload. Requests load the snapshot once and use
//! it throughout, so a response never mixes two configurations.

use anyhow::Result;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use storage::{
    DatasetCache, DatasetDescriptor, DatasetHandle, DatasetOpener, SourceOpener, TileGridCache,
    VariableInfo,
};
use wmts_common::{TileGrid, WmtsError, WmtsResult};

use crate::capabilities::CapabilitiesCache;
use crate::config::ServiceConfig;
use crate::metrics::MetricsCollector;
use crate::tile_cache::TileCache;

/// Default number of cached tile grids.
pub const DEFAULT_GRID_CACHE_CAPACITY: usize = storage::grid_cache::DEFAULT_GRID_CACHE_CAPACITY;

/// One immutable view of the service configuration.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub config: ServiceConfig,
    /// Increases with every applied configuration
    pub generation: u64,
    pub descriptors: Vec<DatasetDescriptor>,
}

impl ConfigSnapshot {
    fn new(config: ServiceConfig, generation: u64) -> Self {
        let descriptors = config.descriptors();
        Self {
            config,
            generation,
            descriptors,
        }
    }

    pub fn descriptor(&self, identifier: &str) -> WmtsResult<&DatasetDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.identifier == identifier)
            .ok_or_else(|| WmtsError::not_found(format!("dataset '{}'", identifier)))
    }
}

/// Sizing of the process-wide caches.
#[derive(Debug, Clone, Copy)]
pub struct StateOptions {
    /// Rendered tiles kept in memory, 0 disables the cache
    pub tile_cache_size: usize,
    pub grid_cache_capacity: usize,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            tile_cache_size: 1024,
            grid_cache_capacity: DEFAULT_GRID_CACHE_CAPACITY,
        }
    }
}

/// Shared application state.
pub struct AppState {
    snapshot: ArcSwap<ConfigSnapshot>,
    generation: AtomicU64,
    pub datasets: DatasetCache,
    pub grids: TileGridCache,
    pub tiles: TileCache,
    pub capabilities: CapabilitiesCache,
    pub metrics: MetricsCollector,
    config_path: Option<PathBuf>,
    config_mtime: Mutex<Option<SystemTime>>,
}

impl AppState {
    pub fn new(config: ServiceConfig, options: StateOptions) -> Self {
        Self::with_opener(config, options, Arc::new(SourceOpener))
    }

    /// State backed by a custom dataset opener.
    pub fn with_opener(
        config: ServiceConfig,
        options: StateOptions,
        opener: Arc<dyn DatasetOpener>,
    ) -> Self {
        let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
        Self {
            snapshot: ArcSwap::from_pointee(ConfigSnapshot::new(config, 1)),
            generation: AtomicU64::new(1),
            datasets: DatasetCache::new(opener, idle_timeout),
            grids: TileGridCache::new(options.grid_cache_capacity),
            tiles: TileCache::new(options.tile_cache_size),
            capabilities: CapabilitiesCache::new(),
            metrics: MetricsCollector::new(),
            config_path: None,
            config_mtime: Mutex::new(None),
        }
    }

    /// Load the configuration file and remember it for reloads.
    pub fn from_path(path: &Path, options: StateOptions) -> Result<Self> {
        let mtime = modified(path);
        let config = ServiceConfig::load(path)?;
        let mut state = Self::new(config, options);
        state.config_path = Some(path.to_path_buf());
        *state.config_mtime.get_mut() = mtime;
        Ok(state)
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Swap in a new configuration.
    ///
    /// Datasets that disappeared or changed are retired from the dataset
    /// cache and close once their last handle is released.
    pub fn apply_config(&self, config: ServiceConfig) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(ConfigSnapshot::new(config, generation));
        // Publish first so no request acquires a stale descriptor after retain
        self.snapshot.store(snapshot.clone());
        let retired = self.datasets.retain(&snapshot.descriptors);
        let datasets = snapshot.descriptors.len();

        info!(generation, datasets, retired, "Applied configuration");
        generation
    }

    /// Re-read the configuration file. Returns the new generation, or `None`
    /// when no file is configured.
    pub fn reload(&self) -> Result<Option<u64>> {
        let Some(path) = self.config_path.as_deref() else {
            return Ok(None);
        };
        let mtime = modified(path);
        let config = ServiceConfig::load(path)?;
        *self.config_mtime.lock() = mtime;
        Ok(Some(self.apply_config(config)))
    }

    /// Reload when the configuration file's modification time changed.
    ///
    /// A file that fails to parse keeps the current snapshot.
    pub fn reload_if_changed(&self) -> Option<u64> {
        let path = self.config_path.as_deref()?;
        let mtime = modified(path);
        if mtime.is_none() || mtime == *self.config_mtime.lock() {
            return None;
        }

        match self.reload() {
            Ok(generation) => generation,
            Err(e) => {
                // Do not retry the same broken file on every poll
                *self.config_mtime.lock() = mtime;
                warn!(path = ?path, error = %format!("{:#}", e), "Config reload failed, keeping current configuration");
                None
            }
        }
    }

    /// Acquire the open dataset for a configured identifier.
    pub fn acquire(&self, snapshot: &ConfigSnapshot, identifier: &str) -> WmtsResult<DatasetHandle> {
        let descriptor = snapshot.descriptor(identifier)?;
        self.datasets.acquire(descriptor).map_err(|e| {
            if e.is_open_failure() {
                WmtsError::unavailable(identifier, e)
            } else {
                e.into()
            }
        })
    }

    /// Tile grid for a variable of an open dataset.
    pub fn tile_grid(
        &self,
        snapshot: &ConfigSnapshot,
        dataset: &DatasetHandle,
        variable: &VariableInfo,
    ) -> WmtsResult<Arc<TileGrid>> {
        self.grids.get_or_compute(
            &dataset.tile_grid_key(variable),
            dataset.extent,
            snapshot.config.tile_size,
        )
    }

    /// Close datasets idle for longer than the configured timeout.
    pub fn evict_idle(&self) -> usize {
        self.datasets.evict_idle()
    }

    pub fn shutdown(&self) {
        self.datasets.close_all();
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use storage::SourceFormat;

    fn memory_config(ids: &[&str]) -> ServiceConfig {
        ServiceConfig {
            datasets: ids
                .iter()
                .map(|id| DatasetConfig {
                    identifier: id.to_string(),
                    title: None,
                    path: format!("mem-{}", id),
                    format: SourceFormat::Memory,
                    style: None,
                })
                .collect(),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_unknown_dataset_is_not_found() {
        let state = AppState::new(memory_config(&["demo"]), StateOptions::default());
        let snapshot = state.snapshot();
        let err = state.acquire(&snapshot, "ghost").unwrap_err();
        assert_eq!(err.http_status_code(), 404);
    }

    #[test]
    fn test_apply_config_retires_removed_datasets() {
        let state = AppState::new(memory_config(&["a", "b"]), StateOptions::default());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.generation, 1);

        let handle = state.acquire(&snapshot, "a").unwrap();
        assert!(state.datasets.is_open("a"));

        let generation = state.apply_config(memory_config(&["b"]));
        assert_eq!(generation, 2);
        assert!(state.snapshot().descriptor("a").is_err());

        // The old snapshot still resolves for in-flight requests
        assert!(snapshot.descriptor("a").is_ok());
        assert_eq!(state.datasets.stats().closes, 0);
        drop(handle);
        assert_eq!(state.datasets.stats().closes, 1);
        assert!(!state.datasets.is_open("a"));
    }

    #[test]
    fn test_apply_config_reopens_changed_dataset() {
        let state = AppState::new(memory_config(&["a"]), StateOptions::default());
        let old = state.acquire(&state.snapshot(), "a").unwrap();

        let mut changed = memory_config(&["a"]);
        changed.datasets[0].path = "mem-a-v2".to_string();
        state.apply_config(changed);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.generation, 2);
        let new = state.acquire(&snapshot, "a").unwrap();
        assert_eq!(new.descriptor.path, "mem-a-v2");
        assert!(!new.same_dataset(&old));
        assert_eq!(old.descriptor.path, "mem-a");

        drop(old);
        assert_eq!(state.datasets.stats().closes, 1);
        assert!(state.datasets.is_open("a"));
    }

    #[test]
    fn test_reload_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wmts.yaml");
        std::fs::write(&path, "Datasets:\n  - {Identifier: a, Path: x, Format: memory}\n").unwrap();

        let state = AppState::from_path(&path, StateOptions::default()).unwrap();
        assert_eq!(state.reload_if_changed(), None);

        std::fs::write(&path, "Datasets:\n  - {Identifier: b, Path: x, Format: memory}\n").unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(state.reload_if_changed(), Some(2));
        assert!(state.snapshot().descriptor("b").is_ok());

        // A broken file keeps the previous snapshot
        std::fs::write(&path, "Datasets: [").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later + Duration::from_secs(5))
            .unwrap();
        assert_eq!(state.reload_if_changed(), None);
        assert_eq!(state.snapshot().generation, 2);
    }
}
