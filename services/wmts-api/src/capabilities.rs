//! WMTS capabilities generation and caching.
//!
//! The document is built from one configuration snapshot and cached per
//! snapshot generation, so a reload can never serve layers of an older
//! configuration.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use wmts_common::time::format_iso8601;
use wmts_common::{LayerId, WmtsError, WmtsResult};
use wmts_protocol::{
    ServiceInfo, TileFormat, WmtsCapabilitiesBuilder, WmtsDimensionInfo, WmtsLayerInfo,
    WmtsThemeInfo,
};

use crate::state::{AppState, ConfigSnapshot};

/// Cached capabilities document with the generation it was built for.
struct CachedCapabilities {
    generation: u64,
    base_url: String,
    xml: String,
    generated_at: Instant,
}

/// Cache for the WMTS capabilities document.
///
/// Entries are only valid for the configuration generation and base URL they
/// were generated for.
pub struct CapabilitiesCache {
    wmts_xml: RwLock<Option<CachedCapabilities>>,
}

impl Default for CapabilitiesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilitiesCache {
    pub fn new() -> Self {
        Self {
            wmts_xml: RwLock::new(None),
        }
    }

    pub async fn get(&self, generation: u64, base_url: &str) -> Option<String> {
        let guard = self.wmts_xml.read().await;
        let cached = guard.as_ref()?;
        if cached.generation == generation && cached.base_url == base_url {
            debug!(generation, age_ms = cached.generated_at.elapsed().as_millis() as u64, "WMTS capabilities cache hit");
            return Some(cached.xml.clone());
        }
        None
    }

    pub async fn set(&self, generation: u64, base_url: &str, xml: String) {
        let mut guard = self.wmts_xml.write().await;
        // Never replace a newer document with an older one
        if guard.as_ref().is_some_and(|c| c.generation > generation) {
            return;
        }
        *guard = Some(CachedCapabilities {
            generation,
            base_url: base_url.to_string(),
            xml,
            generated_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        *self.wmts_xml.write().await = None;
        debug!("Capabilities cache invalidated");
    }
}

/// A built capabilities document.
#[derive(Debug, Clone)]
pub struct CapabilitiesDocument {
    pub xml: String,
    /// Datasets and variables left out because they failed to open
    pub skipped: usize,
}

impl CapabilitiesDocument {
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }
}

/// Build the capabilities document for a snapshot. Blocking: opens datasets.
///
/// Layers are ordered by dataset identifier, then variable name. Datasets
/// that fail to open are left out and counted in `skipped`.
pub fn build_capabilities(state: &AppState, snapshot: &ConfigSnapshot, base_url: &str) -> CapabilitiesDocument {
    let config = &snapshot.config;
    let mut builder = WmtsCapabilitiesBuilder::new(ServiceInfo {
        title: config.title.clone(),
        abstract_text: config.r#abstract.clone(),
        provider_name: config.service_provider.provider_name.clone(),
        provider_site: config.service_provider.provider_site.clone(),
        base_url: base_url.trim_end_matches('/').to_string(),
    });

    let mut skipped = 0;
    let mut descriptors: Vec<_> = snapshot.descriptors.iter().collect();
    descriptors.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    for descriptor in descriptors {
        let dataset = match state.datasets.acquire(descriptor) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(dataset = %descriptor.identifier, error = %e, "leaving dataset out of capabilities");
                skipped += 1;
                continue;
            }
        };

        let time = WmtsDimensionInfo {
            identifier: "time".to_string(),
            title: "time".to_string(),
            uom: "ISO8601".to_string(),
            default: "current".to_string(),
            current: true,
            values: dataset.times.iter().map(|&t| format_iso8601(t)).collect(),
        };

        let mut theme_layers = Vec::new();
        for variable in &dataset.variables {
            let grid = match state.tile_grid(snapshot, &dataset, variable) {
                Ok(grid) => grid,
                Err(e) => {
                    warn!(dataset = %descriptor.identifier, variable = %variable.name, error = %e, "no tile grid for variable");
                    skipped += 1;
                    continue;
                }
            };

            let layer = LayerId::new(&descriptor.identifier, &variable.name);
            builder.layers.push(WmtsLayerInfo {
                layer: layer.clone(),
                title: variable.title().to_string(),
                abstract_text: variable.units.clone().unwrap_or_default(),
                bounding_box: dataset.extent,
                formats: vec![TileFormat::Png],
                tile_matrix_set: grid.identifier().to_string(),
                dimensions: vec![time.clone()],
            });
            builder.tile_matrix_sets.push(grid.xyz.clone());
            theme_layers.push((layer, variable.title().to_string()));
        }

        builder.themes.push(WmtsThemeInfo {
            identifier: descriptor.identifier.clone(),
            title: descriptor.title().to_string(),
            abstract_text: String::new(),
            layers: theme_layers,
        });
    }

    CapabilitiesDocument {
        xml: builder.build(),
        skipped,
    }
}

/// Capabilities for the current snapshot, from cache when possible.
///
/// Documents missing a dataset are served but not cached, so the next
/// request retries the failed datasets.
pub async fn capabilities_xml(state: Arc<AppState>, base_url: String) -> WmtsResult<String> {
    state.metrics.record_capabilities();
    let snapshot = state.snapshot();
    if let Some(xml) = state.capabilities.get(snapshot.generation, &base_url).await {
        return Ok(xml);
    }

    let document = {
        let state = state.clone();
        let snapshot = snapshot.clone();
        let base_url = base_url.clone();
        tokio::task::spawn_blocking(move || build_capabilities(&state, &snapshot, &base_url))
            .await
            .map_err(|e| WmtsError::Internal(format!("capabilities task failed: {}", e)))?
    };

    if document.is_complete() {
        state.capabilities.set(snapshot.generation, &base_url, document.xml.clone()).await;
    } else {
        debug!(skipped = document.skipped, "not caching incomplete capabilities");
    }
    Ok(document.xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetConfig, ServiceConfig};
    use crate::state::StateOptions;
    use storage::SourceFormat;

    fn dataset(identifier: &str, path: &str, format: SourceFormat) -> DatasetConfig {
        DatasetConfig {
            identifier: identifier.into(),
            title: None,
            path: path.into(),
            format,
            style: None,
        }
    }

    // ========================================================================
    // Document caching
    // ========================================================================

    #[tokio::test]
    async fn test_cache_is_keyed_by_generation_and_url() {
        let cache = CapabilitiesCache::new();
        cache.set(1, "http://a", "<one/>".into()).await;
        assert_eq!(cache.get(1, "http://a").await.as_deref(), Some("<one/>"));
        assert!(cache.get(2, "http://a").await.is_none());
        assert!(cache.get(1, "http://b").await.is_none());

        cache.set(2, "http://a", "<two/>".into()).await;
        cache.set(1, "http://a", "<stale/>".into()).await;
        assert_eq!(cache.get(2, "http://a").await.as_deref(), Some("<two/>"));

        cache.invalidate().await;
        assert!(cache.get(2, "http://a").await.is_none());
    }

    #[tokio::test]
    async fn test_complete_document_is_cached() {
        let config = ServiceConfig {
            datasets: vec![dataset("demo", "demo", SourceFormat::Memory)],
            ..ServiceConfig::default()
        };
        let state = Arc::new(AppState::new(config, StateOptions::default()));
        let generation = state.snapshot().generation;

        let xml = capabilities_xml(state.clone(), "http://a".into()).await.unwrap();
        assert!(xml.contains("demo.conc_chl"));
        assert_eq!(state.capabilities.get(generation, "http://a").await, Some(xml));
    }

    #[tokio::test]
    async fn test_document_missing_a_dataset_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.zarr");
        let config = ServiceConfig {
            datasets: vec![
                dataset("broken", &missing.to_string_lossy(), SourceFormat::Zarr),
                dataset("demo", "demo", SourceFormat::Memory),
            ],
            ..ServiceConfig::default()
        };
        let state = Arc::new(AppState::new(config, StateOptions::default()));
        let snapshot = state.snapshot();

        let document = build_capabilities(&state, &snapshot, "http://a");
        assert_eq!(document.skipped, 1);
        assert!(!document.is_complete());
        assert!(document.xml.contains("demo.conc_chl"));
        assert!(!document.xml.contains("broken."));

        let xml = capabilities_xml(state.clone(), "http://a".into()).await.unwrap();
        assert_eq!(xml, document.xml);
        assert!(state.capabilities.get(snapshot.generation, "http://a").await.is_none());
    }
}
