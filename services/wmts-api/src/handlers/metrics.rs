//! Health checks, metrics, and the configuration reload trigger.

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use wmts_common::WmtsError;

use super::common::{blocking, ApiResult};
use crate::state::AppState;

// ============================================================================
// Health Checks
// ============================================================================

/// GET /health - Basic health check
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ============================================================================
// Prometheus Metrics
// ============================================================================

/// GET /metrics - Prometheus metrics endpoint
///
/// Recorder output followed by gauges read from the caches.
#[instrument(skip(state, prometheus))]
pub async fn metrics_handler(
    Extension(state): Extension<Arc<AppState>>,
    prometheus: Option<Extension<PrometheusHandle>>,
) -> Response {
    let mut output = prometheus.map(|Extension(h)| h.render()).unwrap_or_default();

    let datasets = state.datasets.stats();
    let grids = state.grids.stats();
    let tiles = state.tiles.stats();
    let gauges = [
        ("wmts_datasets_open", "Datasets currently open", datasets.open as f64),
        ("wmts_dataset_closes", "Datasets closed since start", datasets.closes as f64),
        ("wmts_dataset_open_failures", "Failed dataset opens since start", datasets.open_failures as f64),
        ("wmts_tile_grid_cache_entries", "Cached tile grids", grids.entries as f64),
        ("wmts_tile_grid_computations", "Tile grids computed since start", grids.computations as f64),
        ("wmts_tile_cache_entries", "Cached tiles", tiles.entry_count() as f64),
        ("wmts_tile_cache_size_bytes", "Bytes held by the tile cache", tiles.size_bytes() as f64),
        ("wmts_tile_cache_hit_rate", "Tile cache hit rate in percent", tiles.hit_rate()),
        ("wmts_config_generation", "Generation of the active configuration", state.snapshot().generation as f64),
    ];
    for (name, help, value) in gauges {
        output.push_str(&format!(
            "# HELP {0} {1}\n# TYPE {0} gauge\n{0} {2}\n",
            name, help, value
        ));
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
        .into_response()
}

/// GET /api/metrics - JSON view of the service counters
pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let datasets = state.datasets.stats();
    let grids = state.grids.stats();
    let tiles = state.tiles.stats();
    Json(json!({
        "requests": state.metrics.snapshot(),
        "datasets": {
            "open": datasets.open,
            "opens": datasets.opens,
            "open_failures": datasets.open_failures,
            "closes": datasets.closes,
            "evictions": datasets.evictions,
        },
        "tile_grids": {
            "entries": grids.entries,
            "hits": grids.hits,
            "misses": grids.misses,
            "computations": grids.computations,
        },
        "tile_cache": {
            "enabled": state.tiles.is_enabled(),
            "entries": tiles.entry_count(),
            "size_bytes": tiles.size_bytes(),
            "hit_rate": tiles.hit_rate(),
        },
        "config_generation": state.snapshot().generation,
    }))
}

// ============================================================================
// Configuration
// ============================================================================

/// POST /admin/reload - re-read the configuration file
#[instrument(skip(state))]
pub async fn reload_handler(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let reloaded = {
        let state = state.clone();
        blocking(move || {
            state
                .reload()
                .map_err(|e| WmtsError::Internal(format!("config reload failed: {:#}", e)))
        })
        .await?
    };

    match reloaded {
        Some(generation) => {
            state.capabilities.invalidate().await;
            info!(generation, "Configuration reloaded on request");
            Ok(Json(json!({ "reloaded": true, "generation": generation })))
        }
        None => Ok(Json(json!({
            "reloaded": false,
            "generation": state.snapshot().generation,
        }))),
    }
}
