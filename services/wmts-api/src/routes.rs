//! HTTP routing.

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

/// Build the service router.
///
/// Without a Prometheus handle `/metrics` only reports the cache gauges.
pub fn build_router(state: Arc<AppState>, prometheus: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(handlers::service_info_handler))
        // WMTS endpoints (KVP)
        .route("/wmts", get(handlers::wmts_kvp_handler))
        // WMTS RESTful endpoints, KVP below /wmts/1.0.0/kvp
        .route("/wmts/*path", get(handlers::wmts_rest_handler))
        // Simple tile endpoints (XYZ/TMS style for easy integration)
        .route("/tile/:dataset/:variable/:z/:x/:y", get(handlers::xyz_tile_handler))
        .route("/tilegrid/:dataset/:variable/:format", get(handlers::tilegrid_handler))
        // Dataset API
        .route("/datasets", get(handlers::datasets_handler))
        .route("/variables/:dataset", get(handlers::variables_handler))
        .route("/coords/:dataset/:dimension", get(handlers::coords_handler))
        .route("/colorbars", get(handlers::colorbars_handler))
        .route("/colorbars/:file", get(handlers::colorbar_legend_handler))
        // Time series
        .route("/ts", get(handlers::time_series_info_handler))
        .route("/ts/:dataset/:variable/point", get(handlers::time_series_point_handler))
        // Health check and metrics
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/metrics", get(handlers::status_handler))
        .route("/admin/reload", post(handlers::reload_handler))
        .layer(Extension(state));

    let router = match prometheus {
        Some(handle) => router.layer(Extension(handle)),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
