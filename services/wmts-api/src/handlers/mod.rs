//! HTTP request handlers.
//!
//! - `wmts`: WMTS GetCapabilities and GetTile (KVP, REST) plus the XYZ tile route
//! - `api`: dataset, coordinate, color bar, tile grid and time series views
//! - `metrics`: health, Prometheus metrics and the reload trigger
//! - `common`: response helpers shared by all handlers

pub mod api;
pub mod common;
pub mod metrics;
pub mod wmts;

pub use api::{
    colorbar_legend_handler, colorbars_handler, coords_handler, datasets_handler,
    service_info_handler, tilegrid_handler, time_series_info_handler, time_series_point_handler,
    variables_handler,
};
pub use metrics::{health_handler, metrics_handler, reload_handler, status_handler};
pub use wmts::{wmts_kvp_handler, wmts_rest_handler, xyz_tile_handler};
