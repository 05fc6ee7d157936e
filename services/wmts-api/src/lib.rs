//! WMTS tile server for gridded time series datasets.
//!
//! Datasets with `time`, `lat` and `lon` dimensions are published as WMTS
//! layers (one per data variable) and rendered to PNG tiles on demand.

pub mod capabilities;
pub mod config;
pub mod handlers;
pub mod maintenance;
pub mod metrics;
pub mod rendering;
pub mod routes;
pub mod state;
pub mod tile_cache;
pub mod tilegrid;
pub mod timeseries;

pub use config::ServiceConfig;
pub use routes::build_router;
pub use state::{AppState, StateOptions};
