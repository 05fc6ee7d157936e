//! OGC WMTS 1.0.0 protocol implementation.
//!
//! Both the KVP and the RESTful binding are parsed into the same
//! [`WmtsRequest`] model; GetTile requests become a [`TileRequest`].

pub mod capabilities;
pub mod exception;
pub mod request;

pub use capabilities::{
    ServiceInfo, WmtsCapabilitiesBuilder, WmtsDimensionInfo, WmtsLayerInfo, WmtsThemeInfo,
};
pub use exception::wmts_exception;
pub use request::{
    parse_tile_file, TileFormat, TileOptions, TileRequest, WmtsKvpParams, WmtsRequest,
    WmtsRestPath, WMTS_VERSION,
};
