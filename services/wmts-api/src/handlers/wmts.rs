//! WMTS (Web Map Tile Service) request handlers.
//!
//! Supports three access patterns that all end in the same tile pipeline:
//! - KVP (Key-Value Pair): standard query parameter format
//! - RESTful: URL path-based format below `/wmts/`
//! - XYZ: simplified tile URLs for web mapping libraries

use axum::{
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use wmts_common::{LayerId, TileConvention, WmtsError, WmtsResult};
use wmts_protocol::{
    parse_tile_file, TileOptions, TileRequest, WmtsKvpParams, WmtsRequest, WmtsRestPath,
};

use super::common::{base_url, png_response, wmts_error_response, xml_response, json_error_response};
use crate::capabilities::capabilities_xml;
use crate::rendering::render_tile;
use crate::state::AppState;

// ============================================================================
// WMTS Handler Entry Points
// ============================================================================

/// GET /wmts - WMTS KVP binding
#[instrument(skip(state, headers))]
pub async fn wmts_kvp_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    match WmtsKvpParams::from_query(params).into_request() {
        Ok(request) => dispatch(state, request, &headers).await,
        Err(e) => wmts_error_response(&e),
    }
}

/// GET /wmts/*path - WMTS RESTful binding
///
/// `/wmts/1.0.0/kvp` and `/wmts/kvp` carry the KVP binding.
#[instrument(skip(state, query, headers))]
pub async fn wmts_rest_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    if is_kvp_path(&path) {
        return wmts_kvp_handler(Extension(state), Query(query), headers).await;
    }

    let query: HashMap<String, String> = query.into_iter().collect();
    let request = WmtsRestPath::parse(&path)
        .and_then(|rest| Ok((rest, TileOptions::from_query(&query)?)))
        .and_then(|(rest, options)| rest.into_request(options));

    match request {
        Ok(request) => dispatch(state, request, &headers).await,
        Err(e) => wmts_error_response(&e),
    }
}

fn is_kvp_path(path: &str) -> bool {
    matches!(path.trim_matches('/'), "kvp" | "1.0.0/kvp")
}

/// GET /tile/:dataset/:variable/:z/:x/:y - XYZ tiles
///
/// `?convention=tms` counts rows from the bottom.
#[instrument(skip(state, query))]
pub async fn xyz_tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable, z, x, y)): Path<(String, String, String, u32, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = xyz_request(dataset, variable, &z, x, &y, &query);
    let result = match request {
        Ok(request) => render_tile(state, request).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(data) => png_response(data),
        Err(e) => json_error_response(&e),
    }
}

fn xyz_request(
    dataset: String,
    variable: String,
    z: &str,
    x: u32,
    y: &str,
    query: &HashMap<String, String>,
) -> WmtsResult<TileRequest> {
    let (row, format) = parse_tile_file("y", y)?;
    let options = TileOptions::from_query(query)?;
    let mut request = TileRequest::new(LayerId::new(dataset, variable), z, row, x, format, options)?;
    if let Some(convention) = query.get("convention") {
        request.convention = convention.parse::<TileConvention>()?;
    }
    Ok(request)
}

// ============================================================================
// Dispatch
// ============================================================================

async fn dispatch(state: Arc<AppState>, request: WmtsRequest, headers: &HeaderMap) -> Response {
    match request {
        WmtsRequest::GetCapabilities => match capabilities_xml(state, base_url(headers)).await {
            Ok(xml) => xml_response(xml),
            Err(e) => wmts_error_response(&e),
        },
        WmtsRequest::GetTile(tile) => {
            debug!(
                layer = %tile.layer,
                level = tile.level,
                row = tile.row,
                col = tile.col,
                "GetTile"
            );
            match render_tile(state, tile).await {
                Ok(data) => png_response(data),
                Err(e) => wmts_error_response(&e),
            }
        }
        WmtsRequest::GetFeatureInfo => wmts_error_response(&WmtsError::NotImplemented(
            "GetFeatureInfo".to_string(),
        )),
    }
}
