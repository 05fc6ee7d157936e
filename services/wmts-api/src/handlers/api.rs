//! Read-only JSON views over the configured datasets and color bars.

use axum::{
    extract::{Extension, Path, Query},
    http::HeaderMap,
    response::Response,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use renderer::legend::{list_color_bars, render_legend, ColorBarInfo, LEGEND_HEIGHT, LEGEND_WIDTH};
use renderer::ColorBar;
use storage::source::TIME_DIM;
use wmts_common::time::format_iso8601;
use wmts_common::{LayerId, WmtsError};

use super::common::{base_url, blocking, png_response, ApiResult};
use crate::state::AppState;
use crate::tilegrid::{ol4_options, tile_grid_json, Ol4SourceOptions, TileGridFormat};
use crate::timeseries::{point_time_series, time_series_info, PointQuery, TimeSeriesInfo, TimeSeriesResponse};

// ============================================================================
// Service and datasets
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ServiceInfoResponse {
    pub name: String,
    pub description: String,
    pub version: &'static str,
}

/// GET /
pub async fn service_info_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ServiceInfoResponse> {
    let snapshot = state.snapshot();
    Json(ServiceInfoResponse {
        name: snapshot.config.title.clone(),
        description: snapshot.config.r#abstract.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct DatasetsResponse {
    pub datasets: Vec<DatasetSummary>,
}

/// GET /datasets
pub async fn datasets_handler(Extension(state): Extension<Arc<AppState>>) -> Json<DatasetsResponse> {
    let snapshot = state.snapshot();
    let datasets = snapshot
        .descriptors
        .iter()
        .map(|d| DatasetSummary {
            name: d.identifier.clone(),
            title: d.title().to_string(),
        })
        .collect();
    Json(DatasetsResponse { datasets })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSummary {
    pub id: String,
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<u64>,
    pub units: Option<String>,
    pub title: String,
    pub tile_source_options: Ol4SourceOptions,
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub name: String,
    pub title: String,
    pub bbox: [f64; 4],
    pub variables: Vec<VariableSummary>,
}

/// GET /variables/:dataset
#[instrument(skip(state, headers))]
pub async fn variables_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(dataset): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<VariablesResponse>> {
    let base_url = base_url(&headers);
    let response = blocking(move || {
        let snapshot = state.snapshot();
        let handle = state.acquire(&snapshot, &dataset)?;
        let mut variables = Vec::with_capacity(handle.variables.len());
        for variable in &handle.variables {
            let grid = state.tile_grid(&snapshot, &handle, variable)?;
            let layer = LayerId::new(&dataset, &variable.name);
            variables.push(VariableSummary {
                id: layer.to_string(),
                name: variable.name.clone(),
                dims: variable.dims.clone(),
                shape: variable.shape.clone(),
                units: variable.units.clone(),
                title: variable.title().to_string(),
                tile_source_options: ol4_options(&grid, &base_url, &layer),
            });
        }
        Ok(VariablesResponse {
            name: dataset.clone(),
            title: handle.descriptor.title().to_string(),
            bbox: handle.extent.to_array(),
            variables,
        })
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct CoordinatesResponse {
    pub name: String,
    pub dtype: &'static str,
    pub values: Vec<Value>,
}

/// GET /coords/:dataset/:dim
#[instrument(skip(state))]
pub async fn coords_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, dim)): Path<(String, String)>,
) -> ApiResult<Json<CoordinatesResponse>> {
    let response = blocking(move || {
        let snapshot = state.snapshot();
        let handle = state.acquire(&snapshot, &dataset)?;
        let coords = handle.coordinate(&dim).ok_or_else(|| {
            WmtsError::not_found(format!("dimension '{}' in dataset '{}'", dim, dataset))
        })?;

        let (dtype, values) = if dim == TIME_DIM {
            let values = handle.times.iter().map(|&t| Value::from(format_iso8601(t))).collect();
            ("datetime", values)
        } else {
            ("float64", coords.values.iter().map(|&v| Value::from(v)).collect())
        };
        Ok(CoordinatesResponse {
            name: coords.name.clone(),
            dtype,
            values,
        })
    })
    .await?;
    Ok(Json(response))
}

// ============================================================================
// Color bars
// ============================================================================

/// GET /colorbars
pub async fn colorbars_handler() -> Json<Vec<ColorBarInfo>> {
    Json(list_color_bars())
}

/// GET /colorbars/:file - legend image, e.g. `/colorbars/viridis.png`
pub async fn colorbar_legend_handler(Path(file): Path<String>) -> ApiResult<Response> {
    let name = file.strip_suffix(".png").unwrap_or(&file);
    let bar = ColorBar::by_name(name)
        .map_err(|_| WmtsError::not_found(format!("color bar '{}'", name)))?;
    let png = render_legend(&bar, LEGEND_WIDTH, LEGEND_HEIGHT).map_err(WmtsError::from)?;
    Ok(png_response(png.into()))
}

// ============================================================================
// Tile grids
// ============================================================================

/// GET /tilegrid/:dataset/:variable/:format - `ol4` or `cesium`
#[instrument(skip(state, headers))]
pub async fn tilegrid_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable, format)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let format: TileGridFormat = format.parse()?;
    let base_url = base_url(&headers);
    let json = blocking(move || {
        let snapshot = state.snapshot();
        let handle = state.acquire(&snapshot, &dataset)?;
        let info = handle.variable(&variable).ok_or_else(|| {
            WmtsError::not_found(format!("variable '{}' in dataset '{}'", variable, dataset))
        })?;
        let grid = state.tile_grid(&snapshot, &handle, info)?;
        Ok(tile_grid_json(&grid, format, &base_url, &LayerId::new(&dataset, &variable))?)
    })
    .await?;
    Ok(Json(json))
}

// ============================================================================
// Time series
// ============================================================================

/// GET /ts
pub async fn time_series_info_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<TimeSeriesInfo>> {
    let info = blocking(move || {
        let snapshot = state.snapshot();
        Ok(time_series_info(&state, &snapshot))
    })
    .await?;
    Ok(Json(info))
}

/// GET /ts/:dataset/:variable/point?lat=&lon=&startDate=&endDate=
#[instrument(skip(state))]
pub async fn time_series_point_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((dataset, variable)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<TimeSeriesResponse>> {
    let point = PointQuery::from_query(&query)?;
    let response = blocking(move || {
        let snapshot = state.snapshot();
        let handle = state.acquire(&snapshot, &dataset)?;
        let no_data = snapshot
            .config
            .color_mapping_config(&dataset, &variable)
            .and_then(|c| c.no_data);
        point_time_series(&handle, &variable, &point, no_data)
    })
    .await?;
    Ok(Json(response))
}
