//! Tile rendering pipeline.
//!
//! A tile request is first planned (dataset, variable, tile grid, time step
//! and color mapping resolved) and then rendered: the tile's pixel centres
//! are mapped to native cells per axis, the covering window is read from the
//! data source, sampled, colorized and encoded. Both phases may block on I/O
//! and run on the blocking pool.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use renderer::{colorize, png, ColorBar, ColorMapping};
use storage::DatasetHandle;
use wmts_common::{nearest_index, BoundingBox, WmtsError, WmtsResult};
use wmts_protocol::TileRequest;

use crate::metrics::TileOutcome;
use crate::state::{AppState, ConfigSnapshot};
use crate::tile_cache::TileCacheKey;

/// A tile request with every lookup resolved.
pub struct TilePlan {
    pub dataset: DatasetHandle,
    pub variable: String,
    /// `None` when the tile lies outside the pyramid
    pub extent: Option<BoundingBox>,
    pub time_index: usize,
    pub mapping: ColorMapping,
    pub tile_size: usize,
    pub cache_key: TileCacheKey,
}

/// Encoded tile plus whether it carries any data.
#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub data: Bytes,
    pub empty: bool,
}

/// Resolve everything a tile render needs.
///
/// Unknown datasets, variables, color bars and matrix sets fail. Tile indices
/// outside the pyramid do not: such tiles are planned as empty.
pub fn plan_tile(state: &AppState, snapshot: &ConfigSnapshot, request: &TileRequest) -> WmtsResult<TilePlan> {
    let layer = &request.layer;
    let dataset = state.acquire(snapshot, &layer.dataset)?;
    let variable = dataset.variable(&layer.variable).cloned().ok_or_else(|| {
        WmtsError::not_found(format!("variable '{}' in dataset '{}'", layer.variable, layer.dataset))
    })?;

    let mapping = snapshot.config.resolve_color_mapping(
        &layer.dataset,
        &layer.variable,
        &request.options,
        variable.fill_value,
    );
    ColorBar::by_name(&mapping.color_bar)?;
    mapping.validate()?;

    let grid = state.tile_grid(snapshot, &dataset, &variable)?;
    let matrix_set = match request.tile_matrix_set.as_deref() {
        Some(identifier) => grid.matrix_set_by_id(identifier)?,
        None => grid.matrix_set(request.convention),
    };
    let extent = match matrix_set.tile_extent(request.level, request.row, request.col) {
        Ok(extent) => Some(extent),
        Err(WmtsError::OutOfRange { level, row, col }) => {
            debug!(layer = %layer, level, row, col, "tile outside of the tile matrix set");
            None
        }
        Err(e) => return Err(e),
    };

    let time_index = request
        .options
        .time
        .resolve(&dataset.times)
        .ok_or_else(|| WmtsError::Internal(format!("dataset '{}' has no time steps", layer.dataset)))?;

    let cache_key = TileCacheKey {
        generation: snapshot.generation,
        dataset: layer.dataset.clone(),
        variable: layer.variable.clone(),
        time_index,
        convention: matrix_set.convention,
        level: request.level,
        row: request.row,
        col: request.col,
        color_bar: mapping.color_bar.clone(),
        vmin_bits: mapping.vmin.to_bits(),
        vmax_bits: mapping.vmax.to_bits(),
    };

    Ok(TilePlan {
        dataset,
        variable: variable.name,
        extent,
        time_index,
        mapping,
        tile_size: grid.tile_size as usize,
        cache_key,
    })
}

/// Render a planned tile. Blocking.
pub fn render_planned(plan: &TilePlan) -> WmtsResult<RenderedTile> {
    let size = plan.tile_size;
    let Some(extent) = plan.extent else {
        return empty_tile(size);
    };

    let dataset = &plan.dataset;
    let bounds = dataset.extent;
    let cols = sample_axis(&dataset.lon.values, extent.min_x, extent.width(), size, (bounds.min_x, bounds.max_x));
    let rows = sample_axis(&dataset.lat.values, extent.max_y, -extent.height(), size, (bounds.min_y, bounds.max_y));

    let (Some(lon_window), Some(lat_window)) = (index_window(&cols), index_window(&rows)) else {
        return empty_tile(size);
    };

    let slice = dataset.source().read_slice(
        &plan.variable,
        plan.time_index as u64,
        lon_window.0 as u64..lon_window.1 as u64 + 1,
        lat_window.0 as u64..lat_window.1 as u64 + 1,
    )?;

    let mut values = Vec::with_capacity(size * size);
    for row in &rows {
        for col in &cols {
            values.push(match (row, col) {
                (Some(r), Some(c)) => slice.get(r - lat_window.0, c - lon_window.0),
                _ => f32::NAN,
            });
        }
    }
    if values.iter().all(|v| v.is_nan()) {
        return empty_tile(size);
    }

    let pixels = colorize(&values, size, size, &plan.mapping)?;
    let data = png::encode_png(&pixels, size, size)?;
    Ok(RenderedTile {
        data: Bytes::from(data),
        empty: false,
    })
}

/// Render a tile, consulting the tile cache first.
pub async fn render_tile(state: Arc<AppState>, request: TileRequest) -> WmtsResult<Bytes> {
    let result = render_tile_uncounted(&state, request).await;
    match &result {
        Ok((_, outcome)) => state.metrics.record_tile(*outcome),
        Err(e) => {
            state.metrics.record_tile(TileOutcome::Failed);
            if !e.is_client_error() {
                warn!(error = %e, "tile request failed");
            }
        }
    }
    result.map(|(data, _)| data)
}

async fn render_tile_uncounted(
    state: &Arc<AppState>,
    request: TileRequest,
) -> WmtsResult<(Bytes, TileOutcome)> {
    let snapshot = state.snapshot();

    let plan = {
        let state = state.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || plan_tile(&state, &snapshot, &request))
            .await
            .map_err(join_error)??
    };

    if let Some(data) = state.tiles.get(&plan.cache_key).await {
        return Ok((data, TileOutcome::Cached));
    }

    let started = Instant::now();
    let key = plan.cache_key.clone();
    let rendered = tokio::task::spawn_blocking(move || render_planned(&plan))
        .await
        .map_err(join_error)??;
    state.metrics.record_render(started.elapsed());

    state.tiles.set(key, rendered.data.clone()).await;
    let outcome = if rendered.empty {
        TileOutcome::Empty
    } else {
        TileOutcome::Rendered
    };
    Ok((rendered.data, outcome))
}

fn empty_tile(size: usize) -> WmtsResult<RenderedTile> {
    Ok(RenderedTile {
        data: Bytes::from(png::transparent_png(size, size)?),
        empty: true,
    })
}

fn join_error(e: tokio::task::JoinError) -> WmtsError {
    WmtsError::Internal(format!("render task failed: {}", e))
}

/// Nearest native index for each of `n` pixel centres spread over
/// `start .. start + span`. Pixels outside `bounds` get `None`.
pub fn sample_axis(coords: &[f64], start: f64, span: f64, n: usize, bounds: (f64, f64)) -> Vec<Option<usize>> {
    let step = span / n as f64;
    (0..n)
        .map(|i| {
            let value = start + (i as f64 + 0.5) * step;
            if value < bounds.0 || value > bounds.1 {
                None
            } else {
                nearest_index(coords, value)
            }
        })
        .collect()
}

/// Smallest and largest index present.
fn index_window(indices: &[Option<usize>]) -> Option<(usize, usize)> {
    indices.iter().flatten().fold(None, |window, &i| match window {
        None => Some((i, i)),
        Some((lo, hi)) => Some((lo.min(i), hi.max(i))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColorMappingConfig, DatasetConfig, ServiceConfig, StyleConfig};
    use crate::state::StateOptions;
    use renderer::ValueScale;
    use std::collections::BTreeMap;
    use storage::{CoordinateArray, DataSource, DatasetDescriptor, DatasetOpener, MemorySource, SourceError, SourceFormat};
    use wmts_common::LayerId;
    use wmts_protocol::{TileFormat, TileOptions};

    fn demo_config(style: Option<StyleConfig>) -> ServiceConfig {
        ServiceConfig {
            datasets: vec![DatasetConfig {
                identifier: "demo".into(),
                title: None,
                path: "demo".into(),
                format: SourceFormat::Memory,
                style: style.as_ref().map(|s| s.identifier.clone()),
            }],
            styles: style.into_iter().collect(),
            ..ServiceConfig::default()
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(demo_config(None), StateOptions::default()))
    }

    fn decode(data: &[u8]) -> image::RgbaImage {
        image::load_from_memory_with_format(data, image::ImageFormat::Png)
            .unwrap()
            .to_rgba8()
    }

    /// Serves every descriptor as a 4x4 global cube whose values are all NaN.
    struct MissingValuesOpener;

    impl DatasetOpener for MissingValuesOpener {
        fn open(&self, descriptor: &DatasetDescriptor) -> Result<Box<dyn DataSource>, SourceError> {
            let time = CoordinateArray::new("time", vec![0.0]).with_units("days since 2020-01-01");
            let lat = CoordinateArray::new("lat", vec![67.5, 22.5, -22.5, -67.5]);
            let lon = CoordinateArray::new("lon", vec![-135.0, -45.0, 45.0, 135.0]);
            let source = MemorySource::new(descriptor.path.clone(), time, lat, lon).with_variable(
                "conc_chl",
                vec![f32::NAN; 16],
                None,
            );
            Ok(Box::new(source))
        }
    }

    fn request(variable: &str, level: &str, row: u32, col: u32) -> TileRequest {
        TileRequest::new(
            LayerId::new("demo", variable),
            level,
            row,
            col,
            TileFormat::Png,
            TileOptions {
                vmax: Some(20.0),
                ..TileOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_sample_axis() {
        let lon = [0.5, 1.5, 2.5, 3.5];
        let cols = sample_axis(&lon, -2.0, 8.0, 4, (0.0, 4.0));
        assert_eq!(cols, vec![None, Some(0), Some(2), None]);

        // Descending axis sampled from the top
        let lat = [1.5, 0.5, -0.5, -1.5];
        let rows = sample_axis(&lat, 2.0, -4.0, 4, (-2.0, 2.0));
        assert_eq!(rows, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_index_window() {
        assert_eq!(index_window(&[None, Some(4), Some(2), None]), Some((2, 4)));
        assert_eq!(index_window(&[None, None]), None);
    }

    #[tokio::test]
    async fn test_out_of_range_tile_is_empty() {
        let state = state();
        let snapshot = state.snapshot();
        let plan = plan_tile(&state, &snapshot, &request("conc_chl", "0", 999, 999)).unwrap();
        assert!(plan.extent.is_none());
        let tile = render_planned(&plan).unwrap();
        assert!(tile.empty);

        let expected = png::transparent_png(256, 256).unwrap();
        assert_eq!(tile.data.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_tile_over_missing_values_is_empty() {
        let state = Arc::new(AppState::with_opener(
            demo_config(None),
            StateOptions::default(),
            Arc::new(MissingValuesOpener),
        ));
        let snapshot = state.snapshot();
        let plan = plan_tile(&state, &snapshot, &request("conc_chl", "0", 0, 0)).unwrap();
        assert!(plan.extent.is_some());

        let tile = render_planned(&plan).unwrap();
        assert!(tile.empty);
        let image = decode(&tile.data);
        assert_eq!(image.dimensions(), (256, 256));
        assert!(image.pixels().all(|p| p[3] == 0));
    }

    fn chl_style(scale: Option<ValueScale>) -> StyleConfig {
        StyleConfig {
            identifier: "chl".into(),
            color_mappings: BTreeMap::from([(
                "conc_chl".to_string(),
                ColorMappingConfig {
                    color_bar: Some("viridis".into()),
                    value_range: Some([0.1, 30.0]),
                    no_data: None,
                    scale,
                },
            )]),
        }
    }

    fn render_styled(scale: Option<ValueScale>) -> image::RgbaImage {
        let state = AppState::new(demo_config(Some(chl_style(scale))), StateOptions::default());
        let snapshot = state.snapshot();
        let mut req = request("conc_chl", "0", 0, 1);
        req.options = TileOptions::default();
        let plan = plan_tile(&state, &snapshot, &req).unwrap();
        assert_eq!(plan.mapping.scale, scale.unwrap_or_default());
        decode(&render_planned(&plan).unwrap().data)
    }

    #[tokio::test]
    async fn test_log_scale_style_changes_colors() {
        let linear = render_styled(None);
        let log = render_styled(Some(ValueScale::Log));
        assert_eq!(linear.dimensions(), log.dimensions());
        // Same coverage, different colors
        assert!(linear.pixels().zip(log.pixels()).all(|(a, b)| a[3] == b[3]));
        assert_ne!(linear.as_raw(), log.as_raw());
    }

    #[tokio::test]
    async fn test_render_twice_is_identical() {
        let state = state();
        let first = render_tile(state.clone(), request("conc_chl", "0", 0, 1)).await.unwrap();
        state.tiles.clear().await;
        let second = render_tile(state.clone(), request("conc_chl", "0", 0, 1)).await.unwrap();
        assert_eq!(first, second);

        let cached = render_tile(state.clone(), request("conc_chl", "0", 0, 1)).await.unwrap();
        assert_eq!(first, cached);
        assert_eq!(state.metrics.snapshot().tiles_cached, 1);
    }

    #[tokio::test]
    async fn test_lookup_failures() {
        let state = state();
        let err = render_tile(state.clone(), request("nope", "0", 0, 0)).await.unwrap_err();
        assert_eq!(err.http_status_code(), 404);

        // Two-dimensional variables are not served
        let err = render_tile(state.clone(), request("quality_flags", "0", 0, 0)).await.unwrap_err();
        assert_eq!(err.http_status_code(), 404);

        let mut bad_bar = request("conc_chl", "0", 0, 0);
        bad_bar.options.cbar = Some("no_such_bar".into());
        let err = render_tile(state.clone(), bad_bar).await.unwrap_err();
        assert_eq!(err, WmtsError::UnknownColorBar("no_such_bar".into()));

        let mut ghost = request("conc_chl", "0", 0, 0);
        ghost.layer = LayerId::new("ghost", "conc_chl");
        let err = render_tile(state.clone(), ghost).await.unwrap_err();
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(state.metrics.snapshot().tile_errors, 4);
    }

    #[tokio::test]
    async fn test_unknown_matrix_set() {
        let state = state();
        let mut req = request("conc_chl", "0", 0, 0);
        req.tile_matrix_set = Some("WebMercatorQuad".into());
        let err = render_tile(state, req).await.unwrap_err();
        assert!(matches!(err, WmtsError::UnknownTileMatrixSet(_)));
    }
}
