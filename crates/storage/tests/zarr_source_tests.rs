//! ZarrSource against cubes written to a temporary directory.

use std::sync::Arc;
use std::time::Duration;

use storage::testdata::{write_zarr_cube, CubeSpec, FILL_VALUE};
use storage::{
    DataSource, DatasetCache, DatasetDescriptor, OpenDataset, SourceFormat, SourceOpener, TileGridCache,
    ZarrSource,
};
use tempfile::TempDir;
use wmts_common::BoundingBox;

fn write_fixture(spec: &CubeSpec) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.zarr");
    write_zarr_cube(&path, spec).unwrap();
    (dir, path)
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn test_variables_and_coordinates() {
    let spec = CubeSpec::global("conc_chl", 3, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let source = ZarrSource::open(&path).unwrap();

    let chl = source.variable("conc_chl").unwrap();
    assert_eq!(chl.dims, vec!["time", "lat", "lon"]);
    assert_eq!(chl.shape, vec![3, 90, 180]);
    assert_eq!(chl.chunk_shape, vec![1, 64, 64]);
    assert_eq!(chl.fill_value, Some(FILL_VALUE as f64));
    assert_eq!(chl.units.as_deref(), Some("mg m-3"));

    let lat = source.coordinate_array("lat").unwrap();
    assert_eq!(lat.values.first().copied(), Some(89.0));
    let time = source.coordinate_array("time").unwrap();
    assert_eq!(time.units.as_deref(), Some("days since 2017-01-16"));
    assert!(source.coordinate_array("depth").is_err());
}

#[test]
fn test_open_dataset_extent() {
    let spec = CubeSpec::global("conc_chl", 2, 1.0);
    let (_dir, path) = write_fixture(&spec);
    let descriptor = DatasetDescriptor::new("local", path.display().to_string(), SourceFormat::Zarr);
    let dataset = OpenDataset::new(descriptor, Box::new(ZarrSource::open(&path).unwrap())).unwrap();

    assert_eq!(dataset.extent, BoundingBox::new(-180.0, -90.0, 180.0, 90.0));
    assert_eq!(dataset.variables.len(), 1);
    // 2017-01-16T00:00:00Z
    assert_eq!(dataset.times[0], 1_484_524_800.0);
}

// ============================================================================
// Window reads
// ============================================================================

#[test]
fn test_window_read_matches_written_values() {
    let spec = CubeSpec::global("conc_chl", 2, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let source = ZarrSource::open(&path).unwrap();

    // Spans a chunk boundary in both directions
    let slice = source.read_slice("conc_chl", 1, 60..70, 60..66).unwrap();
    assert_eq!((slice.width, slice.height), (10, 6));
    for row in 0..6 {
        for col in 0..10 {
            let expected = CubeSpec::value_at(1, 60 + row, 60 + col).unwrap();
            assert_eq!(slice.get(row, col), expected);
        }
    }
}

#[test]
fn test_fill_values_read_as_nan() {
    let spec = CubeSpec::global("conc_chl", 1, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let source = ZarrSource::open(&path).unwrap();

    let slice = source.read_slice("conc_chl", 0, 0..2, 0..3).unwrap();
    assert!(slice.get(1, 0).is_nan());
    assert!(slice.get(1, 1).is_finite());
}

#[test]
fn test_point_series() {
    let spec = CubeSpec::global("conc_chl", 4, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let source = ZarrSource::open(&path).unwrap();

    let series = source.read_point_series("conc_chl", 5, 7, 1..4).unwrap();
    let expected: Vec<f32> = (1..4).map(|t| CubeSpec::value_at(t, 5, 7).unwrap()).collect();
    assert_eq!(series, expected);
}

#[test]
fn test_out_of_bounds_window() {
    let spec = CubeSpec::global("conc_chl", 1, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let source = ZarrSource::open(&path).unwrap();
    assert!(source.read_slice("conc_chl", 0, 170..181, 0..1).is_err());
    assert!(source.read_slice("conc_chl", 1, 0..1, 0..1).is_err());
}

// ============================================================================
// Open failures
// ============================================================================

#[test]
fn test_missing_path_is_open_failure() {
    let err = ZarrSource::open("/nonexistent/cube.zarr").unwrap_err();
    assert!(err.is_open_failure());
}

#[test]
fn test_missing_coordinate_is_layout_failure() {
    let spec = CubeSpec::global("conc_chl", 1, 2.0);
    let (_dir, path) = write_fixture(&spec);
    std::fs::remove_dir_all(path.join("lon")).unwrap();

    let descriptor = DatasetDescriptor::new("broken", path.display().to_string(), SourceFormat::Zarr);
    let cache = DatasetCache::new(Arc::new(SourceOpener), Duration::ZERO);
    let err = cache.acquire(&descriptor).unwrap_err();
    assert!(err.is_open_failure());
    assert!(err.to_string().contains("lon"));
}

// ============================================================================
// Shared geometry
// ============================================================================

#[test]
fn test_aliased_datasets_share_tile_grid() {
    let spec = CubeSpec::global("conc_chl", 1, 2.0);
    let (_dir, path) = write_fixture(&spec);
    let cache = DatasetCache::new(Arc::new(SourceOpener), Duration::ZERO);
    let grids = TileGridCache::new(16);

    for id in ["local", "alias"] {
        let descriptor = DatasetDescriptor::new(id, path.display().to_string(), SourceFormat::Zarr);
        let dataset = cache.acquire(&descriptor).unwrap();
        let variable = dataset.variable("conc_chl").unwrap();
        grids
            .get_or_compute(&dataset.tile_grid_key(variable), dataset.extent, 256)
            .unwrap();
    }

    assert_eq!(cache.stats().opens, 2);
    assert_eq!(grids.stats().computations, 1);
    assert_eq!(grids.len(), 1);
}
