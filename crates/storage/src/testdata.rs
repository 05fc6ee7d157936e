//! Zarr cube fixtures for tests and demos.
//!
//! Cubes are written in the layout [`ZarrSource`](crate::ZarrSource) reads:
//! one array per variable plus `time`, `lat` and `lon` coordinate arrays.
//! Values follow `t * 1_000_000 + col * 1000 + row`, which makes window
//! reads easy to verify; column 0 holds the fill value.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

/// Fill value written to masked cells.
pub const FILL_VALUE: f32 = -9999.0;

/// Shape and coordinates of a fixture cube.
#[derive(Debug, Clone)]
pub struct CubeSpec {
    pub variable: String,
    /// Days since 2017-01-16
    pub times: Vec<f64>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Chunk shape in `(time, lat, lon)` order
    pub chunk: [u64; 3],
}

impl CubeSpec {
    /// Global cube with cell size `step` degrees, latitudes descending.
    pub fn global(variable: &str, num_times: usize, step: f64) -> Self {
        let ny = (180.0 / step).round() as usize;
        let nx = (360.0 / step).round() as usize;
        Self {
            variable: variable.to_string(),
            times: (0..num_times).map(|t| t as f64).collect(),
            lat: (0..ny).map(|j| 90.0 - step * (j as f64 + 0.5)).collect(),
            lon: (0..nx).map(|i| -180.0 + step * (i as f64 + 0.5)).collect(),
            chunk: [1, (ny as u64).min(64), (nx as u64).min(64)],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.times.len(), self.lat.len(), self.lon.len()]
    }

    /// Value stored at a cell, `None` where the fill value was written.
    pub fn value_at(t: usize, row: usize, col: usize) -> Option<f32> {
        (col != 0).then(|| (t * 1_000_000 + col * 1000 + row) as f32)
    }
}

/// Build the variable values in C order.
pub fn create_cube_values(spec: &CubeSpec) -> Vec<f32> {
    let [nt, ny, nx] = spec.shape();
    let mut data = Vec::with_capacity(nt * ny * nx);
    for t in 0..nt {
        for row in 0..ny {
            for col in 0..nx {
                data.push(CubeSpec::value_at(t, row, col).unwrap_or(FILL_VALUE));
            }
        }
    }
    data
}

/// Write a fixture cube below `path` and return the variable values.
pub fn write_zarr_cube(path: &Path, spec: &CubeSpec) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path)?);

    let coordinates = [
        ("time", &spec.times, "days since 2017-01-16"),
        ("lat", &spec.lat, "degrees_north"),
        ("lon", &spec.lon, "degrees_east"),
    ];
    for (name, values, units) in coordinates {
        let array = ArrayBuilder::new(
            vec![values.len() as u64],
            DataType::Float64,
            vec![values.len() as u64].try_into()?,
            FillValue::from(f64::NAN),
        )
        .attributes(attributes(&[name], units, None))
        .build(store.clone(), &format!("/{}", name))?;
        array.store_metadata()?;

        let subset = ArraySubset::new_with_shape(vec![values.len() as u64]);
        array.store_array_subset_elements(&subset, values.as_slice())?;
    }

    let [nt, ny, nx] = spec.shape();
    let data = create_cube_values(spec);
    let array = ArrayBuilder::new(
        vec![nt as u64, ny as u64, nx as u64],
        DataType::Float32,
        spec.chunk.to_vec().try_into()?,
        FillValue::from(FILL_VALUE),
    )
    .attributes(attributes(
        &["time", "lat", "lon"],
        "mg m-3",
        Some(&format!("Test variable {}", spec.variable)),
    ))
    .build(store.clone(), &format!("/{}", spec.variable))?;
    array.store_metadata()?;

    let subset = ArraySubset::new_with_shape(vec![nt as u64, ny as u64, nx as u64]);
    array.store_array_subset_elements(&subset, &data)?;

    Ok(data)
}

fn attributes(dims: &[&str], units: &str, long_name: Option<&str>) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("dimensions".to_string(), json!(dims));
    attrs.insert("units".to_string(), json!(units));
    if let Some(long_name) = long_name {
        attrs.insert("long_name".to_string(), json!(long_name));
    }
    attrs
}
