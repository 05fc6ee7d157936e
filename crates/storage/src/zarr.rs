//! Zarr V3 data source on the local filesystem.
//!
//! A dataset is a directory holding one Zarr array per variable. Arrays name
//! their dimensions in a `dimensions` (or xarray-style `_ARRAY_DIMENSIONS`)
//! attribute; the 1-D arrays `time`, `lat` and `lon` hold the coordinates.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::source::{check_window, CoordinateArray, DataSource, Slice, VariableInfo};
use crate::SourceError;

type ZarrArray = Array<FilesystemStore>;

pub struct ZarrSource {
    path: String,
    arrays: BTreeMap<String, (VariableInfo, ZarrArray)>,
    closed: AtomicBool,
}

impl fmt::Debug for ZarrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZarrSource")
            .field("path", &self.path)
            .field("arrays", &self.arrays.keys().collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl ZarrSource {
    /// Open every array found directly below `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let location = path.display().to_string();
        if !path.is_dir() {
            return Err(SourceError::open(&location, "not a directory"));
        }

        let store = Arc::new(FilesystemStore::new(path).map_err(|e| SourceError::open(&location, e))?);
        let entries = std::fs::read_dir(path).map_err(|e| SourceError::open(&location, e))?;

        let mut arrays = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| SourceError::open(&location, e))?;
            if !entry.path().join("zarr.json").is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match Array::open(store.clone(), &format!("/{}", name)) {
                Ok(array) => {
                    let info = variable_info(&name, &array)?;
                    arrays.insert(name, (info, array));
                }
                Err(e) => debug!(path = %location, node = %name, error = %e, "skipping non-array node"),
            }
        }

        if arrays.is_empty() {
            return Err(SourceError::open(&location, "no Zarr arrays found"));
        }

        debug!(path = %location, arrays = arrays.len(), "opened zarr dataset");
        Ok(Self {
            path: location,
            arrays,
            closed: AtomicBool::new(false),
        })
    }

    fn array(&self, name: &str) -> Result<&(VariableInfo, ZarrArray), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        self.arrays
            .get(name)
            .ok_or_else(|| SourceError::UnknownVariable(name.to_string()))
    }
}

impl DataSource for ZarrSource {
    fn path(&self) -> &str {
        &self.path
    }

    fn variables(&self) -> Vec<VariableInfo> {
        self.arrays.values().map(|(info, _)| info.clone()).collect()
    }

    fn coordinate_array(&self, dimension: &str) -> Result<CoordinateArray, SourceError> {
        let (info, array) = self.array(dimension).map_err(|e| match e {
            SourceError::UnknownVariable(name) => SourceError::UnknownDimension(name),
            other => other,
        })?;
        if info.shape.len() != 1 {
            return Err(SourceError::layout(
                &self.path,
                format!("coordinate '{}' has {} dimensions", dimension, info.shape.len()),
            ));
        }

        let subset = ArraySubset::new_with_shape(info.shape.clone());
        let values = retrieve_f64(array, &subset)?;
        Ok(CoordinateArray {
            name: dimension.to_string(),
            values,
            units: info.units.clone(),
        })
    }

    fn read_slice(
        &self,
        variable: &str,
        time_index: u64,
        lon_range: Range<u64>,
        lat_range: Range<u64>,
    ) -> Result<Slice, SourceError> {
        let (info, array) = self.array(variable)?;
        check_window(info, time_index, &lon_range, &lat_range)?;

        let width = lon_range.end - lon_range.start;
        let height = lat_range.end - lat_range.start;
        let subset = ArraySubset::new_with_start_shape(
            vec![time_index, lat_range.start, lon_range.start],
            vec![1, height, width],
        )
        .map_err(SourceError::read)?;

        let values = retrieve_masked(array, &subset, info.fill_value)?;
        Ok(Slice {
            values,
            width: width as usize,
            height: height as usize,
        })
    }

    fn read_point_series(
        &self,
        variable: &str,
        lat_index: u64,
        lon_index: u64,
        time_range: Range<u64>,
    ) -> Result<Vec<f32>, SourceError> {
        let (info, array) = self.array(variable)?;
        if time_range.is_empty() {
            return Ok(Vec::new());
        }
        check_window(info, time_range.end - 1, &(lon_index..lon_index + 1), &(lat_index..lat_index + 1))?;

        let subset = ArraySubset::new_with_start_shape(
            vec![time_range.start, lat_index, lon_index],
            vec![time_range.end - time_range.start, 1, 1],
        )
        .map_err(SourceError::read)?;
        retrieve_masked(array, &subset, info.fill_value)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(path = %self.path, "closed zarr dataset");
        }
    }
}

fn variable_info(name: &str, array: &ZarrArray) -> Result<VariableInfo, SourceError> {
    let attrs = array.attributes();
    let shape = array.shape().to_vec();

    let dims = ["dimensions", "_ARRAY_DIMENSIONS"]
        .iter()
        .find_map(|key| attrs.get(*key).and_then(Value::as_array))
        .map(|names| {
            names
                .iter()
                .map(|n| n.as_str().unwrap_or_default().to_string())
                .collect::<Vec<_>>()
        })
        // 1-D arrays without dimension names are their own coordinate
        .unwrap_or_else(|| if shape.len() == 1 { vec![name.to_string()] } else { Vec::new() });

    let origin = vec![0u64; shape.len()];
    let chunk_shape = array
        .chunk_grid()
        .chunk_shape(&origin, array.shape())
        .ok()
        .flatten()
        .map(|cs| cs.iter().map(|c| c.get()).collect())
        .unwrap_or_else(|| shape.clone());

    let text = |key: &str| attrs.get(key).and_then(Value::as_str).map(str::to_string);

    if dims.len() != shape.len() && !dims.is_empty() {
        warn!(array = %name, ?dims, ?shape, "dimension names do not match array rank");
    }

    Ok(VariableInfo {
        name: name.to_string(),
        dims,
        shape,
        chunk_shape,
        units: text("units"),
        long_name: text("long_name"),
        fill_value: fill_value(array),
    })
}

/// The array fill value as `f64`, when it is a finite number.
fn fill_value(array: &ZarrArray) -> Option<f64> {
    let bytes = array.fill_value().as_ne_bytes();
    let value = match array.data_type() {
        DataType::Float32 => f32::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Float64 => f64::from_ne_bytes(bytes.try_into().ok()?),
        DataType::Int16 => i16::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Int32 => i32::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Int64 => i64::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::UInt8 => *bytes.first()? as f64,
        DataType::UInt16 => u16::from_ne_bytes(bytes.try_into().ok()?) as f64,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn retrieve_f64(array: &ZarrArray, subset: &ArraySubset) -> Result<Vec<f64>, SourceError> {
    fn widen<T: Into<f64>>(values: Vec<T>) -> Vec<f64> {
        values.into_iter().map(Into::into).collect()
    }

    let values = match array.data_type() {
        DataType::Float64 => array.retrieve_array_subset_elements::<f64>(subset),
        DataType::Float32 => array.retrieve_array_subset_elements::<f32>(subset).map(widen),
        DataType::Int16 => array.retrieve_array_subset_elements::<i16>(subset).map(widen),
        DataType::Int32 => array.retrieve_array_subset_elements::<i32>(subset).map(widen),
        DataType::Int64 => array
            .retrieve_array_subset_elements::<i64>(subset)
            .map(|v| v.into_iter().map(|x| x as f64).collect()),
        DataType::UInt8 => array.retrieve_array_subset_elements::<u8>(subset).map(widen),
        DataType::UInt16 => array.retrieve_array_subset_elements::<u16>(subset).map(widen),
        other => {
            return Err(SourceError::read(format!("unsupported data type {:?}", other)));
        }
    };
    values.map_err(SourceError::read)
}

/// Read a window as `f32`, turning fill values into NaN.
fn retrieve_masked(
    array: &ZarrArray,
    subset: &ArraySubset,
    fill: Option<f64>,
) -> Result<Vec<f32>, SourceError> {
    let mut values: Vec<f32> = match array.data_type() {
        DataType::Float32 => array
            .retrieve_array_subset_elements::<f32>(subset)
            .map_err(SourceError::read)?,
        _ => retrieve_f64(array, subset)?.into_iter().map(|v| v as f32).collect(),
    };
    if let Some(fill) = fill.map(|f| f as f32) {
        for v in values.iter_mut().filter(|v| **v == fill) {
            *v = f32::NAN;
        }
    }
    Ok(values)
}
