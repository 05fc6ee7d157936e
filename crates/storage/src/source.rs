//! The data source boundary.
//!
//! A [`DataSource`] exposes variables laid out as `(time, lat, lon)` cubes
//! together with their 1-D coordinate arrays, and reads explicit windows of
//! them. Nothing above this trait assumes a variable fits in memory.

use std::ops::Range;

use serde::Serialize;
use wmts_common::CfTimeUnits;

use crate::SourceError;

pub const TIME_DIM: &str = "time";
pub const LAT_DIM: &str = "lat";
pub const LON_DIM: &str = "lon";

/// Dimension order every served variable must have.
pub const GRID_DIMS: [&str; 3] = [TIME_DIM, LAT_DIM, LON_DIM];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub size: u64,
}

/// Metadata of one variable in a data source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub units: Option<String>,
    pub long_name: Option<String>,
    /// Stored fill value; reads already report these cells as NaN.
    pub fill_value: Option<f64>,
}

impl VariableInfo {
    pub fn dimensions(&self) -> Vec<Dimension> {
        self.dims
            .iter()
            .zip(&self.shape)
            .map(|(name, size)| Dimension {
                name: name.clone(),
                size: *size,
            })
            .collect()
    }

    /// True when the dimensions are exactly `(time, lat, lon)`.
    pub fn is_grid(&self) -> bool {
        self.dims.len() == 3 && self.dims.iter().zip(GRID_DIMS).all(|(a, b)| a == b)
    }

    pub fn title(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.name)
    }
}

/// A 1-D coordinate variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateArray {
    pub name: String,
    pub values: Vec<f64>,
    pub units: Option<String>,
}

impl CoordinateArray {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
            units: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Strictly increasing or strictly decreasing, with no NaN.
    pub fn is_strictly_monotonic(&self) -> bool {
        if self.values.iter().any(|v| !v.is_finite()) {
            return false;
        }
        let ascending = self.values.windows(2).all(|w| w[0] < w[1]);
        let descending = self.values.windows(2).all(|w| w[0] > w[1]);
        ascending || descending
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// Values as seconds since the Unix epoch.
    ///
    /// CF units (`"days since 2000-01-01"`) are honoured; coordinates without
    /// units are taken to be epoch seconds already.
    pub fn to_epoch_seconds(&self) -> Result<Vec<f64>, SourceError> {
        match self.units.as_deref() {
            None => Ok(self.values.clone()),
            Some(units) => {
                let cf = CfTimeUnits::parse(units).ok_or_else(|| {
                    SourceError::read(format!("unsupported time units '{}'", units))
                })?;
                Ok(self.values.iter().map(|v| cf.to_epoch_seconds(*v)).collect())
            }
        }
    }
}

/// A 2-D window of one time step, row-major in coordinate-index order.
///
/// Row `r` holds latitude index `lat_range.start + r`, column `c` holds
/// longitude index `lon_range.start + c`. Missing cells are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub values: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl Slice {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width + col]
    }

    pub fn is_all_missing(&self) -> bool {
        self.values.iter().all(|v| v.is_nan())
    }
}

/// Read access to one opened dataset.
pub trait DataSource: Send + Sync {
    /// Location the source was opened from.
    fn path(&self) -> &str;

    /// Every variable in the source, coordinate variables included.
    fn variables(&self) -> Vec<VariableInfo>;

    fn variable(&self, name: &str) -> Result<VariableInfo, SourceError> {
        self.variables()
            .into_iter()
            .find(|v| v.name == name)
            .ok_or_else(|| SourceError::UnknownVariable(name.to_string()))
    }

    fn dimensions(&self, variable: &str) -> Result<Vec<Dimension>, SourceError> {
        Ok(self.variable(variable)?.dimensions())
    }

    fn chunk_shape(&self, variable: &str) -> Result<Vec<u64>, SourceError> {
        Ok(self.variable(variable)?.chunk_shape)
    }

    fn coordinate_array(&self, dimension: &str) -> Result<CoordinateArray, SourceError>;

    /// Read `lat_range × lon_range` of one time step.
    fn read_slice(
        &self,
        variable: &str,
        time_index: u64,
        lon_range: Range<u64>,
        lat_range: Range<u64>,
    ) -> Result<Slice, SourceError>;

    /// Values of one grid cell over a range of time steps.
    fn read_point_series(
        &self,
        variable: &str,
        lat_index: u64,
        lon_index: u64,
        time_range: Range<u64>,
    ) -> Result<Vec<f32>, SourceError> {
        time_range
            .map(|t| {
                self.read_slice(variable, t, lon_index..lon_index + 1, lat_index..lat_index + 1)
                    .map(|slice| slice.values[0])
            })
            .collect()
    }

    /// Release underlying resources. Reads afterwards fail with [`SourceError::Closed`].
    fn close(&self) {}
}

/// Check a window against a variable shape in `(time, lat, lon)` order.
pub(crate) fn check_window(
    info: &VariableInfo,
    time_index: u64,
    lon_range: &Range<u64>,
    lat_range: &Range<u64>,
) -> Result<(), SourceError> {
    let err = |reason: String| SourceError::Window {
        variable: info.name.clone(),
        reason,
    };
    let [nt, ny, nx] = match info.shape.as_slice() {
        [nt, ny, nx] => [*nt, *ny, *nx],
        other => return Err(err(format!("expected 3 dimensions, got {}", other.len()))),
    };
    if time_index >= nt {
        return Err(err(format!("time index {} >= {}", time_index, nt)));
    }
    if lat_range.start > lat_range.end || lat_range.end > ny {
        return Err(err(format!("lat range {:?} outside 0..{}", lat_range, ny)));
    }
    if lon_range.start > lon_range.end || lon_range.end > nx {
        return Err(err(format!("lon range {:?} outside 0..{}", lon_range, nx)));
    }
    Ok(())
}
