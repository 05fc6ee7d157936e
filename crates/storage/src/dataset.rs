//! Dataset descriptors and validated open datasets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use wmts_common::{BoundingBox, TileGridKey};

use crate::source::{CoordinateArray, DataSource, VariableInfo, LAT_DIM, LON_DIM, TIME_DIM};
use crate::SourceError;

/// Storage backend of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Zarr,
    Memory,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Zarr => "zarr",
            SourceFormat::Memory => "memory",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zarr" => Ok(SourceFormat::Zarr),
            "memory" | "mem" => Ok(SourceFormat::Memory),
            other => Err(format!("unknown dataset format '{}'", other)),
        }
    }
}

/// A configured dataset. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetDescriptor {
    pub identifier: String,
    pub title: Option<String>,
    pub path: String,
    pub format: SourceFormat,
}

impl DatasetDescriptor {
    pub fn new(identifier: impl Into<String>, path: impl Into<String>, format: SourceFormat) -> Self {
        Self {
            identifier: identifier.into(),
            title: None,
            path: path.into(),
            format,
        }
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.identifier)
    }
}

/// An opened data source whose layout has been checked.
///
/// Coordinates are read once here; tile and time-series requests only ever
/// touch data windows afterwards.
pub struct OpenDataset {
    pub descriptor: DatasetDescriptor,
    source: Box<dyn DataSource>,
    /// Servable variables, sorted by name
    pub variables: Vec<VariableInfo>,
    pub time: CoordinateArray,
    /// Time axis as epoch seconds
    pub times: Vec<f64>,
    pub lat: CoordinateArray,
    pub lon: CoordinateArray,
    /// Extent covered by the grid cells
    pub extent: BoundingBox,
}

impl fmt::Debug for OpenDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenDataset")
            .field("descriptor", &self.descriptor)
            .field("variables", &self.variables.iter().map(|v| &v.name).collect::<Vec<_>>())
            .field("extent", &self.extent)
            .finish()
    }
}

impl OpenDataset {
    /// Validate the grid layout of a freshly opened source.
    ///
    /// Variables not laid out as `(time, lat, lon)` are skipped; a source
    /// without any servable variable is rejected.
    pub fn new(descriptor: DatasetDescriptor, source: Box<dyn DataSource>) -> Result<Self, SourceError> {
        let path = descriptor.path.clone();
        let layout = |reason: String| SourceError::layout(path.clone(), reason);

        let coordinate = |name: &str| -> Result<CoordinateArray, SourceError> {
            let coords = source.coordinate_array(name).map_err(|e| match e {
                SourceError::UnknownDimension(_) | SourceError::UnknownVariable(_) => {
                    layout(format!("missing coordinate '{}'", name))
                }
                other => other,
            })?;
            if coords.is_empty() {
                return Err(layout(format!("coordinate '{}' is empty", name)));
            }
            if !coords.is_strictly_monotonic() {
                return Err(layout(format!("coordinate '{}' is not strictly monotonic", name)));
            }
            Ok(coords)
        };

        let time = coordinate(TIME_DIM)?;
        let lat = coordinate(LAT_DIM)?;
        let lon = coordinate(LON_DIM)?;

        if lat.len() < 2 || lon.len() < 2 {
            return Err(layout("spatial axes need at least two cells".to_string()));
        }
        if lat.min().unwrap_or(f64::NAN) < -90.0 || lat.max().unwrap_or(f64::NAN) > 90.0 {
            return Err(layout("latitudes outside [-90, 90]".to_string()));
        }
        if lon.min().unwrap_or(f64::NAN) < -180.0 || lon.max().unwrap_or(f64::NAN) > 360.0 {
            return Err(layout("longitudes outside [-180, 360]".to_string()));
        }

        let times = time.to_epoch_seconds().map_err(|e| layout(e.to_string()))?;
        let extent = BoundingBox::from_cell_centers(&lon.values, &lat.values)
            .ok_or_else(|| layout("cannot derive extent".to_string()))?;

        let expected = [time.len() as u64, lat.len() as u64, lon.len() as u64];
        let mut variables: Vec<VariableInfo> = source
            .variables()
            .into_iter()
            .filter(|v| {
                let servable = v.is_grid() && v.shape == expected;
                if !servable {
                    debug!(dataset = %descriptor.identifier, variable = %v.name, dims = ?v.dims, "skipping variable");
                }
                servable
            })
            .collect();
        variables.sort_by(|a, b| a.name.cmp(&b.name));

        if variables.is_empty() {
            return Err(layout("no variable with dimensions (time, lat, lon)".to_string()));
        }

        Ok(Self {
            descriptor,
            source,
            variables,
            time,
            times,
            lat,
            lon,
            extent,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }

    pub fn source(&self) -> &dyn DataSource {
        self.source.as_ref()
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Coordinate array by dimension name.
    pub fn coordinate(&self, dimension: &str) -> Option<&CoordinateArray> {
        match dimension {
            TIME_DIM => Some(&self.time),
            LAT_DIM => Some(&self.lat),
            LON_DIM => Some(&self.lon),
            _ => None,
        }
    }

    /// Content address of the tiling geometry for a variable.
    pub fn tile_grid_key(&self, variable: &VariableInfo) -> TileGridKey {
        TileGridKey::new(
            self.source.path().to_string(),
            variable.shape.clone(),
            variable.chunk_shape.clone(),
        )
    }

    pub(crate) fn close(&self) {
        self.source.close();
    }
}
