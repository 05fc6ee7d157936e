//! In-memory data source for tests and demo configurations.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::source::{check_window, CoordinateArray, DataSource, Slice, VariableInfo, GRID_DIMS};
use crate::SourceError;

/// A cube held entirely in memory.
pub struct MemorySource {
    path: String,
    time: CoordinateArray,
    lat: CoordinateArray,
    lon: CoordinateArray,
    variables: Vec<(VariableInfo, Arc<Vec<f32>>)>,
    closed: AtomicBool,
}

impl MemorySource {
    pub fn new(
        path: impl Into<String>,
        time: CoordinateArray,
        lat: CoordinateArray,
        lon: CoordinateArray,
    ) -> Self {
        Self {
            path: path.into(),
            time,
            lat,
            lon,
            variables: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a `(time, lat, lon)` variable, values in C order.
    pub fn with_variable(self, name: &str, values: Vec<f32>, units: Option<&str>) -> Self {
        let shape = vec![self.time.len() as u64, self.lat.len() as u64, self.lon.len() as u64];
        let info = VariableInfo {
            name: name.to_string(),
            dims: GRID_DIMS.iter().map(|d| d.to_string()).collect(),
            chunk_shape: vec![1, shape[1], shape[2]],
            shape,
            units: units.map(str::to_string),
            long_name: None,
            fill_value: None,
        };
        self.with_raw_variable(info, values)
    }

    /// Add a variable with arbitrary metadata.
    pub fn with_raw_variable(mut self, info: VariableInfo, values: Vec<f32>) -> Self {
        self.variables.push((info, Arc::new(values)));
        self
    }

    /// Global one-degree cube with three daily steps starting 2017-01-16.
    ///
    /// `conc_chl` is a smooth latitude/longitude gradient with land masked
    /// out as the fill value, `kd489` a zonal band pattern. A 2-D
    /// `quality_flags` variable is present to exercise variable filtering.
    pub fn synthetic(path: impl Into<String>) -> Self {
        let (nt, ny, nx) = (3usize, 180usize, 360usize);
        const FILL: f32 = -9999.0;

        let time = CoordinateArray::new("time", (0..nt).map(|t| t as f64).collect())
            .with_units("days since 2017-01-16");
        let lat = CoordinateArray::new("lat", (0..ny).map(|j| 89.5 - j as f64).collect())
            .with_units("degrees_north");
        let lon = CoordinateArray::new("lon", (0..nx).map(|i| -179.5 + i as f64).collect())
            .with_units("degrees_east");

        let mut chl = Vec::with_capacity(nt * ny * nx);
        let mut kd = Vec::with_capacity(nt * ny * nx);
        for t in 0..nt {
            for j in 0..ny {
                for i in 0..nx {
                    let lat = 89.5 - j as f32;
                    let lon = -179.5 + i as f32;
                    let land = (-20.0..40.0).contains(&lon) && (0.0..30.0).contains(&lat);
                    chl.push(if land {
                        FILL
                    } else {
                        (lat.abs() / 90.0) * 20.0 + (lon / 180.0) * 2.0 + t as f32
                    });
                    kd.push(((lat / 10.0).sin() + 1.0) * 0.5);
                }
            }
        }

        let shape = vec![nt as u64, ny as u64, nx as u64];
        let chl_info = VariableInfo {
            name: "conc_chl".to_string(),
            dims: GRID_DIMS.iter().map(|d| d.to_string()).collect(),
            shape: shape.clone(),
            chunk_shape: vec![1, 90, 90],
            units: Some("mg m-3".to_string()),
            long_name: Some("Chlorophyll concentration".to_string()),
            fill_value: Some(FILL as f64),
        };
        let flags_info = VariableInfo {
            name: "quality_flags".to_string(),
            dims: vec!["lat".to_string(), "lon".to_string()],
            shape: vec![ny as u64, nx as u64],
            chunk_shape: vec![ny as u64, nx as u64],
            units: None,
            long_name: None,
            fill_value: None,
        };

        Self::new(path, time, lat, lon)
            .with_raw_variable(chl_info, chl)
            .with_variable("kd489", kd, Some("m-1"))
            .with_raw_variable(flags_info, vec![0.0; ny * nx])
    }

    fn data(&self, name: &str) -> Result<(&VariableInfo, &[f32]), SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        self.variables
            .iter()
            .find(|(info, _)| info.name == name)
            .map(|(info, values)| (info, values.as_slice()))
            .ok_or_else(|| SourceError::UnknownVariable(name.to_string()))
    }
}

impl DataSource for MemorySource {
    fn path(&self) -> &str {
        &self.path
    }

    fn variables(&self) -> Vec<VariableInfo> {
        self.variables.iter().map(|(info, _)| info.clone()).collect()
    }

    fn coordinate_array(&self, dimension: &str) -> Result<CoordinateArray, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }
        [&self.time, &self.lat, &self.lon]
            .into_iter()
            .find(|c| c.name == dimension)
            .cloned()
            .ok_or_else(|| SourceError::UnknownDimension(dimension.to_string()))
    }

    fn read_slice(
        &self,
        variable: &str,
        time_index: u64,
        lon_range: Range<u64>,
        lat_range: Range<u64>,
    ) -> Result<Slice, SourceError> {
        let (info, values) = self.data(variable)?;
        check_window(info, time_index, &lon_range, &lat_range)?;

        let (ny, nx) = (info.shape[1] as usize, info.shape[2] as usize);
        if values.len() != info.shape.iter().product::<u64>() as usize {
            return Err(SourceError::read(format!(
                "'{}' holds {} values for shape {:?}",
                variable,
                values.len(),
                info.shape
            )));
        }

        let fill = info.fill_value.map(|f| f as f32);
        let plane = &values[time_index as usize * ny * nx..(time_index as usize + 1) * ny * nx];
        let width = (lon_range.end - lon_range.start) as usize;
        let height = (lat_range.end - lat_range.start) as usize;
        let mut out = Vec::with_capacity(width * height);
        for j in lat_range {
            let row = &plane[j as usize * nx..(j as usize + 1) * nx];
            out.extend(
                row[lon_range.start as usize..lon_range.end as usize]
                    .iter()
                    .map(|&v| if Some(v) == fill { f32::NAN } else { v }),
            );
        }

        Ok(Slice {
            values: out,
            width,
            height,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_read_masks_fill_values() {
        let source = MemorySource::synthetic("memory://test");
        // lat 29.5..25.5 (rows 60..65), lon -19.5.. (cols 160..165) is masked land
        let slice = source.read_slice("conc_chl", 0, 160..165, 60..65).unwrap();
        assert_eq!((slice.width, slice.height), (5, 5));
        assert!(slice.is_all_missing());

        let ocean = source.read_slice("conc_chl", 2, 0..2, 0..1).unwrap();
        assert!(ocean.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_point_series_default() {
        let source = MemorySource::synthetic("memory://test");
        let series = source.read_point_series("conc_chl", 0, 0, 0..3).unwrap();
        assert_eq!(series.len(), 3);
        assert!((series[1] - series[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_reads_fail_after_close() {
        let source = MemorySource::synthetic("memory://test");
        source.close();
        assert!(matches!(
            source.read_slice("kd489", 0, 0..1, 0..1),
            Err(SourceError::Closed)
        ));
    }

    #[test]
    fn test_unknown_variable() {
        let source = MemorySource::synthetic("memory://test");
        assert!(matches!(
            source.read_slice("sst", 0, 0..1, 0..1),
            Err(SourceError::UnknownVariable(_))
        ));
        assert!(source.coordinate_array("depth").is_err());
    }
}
