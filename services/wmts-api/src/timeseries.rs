//! Point time series and the time series layer listing.

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use storage::OpenDataset;
use wmts_common::time::{format_iso8601, from_epoch_seconds, parse_iso8601, to_epoch_seconds};
use wmts_common::{nearest_index, WmtsError, WmtsResult};

use crate::state::{AppState, ConfigSnapshot};

const DEFAULT_START_DATE: &str = "1970-01-01";
const DEFAULT_END_DATE: &str = "2099-12-31";

/// Parameters of a point time series request.
#[derive(Debug, Clone, PartialEq)]
pub struct PointQuery {
    pub lat: f64,
    pub lon: f64,
    /// Inclusive bounds in epoch seconds
    pub start: f64,
    pub end: f64,
}

impl PointQuery {
    pub fn from_query(query: &HashMap<String, String>) -> WmtsResult<Self> {
        let coordinate = |name: &str| -> WmtsResult<f64> {
            let value = query
                .get(name)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| WmtsError::MissingParameter(name.to_string()))?;
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| WmtsError::invalid(name, format!("'{}' is not a number", value)))
        };
        let date = |name: &str, default: &str, end_of_day: bool| -> WmtsResult<f64> {
            let value = query.get(name).map(String::as_str).unwrap_or(default);
            let instant = parse_iso8601(value)
                .ok_or_else(|| WmtsError::invalid(name, format!("'{}' is not an ISO 8601 date", value)))?;
            let seconds = to_epoch_seconds(&instant);
            // A plain date covers the whole day
            Ok(if end_of_day && !value.contains('T') {
                seconds + 86_399.999
            } else {
                seconds
            })
        };

        Ok(Self {
            lat: coordinate("lat")?,
            lon: coordinate("lon")?,
            start: date("startDate", DEFAULT_START_DATE, false)?,
            end: date("endDate", DEFAULT_END_DATE, true)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointStatistics {
    #[serde(rename = "totalCount")]
    pub total_count: u32,
    #[serde(rename = "validCount")]
    pub valid_count: u32,
    /// `null` for missing values
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesEntry {
    pub result: PointStatistics,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesResponse {
    pub results: Vec<TimeSeriesEntry>,
}

/// Values of the cell nearest to a point for every time step in range.
///
/// The point must lie inside the dataset extent. Values that are NaN or equal
/// to `no_data` count as missing. Blocking.
pub fn point_time_series(
    dataset: &OpenDataset,
    variable: &str,
    query: &PointQuery,
    no_data: Option<f64>,
) -> WmtsResult<TimeSeriesResponse> {
    if dataset.variable(variable).is_none() {
        return Err(WmtsError::not_found(format!(
            "variable '{}' in dataset '{}'",
            variable,
            dataset.identifier()
        )));
    }
    if !dataset.extent.contains_point(query.lon, query.lat) {
        return Err(WmtsError::invalid(
            "lat",
            format!("point ({}, {}) is outside of the dataset extent", query.lon, query.lat),
        ));
    }

    let (Some(lat_index), Some(lon_index)) = (
        nearest_index(&dataset.lat.values, query.lat),
        nearest_index(&dataset.lon.values, query.lon),
    ) else {
        return Err(WmtsError::Internal("empty spatial axis".to_string()));
    };

    let in_range: Vec<usize> = dataset
        .times
        .iter()
        .enumerate()
        .filter(|(_, &t)| t >= query.start && t <= query.end)
        .map(|(i, _)| i)
        .collect();
    let (Some(&first), Some(&last)) = (in_range.iter().min(), in_range.iter().max()) else {
        return Ok(TimeSeriesResponse { results: Vec::new() });
    };

    let values = dataset.source().read_point_series(
        variable,
        lat_index as u64,
        lon_index as u64,
        first as u64..last as u64 + 1,
    )?;

    let results = in_range
        .iter()
        .map(|&i| {
            let value = values[i - first];
            let valid = !value.is_nan() && no_data.map_or(true, |n| value as f64 != n);
            TimeSeriesEntry {
                result: PointStatistics {
                    total_count: 1,
                    valid_count: valid as u32,
                    average: valid.then_some(value as f64),
                },
                date: from_epoch_seconds(dataset.times[i])
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            }
        })
        .collect();
    Ok(TimeSeriesResponse { results })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerBounds {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesLayer {
    pub name: String,
    pub dates: Vec<String>,
    pub bounds: LayerBounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesInfo {
    pub layers: Vec<TimeSeriesLayer>,
}

/// Every servable layer with its time steps, in configuration order. Blocking.
pub fn time_series_info(state: &AppState, snapshot: &ConfigSnapshot) -> TimeSeriesInfo {
    let mut layers = Vec::new();
    for descriptor in &snapshot.descriptors {
        let dataset = match state.datasets.acquire(descriptor) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!(dataset = %descriptor.identifier, error = %e, "leaving dataset out of time series info");
                continue;
            }
        };
        let dates: Vec<String> = dataset.times.iter().map(|&t| format_iso8601(t)).collect();
        let extent = dataset.extent;
        for variable in &dataset.variables {
            layers.push(TimeSeriesLayer {
                name: format!("{}.{}", descriptor.identifier, variable.name),
                dates: dates.clone(),
                bounds: LayerBounds {
                    xmin: extent.min_x,
                    ymin: extent.min_y,
                    xmax: extent.max_x,
                    ymax: extent.max_y,
                },
            });
        }
    }
    TimeSeriesInfo { layers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{CoordinateArray, DatasetDescriptor, MemorySource, SourceFormat};

    fn dataset() -> OpenDataset {
        let descriptor = DatasetDescriptor::new("demo", "demo", SourceFormat::Memory);
        OpenDataset::new(descriptor, Box::new(MemorySource::synthetic("demo"))).unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_lat_and_lon_are_required() {
        let err = PointQuery::from_query(&query(&[("lat", "10")])).unwrap_err();
        assert_eq!(err, WmtsError::MissingParameter("lon".into()));
        let err = PointQuery::from_query(&query(&[("lat", "x"), ("lon", "1")])).unwrap_err();
        assert_eq!(err.http_status_code(), 400);
    }

    #[test]
    fn test_point_series_over_all_steps() {
        let q = PointQuery::from_query(&query(&[("lat", "60.2"), ("lon", "-150.1")])).unwrap();
        let response = point_time_series(&dataset(), "conc_chl", &q, None).unwrap();
        let dates: Vec<&str> = response.results.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["2017-01-16", "2017-01-17", "2017-01-18"]);
        assert!(response.results.iter().all(|r| r.result.valid_count == 1));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let q = PointQuery::from_query(&query(&[
            ("lat", "60"),
            ("lon", "-150"),
            ("startDate", "2017-01-17"),
            ("endDate", "2017-01-17"),
        ]))
        .unwrap();
        let response = point_time_series(&dataset(), "conc_chl", &q, None).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].date, "2017-01-17");
    }

    #[test]
    fn test_missing_values_have_null_average() {
        // Inside the masked land block
        let q = PointQuery::from_query(&query(&[("lat", "10.5"), ("lon", "10.5")])).unwrap();
        let response = point_time_series(&dataset(), "conc_chl", &q, None).unwrap();
        let first = &response.results[0].result;
        assert_eq!((first.total_count, first.valid_count, first.average), (1, 0, None));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["results"][0]["result"]["average"].is_null());
    }

    #[test]
    fn test_no_data_sentinel_counts_as_missing() {
        // Sentinel stored as a plain value, not as the array fill value
        let time = CoordinateArray::new("time", vec![0.0, 1.0]).with_units("days since 2020-01-01");
        let lat = CoordinateArray::new("lat", vec![0.5, -0.5]);
        let lon = CoordinateArray::new("lon", vec![-0.5, 0.5]);
        let source = MemorySource::new("sentinel", time, lat, lon)
            .with_variable("sst", vec![-9999.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], None);
        let descriptor = DatasetDescriptor::new("sentinel", "sentinel", SourceFormat::Memory);
        let dataset = OpenDataset::new(descriptor, Box::new(source)).unwrap();
        let q = PointQuery {
            lat: 0.5,
            lon: -0.5,
            start: f64::MIN,
            end: f64::MAX,
        };

        let plain = point_time_series(&dataset, "sst", &q, None).unwrap();
        assert_eq!(plain.results[0].result.average, Some(-9999.0));

        let masked = point_time_series(&dataset, "sst", &q, Some(-9999.0)).unwrap();
        let first = &masked.results[0].result;
        assert_eq!((first.total_count, first.valid_count, first.average), (1, 0, None));
        assert_eq!(masked.results[1].result.average, Some(4.0));
    }

    #[test]
    fn test_point_outside_extent() {
        let q = PointQuery {
            lat: 95.0,
            lon: 0.0,
            start: 0.0,
            end: f64::MAX,
        };
        let err = point_time_series(&dataset(), "conc_chl", &q, None).unwrap_err();
        assert_eq!(err.http_status_code(), 400);
    }
}
