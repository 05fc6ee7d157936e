//! Time coordinate handling.
//!
//! Time axes are stored as CF-style offsets ("days since 1970-01-01") and
//! handled internally as seconds since the Unix epoch.

use crate::tile::nearest_index;
use crate::{WmtsError, WmtsResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// How a request picks a time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSelector {
    /// No time given: the first time step.
    First,
    /// `current`: the latest time step.
    Current,
    /// The time step nearest to an instant.
    At(DateTime<Utc>),
}

impl TimeSelector {
    /// Parse the `time` request parameter.
    pub fn parse(value: Option<&str>) -> WmtsResult<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(TimeSelector::First),
            Some(s) if s.eq_ignore_ascii_case("current") => Ok(TimeSelector::Current),
            Some(s) => parse_iso8601(s)
                .map(TimeSelector::At)
                .ok_or_else(|| WmtsError::invalid("time", format!("'{}' is not an ISO 8601 time", s))),
        }
    }

    /// Index of the selected step in a time axis given as epoch seconds.
    pub fn resolve(&self, epoch_seconds: &[f64]) -> Option<usize> {
        if epoch_seconds.is_empty() {
            return None;
        }
        match self {
            TimeSelector::First => Some(0),
            TimeSelector::Current => Some(epoch_seconds.len() - 1),
            TimeSelector::At(instant) => nearest_index(epoch_seconds, to_epoch_seconds(instant)),
        }
    }
}

/// Parse an ISO 8601 timestamp, date-time without zone, or plain date (UTC assumed).
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

pub fn to_epoch_seconds(instant: &DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + instant.timestamp_subsec_nanos() as f64 * 1e-9
}

pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Format epoch seconds as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_iso8601(seconds: f64) -> String {
    match from_epoch_seconds(seconds) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => seconds.to_string(),
    }
}

/// CF `units` attribute of a time coordinate, e.g. `"hours since 2000-01-01 00:00:00"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfTimeUnits {
    /// Seconds per unit step
    pub scale: f64,
    /// Reference instant
    pub epoch: DateTime<Utc>,
}

impl CfTimeUnits {
    pub fn parse(units: &str) -> Option<Self> {
        let (unit, reference) = units.trim().split_once(" since ")?;
        let scale = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "h" => 3600.0,
            "days" | "day" | "d" => 86_400.0,
            _ => return None,
        };
        let reference = reference.trim().trim_end_matches(" UTC").trim_end_matches('Z');
        let epoch = parse_iso8601(reference)?;
        Some(Self { scale, epoch })
    }

    pub fn to_epoch_seconds(&self, value: f64) -> f64 {
        to_epoch_seconds(&self.epoch) + value * self.scale
    }
}
