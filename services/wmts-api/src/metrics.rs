//! Application metrics collection and reporting.
//!
//! Counters and histograms go to the global `metrics` recorder (exported by
//! Prometheus at `/metrics`); the collector keeps process-local totals for the
//! JSON status view.

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How a tile request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOutcome {
    Rendered,
    /// Outside the pyramid or without any data
    Empty,
    Cached,
    Failed,
}

impl TileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileOutcome::Rendered => "rendered",
            TileOutcome::Empty => "empty",
            TileOutcome::Cached => "cached",
            TileOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
}

impl TimingStats {
    fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.total_us += duration_us;
        self.last_us = duration_us;
        if self.min_us == 0 || duration_us < self.min_us {
            self.min_us = duration_us;
        }
        if duration_us > self.max_us {
            self.max_us = duration_us;
        }
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_us as f64 / self.count as f64) / 1000.0
        }
    }
}

/// Metrics collector for the tile service.
#[derive(Debug)]
pub struct MetricsCollector {
    pub tile_requests: AtomicU64,
    pub tiles_rendered: AtomicU64,
    pub tiles_empty: AtomicU64,
    pub tiles_cached: AtomicU64,
    pub tile_errors: AtomicU64,
    pub capabilities_requests: AtomicU64,
    render_times: Mutex<TimingStats>,
    start_time: Instant,
}

/// Point-in-time copy of the collector.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub tile_requests: u64,
    pub tiles_rendered: u64,
    pub tiles_empty: u64,
    pub tiles_cached: u64,
    pub tile_errors: u64,
    pub capabilities_requests: u64,
    pub render_avg_ms: f64,
    pub render_min_ms: f64,
    pub render_max_ms: f64,
    pub render_last_ms: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tile_requests: AtomicU64::new(0),
            tiles_rendered: AtomicU64::new(0),
            tiles_empty: AtomicU64::new(0),
            tiles_cached: AtomicU64::new(0),
            tile_errors: AtomicU64::new(0),
            capabilities_requests: AtomicU64::new(0),
            render_times: Mutex::new(TimingStats::default()),
            start_time: Instant::now(),
        }
    }

    pub fn record_tile(&self, outcome: TileOutcome) {
        self.tile_requests.fetch_add(1, Ordering::Relaxed);
        let total = match outcome {
            TileOutcome::Rendered => &self.tiles_rendered,
            TileOutcome::Empty => &self.tiles_empty,
            TileOutcome::Cached => &self.tiles_cached,
            TileOutcome::Failed => &self.tile_errors,
        };
        total.fetch_add(1, Ordering::Relaxed);
        counter!("wmts_tile_requests_total", "outcome" => outcome.as_str()).increment(1);
    }

    pub fn record_render(&self, elapsed: Duration) {
        self.render_times.lock().record(elapsed.as_micros() as u64);
        histogram!("wmts_tile_render_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn record_capabilities(&self) {
        self.capabilities_requests.fetch_add(1, Ordering::Relaxed);
        counter!("wmts_capabilities_requests_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let times = self.render_times.lock();
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            tile_requests: self.tile_requests.load(Ordering::Relaxed),
            tiles_rendered: self.tiles_rendered.load(Ordering::Relaxed),
            tiles_empty: self.tiles_empty.load(Ordering::Relaxed),
            tiles_cached: self.tiles_cached.load(Ordering::Relaxed),
            tile_errors: self.tile_errors.load(Ordering::Relaxed),
            capabilities_requests: self.capabilities_requests.load(Ordering::Relaxed),
            render_avg_ms: times.avg_ms(),
            render_min_ms: times.min_us as f64 / 1000.0,
            render_max_ms: times.max_us as f64 / 1000.0,
            render_last_ms: times.last_us as f64 / 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted_separately() {
        let metrics = MetricsCollector::new();
        metrics.record_tile(TileOutcome::Rendered);
        metrics.record_tile(TileOutcome::Empty);
        metrics.record_tile(TileOutcome::Empty);
        metrics.record_render(Duration::from_millis(4));
        metrics.record_render(Duration::from_millis(2));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tile_requests, 3);
        assert_eq!(snapshot.tiles_empty, 2);
        assert_eq!(snapshot.tile_errors, 0);
        assert_eq!(snapshot.render_min_ms, 2.0);
        assert_eq!(snapshot.render_max_ms, 4.0);
        assert_eq!(snapshot.render_avg_ms, 3.0);
    }
}
