//! Geographic bounding boxes.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Derive the extent covered by a grid from its cell-center coordinates.
    ///
    /// Each edge is pushed outwards by half of the smallest coordinate step, so
    /// the box covers whole cells. Coordinates may be ascending or descending.
    /// Returns `None` for empty or non-finite coordinate arrays.
    pub fn from_cell_centers(lon: &[f64], lat: &[f64]) -> Option<Self> {
        let (min_x, max_x) = axis_bounds(lon)?;
        let (min_y, max_y) = axis_bounds(lat)?;
        Some(Self::new(min_x, min_y, max_x, max_y))
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the box has positive, finite area.
    pub fn is_valid(&self) -> bool {
        self.width().is_finite() && self.height().is_finite() && self.width() > 0.0 && self.height() > 0.0
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// `[min_x, min_y, max_x, max_y]`, the order JSON clients expect.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Generate a cache key fragment for this bbox (quantized to avoid floating point issues).
    pub fn cache_key(&self) -> String {
        format!(
            "{:.6}_{:.6}_{:.6}_{:.6}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

fn axis_bounds(centers: &[f64]) -> Option<(f64, f64)> {
    let first = *centers.first()?;
    let last = *centers.last()?;
    if !first.is_finite() || !last.is_finite() {
        return None;
    }

    let step = centers
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min);
    let half = if step.is_finite() { step / 2.0 } else { 0.0 };

    Some((first.min(last) - half, first.max(last) + half))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects_and_contains() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(10.0, 0.0, 20.0, 10.0);

        assert!(a.intersects(&b));
        // Shared edges do not count as overlap
        assert!(!a.intersects(&c));
        assert!(a.contains_point(10.0, 0.0));
        assert!(!a.contains_point(10.5, 5.0));
    }

    #[test]
    fn test_from_cell_centers_descending_lat() {
        let lon = [-179.5, -178.5, -177.5];
        let lat = [89.5, 88.5];
        let bbox = BoundingBox::from_cell_centers(&lon, &lat).unwrap();
        assert_eq!(bbox, BoundingBox::new(-180.0, 88.0, -177.0, 90.0));
    }

    #[test]
    fn test_from_cell_centers_empty() {
        assert!(BoundingBox::from_cell_centers(&[], &[1.0]).is_none());
    }
}
