//! Map coordinates with a projection.

use crate::error::Result;
use crate::projection::Projection;
use serde::{Deserialize, Serialize};

/// A point in map coordinates of a given projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub projection: Projection,
}

impl Point {
    pub fn new(x: f64, y: f64, projection: Projection) -> Self {
        Self { x, y, projection }
    }

    /// Transform the point into another projection.
    pub fn reproject(&self, target: &Projection) -> Result<Point> {
        let (x, y) = self.projection.transform(target, self.x, self.y)?;
        Ok(Point::new(x, y, *target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproject_same_projection() {
        let p = Point::new(1.0, 2.0, Projection::Wgs84);
        assert_eq!(p.reproject(&Projection::Wgs84).unwrap(), p);
    }

    #[test]
    fn test_reproject_to_utm() {
        let p = Point::new(9.0, 0.0, Projection::Wgs84);
        let utm = p
            .reproject(&Projection::Utm { zone: 32, north: true })
            .unwrap();
        assert!((utm.x - 500_000.0).abs() < 1e-6);
        assert!(utm.y.abs() < 1e-6);
    }
}
