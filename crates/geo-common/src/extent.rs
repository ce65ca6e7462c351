//! Extent (bounding box with a projection) and its algebra.

use crate::error::{GeometryError, Result};
use crate::point::Point;
use crate::projection::Projection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of sample points per edge when reprojecting an extent boundary.
const DENSIFY_POINTS: usize = 21;

/// A rectangular bounding box in map coordinates of a projection.
///
/// Invariant: `xmax > xmin` and `ymax > ymin`. All operations return new
/// extents; an extent is never changed in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExtent", into = "RawExtent")]
pub struct Extent {
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
    projection: Projection,
}

#[derive(Serialize, Deserialize)]
struct RawExtent {
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
    projection: Projection,
}

impl Extent {
    /// Create an extent, rejecting degenerate or non-finite bounds.
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64, projection: Projection) -> Result<Self> {
        if ![xmin, xmax, ymin, ymax].iter().all(|v| v.is_finite()) {
            return Err(GeometryError::invalid(format!(
                "non-finite extent ({}, {}, {}, {})",
                xmin, xmax, ymin, ymax
            )));
        }
        if xmax <= xmin || ymax <= ymin {
            return Err(GeometryError::invalid(format!(
                "degenerate extent: x [{}, {}], y [{}, {}]",
                xmin, xmax, ymin, ymax
            )));
        }
        Ok(Self {
            xmin,
            xmax,
            ymin,
            ymax,
            projection,
        })
    }

    pub fn xmin(&self) -> f64 {
        self.xmin
    }

    pub fn xmax(&self) -> f64 {
        self.xmax
    }

    pub fn ymin(&self) -> f64 {
        self.ymin
    }

    pub fn ymax(&self) -> f64 {
        self.ymax
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Width in map units.
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Height in map units.
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn upper_left(&self) -> Point {
        Point::new(self.xmin, self.ymax, self.projection)
    }

    pub fn lower_right(&self) -> Point {
        Point::new(self.xmax, self.ymin, self.projection)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
            self.projection,
        )
    }

    /// Corners in the order upper-left, upper-right, lower-right, lower-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.xmin, self.ymax, self.projection),
            Point::new(self.xmax, self.ymax, self.projection),
            Point::new(self.xmax, self.ymin, self.projection),
            Point::new(self.xmin, self.ymin, self.projection),
        ]
    }

    /// Check if this extent overlaps another with a non-empty area.
    ///
    /// The other extent is reprojected first if needed.
    pub fn intersects(&self, other: &Extent) -> Result<bool> {
        let other = other.reproject(&self.projection)?;
        Ok(self.xmin < other.xmax
            && self.xmax > other.xmin
            && self.ymin < other.ymax
            && self.ymax > other.ymin)
    }

    /// Intersection with another extent, expressed in this extent's projection.
    pub fn intersection(&self, other: &Extent) -> Result<Extent> {
        let reprojected = other.reproject(&self.projection)?;
        let xmin = self.xmin.max(reprojected.xmin);
        let xmax = self.xmax.min(reprojected.xmax);
        let ymin = self.ymin.max(reprojected.ymin);
        let ymax = self.ymax.min(reprojected.ymax);
        if xmax <= xmin || ymax <= ymin {
            return Err(GeometryError::EmptyIntersection {
                a: self.to_string(),
                b: other.to_string(),
            });
        }
        Extent::new(xmin, xmax, ymin, ymax, self.projection)
    }

    /// Bounding union with another extent, expressed in this extent's projection.
    pub fn union(&self, other: &Extent) -> Result<Extent> {
        let other = other.reproject(&self.projection)?;
        Extent::new(
            self.xmin.min(other.xmin),
            self.xmax.max(other.xmax),
            self.ymin.min(other.ymin),
            self.ymax.max(other.ymax),
            self.projection,
        )
    }

    /// Grow (or shrink, with negative values) every side by `buffer`.
    pub fn buffer(&self, buffer: f64) -> Result<Extent> {
        self.buffer_sides(buffer, buffer, buffer, buffer)
    }

    /// Grow each side independently.
    pub fn buffer_sides(&self, left: f64, right: f64, up: f64, down: f64) -> Result<Extent> {
        Extent::new(
            self.xmin - left,
            self.xmax + right,
            self.ymin - down,
            self.ymax + up,
            self.projection,
        )
    }

    /// Shift the extent by a vector in map units.
    pub fn translate(&self, dx: f64, dy: f64) -> Result<Extent> {
        Extent::new(
            self.xmin + dx,
            self.xmax + dx,
            self.ymin + dy,
            self.ymax + dy,
            self.projection,
        )
    }

    /// Check if a point (reprojected if needed) lies inside or on the boundary.
    pub fn contains(&self, point: &Point) -> Result<bool> {
        let p = point.reproject(&self.projection)?;
        Ok(p.x >= self.xmin && p.x <= self.xmax && p.y >= self.ymin && p.y <= self.ymax)
    }

    /// Approximate equality of bounds plus semantic projection equality.
    pub fn equal(&self, other: &Extent, tol: f64) -> bool {
        self.projection == other.projection
            && (self.xmin - other.xmin).abs() <= tol
            && (self.xmax - other.xmax).abs() <= tol
            && (self.ymin - other.ymin).abs() <= tol
            && (self.ymax - other.ymax).abs() <= tol
    }

    /// Reproject into another projection.
    ///
    /// Each edge is densified before transforming and the result is the
    /// bounding box of all transformed points.
    pub fn reproject(&self, target: &Projection) -> Result<Extent> {
        if self.projection == *target {
            return Ok(*self);
        }
        let transformer = self.projection.transformer(target)?;

        let mut bounds = [f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY];
        let mut first_error = None;
        let mut count = 0;

        for i in 0..DENSIFY_POINTS {
            let t = i as f64 / (DENSIFY_POINTS - 1) as f64;
            let x = self.xmin + t * self.width();
            let y = self.ymin + t * self.height();
            let edges = [
                (x, self.ymin),
                (x, self.ymax),
                (self.xmin, y),
                (self.xmax, y),
            ];
            for (px, py) in edges {
                match transformer.transform(px, py) {
                    Ok((tx, ty)) => {
                        bounds[0] = bounds[0].min(tx);
                        bounds[1] = bounds[1].max(tx);
                        bounds[2] = bounds[2].min(ty);
                        bounds[3] = bounds[3].max(ty);
                        count += 1;
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if count < 2 {
            return Err(first_error.unwrap_or_else(|| {
                GeometryError::invalid(format!("cannot reproject {} to {}", self, target))
            }));
        }
        Extent::new(bounds[0], bounds[1], bounds[2], bounds[3], *target)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Extent(x=[{}, {}], y=[{}, {}], {})",
            self.xmin, self.xmax, self.ymin, self.ymax, self.projection
        )
    }
}

impl TryFrom<RawExtent> for Extent {
    type Error = GeometryError;

    fn try_from(raw: RawExtent) -> Result<Self> {
        Extent::new(raw.xmin, raw.xmax, raw.ymin, raw.ymax, raw.projection)
    }
}

impl From<Extent> for RawExtent {
    fn from(e: Extent) -> Self {
        RawExtent {
            xmin: e.xmin,
            xmax: e.xmax,
            ymin: e.ymin,
            ymax: e.ymax,
            projection: e.projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Extent {
        Extent::new(xmin, xmax, ymin, ymax, Projection::Utm { zone: 32, north: true }).unwrap()
    }

    #[test]
    fn test_degenerate_rejected() {
        let p = Projection::Wgs84;
        assert!(Extent::new(1.0, 1.0, 0.0, 1.0, p).is_err());
        assert!(Extent::new(0.0, 1.0, 2.0, 1.0, p).is_err());
        assert!(Extent::new(0.0, f64::INFINITY, 0.0, 1.0, p).is_err());
    }

    #[test]
    fn test_intersection() {
        let a = ext(0.0, 100.0, 0.0, 100.0);
        let b = ext(50.0, 150.0, -50.0, 50.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!((i.xmin(), i.xmax(), i.ymin(), i.ymax()), (50.0, 100.0, 0.0, 50.0));
    }

    #[test]
    fn test_empty_intersection() {
        let a = ext(0.0, 100.0, 0.0, 100.0);
        let b = ext(100.0, 200.0, 0.0, 100.0);
        assert!(matches!(
            a.intersection(&b),
            Err(GeometryError::EmptyIntersection { .. })
        ));
        assert!(!a.intersects(&b).unwrap());
    }

    #[test]
    fn test_union() {
        let a = ext(0.0, 100.0, 0.0, 100.0);
        let b = ext(50.0, 150.0, -50.0, 50.0);
        let u = a.union(&b).unwrap();
        assert_eq!((u.xmin(), u.xmax(), u.ymin(), u.ymax()), (0.0, 150.0, -50.0, 100.0));
    }

    #[test]
    fn test_buffer_sides() {
        let a = ext(0.0, 100.0, 0.0, 100.0);
        let b = a.buffer_sides(1.0, 2.0, 3.0, 4.0).unwrap();
        assert_eq!((b.xmin(), b.xmax(), b.ymin(), b.ymax()), (-1.0, 102.0, -4.0, 103.0));
        assert!(a.buffer(-60.0).is_err());
    }

    #[test]
    fn test_reproject_roundtrip_contains_original() {
        let geo = Extent::new(8.0, 10.0, 50.0, 51.0, Projection::Wgs84).unwrap();
        let utm = geo.reproject(&Projection::Utm { zone: 32, north: true }).unwrap();
        assert!(utm.contains(&geo.center()).unwrap());
        let back = utm.reproject(&Projection::Wgs84).unwrap();
        assert!(back.xmin() <= 8.0 + 1e-4 && back.xmax() >= 10.0 - 1e-4);
        assert!(back.ymin() <= 50.0 + 1e-4 && back.ymax() >= 51.0 - 1e-4);
    }

    #[test]
    fn test_corners_order() {
        let c = ext(0.0, 10.0, 0.0, 5.0).corners();
        assert_eq!((c[0].x, c[0].y), (0.0, 5.0));
        assert_eq!((c[2].x, c[2].y), (10.0, 0.0));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"xmin":0,"xmax":1,"ymin":0,"ymax":1,"projection":"EPSG:4326"}"#;
        assert!(serde_json::from_str::<Extent>(json).is_ok());
        let bad = r#"{"xmin":1,"xmax":0,"ymin":0,"ymax":1,"projection":"EPSG:4326"}"#;
        assert!(serde_json::from_str::<Extent>(bad).is_err());
    }
}
