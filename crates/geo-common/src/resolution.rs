//! Pixel resolution.

use crate::error::{GeometryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-axis ground size of one pixel. Both sizes are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct Resolution {
    x: f64,
    y: f64,
}

impl Resolution {
    /// Create a resolution, rejecting non-positive or non-finite sizes.
    pub fn new(x: f64, y: f64) -> Result<Self> {
        if !(x.is_finite() && y.is_finite()) || x <= 0.0 || y <= 0.0 {
            return Err(GeometryError::invalid(format!(
                "resolution must be positive, got ({}, {})",
                x, y
            )));
        }
        Ok(Self { x, y })
    }

    /// Square pixels of the given size.
    pub fn square(size: f64) -> Result<Self> {
        Self::new(size, size)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Scale both axes by a factor.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Compare with a tolerance.
    pub fn equal(&self, other: &Resolution, tol: f64) -> bool {
        (self.x - other.x).abs() <= tol && (self.y - other.y).abs() <= tol
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

impl TryFrom<(f64, f64)> for Resolution {
    type Error = GeometryError;

    fn try_from((x, y): (f64, f64)) -> Result<Self> {
        Self::new(x, y)
    }
}

impl From<Resolution> for (f64, f64) {
    fn from(r: Resolution) -> Self {
        (r.x, r.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive() {
        assert!(Resolution::new(0.0, 1.0).is_err());
        assert!(Resolution::new(1.0, -30.0).is_err());
        assert!(Resolution::new(f64::NAN, 1.0).is_err());
        assert!(Resolution::new(30.0, 30.0).is_ok());
    }

    #[test]
    fn test_equal_tolerance() {
        let a = Resolution::square(30.0).unwrap();
        let b = Resolution::new(30.000001, 29.999999).unwrap();
        assert!(a.equal(&b, 1e-5));
        assert!(!a.equal(&Resolution::square(30.1).unwrap(), 1e-5));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Resolution = serde_json::from_str("[10.0, 20.0]").unwrap();
        assert_eq!(ok.x(), 10.0);
        assert!(serde_json::from_str::<Resolution>("[0.0, 20.0]").is_err());
    }
}
