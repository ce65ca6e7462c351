//! Integer pixel addressing.

use crate::error::{GeometryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A pixel position that may lie outside a grid (negative or past the edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub x: i64,
    pub y: i64,
}

impl Pixel {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// A non-negative pixel offset inside a grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelOffset {
    pub x: usize,
    pub y: usize,
}

impl PixelOffset {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Convert a possibly negative pixel into an offset.
    pub fn try_from_pixel(pixel: Pixel) -> Result<Self> {
        if pixel.x < 0 || pixel.y < 0 {
            return Err(GeometryError::out_of_range(format!(
                "negative pixel offset ({}, {})",
                pixel.x, pixel.y
            )));
        }
        Ok(Self::new(pixel.x as usize, pixel.y as usize))
    }
}

/// Size of a raster window in pixels. Both dimensions are at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(usize, usize)", into = "(usize, usize)")]
pub struct RasterSize {
    x: usize,
    y: usize,
}

impl RasterSize {
    pub fn new(x: usize, y: usize) -> Result<Self> {
        if x == 0 || y == 0 {
            return Err(GeometryError::invalid(format!(
                "raster size must be positive, got {}x{}",
                x, y
            )));
        }
        Ok(Self { x, y })
    }

    pub(crate) fn new_unchecked(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Number of columns.
    pub fn x(&self) -> usize {
        self.x
    }

    /// Number of rows.
    pub fn y(&self) -> usize {
        self.y
    }

    /// Total number of pixels.
    pub fn count(&self) -> usize {
        self.x * self.y
    }

    /// Per-axis minimum of two sizes.
    pub fn min(&self, other: &RasterSize) -> RasterSize {
        RasterSize {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
        }
    }
}

impl fmt::Display for RasterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

impl TryFrom<(usize, usize)> for RasterSize {
    type Error = GeometryError;

    fn try_from((x, y): (usize, usize)) -> Result<Self> {
        Self::new(x, y)
    }
}

impl From<RasterSize> for (usize, usize) {
    fn from(s: RasterSize) -> Self {
        (s.x, s.y)
    }
}
