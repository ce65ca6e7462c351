//! Pixel grids and their decomposition into blocks.
//!
//! A [`Grid`] is an [`Extent`] quantized to an integer number of pixels at a
//! given [`Resolution`]. Construction snaps the extent: the pixel count per
//! axis is rounded to the nearest integer and `xmax`/`ymax` are re-derived
//! from `xmin`/`ymin`. Every grid therefore has an exact integer size.
//!
//! ```text
//!  (xmin, ymax)
//!       +-------+-------+-----+
//!       | 0     | 1     | 2   |   row-major blocks,
//!       +-------+-------+-----+   border blocks trimmed
//!       | 3     | 4     | 5   |
//!       +-------+-------+-----+
//!                        (xmax, ymin)
//! ```

use crate::error::{GeometryError, Result};
use crate::extent::Extent;
use crate::pixel::{Pixel, PixelOffset, RasterSize};
use crate::point::Point;
use crate::projection::Projection;
use crate::resolution::Resolution;
use crate::DEFAULT_TOLERANCE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An extent snapped to an integer multiple of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid", into = "RawGrid")]
pub struct Grid {
    extent: Extent,
    resolution: Resolution,
}

#[derive(Serialize, Deserialize)]
struct RawGrid {
    extent: Extent,
    resolution: Resolution,
}

impl Grid {
    /// Create a grid, snapping the extent to whole pixels.
    ///
    /// Fails with `InvalidGeometry` if the extent is smaller than half a
    /// pixel in either direction.
    pub fn new(extent: Extent, resolution: Resolution) -> Result<Self> {
        let xsize = (extent.width() / resolution.x()).round();
        let ysize = (extent.height() / resolution.y()).round();
        if xsize < 1.0 || ysize < 1.0 {
            return Err(GeometryError::invalid(format!(
                "{} is smaller than one pixel at resolution {}",
                extent, resolution
            )));
        }
        let extent = Extent::new(
            extent.xmin(),
            extent.xmin() + xsize * resolution.x(),
            extent.ymin(),
            extent.ymin() + ysize * resolution.y(),
            *extent.projection(),
        )?;
        Ok(Self { extent, resolution })
    }

    /// Create a grid from its upper-left corner and pixel size.
    pub fn from_upper_left(
        xmin: f64,
        ymax: f64,
        resolution: Resolution,
        size: RasterSize,
        projection: Projection,
    ) -> Result<Self> {
        let extent = Extent::new(
            xmin,
            xmin + size.x() as f64 * resolution.x(),
            ymax - size.y() as f64 * resolution.y(),
            ymax,
            projection,
        )?;
        Self::new(extent, resolution)
    }

    /// Create a grid from a north-up affine geotransform
    /// `(xmin, xres, 0, ymax, 0, -yres)`.
    pub fn from_geo_transform(
        geo_transform: [f64; 6],
        size: RasterSize,
        projection: Projection,
    ) -> Result<Self> {
        let [xmin, rx, rot_x, ymax, rot_y, neg_ry] = geo_transform;
        if rot_x != 0.0 || rot_y != 0.0 {
            return Err(GeometryError::invalid(
                "rotated geotransforms are not supported",
            ));
        }
        Self::from_upper_left(xmin, ymax, Resolution::new(rx, -neg_ry)?, size, projection)
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn projection(&self) -> &Projection {
        self.extent.projection()
    }

    /// Size in pixels.
    pub fn size(&self) -> RasterSize {
        let x = (self.extent.width() / self.resolution.x()).round() as usize;
        let y = (self.extent.height() / self.resolution.y()).round() as usize;
        // Construction guarantees at least one pixel per axis
        RasterSize::new_unchecked(x.max(1), y.max(1))
    }

    /// Size as `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        let size = self.size();
        (size.y(), size.x())
    }

    /// Same extent at a new resolution.
    pub fn at_resolution(&self, resolution: Resolution) -> Result<Grid> {
        Grid::new(self.extent, resolution)
    }

    /// Map x coordinates of the pixel centers, left to right.
    pub fn x_map_coordinates(&self) -> Vec<f64> {
        (0..self.size().x())
            .map(|x| self.extent.xmin() + (x as f64 + 0.5) * self.resolution.x())
            .collect()
    }

    /// Map y coordinates of the pixel centers, top to bottom.
    pub fn y_map_coordinates(&self) -> Vec<f64> {
        (0..self.size().y())
            .map(|y| self.extent.ymax() - (y as f64 + 0.5) * self.resolution.y())
            .collect()
    }

    /// Pixel containing a point, reprojecting the point first if needed.
    ///
    /// The result may lie outside the grid.
    pub fn pixel_coordinate(&self, point: &Point) -> Result<Pixel> {
        let p = point.reproject(self.projection())?;
        Ok(Pixel::new(
            ((p.x - self.extent.xmin()) / self.resolution.x()).floor() as i64,
            ((self.extent.ymax() - p.y) / self.resolution.y()).floor() as i64,
        ))
    }

    /// North-up affine geotransform `(xmin, xres, 0, ymax, 0, -yres)`.
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.extent.xmin(),
            self.resolution.x(),
            0.0,
            self.extent.ymax(),
            0.0,
            -self.resolution.y(),
        ]
    }

    /// Approximate equality of extent, resolution and projection.
    pub fn equal(&self, other: &Grid, tol: f64) -> bool {
        self.extent.equal(&other.extent, tol) && self.resolution.equal(&other.resolution, tol)
    }

    /// This grid clipped to an extent, kept aligned to this grid's pixels.
    pub fn clip(&self, extent: &Extent) -> Result<Grid> {
        let clipped = self.extent.intersection(extent)?;
        Grid::new(clipped, self.resolution)?.anchor(&self.extent.upper_left())
    }

    /// Grow the grid by `buffer` pixels on every side.
    pub fn pixel_buffer(&self, buffer: usize) -> Result<Grid> {
        self.pixel_buffer_sides(buffer, buffer, buffer, buffer)
    }

    /// Grow the grid by a number of pixels on each side.
    pub fn pixel_buffer_sides(
        &self,
        left: usize,
        right: usize,
        up: usize,
        down: usize,
    ) -> Result<Grid> {
        let rx = self.resolution.x();
        let ry = self.resolution.y();
        let extent = self.extent.buffer_sides(
            left as f64 * rx,
            right as f64 * rx,
            up as f64 * ry,
            down as f64 * ry,
        )?;
        Grid::new(extent, self.resolution)
    }

    /// Shift the grid by less than one pixel so that its pixel corners line
    /// up with `point`.
    pub fn anchor(&self, point: &Point) -> Result<Grid> {
        let p = point.reproject(self.projection())?;
        let rx = self.resolution.x();
        let ry = self.resolution.y();
        let mut xoff = (self.extent.xmin() - p.x).rem_euclid(rx);
        let mut yoff = (self.extent.ymin() - p.y).rem_euclid(ry);
        if xoff > rx / 2.0 {
            xoff -= rx;
        }
        if yoff > ry / 2.0 {
            yoff -= ry;
        }
        Grid::new(self.extent.translate(-xoff, -yoff)?, self.resolution)
    }

    /// Sub-window of `size` pixels starting at `offset`.
    ///
    /// With `trim`, a negative offset is clamped to zero and the size is
    /// clamped to the pixels remaining inside this grid. A trimmed window
    /// with nothing left inside the grid fails with `OutOfRange`. Without
    /// `trim` the window is returned as requested, even outside this grid.
    pub fn subset(&self, offset: Pixel, size: RasterSize, trim: bool) -> Result<Grid> {
        let (offset, size) = if trim {
            let own = self.size();
            let ox = offset.x.max(0);
            let oy = offset.y.max(0);
            let sx = (size.x() as i64).min(own.x() as i64 - ox);
            let sy = (size.y() as i64).min(own.y() as i64 - oy);
            if sx <= 0 || sy <= 0 {
                return Err(GeometryError::out_of_range(format!(
                    "window at ({}, {}) of size {} lies outside grid of size {}",
                    offset.x, offset.y, size, own
                )));
            }
            (Pixel::new(ox, oy), RasterSize::new(sx as usize, sy as usize)?)
        } else {
            (offset, size)
        };

        let rx = self.resolution.x();
        let ry = self.resolution.y();
        let xmin = self.extent.xmin() + offset.x as f64 * rx;
        let xmax = xmin + size.x() as f64 * rx;
        let ymax = self.extent.ymax() - offset.y as f64 * ry;
        let ymin = ymax - size.y() as f64 * ry;
        Grid::new(
            Extent::new(xmin, xmax, ymin, ymax, *self.projection())?,
            self.resolution,
        )
    }

    /// Decompose into row-major blocks of at most `block_size` pixels.
    ///
    /// The block size is clamped to the grid size; border blocks are trimmed.
    /// The blocks cover this grid exactly and without overlap.
    pub fn subgrids(&self, block_size: RasterSize) -> Result<Vec<Subgrid>> {
        let own = self.size();
        let block = block_size.min(&own);
        let ny = own.y().div_ceil(block.y());
        let nx = own.x().div_ceil(block.x());
        let n = ny * nx;

        let mut result = Vec::with_capacity(n);
        for iy in 0..ny {
            for ix in 0..nx {
                let offset = PixelOffset::new(ix * block.x(), iy * block.y());
                let grid = self.subset(
                    Pixel::new(offset.x as i64, offset.y as i64),
                    block,
                    true,
                )?;
                result.push(Subgrid {
                    grid,
                    index: result.len(),
                    n,
                    iy,
                    ix,
                    ny,
                    nx,
                    offset,
                });
            }
        }
        Ok(result)
    }

    /// Pixel offset of this grid's upper-left corner inside `parent`.
    ///
    /// Offsets are rounded to the nearest pixel. Negative offsets, a
    /// different projection or a different resolution fail.
    pub fn offset_in(&self, parent: &Grid) -> Result<PixelOffset> {
        if self.projection() != parent.projection() {
            return Err(GeometryError::invalid(format!(
                "grid projection {} differs from parent projection {}",
                self.projection(),
                parent.projection()
            )));
        }
        if !self.resolution.equal(&parent.resolution, DEFAULT_TOLERANCE) {
            return Err(GeometryError::invalid(format!(
                "grid resolution {} differs from parent resolution {}",
                self.resolution, parent.resolution
            )));
        }
        let x = ((self.extent.xmin() - parent.extent.xmin()) / self.resolution.x()).round() as i64;
        let y = ((parent.extent.ymax() - self.extent.ymax()) / self.resolution.y()).round() as i64;
        PixelOffset::try_from_pixel(Pixel::new(x, y))
    }

    /// Check that a window of this grid lies within `parent`.
    pub fn is_within(&self, parent: &Grid) -> Result<bool> {
        let offset = match self.offset_in(parent) {
            Ok(offset) => offset,
            Err(GeometryError::OutOfRange(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let size = self.size();
        let own = parent.size();
        Ok(offset.x + size.x() <= own.x() && offset.y + size.y() <= own.y())
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Grid({}, resolution={}, size={})",
            self.extent,
            self.resolution,
            self.size()
        )
    }
}

impl TryFrom<RawGrid> for Grid {
    type Error = GeometryError;

    fn try_from(raw: RawGrid) -> Result<Self> {
        Grid::new(raw.extent, raw.resolution)
    }
}

impl From<Grid> for RawGrid {
    fn from(g: Grid) -> Self {
        RawGrid {
            extent: g.extent,
            resolution: g.resolution,
        }
    }
}

/// One block of a grid decomposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subgrid {
    grid: Grid,
    index: usize,
    n: usize,
    iy: usize,
    ix: usize,
    ny: usize,
    nx: usize,
    offset: PixelOffset,
}

impl Subgrid {
    /// The block's own grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Row-major flat index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Total number of blocks.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn iy(&self) -> usize {
        self.iy
    }

    pub fn ix(&self) -> usize {
        self.ix
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Pixel offset inside the decomposed grid.
    pub fn offset(&self) -> PixelOffset {
        self.offset
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.n
    }

    pub fn is_last_y(&self) -> bool {
        self.iy + 1 == self.ny
    }

    pub fn is_last_x(&self) -> bool {
        self.ix + 1 == self.nx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(xsize: usize, ysize: usize, res: f64) -> Grid {
        Grid::from_upper_left(
            0.0,
            ysize as f64 * res,
            Resolution::square(res).unwrap(),
            RasterSize::new(xsize, ysize).unwrap(),
            Projection::Utm { zone: 32, north: true },
        )
        .unwrap()
    }

    #[test]
    fn test_snapping() {
        let extent = Extent::new(0.0, 95.0, 0.0, 44.0, Projection::Wgs84).unwrap();
        let g = Grid::new(extent, Resolution::square(10.0).unwrap()).unwrap();
        // 9.5 rounds to 10, 4.4 rounds to 4
        assert_eq!(g.size(), RasterSize::new(10, 4).unwrap());
        assert_eq!(g.extent().xmax(), 100.0);
        assert_eq!(g.extent().ymax(), 40.0);
    }

    #[test]
    fn test_smaller_than_pixel() {
        let extent = Extent::new(0.0, 4.0, 0.0, 100.0, Projection::Wgs84).unwrap();
        assert!(Grid::new(extent, Resolution::square(10.0).unwrap()).is_err());
    }

    #[test]
    fn test_geo_transform_roundtrip() {
        let g = grid(30, 20, 10.0);
        let back = Grid::from_geo_transform(g.geo_transform(), g.size(), *g.projection()).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn test_map_coordinates() {
        let g = grid(3, 2, 10.0);
        assert_eq!(g.x_map_coordinates(), vec![5.0, 15.0, 25.0]);
        assert_eq!(g.y_map_coordinates(), vec![15.0, 5.0]);
    }

    #[test]
    fn test_pixel_coordinate() {
        let g = grid(3, 2, 10.0);
        let p = Point::new(12.0, 19.0, *g.projection());
        assert_eq!(g.pixel_coordinate(&p).unwrap(), Pixel::new(1, 0));
        let outside = Point::new(-1.0, 25.0, *g.projection());
        assert_eq!(g.pixel_coordinate(&outside).unwrap(), Pixel::new(-1, -1));
    }

    #[test]
    fn test_subset_untrimmed_outside() {
        let g = grid(10, 10, 1.0);
        let s = g
            .subset(Pixel::new(-2, 8), RasterSize::new(4, 4).unwrap(), false)
            .unwrap();
        assert_eq!(s.extent().xmin(), -2.0);
        assert_eq!(s.size(), RasterSize::new(4, 4).unwrap());
        assert!(s.offset_in(&g).is_err());
    }

    #[test]
    fn test_subset_trimmed() {
        let g = grid(10, 10, 1.0);
        let s = g
            .subset(Pixel::new(8, -3), RasterSize::new(4, 4).unwrap(), true)
            .unwrap();
        assert_eq!(s.size(), RasterSize::new(2, 4).unwrap());
        assert_eq!(s.offset_in(&g).unwrap(), PixelOffset::new(8, 0));
    }

    #[test]
    fn test_subset_trimmed_empty_rejected() {
        let g = grid(10, 10, 1.0);
        let err = g
            .subset(Pixel::new(10, 0), RasterSize::new(4, 4).unwrap(), true)
            .unwrap_err();
        assert!(matches!(err, GeometryError::OutOfRange(_)));
    }

    #[test]
    fn test_pixel_buffer() {
        let g = grid(10, 10, 2.0);
        let b = g.pixel_buffer(1).unwrap();
        assert_eq!(b.size(), RasterSize::new(12, 12).unwrap());
        assert_eq!(b.extent().xmin(), -2.0);
        assert_eq!(g.offset_in(&b).unwrap(), PixelOffset::new(1, 1));
    }

    #[test]
    fn test_anchor_shifts_less_than_half_pixel() {
        let extent =
            Extent::new(0.3, 100.3, 0.8, 100.8, Projection::Utm { zone: 32, north: true }).unwrap();
        let g = Grid::new(extent, Resolution::square(1.0).unwrap()).unwrap();
        let anchored = g
            .anchor(&Point::new(0.0, 0.0, *g.projection()))
            .unwrap();
        assert!((anchored.extent().xmin() - 0.0).abs() < 1e-9);
        assert!((anchored.extent().ymin() - 1.0).abs() < 1e-9);
        assert_eq!(anchored.size(), g.size());
    }

    #[test]
    fn test_subgrid_flags() {
        let g = grid(5, 5, 1.0);
        let blocks = g.subgrids(RasterSize::new(2, 2).unwrap()).unwrap();
        assert_eq!(blocks.len(), 9);
        assert!(blocks[0].is_first());
        assert!(blocks[8].is_last());
        assert!(blocks[2].is_last_x());
        assert!(!blocks[2].is_last_y());
        assert!(blocks[6].is_last_y());
        assert_eq!(blocks[5].offset(), PixelOffset::new(4, 2));
        assert_eq!(blocks[5].grid().size(), RasterSize::new(1, 2).unwrap());
    }
}
