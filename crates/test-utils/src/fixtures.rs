//! Common test fixtures for applier tests.
//!
//! This module provides pre-defined grids and extents that represent
//! common scenarios in blockwise raster processing.

use geo_common::{Grid, Projection, RasterSize, Resolution};

/// UTM zone 33 north, the projection of most fixtures.
pub const UTM_33N: Projection = Projection::Utm {
    zone: 33,
    north: true,
};

/// Common extents as `(xmin, xmax, ymin, ymax)`.
pub mod extent {
    /// 30 km square in UTM 33N around Berlin
    pub const BERLIN_UTM: (f64, f64, f64, f64) = (380_000.0, 410_000.0, 5_800_000.0, 5_830_000.0);

    /// Global geographic extent
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, 180.0, -90.0, 90.0);

    /// One degree square over Berlin
    pub const BERLIN_WGS84: (f64, f64, f64, f64) = (13.0, 14.0, 52.0, 53.0);
}

/// A grid in UTM 33N with its upper left corner at (`xmin`, `ymax`).
pub fn utm_grid(xmin: f64, ymax: f64, resolution: f64, cols: usize, rows: usize) -> Grid {
    grid(xmin, ymax, resolution, cols, rows, UTM_33N)
}

/// A geographic grid with its upper left corner at (`xmin`, `ymax`).
pub fn wgs84_grid(xmin: f64, ymax: f64, resolution: f64, cols: usize, rows: usize) -> Grid {
    grid(xmin, ymax, resolution, cols, rows, Projection::Wgs84)
}

/// A grid with square pixels.
pub fn grid(
    xmin: f64,
    ymax: f64,
    resolution: f64,
    cols: usize,
    rows: usize,
    projection: Projection,
) -> Grid {
    Grid::from_upper_left(
        xmin,
        ymax,
        Resolution::square(resolution).expect("fixture resolution"),
        RasterSize::new(cols, rows).expect("fixture size"),
        projection,
    )
    .expect("fixture grid")
}

/// The 1000x1000 pixel, 30 m grid over [`extent::BERLIN_UTM`].
pub fn berlin_grid() -> Grid {
    let (xmin, _, _, ymax) = extent::BERLIN_UTM;
    utm_grid(xmin, ymax, 30.0, 1000, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_berlin_grid_size() {
        let g = berlin_grid();
        assert_eq!(g.shape(), (1000, 1000));
        assert_eq!(g.extent().xmax(), extent::BERLIN_UTM.1);
        assert_eq!(g.extent().ymin(), extent::BERLIN_UTM.2);
    }

    #[test]
    fn test_wgs84_grid_resolution() {
        let g = wgs84_grid(13.0, 53.0, 0.25, 4, 4);
        assert_eq!(g.resolution().x(), 0.25);
        assert_eq!(g.projection(), &Projection::Wgs84);
    }
}
