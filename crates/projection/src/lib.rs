//! Coordinate reference system transformations.
//!
//! Implements the map projections needed to bring raster grids into a
//! common reference system, from scratch and without external dependencies:
//!
//! - Geographic WGS84 (longitude/latitude in degrees)
//! - Spherical Web Mercator (EPSG:3857)
//! - Universal Transverse Mercator on the WGS84 ellipsoid (EPSG:326zz/327zz)
//!
//! All projections convert to and from geographic WGS84, which acts as the
//! pivot for any projection-to-projection transform.

pub mod error;
pub mod mercator;
pub mod transverse_mercator;

pub use error::{ProjectionError, Result};
pub use mercator::WebMercator;
pub use transverse_mercator::TransverseMercator;

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6378137.0;

/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257223563;

/// A projection between geographic WGS84 and planar map coordinates.
pub trait MapProjection {
    /// Convert longitude/latitude (degrees) to map coordinates (meters).
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)>;

    /// Convert map coordinates (meters) to longitude/latitude (degrees).
    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)>;
}

/// Check that a geographic coordinate is finite and within valid bounds.
pub fn validate_lon_lat(lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(ProjectionError::out_of_domain(format!(
            "non-finite coordinate ({}, {})",
            lon, lat
        )));
    }
    if lat.abs() > 90.0 {
        return Err(ProjectionError::out_of_domain(format!(
            "latitude {} outside [-90, 90]",
            lat
        )));
    }
    Ok(())
}

/// Wrap a longitude into [-180, 180).
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}
