//! Spherical (Web) Mercator projection.
//!
//! Used by EPSG:3857. The sphere has the WGS84 semi-major axis as radius,
//! and latitudes are clamped to the usual +/-85.0511 degree limit so that
//! polar inputs map to the edge of the square world instead of infinity.

use crate::{validate_lon_lat, MapProjection, Result, WGS84_A};
use std::f64::consts::PI;

/// Latitude at which the Web Mercator world becomes square.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Half the width of the Web Mercator world in meters.
pub const HALF_WORLD: f64 = PI * WGS84_A;

/// Spherical Mercator on the WGS84 semi-major axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WebMercator;

impl WebMercator {
    pub fn new() -> Self {
        Self
    }
}

impl MapProjection for WebMercator {
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        validate_lon_lat(lon, lat)?;
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

        let x = WGS84_A * lon.to_radians();
        let y = WGS84_A * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
        Ok((x, y))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(crate::ProjectionError::out_of_domain(format!(
                "non-finite map coordinate ({}, {})",
                x, y
            )));
        }
        let lon = (x / WGS84_A).to_degrees();
        let lat = (2.0 * (y / WGS84_A).exp().atan() - PI / 2.0).to_degrees();
        Ok((lon, lat))
    }
}
