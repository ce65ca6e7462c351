//! Transverse Mercator projection on the WGS84 ellipsoid.
//!
//! This is the projection behind every UTM zone. The series expansions are
//! the classic ones from Snyder, "Map Projections: A Working Manual"
//! (USGS Professional Paper 1395), accurate to centimeters
//! inside a zone and still usable a few degrees beyond its edges.
//!
//! The projection parameters are:
//! - Central meridian (lon0)
//! - Scale factor on the central meridian (k0, 0.9996 for UTM)
//! - False easting / false northing (500 km / 0 or 10 000 km for UTM)

use crate::{validate_lon_lat, MapProjection, ProjectionError, Result, WGS84_A, WGS84_F};

/// UTM scale factor on the central meridian.
pub const UTM_SCALE_FACTOR: f64 = 0.9996;

/// UTM false easting in meters.
pub const UTM_FALSE_EASTING: f64 = 500_000.0;

/// UTM false northing for the southern hemisphere in meters.
pub const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Transverse Mercator projection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    /// Central meridian in degrees
    pub lon0: f64,
    /// Scale factor on the central meridian
    pub k0: f64,
    /// False easting in meters
    pub false_easting: f64,
    /// False northing in meters
    pub false_northing: f64,
    /// Semi-major axis in meters
    a: f64,
    /// First eccentricity squared
    e2: f64,
    /// Second eccentricity squared
    ep2: f64,
}

impl TransverseMercator {
    /// Create a projection with explicit parameters on the WGS84 ellipsoid.
    pub fn new(lon0: f64, k0: f64, false_easting: f64, false_northing: f64) -> Self {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        Self {
            lon0,
            k0,
            false_easting,
            false_northing,
            a: WGS84_A,
            e2,
            ep2: e2 / (1.0 - e2),
        }
    }

    /// Create the projection of a UTM zone.
    ///
    /// # Arguments
    /// * `zone` - UTM zone number (1-60)
    /// * `north` - Northern hemisphere (false northing 0) or southern
    pub fn utm(zone: u8, north: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(ProjectionError::invalid_parameters(format!(
                "UTM zone {} outside 1-60",
                zone
            )));
        }
        let lon0 = f64::from(zone) * 6.0 - 183.0;
        let false_northing = if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH };
        Ok(Self::new(lon0, UTM_SCALE_FACTOR, UTM_FALSE_EASTING, false_northing))
    }

    /// Meridian arc length from the equator to latitude `phi` (radians).
    fn meridian_arc(&self, phi: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }
}

impl MapProjection for TransverseMercator {
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        validate_lon_lat(lon, lat)?;

        let mut dlon = lon - self.lon0;
        // Keep the longitude difference on the near side of the globe
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        if dlon.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(format!(
                "longitude {} more than 90 degrees from central meridian {}",
                lon, self.lon0
            )));
        }

        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = self.a / (1.0 - self.e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = self.ep2 * cos_phi * cos_phi;
        let a = dlon.to_radians() * cos_phi;
        let m = self.meridian_arc(phi);

        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let x = self.k0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * self.ep2) * a5 / 120.0)
            + self.false_easting;

        let y = self.k0
            * (m + n
                * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * self.ep2) * a6 / 720.0))
            + self.false_northing;

        Ok((x, y))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::out_of_domain(format!(
                "non-finite map coordinate ({}, {})",
                x, y
            )));
        }

        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let sqrt_1me2 = (1.0 - e2).sqrt();
        let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

        let m = (y - self.false_northing) / self.k0;
        let mu = m / (self.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

        // Footpoint latitude
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        let tan_phi1 = phi1.tan();
        let c1 = self.ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
        let n1 = self.a / denom.sqrt();
        let r1 = self.a * (1.0 - e2) / denom.powf(1.5);
        let d = (x - self.false_easting) / (n1 * self.k0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let phi = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * self.ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * self.ep2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);

        let dlon = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * self.ep2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

        let lat = phi.to_degrees();
        if !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(format!(
                "map coordinate ({}, {}) has no geographic equivalent",
                x, y
            )));
        }
        Ok((crate::normalize_lon(self.lon0 + dlon.to_degrees()), lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_central_meridian_on_equator() {
        let tm = TransverseMercator::utm(32, true).unwrap();
        assert_eq!(tm.lon0, 9.0);
        let (x, y) = tm.forward(9.0, 0.0).unwrap();
        assert!((x - UTM_FALSE_EASTING).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_southern_false_northing() {
        let tm = TransverseMercator::utm(33, false).unwrap();
        let (_, y) = tm.forward(15.0, 0.0).unwrap();
        assert!((y - UTM_FALSE_NORTHING_SOUTH).abs() < 1e-6);
    }

    #[test]
    fn test_symmetric_about_central_meridian() {
        let tm = TransverseMercator::utm(33, true).unwrap();
        let (xe, ye) = tm.forward(17.0, 48.0).unwrap();
        let (xw, yw) = tm.forward(13.0, 48.0).unwrap();
        assert!(((xe - UTM_FALSE_EASTING) + (xw - UTM_FALSE_EASTING)).abs() < 1e-6);
        assert!((ye - yw).abs() < 1e-6);
    }

    #[test]
    fn test_roundtrip_within_zone() {
        let tm = TransverseMercator::utm(33, true).unwrap();
        for &(lon, lat) in &[(13.4, 52.5), (12.1, 0.5), (17.9, 70.0), (15.0, 45.0)] {
            let (x, y) = tm.forward(lon, lat).unwrap();
            let (lon2, lat2) = tm.inverse(x, y).unwrap();
            assert!((lon - lon2).abs() < 1e-6, "lon {} -> {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-6, "lat {} -> {}", lat, lat2);
        }
    }

    #[test]
    fn test_meridian_arc_quarter() {
        // Equator to pole along the meridian is about 10 001 965.7 m on WGS84
        let tm = TransverseMercator::new(0.0, 1.0, 0.0, 0.0);
        let quarter = tm.meridian_arc(std::f64::consts::FRAC_PI_2);
        assert!((quarter - 10_001_965.729).abs() < 1.0);
    }

    #[test]
    fn test_invalid_zone() {
        assert!(TransverseMercator::utm(0, true).is_err());
        assert!(TransverseMercator::utm(61, true).is_err());
    }

    #[test]
    fn test_far_side_rejected() {
        let tm = TransverseMercator::utm(32, true).unwrap();
        assert!(tm.forward(-171.0, 10.0).is_err());
    }
}
