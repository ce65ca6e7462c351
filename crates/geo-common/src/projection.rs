//! Coordinate reference systems understood by the raster applier.

use crate::error::{GeometryError, Result};
use projection::{MapProjection, TransverseMercator, WebMercator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A coordinate reference system.
///
/// Projections are compared semantically: every accepted spelling of a CRS
/// (`EPSG:3857`, `epsg:900913`, a WKT string carrying the EPSG authority)
/// parses to the same variant, so `==` means "same CRS".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Projection {
    /// WGS84 geographic, longitude/latitude in degrees (EPSG:4326)
    Wgs84,
    /// Spherical Web Mercator in meters (EPSG:3857)
    WebMercator,
    /// WGS84 / UTM zone in meters (EPSG:326zz north, EPSG:327zz south)
    Utm { zone: u8, north: bool },
}

impl Projection {
    pub fn wgs84() -> Self {
        Projection::Wgs84
    }

    pub fn web_mercator() -> Self {
        Projection::WebMercator
    }

    /// WGS84 / UTM projection for the given zone and hemisphere.
    pub fn utm(zone: u8, north: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(GeometryError::unsupported(format!("UTM zone {}", zone)));
        }
        Ok(Projection::Utm { zone, north })
    }

    /// UTM projection whose zone covers the given longitude/latitude.
    pub fn utm_for(lon: f64, lat: f64) -> Result<Self> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(GeometryError::invalid("non-finite coordinate"));
        }
        let lon = projection::normalize_lon(lon);
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u8;
        Self::utm(zone, lat >= 0.0)
    }

    /// Create from an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 => Ok(Projection::Wgs84),
            3857 | 900913 | 3785 => Ok(Projection::WebMercator),
            32601..=32660 => Self::utm((code - 32600) as u8, true),
            32701..=32760 => Self::utm((code - 32700) as u8, false),
            _ => Err(GeometryError::unsupported(format!("EPSG:{}", code))),
        }
    }

    /// Parse a CRS definition.
    ///
    /// Accepts formats like:
    /// - "EPSG:32632" / "epsg:32632"
    /// - "4326"
    /// - "CRS:84" (equivalent to EPSG:4326)
    /// - WKT whose outermost `AUTHORITY["EPSG","<code>"]` names a supported code
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let upper = trimmed.to_uppercase();

        if upper == "CRS:84" || upper == "OGC:CRS84" {
            return Ok(Projection::Wgs84);
        }
        if let Some(code) = upper.strip_prefix("EPSG:") {
            return Self::from_epsg(parse_code(code, s)?);
        }
        if let Ok(code) = upper.parse::<u32>() {
            return Self::from_epsg(code);
        }
        if upper.starts_with("GEOGCS[") || upper.starts_with("PROJCS[") {
            return Self::from_epsg(wkt_authority(&upper).ok_or_else(|| {
                GeometryError::unsupported(format!("WKT without EPSG authority: {}", s))
            })?);
        }

        Err(GeometryError::unsupported(s.to_string()))
    }

    /// The EPSG code of this projection.
    pub fn epsg(&self) -> u32 {
        match self {
            Projection::Wgs84 => 4326,
            Projection::WebMercator => 3857,
            Projection::Utm { zone, north: true } => 32600 + u32::from(*zone),
            Projection::Utm { zone, north: false } => 32700 + u32::from(*zone),
        }
    }

    /// Check if this is a geographic (lat/lon) CRS.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Projection::Wgs84)
    }

    /// Human readable CRS name.
    pub fn name(&self) -> String {
        match self {
            Projection::Wgs84 => "WGS 84".to_string(),
            Projection::WebMercator => "WGS 84 / Pseudo-Mercator".to_string(),
            Projection::Utm { zone, north } => {
                format!("WGS 84 / UTM zone {}{}", zone, if *north { "N" } else { "S" })
            }
        }
    }

    /// Well-known text representation carrying the EPSG authority.
    pub fn wkt(&self) -> String {
        const GEOGCS: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433]";
        match self {
            Projection::Wgs84 => format!("{},AUTHORITY[\"EPSG\",\"4326\"]]", GEOGCS),
            Projection::WebMercator => format!(
                "PROJCS[\"{}\",{},AUTHORITY[\"EPSG\",\"4326\"]],PROJECTION[\"Mercator_1SP\"],PARAMETER[\"central_meridian\",0],PARAMETER[\"scale_factor\",1],PARAMETER[\"false_easting\",0],PARAMETER[\"false_northing\",0],UNIT[\"metre\",1],AUTHORITY[\"EPSG\",\"3857\"]]",
                self.name(),
                GEOGCS
            ),
            Projection::Utm { zone, north } => format!(
                "PROJCS[\"{}\",{},AUTHORITY[\"EPSG\",\"4326\"]],PROJECTION[\"Transverse_Mercator\"],PARAMETER[\"latitude_of_origin\",0],PARAMETER[\"central_meridian\",{}],PARAMETER[\"scale_factor\",0.9996],PARAMETER[\"false_easting\",500000],PARAMETER[\"false_northing\",{}],UNIT[\"metre\",1],AUTHORITY[\"EPSG\",\"{}\"]]",
                self.name(),
                GEOGCS,
                i32::from(*zone) * 6 - 183,
                if *north { 0 } else { 10_000_000 },
                self.epsg()
            ),
        }
    }

    /// Convert a coordinate of this projection to WGS84 longitude/latitude.
    pub fn to_geographic(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok(match self {
            Projection::Wgs84 => (x, y),
            Projection::WebMercator => WebMercator.inverse(x, y)?,
            Projection::Utm { zone, north } => TransverseMercator::utm(*zone, *north)?.inverse(x, y)?,
        })
    }

    /// Convert WGS84 longitude/latitude to a coordinate of this projection.
    pub fn from_geographic(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        Ok(match self {
            Projection::Wgs84 => {
                projection::validate_lon_lat(lon, lat)?;
                (lon, lat)
            }
            Projection::WebMercator => WebMercator.forward(lon, lat)?,
            Projection::Utm { zone, north } => {
                TransverseMercator::utm(*zone, *north)?.forward(lon, lat)?
            }
        })
    }

    /// Transform a coordinate from this projection into `target`.
    pub fn transform(&self, target: &Projection, x: f64, y: f64) -> Result<(f64, f64)> {
        if self == target {
            return Ok((x, y));
        }
        let (lon, lat) = self.to_geographic(x, y)?;
        target.from_geographic(lon, lat)
    }

    /// Build a reusable transformer from this projection into `target`.
    pub fn transformer(&self, target: &Projection) -> Result<Transformer> {
        Transformer::new(*self, *target)
    }
}

/// Cached forward/inverse math for transforming many points between two
/// projections.
#[derive(Debug, Clone)]
pub struct Transformer {
    source: Projection,
    target: Projection,
    source_tm: Option<TransverseMercator>,
    target_tm: Option<TransverseMercator>,
}

impl Transformer {
    pub fn new(source: Projection, target: Projection) -> Result<Self> {
        let tm = |p: Projection| -> Result<Option<TransverseMercator>> {
            match p {
                Projection::Utm { zone, north } => Ok(Some(TransverseMercator::utm(zone, north)?)),
                _ => Ok(None),
            }
        };
        Ok(Self {
            source,
            target,
            source_tm: tm(source)?,
            target_tm: tm(target)?,
        })
    }

    /// Whether source and target are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.is_identity() {
            return Ok((x, y));
        }
        let (lon, lat) = match (&self.source, &self.source_tm) {
            (_, Some(tm)) => tm.inverse(x, y)?,
            (Projection::WebMercator, None) => WebMercator.inverse(x, y)?,
            _ => (x, y),
        };
        Ok(match (&self.target, &self.target_tm) {
            (_, Some(tm)) => tm.forward(lon, lat)?,
            (Projection::WebMercator, None) => WebMercator.forward(lon, lat)?,
            _ => {
                projection::validate_lon_lat(lon, lat)?;
                (lon, lat)
            }
        })
    }
}

fn parse_code(code: &str, original: &str) -> Result<u32> {
    code.trim()
        .parse()
        .map_err(|_| GeometryError::unsupported(original.to_string()))
}

/// Extract the outermost EPSG authority code from an (uppercased) WKT string.
fn wkt_authority(wkt: &str) -> Option<u32> {
    let start = wkt.rfind("AUTHORITY[")?;
    let inner = &wkt[start + "AUTHORITY[".len()..];
    let end = inner.find(']')?;
    let mut parts = inner[..end].split(',');
    let authority = parts.next()?.trim().trim_matches('"');
    if authority != "EPSG" {
        return None;
    }
    parts.next()?.trim().trim_matches('"').parse().ok()
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Projection {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Projection {
    type Error = GeometryError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Projection> for String {
    fn from(p: Projection) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authority() {
        assert_eq!(Projection::parse("EPSG:4326").unwrap(), Projection::Wgs84);
        assert_eq!(Projection::parse("epsg:3857").unwrap(), Projection::WebMercator);
        assert_eq!(Projection::parse("CRS:84").unwrap(), Projection::Wgs84);
        assert_eq!(
            Projection::parse("EPSG:32632").unwrap(),
            Projection::Utm { zone: 32, north: true }
        );
        assert_eq!(
            Projection::parse("32733").unwrap(),
            Projection::Utm { zone: 33, north: false }
        );
        assert!(Projection::parse("EPSG:99999").is_err());
        assert!(Projection::parse("not a crs").is_err());
    }

    #[test]
    fn test_semantic_equality() {
        assert_eq!(
            Projection::parse("EPSG:900913").unwrap(),
            Projection::parse("EPSG:3857").unwrap()
        );
    }

    #[test]
    fn test_wkt_roundtrip() {
        for p in [
            Projection::Wgs84,
            Projection::WebMercator,
            Projection::Utm { zone: 32, north: true },
            Projection::Utm { zone: 19, north: false },
        ] {
            assert_eq!(Projection::parse(&p.wkt()).unwrap(), p);
        }
    }

    #[test]
    fn test_utm_for() {
        assert_eq!(
            Projection::utm_for(13.4, 52.5).unwrap(),
            Projection::Utm { zone: 33, north: true }
        );
        assert_eq!(
            Projection::utm_for(-70.6, -33.4).unwrap(),
            Projection::Utm { zone: 19, north: false }
        );
        assert_eq!(
            Projection::utm_for(180.0, 0.0).unwrap(),
            Projection::Utm { zone: 60, north: true }
        );
    }

    #[test]
    fn test_transform_identity() {
        let p = Projection::Utm { zone: 32, north: true };
        assert_eq!(p.transform(&p, 1.5, 2.5).unwrap(), (1.5, 2.5));
    }

    #[test]
    fn test_transformer_matches_transform() {
        let utm = Projection::Utm { zone: 33, north: true };
        let t = utm.transformer(&Projection::WebMercator).unwrap();
        let a = t.transform(400_000.0, 5_800_000.0).unwrap();
        let b = utm
            .transform(&Projection::WebMercator, 400_000.0, 5_800_000.0)
            .unwrap();
        assert!((a.0 - b.0).abs() < 1e-6);
        assert!((a.1 - b.1).abs() < 1e-6);
    }
}
