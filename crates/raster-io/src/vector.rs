//! GeoJSON vector layers and their rasterization.
//!
//! A layer is a `FeatureCollection`, a single `Feature` or a bare
//! geometry. Coordinates are WGS84 unless a legacy `crs` member names
//! another supported projection.

use crate::error::{RasterIoError, Result};
use crate::types::{cast_value, with_type, DataType, RasterArray};
use geo_common::projection::Transformer;
use geo_common::{Extent, Grid, Projection};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A position: x, y and an optional (ignored) z.
pub type Position = Vec<f64>;

/// A GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    /// Outer ring first, then holes.
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

impl Geometry {
    /// Visit every position.
    fn positions(&self, f: &mut impl FnMut(&Position)) {
        match self {
            Geometry::Point { coordinates } => f(coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.iter().for_each(f)
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().for_each(f)
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().for_each(f)
            }
            Geometry::GeometryCollection { geometries } => {
                for g in geometries {
                    g.positions(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawFeature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// A geometry with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    /// Attribute as a number; booleans map to 0/1 and numeric strings are parsed.
    pub fn number(&self, attribute: &str) -> Option<f64> {
        match self.properties.get(attribute)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Feature selection applied before rasterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum AttributeFilter {
    /// Keep features whose attribute equals a value. Numbers compare
    /// numerically, also against numeric strings.
    Equals { attribute: String, value: Value },
}

impl AttributeFilter {
    pub fn matches(&self, feature: &Feature) -> bool {
        match self {
            AttributeFilter::Equals { attribute, value } => {
                match (feature.properties.get(attribute), value) {
                    (None, _) => false,
                    (Some(found), wanted) if found == wanted => true,
                    (Some(_), Value::Number(n)) => {
                        feature.number(attribute) == n.as_f64()
                    }
                    (Some(found), Value::String(s)) => match found {
                        Value::Number(n) => s.trim().parse::<f64>().ok() == n.as_f64(),
                        _ => false,
                    },
                    _ => false,
                }
            }
        }
    }
}

/// Value burned into the pixels of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Burn {
    Value(f64),
    /// A numeric attribute; features without it are skipped.
    Attribute(String),
}

/// Options of [`VectorDataset::rasterize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterizeOptions {
    pub init_value: f64,
    pub burn: Burn,
    /// Burn every pixel a geometry touches, not only those whose centre
    /// lies inside a polygon.
    pub all_touched: bool,
    pub filter: Option<AttributeFilter>,
    pub data_type: DataType,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            init_value: 0.0,
            burn: Burn::Value(1.0),
            all_touched: false,
            filter: None,
            data_type: DataType::U8,
        }
    }
}

/// A vector layer loaded from a GeoJSON file.
#[derive(Debug, Clone)]
pub struct VectorDataset {
    path: PathBuf,
    projection: Projection,
    features: Vec<Feature>,
}

impl VectorDataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path)?;
        let mut dataset = Self::parse(&text)?;
        dataset.path = path;
        Ok(dataset)
    }

    /// Parse GeoJSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RasterIoError::vector(format!("invalid GeoJSON: {}", e)))?;
        let projection = match value.get("crs") {
            Some(crs) => crs_projection(crs)?,
            None => Projection::Wgs84,
        };
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RasterIoError::vector("GeoJSON object without type"))?;

        let raw: Vec<RawFeature> = match kind {
            "FeatureCollection" => {
                let features = value
                    .get("features")
                    .cloned()
                    .ok_or_else(|| RasterIoError::vector("FeatureCollection without features"))?;
                serde_json::from_value(features)
                    .map_err(|e| RasterIoError::vector(e.to_string()))?
            }
            "Feature" => vec![serde_json::from_value(value.clone())
                .map_err(|e| RasterIoError::vector(e.to_string()))?],
            _ => vec![RawFeature {
                geometry: Some(
                    serde_json::from_value(value.clone())
                        .map_err(|e| RasterIoError::vector(e.to_string()))?,
                ),
                properties: None,
            }],
        };

        let features = raw
            .into_iter()
            .filter_map(|f| {
                f.geometry.map(|geometry| Feature {
                    geometry,
                    properties: f.properties.unwrap_or_default(),
                })
            })
            .collect();

        Ok(Self {
            path: PathBuf::new(),
            projection,
            features,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Attribute names used by any feature, sorted.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .features
            .iter()
            .flat_map(|f| f.properties.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Bounding box of all features.
    pub fn extent(&self) -> Result<Extent> {
        let mut bounds = [f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY];
        for feature in &self.features {
            feature.geometry.positions(&mut |p| {
                if let [x, y, ..] = p.as_slice() {
                    bounds[0] = bounds[0].min(*x);
                    bounds[1] = bounds[1].max(*x);
                    bounds[2] = bounds[2].min(*y);
                    bounds[3] = bounds[3].max(*y);
                }
            });
        }
        Ok(Extent::new(bounds[0], bounds[1], bounds[2], bounds[3], self.projection)?)
    }

    /// Burn the features into a single-band raster on `grid`.
    ///
    /// Features are burned in order, later ones overwrite earlier ones.
    pub fn rasterize(&self, grid: &Grid, options: &RasterizeOptions) -> Result<RasterArray> {
        let (rows, cols) = grid.shape();
        let mut canvas = Canvas {
            values: Array2::from_elem((rows, cols), options.init_value),
            value: 0.0,
        };
        let transformer = self.projection.transformer(grid.projection())?;
        let to_pixel = PixelMapper { transformer, grid };

        let mut burned = 0usize;
        for feature in &self.features {
            if let Some(filter) = &options.filter {
                if !filter.matches(feature) {
                    continue;
                }
            }
            canvas.value = match &options.burn {
                Burn::Value(v) => *v,
                Burn::Attribute(name) => match feature.number(name) {
                    Some(v) => v,
                    None => continue,
                },
            };
            burn_geometry(&mut canvas, &to_pixel, &feature.geometry, options.all_touched);
            burned += 1;
        }
        debug!(
            path = %self.path.display(),
            features = burned,
            "rasterized vector layer"
        );

        let values = canvas.values.insert_axis(ndarray::Axis(0));
        Ok(with_type!(options.data_type, T => {
            RasterArray::from_array(values.mapv(cast_value::<T>))
        }))
    }
}

/// Projection named by a legacy GeoJSON `crs` member.
fn crs_projection(crs: &Value) -> Result<Projection> {
    let name = crs
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .ok_or_else(|| RasterIoError::vector("crs member without properties.name"))?;
    if name.to_uppercase().ends_with("CRS84") {
        return Ok(Projection::Wgs84);
    }
    // urn:ogc:def:crs:EPSG::32633 or EPSG:32633
    let code = name.rsplit(':').next().unwrap_or(name);
    Ok(Projection::parse(code)?)
}

struct Canvas {
    values: Array2<f64>,
    value: f64,
}

impl Canvas {
    fn set(&mut self, col: i64, row: i64) {
        let (rows, cols) = self.values.dim();
        if col >= 0 && row >= 0 && (col as usize) < cols && (row as usize) < rows {
            self.values[[row as usize, col as usize]] = self.value;
        }
    }
}

/// Maps layer coordinates to fractional pixel coordinates of a grid.
struct PixelMapper<'a> {
    transformer: Transformer,
    grid: &'a Grid,
}

impl PixelMapper<'_> {
    fn map(&self, p: &Position) -> Option<(f64, f64)> {
        let (x, y) = match p.as_slice() {
            [x, y, ..] => (*x, *y),
            _ => return None,
        };
        let (x, y) = self.transformer.transform(x, y).ok()?;
        let e = self.grid.extent();
        let r = self.grid.resolution();
        Some(((x - e.xmin()) / r.x(), (e.ymax() - y) / r.y()))
    }

    fn ring(&self, ring: &[Position]) -> Vec<(f64, f64)> {
        ring.iter().filter_map(|p| self.map(p)).collect()
    }
}

fn burn_geometry(canvas: &mut Canvas, mapper: &PixelMapper, geometry: &Geometry, all_touched: bool) {
    match geometry {
        Geometry::Point { coordinates } => burn_point(canvas, mapper, coordinates),
        Geometry::MultiPoint { coordinates } => {
            for p in coordinates {
                burn_point(canvas, mapper, p);
            }
        }
        Geometry::LineString { coordinates } => burn_line(canvas, &mapper.ring(coordinates)),
        Geometry::MultiLineString { coordinates } => {
            for line in coordinates {
                burn_line(canvas, &mapper.ring(line));
            }
        }
        Geometry::Polygon { coordinates } => burn_polygon(canvas, mapper, coordinates, all_touched),
        Geometry::MultiPolygon { coordinates } => {
            for polygon in coordinates {
                burn_polygon(canvas, mapper, polygon, all_touched);
            }
        }
        Geometry::GeometryCollection { geometries } => {
            for g in geometries {
                burn_geometry(canvas, mapper, g, all_touched);
            }
        }
    }
}

fn burn_point(canvas: &mut Canvas, mapper: &PixelMapper, p: &Position) {
    if let Some((fx, fy)) = mapper.map(p) {
        canvas.set(fx.floor() as i64, fy.floor() as i64);
    }
}

/// Burn every pixel a polyline passes through.
fn burn_line(canvas: &mut Canvas, points: &[(f64, f64)]) {
    if let [single] = points {
        canvas.set(single.0.floor() as i64, single.1.floor() as i64);
    }
    for pair in points.windows(2) {
        traverse(canvas, pair[0], pair[1]);
    }
}

/// Visit the cells crossed by a segment (Amanatides-Woo traversal).
fn traverse(canvas: &mut Canvas, (x0, y0): (f64, f64), (x1, y1): (f64, f64)) {
    let (mut cx, mut cy) = (x0.floor() as i64, y0.floor() as i64);
    let (ex, ey) = (x1.floor() as i64, y1.floor() as i64);
    let (dx, dy) = (x1 - x0, y1 - y0);
    let step_x: i64 = if dx > 0.0 { 1 } else { -1 };
    let step_y: i64 = if dy > 0.0 { 1 } else { -1 };
    let t_delta_x = if dx != 0.0 { (1.0 / dx).abs() } else { f64::INFINITY };
    let t_delta_y = if dy != 0.0 { (1.0 / dy).abs() } else { f64::INFINITY };
    let next_boundary = |c: i64, step: i64| if step > 0 { (c + 1) as f64 } else { c as f64 };
    let mut t_max_x = if dx != 0.0 {
        (next_boundary(cx, step_x) - x0) / dx
    } else {
        f64::INFINITY
    };
    let mut t_max_y = if dy != 0.0 {
        (next_boundary(cy, step_y) - y0) / dy
    } else {
        f64::INFINITY
    };

    canvas.set(cx, cy);
    let steps = (ex - cx).abs() + (ey - cy).abs();
    for _ in 0..steps {
        if t_max_x < t_max_y {
            cx += step_x;
            t_max_x += t_delta_x;
        } else {
            cy += step_y;
            t_max_y += t_delta_y;
        }
        canvas.set(cx, cy);
    }
}

/// Fill pixels whose centre lies inside the polygon (even-odd over all rings).
fn burn_polygon(canvas: &mut Canvas, mapper: &PixelMapper, rings: &[Vec<Position>], all_touched: bool) {
    let rings: Vec<Vec<(f64, f64)>> = rings.iter().map(|r| mapper.ring(r)).collect();
    let (rows, cols) = canvas.values.dim();

    let (mut ymin, mut ymax) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(_, y) in rings.iter().flatten() {
        ymin = ymin.min(y);
        ymax = ymax.max(y);
    }
    if !ymin.is_finite() || !ymax.is_finite() {
        return;
    }
    let first_row = ((ymin - 0.5).ceil().max(0.0)) as usize;
    let last_row = ((ymax - 0.5).floor().min(rows as f64 - 1.0)).max(-1.0) as i64;

    let mut crossings = Vec::new();
    for row in first_row as i64..=last_row {
        let cy = row as f64 + 0.5;
        crossings.clear();
        for ring in &rings {
            for i in 0..ring.len() {
                let (xa, ya) = ring[i];
                let (xb, yb) = ring[(i + 1) % ring.len()];
                if (ya <= cy) != (yb <= cy) {
                    crossings.push(xa + (cy - ya) / (yb - ya) * (xb - xa));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0) as i64;
            let end = ((pair[1] - 0.5).ceil()).min(cols as f64) as i64;
            for col in start..end {
                canvas.set(col, row);
            }
        }
    }

    if all_touched {
        for ring in &rings {
            let mut closed = ring.clone();
            if let Some(&first) = ring.first() {
                closed.push(first);
            }
            burn_line(canvas, &closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_common::Resolution;
    use serde_json::json;

    fn grid() -> Grid {
        Grid::new(
            Extent::new(0.0, 10.0, 0.0, 10.0, Projection::Wgs84).unwrap(),
            Resolution::square(1.0).unwrap(),
        )
        .unwrap()
    }

    fn layer(features: Value) -> VectorDataset {
        VectorDataset::parse(&json!({"type": "FeatureCollection", "features": features}).to_string())
            .unwrap()
    }

    #[test]
    fn test_polygon_with_hole() {
        let v = layer(json!([{
            "type": "Feature",
            "properties": {"id": 3},
            "geometry": {"type": "Polygon", "coordinates": [
                [[1, 1], [9, 1], [9, 9], [1, 9], [1, 1]],
                [[4, 4], [6, 4], [6, 6], [4, 6], [4, 4]]
            ]}
        }]));
        let options = RasterizeOptions {
            burn: Burn::Attribute("id".into()),
            ..Default::default()
        };
        let a = v.rasterize(&grid(), &options).unwrap();
        let a = a.as_array::<u8>().unwrap();
        // 8x8 square minus 2x2 hole
        assert_eq!(a.iter().filter(|&&v| v == 3).count(), 60);
        assert_eq!(a[[0, 5, 5]], 0);
        assert_eq!(a[[0, 1, 1]], 3);
        assert_eq!(a[[0, 0, 0]], 0);
    }

    #[test]
    fn test_filter_and_overwrite_order() {
        let v = layer(json!([
            {"type": "Feature", "properties": {"class": "a"},
             "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]]]}},
            {"type": "Feature", "properties": {"class": "b"},
             "geometry": {"type": "Point", "coordinates": [2.5, 7.5]}}
        ]));
        let all = v
            .rasterize(&grid(), &RasterizeOptions { burn: Burn::Value(5.0), ..Default::default() })
            .unwrap();
        assert_eq!(all.as_array::<u8>().unwrap().iter().filter(|&&x| x == 5).count(), 100);

        let only_b = v
            .rasterize(
                &grid(),
                &RasterizeOptions {
                    filter: Some(AttributeFilter::Equals {
                        attribute: "class".into(),
                        value: json!("b"),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let a = only_b.as_array::<u8>().unwrap();
        assert_eq!(a.iter().filter(|&&x| x == 1).count(), 1);
        assert_eq!(a[[0, 2, 2]], 1);
    }

    #[test]
    fn test_line_traversal() {
        let v = layer(json!([{"type": "Feature", "properties": {},
            "geometry": {"type": "LineString", "coordinates": [[0.5, 9.5], [9.5, 9.5]]}}]));
        let a = v.rasterize(&grid(), &RasterizeOptions::default()).unwrap();
        let a = a.as_array::<u8>().unwrap();
        assert_eq!(a.iter().filter(|&&x| x == 1).count(), 10);
        assert!((0..10).all(|c| a[[0, 0, c]] == 1));
    }

    #[test]
    fn test_all_touched_burns_boundary() {
        let v = layer(json!([{"type": "Feature", "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[2.1, 2.1], [2.4, 2.1], [2.4, 2.4], [2.1, 2.4], [2.1, 2.1]]]}}]));
        let centres = v.rasterize(&grid(), &RasterizeOptions::default()).unwrap();
        assert_eq!(centres.as_array::<u8>().unwrap().sum(), 0);
        let touched = v
            .rasterize(&grid(), &RasterizeOptions { all_touched: true, ..Default::default() })
            .unwrap();
        let a = touched.as_array::<u8>().unwrap();
        assert_eq!(a.sum(), 1);
        assert_eq!(a[[0, 7, 2]], 1);
    }

    #[test]
    fn test_legacy_crs_and_bare_geometry() {
        let v = VectorDataset::parse(
            &json!({
                "type": "Point",
                "coordinates": [500000.0, 0.0],
                "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32633"}}
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(v.projection(), &Projection::Utm { zone: 33, north: true });
        assert_eq!(v.features().len(), 1);
    }

    #[test]
    fn test_filter_numeric_string() {
        let f = Feature {
            geometry: Geometry::Point { coordinates: vec![0.0, 0.0] },
            properties: json!({"level": 2}).as_object().cloned().unwrap_or_default(),
        };
        let filter = |value| AttributeFilter::Equals { attribute: "level".into(), value };
        assert!(filter(json!(2)).matches(&f));
        assert!(filter(json!(2.0)).matches(&f));
        assert!(filter(json!("2")).matches(&f));
        assert!(!filter(json!(3)).matches(&f));
    }
}
