//! Resampling of raster arrays between grids.
//!
//! Target pixels are located in the source by reprojecting their centre
//! (Nearest, Bilinear) or their four corners (Average, Mode). Source
//! no-data pixels never contribute; target pixels with nothing to sample
//! get the fill value.

use crate::error::{RasterIoError, Result};
use crate::types::{cast_value, with_type, DataType, RasterArray};
use geo_common::projection::Transformer;
use geo_common::Grid;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resampling algorithm of a warped read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleAlg {
    #[default]
    Nearest,
    Bilinear,
    /// Area-weighted mean of the source pixels covered by a target pixel.
    Average,
    /// Value covering the largest area of a target pixel.
    Mode,
}

impl ResampleAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResampleAlg::Nearest => "nearest",
            ResampleAlg::Bilinear => "bilinear",
            ResampleAlg::Average => "average",
            ResampleAlg::Mode => "mode",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "nearest" | "near" => Some(ResampleAlg::Nearest),
            "bilinear" => Some(ResampleAlg::Bilinear),
            "average" => Some(ResampleAlg::Average),
            "mode" => Some(ResampleAlg::Mode),
            _ => None,
        }
    }
}

impl fmt::Display for ResampleAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where one target pixel falls in the source, in fractional source
/// pixel coordinates (column, row).
#[derive(Debug, Clone, Copy)]
enum Sample {
    Outside,
    Point(f64, f64),
    Area { x0: f64, x1: f64, y0: f64, y1: f64 },
}

/// Sample locations of every target pixel, shared by all bands.
struct SamplePlan {
    rows: usize,
    cols: usize,
    samples: Vec<Sample>,
}

impl SamplePlan {
    fn new(source: &Grid, target: &Grid, alg: ResampleAlg) -> Result<Self> {
        let transformer = target.projection().transformer(source.projection())?;
        let (rows, cols) = target.shape();
        let t_res = target.resolution();
        let t_ext = target.extent();
        let to_source = |x: f64, y: f64| source_pixel(&transformer, source, x, y);

        let mut samples = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            let top = t_ext.ymax() - r as f64 * t_res.y();
            let bottom = top - t_res.y();
            for c in 0..cols {
                let left = t_ext.xmin() + c as f64 * t_res.x();
                let right = left + t_res.x();
                let sample = match alg {
                    ResampleAlg::Nearest | ResampleAlg::Bilinear => {
                        match to_source((left + right) / 2.0, (top + bottom) / 2.0) {
                            Some((fx, fy)) => Sample::Point(fx, fy),
                            None => Sample::Outside,
                        }
                    }
                    ResampleAlg::Average | ResampleAlg::Mode => {
                        let corners = [(left, top), (right, top), (right, bottom), (left, bottom)];
                        let mut bounds = Some((
                            f64::INFINITY,
                            f64::NEG_INFINITY,
                            f64::INFINITY,
                            f64::NEG_INFINITY,
                        ));
                        for (x, y) in corners {
                            bounds = match (bounds, to_source(x, y)) {
                                (Some((x0, x1, y0, y1)), Some((fx, fy))) => {
                                    Some((x0.min(fx), x1.max(fx), y0.min(fy), y1.max(fy)))
                                }
                                _ => None,
                            };
                        }
                        match bounds {
                            Some((x0, x1, y0, y1)) => Sample::Area { x0, x1, y0, y1 },
                            None => Sample::Outside,
                        }
                    }
                };
                samples.push(sample);
            }
        }
        Ok(Self { rows, cols, samples })
    }
}

fn source_pixel(transformer: &Transformer, source: &Grid, x: f64, y: f64) -> Option<(f64, f64)> {
    let (sx, sy) = transformer.transform(x, y).ok()?;
    let ext = source.extent();
    let res = source.resolution();
    Some(((sx - ext.xmin()) / res.x(), (ext.ymax() - sy) / res.y()))
}

/// Resample every band of `source` (covering `source_grid`) onto `target`.
///
/// `no_data` holds the source no-data value per band and `fill` the value
/// per band for target pixels without valid samples. The result keeps the
/// source data type.
pub fn resample(
    source: &RasterArray,
    source_grid: &Grid,
    no_data: &[Option<f64>],
    target: &Grid,
    alg: ResampleAlg,
    fill: &[f64],
) -> Result<RasterArray> {
    let (bands, rows, cols) = source.shape();
    if (rows, cols) != source_grid.shape() {
        return Err(RasterIoError::invalid_data(format!(
            "array of {}x{} pixels does not cover a {} grid",
            cols,
            rows,
            source_grid.size()
        )));
    }
    let plan = SamplePlan::new(source_grid, target, alg)?;
    let values = source.to_f64();
    let mut out = Array3::<f64>::zeros((bands, plan.rows, plan.cols));
    for b in 0..bands {
        let band = resample_plan(
            values.index_axis(Axis(0), b),
            no_data.get(b).copied().flatten(),
            &plan,
            alg,
            fill.get(b).copied().unwrap_or(0.0),
        );
        out.index_axis_mut(Axis(0), b).assign(&band);
    }
    Ok(cast_f64(out, source.data_type()))
}

/// Resample a single `f64` band.
pub fn resample_band(
    source: ArrayView2<f64>,
    source_grid: &Grid,
    no_data: Option<f64>,
    target: &Grid,
    alg: ResampleAlg,
    fill: f64,
) -> Result<Array2<f64>> {
    let plan = SamplePlan::new(source_grid, target, alg)?;
    Ok(resample_plan(source, no_data, &plan, alg, fill))
}

fn cast_f64(values: Array3<f64>, data_type: DataType) -> RasterArray {
    with_type!(data_type, T => RasterArray::from_array(values.mapv(cast_value::<T>)))
}

fn resample_plan(
    source: ArrayView2<f64>,
    no_data: Option<f64>,
    plan: &SamplePlan,
    alg: ResampleAlg,
    fill: f64,
) -> Array2<f64> {
    let (rows, cols) = source.dim();
    let valid = |v: f64| match no_data {
        Some(nd) => !(v == nd || (v.is_nan() && nd.is_nan())),
        None => true,
    };
    let at = |ix: i64, iy: i64| -> Option<f64> {
        if ix < 0 || iy < 0 || ix as usize >= cols || iy as usize >= rows {
            return None;
        }
        let v = source[[iy as usize, ix as usize]];
        valid(v).then_some(v)
    };
    let nearest = |fx: f64, fy: f64| at(fx.floor() as i64, fy.floor() as i64);

    let values = plan.samples.iter().map(|sample| {
        let value = match (*sample, alg) {
            (Sample::Outside, _) => None,
            (Sample::Point(fx, fy), ResampleAlg::Bilinear) => {
                let u = fx - 0.5;
                let v = fy - 0.5;
                let (x0, y0) = (u.floor() as i64, v.floor() as i64);
                let (wx, wy) = (u - x0 as f64, v - y0 as f64);
                match (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1)) {
                    (Some(a), Some(b), Some(c), Some(d)) => Some(
                        a * (1.0 - wx) * (1.0 - wy)
                            + b * wx * (1.0 - wy)
                            + c * (1.0 - wx) * wy
                            + d * wx * wy,
                    ),
                    _ => nearest(fx, fy),
                }
            }
            (Sample::Point(fx, fy), _) => nearest(fx, fy),
            (Sample::Area { x0, x1, y0, y1 }, alg) => {
                let weighted = covered(x0, x1, y0, y1, rows, cols)
                    .filter_map(|(ix, iy, w)| {
                        let v = source[[iy, ix]];
                        valid(v).then_some((v, w))
                    });
                if alg == ResampleAlg::Mode {
                    mode(weighted)
                } else {
                    mean(weighted)
                }
            }
        };
        value.unwrap_or(fill)
    });
    Array2::from_shape_vec((plan.rows, plan.cols), values.collect())
        .unwrap_or_else(|_| Array2::from_elem((plan.rows, plan.cols), fill))
}

/// Source pixels overlapping a fractional pixel box, with overlap areas.
fn covered(
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
    rows: usize,
    cols: usize,
) -> impl Iterator<Item = (usize, usize, f64)> {
    let clamp = |v: f64, n: usize| v.max(0.0).min(n as f64);
    let (cx0, cx1) = (clamp(x0, cols), clamp(x1, cols));
    let (cy0, cy1) = (clamp(y0, rows), clamp(y1, rows));
    let ix_range = cx0.floor() as usize..(cx1.ceil() as usize).min(cols);
    let iy_range = cy0.floor() as usize..(cy1.ceil() as usize).min(rows);
    iy_range.flat_map(move |iy| {
        let ix_range = ix_range.clone();
        ix_range.filter_map(move |ix| {
            let wx = (cx1.min(ix as f64 + 1.0) - cx0.max(ix as f64)).max(0.0);
            let wy = (cy1.min(iy as f64 + 1.0) - cy0.max(iy as f64)).max(0.0);
            let w = wx * wy;
            (w > 1e-12).then_some((ix, iy, w))
        })
    })
}

fn mean(values: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, weight) = values.fold((0.0, 0.0), |(s, w), (v, vw)| (s + v * vw, w + vw));
    (weight > 0.0).then(|| sum / weight)
}

fn mode(values: impl Iterator<Item = (f64, f64)>) -> Option<f64> {
    let mut weights: Vec<(f64, f64)> = Vec::new();
    for (v, w) in values {
        match weights.iter_mut().find(|(value, _)| *value == v) {
            Some(entry) => entry.1 += w,
            None => weights.push((v, w)),
        }
    }
    let mut best: Option<(f64, f64)> = None;
    for (v, w) in weights {
        if best.map(|(_, bw)| w > bw).unwrap_or(true) {
            best = Some((v, w));
        }
    }
    best.map(|(v, _)| v)
}
