//! Test data generators for synthetic rasters and vector layers.
//!
//! These generators create predictable, verifiable pixel patterns that can
//! be used across the test suite.

use geo_common::Grid;
use ndarray::Array3;
use raster_io::{RasterArray, RasterDataset, RasterDriver, RasterElement};
use std::path::{Path, PathBuf};

/// Creates a test array with predictable values.
///
/// Each value is calculated as: `band * 1_000_000 + row * 1000 + col`
///
/// This makes it easy to verify that data is being read/written at the
/// right place by checking `a[[b, row, col]]`.
///
/// # Example
///
/// ```
/// use test_utils::create_test_array;
///
/// let a = create_test_array(2, 3, 4);
/// assert_eq!(a.dim(), (2, 3, 4));
/// assert_eq!(a[[0, 0, 1]], 1.0);
/// assert_eq!(a[[0, 1, 0]], 1000.0);
/// assert_eq!(a[[1, 2, 3]], 1_002_003.0);
/// ```
pub fn create_test_array(bands: usize, rows: usize, cols: usize) -> Array3<f64> {
    Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
        (b * 1_000_000 + r * 1000 + c) as f64
    })
}

/// The pattern of [`create_test_array`] covering a grid, cast to `T`.
pub fn create_test_raster<T: RasterElement>(grid: &Grid, bands: usize) -> RasterArray {
    let (rows, cols) = grid.shape();
    RasterArray::from_array(create_test_array(bands, rows, cols)).cast_to(T::DATA_TYPE)
}

/// Creates a single band of class labels in vertical stripes.
///
/// Column `c` gets class `c / stripe_width % classes + 1`.
pub fn create_class_raster(grid: &Grid, classes: u8, stripe_width: usize) -> RasterArray {
    let (rows, cols) = grid.shape();
    RasterArray::from_array(Array3::from_shape_fn((1, rows, cols), |(_, _, c)| {
        ((c / stripe_width.max(1)) % classes.max(1) as usize) as u8 + 1
    }))
}

/// Creates an array filled with one value.
pub fn create_constant_raster(grid: &Grid, bands: usize, value: f32) -> RasterArray {
    let (rows, cols) = grid.shape();
    RasterArray::from_array(Array3::from_elem((bands, rows, cols), value))
}

/// Writes an array to `dir/name` with the driver chosen by file name.
pub fn write_test_raster(dir: &Path, name: &str, grid: &Grid, array: &RasterArray) -> PathBuf {
    let path = dir.join(name);
    let driver = RasterDriver::from_filename(&path).expect("test raster driver");
    let mut dataset =
        RasterDataset::from_array(array, grid, &path, driver).expect("create test raster");
    dataset.close(true).expect("close test raster");
    path
}

/// Writes a GeoJSON feature collection of axis-aligned rectangles.
///
/// Each rectangle is `(xmin, xmax, ymin, ymax, id)` in WGS84 and gets an
/// `id` attribute.
pub fn write_test_geojson(dir: &Path, name: &str, rectangles: &[(f64, f64, f64, f64, i64)]) -> PathBuf {
    let features: Vec<serde_json::Value> = rectangles
        .iter()
        .map(|&(xmin, xmax, ymin, ymax, id)| {
            serde_json::json!({
                "type": "Feature",
                "properties": {"id": id},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[xmin, ymin], [xmax, ymin], [xmax, ymax], [xmin, ymax], [xmin, ymin]]]
                }
            })
        })
        .collect();
    let collection = serde_json::json!({"type": "FeatureCollection", "features": features});
    let path = dir.join(name);
    std::fs::write(&path, collection.to_string()).expect("write test geojson");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::utm_grid;

    #[test]
    fn test_create_test_array_pattern() {
        let a = create_test_array(2, 3, 4);
        assert_eq!(a[[1, 2, 3]], 1_002_003.0);
    }

    #[test]
    fn test_class_raster_stripes() {
        let g = utm_grid(0.0, 100.0, 10.0, 6, 2);
        let a = create_class_raster(&g, 3, 2);
        let a = a.as_array::<u8>().unwrap();
        let row: Vec<u8> = (0..6).map(|c| a[[0, 1, c]]).collect();
        assert_eq!(row, vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_write_test_raster_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let g = utm_grid(0.0, 100.0, 10.0, 6, 4);
        let path = write_test_raster(dir.path(), "a.bsq", &g, &create_test_raster::<i16>(&g, 2));
        let mut ds = RasterDataset::open(&path).unwrap();
        assert_eq!(ds.shape(), (2, 4, 6));
        assert_eq!(ds.read_array().unwrap().as_array::<i16>().unwrap()[[0, 3, 5]], 3005);
    }
}
