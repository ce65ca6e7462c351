//! Tests of the built-in commands on files in a temp dir.

use applier::{ApplierConfig, BlockSize, NumWorkers};
use applier_cli::operators::NDI_NO_DATA;
use applier_cli::{raster_info, run_copy, run_ndi};
use ndarray::Array3;
use raster_io::{RasterArray, RasterDataset};
use test_utils::{assert_approx_eq, create_constant_raster, create_test_raster, utm_grid, write_test_raster};

fn config() -> ApplierConfig {
    let mut config = ApplierConfig::default();
    config.block_size = BlockSize::new(8, 8).unwrap();
    config
}

// ============================================================================
// copy
// ============================================================================

#[test]
fn test_copy_stacks_bands() {
    let dir = tempfile::tempdir().unwrap();
    let grid = utm_grid(400_000.0, 5_800_000.0, 30.0, 20, 12);
    let first = write_test_raster(dir.path(), "first.bsq", &grid, &create_test_raster::<i16>(&grid, 2));
    let second = write_test_raster(dir.path(), "second.bsq", &grid, &create_test_raster::<u8>(&grid, 1));
    let output = dir.path().join("stack.bsq");

    let derived = run_copy(&[first, second], &output, config()).unwrap().unwrap();
    assert_eq!(derived.shape(), (12, 20));

    let mut ds = RasterDataset::open(&output).unwrap();
    assert_eq!(ds.bands(), 3);
    assert_eq!(ds.band_description(0).unwrap(), Some("input0: Band 1"));
    assert_eq!(ds.band_description(2).unwrap(), Some("input1: Band 1"));
    let array = ds.read_array().unwrap();
    let array = array.as_array::<i16>().unwrap();
    assert_eq!(array[[0, 11, 19]], 11_019);
    assert_eq!(array[[2, 0, 4]], 4);
}

// ============================================================================
// ndi
// ============================================================================

#[test]
fn test_ndi_values_and_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let grid = utm_grid(400_000.0, 5_800_000.0, 30.0, 16, 16);
    let a = write_test_raster(dir.path(), "a.bsq", &grid, &create_constant_raster(&grid, 1, 3.0));
    let mut b_values = Array3::from_elem((1, 16, 16), 1.0f32);
    b_values[[0, 0, 0]] = -3.0;
    let b = write_test_raster(dir.path(), "b.bsq", &grid, &RasterArray::from_array(b_values));
    let output = dir.path().join("ndi.tif");

    let mut config = config();
    config.num_workers = Some(NumWorkers::Count(2));
    let valid = run_ndi(&a, &b, &output, config).unwrap().unwrap();
    assert_eq!(valid, 16 * 16 - 1);

    let mut ds = RasterDataset::open(&output).unwrap();
    assert_eq!(ds.no_data_value(), Some(NDI_NO_DATA as f64));
    let array = ds.read_array().unwrap();
    let array = array.as_array::<f32>().unwrap();
    assert_eq!(array[[0, 0, 0]], NDI_NO_DATA);
    assert_approx_eq!(array[[0, 5, 7]], 0.5, 1e-6);
}

// ============================================================================
// info
// ============================================================================

#[test]
fn test_info_reports_grid_and_bands() {
    let dir = tempfile::tempdir().unwrap();
    let grid = utm_grid(400_000.0, 5_800_000.0, 30.0, 10, 5);
    let path = write_test_raster(dir.path(), "image.bsq", &grid, &create_test_raster::<u16>(&grid, 4));

    let info = raster_info(&path).unwrap();
    assert_eq!(info["bands"], 4);
    assert_eq!(info["size"], serde_json::json!([10, 5]));
    assert_eq!(info["data_type"], "uint16");
    assert_eq!(info["driver"], "ENVI");
    assert_eq!(info["extent"][0], 400_000.0);
}
