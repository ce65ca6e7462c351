//! Integration tests for GeoJSON layers and rasterization.

use raster_io::{AttributeFilter, Burn, DataType, RasterizeOptions, VectorDataset};
use test_utils::{utm_grid, wgs84_grid, write_test_geojson};

// ============================================================================
// Reading
// ============================================================================

#[test]
fn test_open_feature_collection() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_geojson(
        dir.path(),
        "fields.geojson",
        &[(13.0, 13.5, 52.0, 52.5, 1), (13.5, 14.0, 52.5, 53.0, 2)],
    );
    let layer = VectorDataset::open(&path).unwrap();
    assert_eq!(layer.features().len(), 2);
    assert_eq!(layer.field_names(), vec!["id".to_string()]);
    let extent = layer.extent().unwrap();
    assert_eq!((extent.xmin(), extent.xmax()), (13.0, 14.0));
    assert_eq!((extent.ymin(), extent.ymax()), (52.0, 53.0));
}

#[test]
fn test_invalid_geojson_is_vector_error() {
    assert!(matches!(
        VectorDataset::parse("{\"type\": \"FeatureCollection\"}"),
        Err(raster_io::RasterIoError::Vector(_))
    ));
    assert!(VectorDataset::parse("not json").is_err());
}

// ============================================================================
// Rasterization
// ============================================================================

#[test]
fn test_rasterize_attribute_on_geographic_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_geojson(
        dir.path(),
        "fields.geojson",
        &[(13.0, 13.5, 52.0, 52.5, 1), (13.5, 14.0, 52.5, 53.0, 2)],
    );
    let layer = VectorDataset::open(&path).unwrap();
    let grid = wgs84_grid(13.0, 53.0, 0.1, 10, 10);
    let options = RasterizeOptions {
        init_value: 255.0,
        burn: Burn::Attribute("id".into()),
        ..Default::default()
    };
    let a = layer.rasterize(&grid, &options).unwrap();
    let a = a.as_array::<u8>().unwrap();
    // Lower left quarter is feature 1, upper right feature 2
    assert_eq!(a[[0, 9, 0]], 1);
    assert_eq!(a[[0, 0, 9]], 2);
    assert_eq!(a[[0, 0, 0]], 255);
    assert_eq!(a.iter().filter(|&&v| v == 1).count(), 25);
    assert_eq!(a.iter().filter(|&&v| v == 2).count(), 25);
}

#[test]
fn test_rasterize_reprojects_to_utm() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_test_geojson(dir.path(), "big.geojson", &[(12.0, 15.0, 51.0, 54.0, 7)]);
    let layer = VectorDataset::open(&path).unwrap();
    let grid = utm_grid(400_000.0, 5_801_000.0, 100.0, 10, 10);
    let options = RasterizeOptions {
        burn: Burn::Attribute("id".into()),
        filter: Some(AttributeFilter::Equals {
            attribute: "id".into(),
            value: serde_json::json!(7),
        }),
        data_type: DataType::F32,
        ..Default::default()
    };
    let a = layer.rasterize(&grid, &options).unwrap();
    assert_eq!(a.data_type(), DataType::F32);
    assert!(a.as_array::<f32>().unwrap().iter().all(|&v| v == 7.0));
}
