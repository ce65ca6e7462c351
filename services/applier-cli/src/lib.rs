//! Built-in raster commands on top of the applier.

pub mod cli;
pub mod operators;

use anyhow::Result;
use applier::{Applier, ApplierConfig, InputRaster, OutputRaster};
use geo_common::Grid;
use operators::{NdiOperator, StackOperator};
use raster_io::RasterDataset;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// Stack all bands of `inputs` into `output`. Returns the output grid.
pub fn run_copy(inputs: &[PathBuf], output: &Path, config: ApplierConfig) -> Result<Option<Grid>> {
    let mut applier = Applier::new(config);
    let mut keys = Vec::with_capacity(inputs.len());
    for (i, path) in inputs.iter().enumerate() {
        let key = format!("input{}", i);
        applier.set_input(&key, InputRaster::new(path))?;
        keys.push(key);
    }
    applier.set_output("stack", OutputRaster::new(output)?)?;

    let run = applier.apply("copy", || Ok(StackOperator::new(keys.clone(), "stack")))?;
    Ok(run.map(|run| run.grid))
}

/// Normalized difference of the first bands of `a` and `b`. Returns the
/// number of valid output pixels.
pub fn run_ndi(a: &Path, b: &Path, output: &Path, config: ApplierConfig) -> Result<Option<u64>> {
    let mut applier = Applier::new(config);
    applier.set_input("a", InputRaster::new(a))?;
    applier.set_input("b", InputRaster::new(b))?;
    applier.set_output("ndi", OutputRaster::new(output)?)?;

    let valid = applier.apply_aggregate(
        "ndi",
        || Ok(NdiOperator::new("a", "b", "ndi")),
        |counts, grid| {
            let valid: u64 = counts.iter().sum();
            info!(valid, pixels = grid.size().count(), "normalized difference done");
            Ok(valid)
        },
    )?;
    Ok(valid)
}

/// Grid, bands and metadata of a raster.
pub fn raster_info(path: &Path) -> Result<Value> {
    let dataset = RasterDataset::open(path)?;
    let grid = dataset.grid();
    Ok(json!({
        "path": path.display().to_string(),
        "driver": dataset.driver().name(),
        "projection": grid.projection().to_string(),
        "extent": [grid.extent().xmin(), grid.extent().xmax(), grid.extent().ymin(), grid.extent().ymax()],
        "resolution": [grid.resolution().x(), grid.resolution().y()],
        "size": [grid.size().x(), grid.size().y()],
        "bands": dataset.bands(),
        "data_type": dataset.data_type().as_str(),
        "no_data": dataset.no_data_values(),
        "metadata": dataset.metadata(),
    }))
}
