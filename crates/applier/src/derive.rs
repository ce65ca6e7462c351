//! Derivation of the output grid from the input rasters.
//!
//! Explicit overrides win. Otherwise the projection must be shared by all
//! inputs, the extents are reprojected and combined by the extent policy
//! and each resolution axis is combined by the resolution policy.

use crate::config::{ApplierConfig, ExtentPolicy};
use crate::error::{ApplierError, Result};
use geo_common::{Extent, Grid, Projection, Resolution};

/// Derive the output grid from the grids of all input rasters.
pub fn derive_grid(config: &ApplierConfig, grids: &[Grid]) -> Result<Grid> {
    if grids.is_empty() && config.extent.is_none() {
        return Err(ApplierError::MissingExtent);
    }
    let projection = derive_projection(config, grids)?;
    let extent = derive_extent(config, grids, &projection)?;
    let resolution = derive_resolution(config, grids)?;
    Ok(Grid::new(extent, resolution)?)
}

/// The override, else the extent override's projection, else the
/// projection shared by all inputs.
pub fn derive_projection(config: &ApplierConfig, grids: &[Grid]) -> Result<Projection> {
    if let Some(projection) = config.projection {
        return Ok(projection);
    }
    if let Some(extent) = &config.extent {
        return Ok(*extent.projection());
    }
    let first = grids.first().ok_or(ApplierError::MissingProjection)?;
    let projection = *first.projection();
    if let Some(other) = grids.iter().find(|g| *g.projection() != projection) {
        return Err(ApplierError::ProjectionMismatch {
            expected: projection.to_string(),
            found: other.projection().to_string(),
        });
    }
    Ok(projection)
}

/// The override reprojected to `projection`, else the input extents
/// combined by the extent policy.
pub fn derive_extent(config: &ApplierConfig, grids: &[Grid], projection: &Projection) -> Result<Extent> {
    if let Some(extent) = &config.extent {
        return Ok(extent.reproject(projection)?);
    }
    let (first, rest) = grids.split_first().ok_or(ApplierError::MissingExtent)?;
    let mut extent = first.extent().reproject(projection)?;
    for grid in rest {
        let other = grid.extent().reproject(projection)?;
        extent = match config.extent_policy {
            ExtentPolicy::Union => extent.union(&other)?,
            ExtentPolicy::Intersection => extent.intersection(&other)?,
        };
    }
    Ok(extent)
}

/// The override, else the input resolutions combined per axis.
pub fn derive_resolution(config: &ApplierConfig, grids: &[Grid]) -> Result<Resolution> {
    if let Some(resolution) = config.resolution {
        return Ok(resolution);
    }
    let xs: Vec<f64> = grids.iter().map(|g| g.resolution().x()).collect();
    let ys: Vec<f64> = grids.iter().map(|g| g.resolution().y()).collect();
    let policy = config.resolution_policy;
    match (policy.combine(&xs), policy.combine(&ys)) {
        (Some(x), Some(y)) => Ok(Resolution::new(x, y)?),
        _ => Err(ApplierError::MissingResolution),
    }
}
