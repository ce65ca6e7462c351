//! Common geometry types shared across the raster applier crates.
//!
//! Everything here is an immutable value type. Operations such as union,
//! intersection, buffering or reprojection return new instances.
//!
//! The central type is [`Grid`]: an [`Extent`] quantized to an integer
//! number of pixels at a given [`Resolution`]. Grids are the unit of spatial
//! addressing for reading, processing and writing raster blocks.

pub mod error;
pub mod extent;
pub mod grid;
pub mod pixel;
pub mod point;
pub mod projection;
pub mod resolution;

pub use error::{GeometryError, Result};
pub use extent::Extent;
pub use grid::{Grid, Subgrid};
pub use pixel::{Pixel, PixelOffset, RasterSize};
pub use point::Point;
pub use projection::Projection;
pub use resolution::Resolution;

/// Default tolerance for approximate geometry comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-5;
