//! Raster and vector I/O for the block applier.
//!
//! Datasets are opened or created through [`RasterDataset`]. Pixels move
//! in and out as [`RasterArray`]s of shape `(bands, rows, cols)`, addressed
//! by pixel offsets into the dataset's [`Grid`](geo_common::Grid).
//!
//! # Architecture
//!
//! ```text
//! RasterDataset ──► PixelStore
//!      │               ├─► EnviStore    (raw binary, seek-based windows)
//!      │               └─► MemoryStore  (MEM, GeoTIFF until close)
//!      │
//!      ├─► read_grid ──► resample (Nearest | Bilinear | Average | Mode)
//!      │
//!      ├─► close ──► ENVI .hdr / .aux.json, GeoTIFF encode, .tif.hdr
//!      └─► discard ──► created files removed, nothing finalised
//!
//! VectorDataset (GeoJSON) ──► rasterize(grid) ──► RasterArray
//! ```

pub mod dataset;
pub mod driver;
pub mod envi;
pub mod error;
pub mod gtiff;
pub mod metadata;
pub mod resample;
pub mod store;
pub mod types;
pub mod vector;

pub use dataset::{remove_raster_files, RasterDataset};
pub use driver::{EnviOptions, GTiffOptions, Interleave, RasterDriver, TiffCompression};
pub use error::{RasterIoError, Result};
pub use metadata::{BandMetadata, Color, MetadataDomain, RasterMetadata, DEFAULT_DOMAIN, ENVI_DOMAIN};
pub use resample::ResampleAlg;
pub use types::{cast_value, DataType, RasterArray, RasterElement};
pub use vector::{AttributeFilter, Burn, Feature, Geometry, RasterizeOptions, VectorDataset};
