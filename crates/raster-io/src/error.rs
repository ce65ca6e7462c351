//! Error types for raster I/O.

use geo_common::GeometryError;
use thiserror::Error;

/// Errors that can occur while reading or writing rasters.
#[derive(Error, Debug)]
pub enum RasterIoError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Grid or projection error.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The driver cannot be used for the requested operation.
    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// The dataset format could not be detected.
    #[error("cannot open raster {0}: unknown format")]
    UnknownFormat(String),

    /// An ENVI header is missing or malformed.
    #[error("invalid ENVI header: {0}")]
    InvalidHeader(String),

    /// A GeoTIFF could not be encoded or decoded.
    #[error("TIFF error: {0}")]
    Tiff(String),

    /// A requested window or band lies outside the raster.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Array shape or data type does not match the dataset.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Vector layer parsing or rasterization failed.
    #[error("vector error: {0}")]
    Vector(String),

    /// Metadata could not be (de)serialized.
    #[error("metadata error: {0}")]
    Metadata(String),
}

impl RasterIoError {
    /// Create an OutOfRange error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create an InvalidData error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an InvalidHeader error.
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }

    /// Create a Vector error.
    pub fn vector(msg: impl Into<String>) -> Self {
        Self::Vector(msg.into())
    }
}

impl From<tiff::TiffError> for RasterIoError {
    fn from(err: tiff::TiffError) -> Self {
        Self::Tiff(err.to_string())
    }
}

impl From<serde_json::Error> for RasterIoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}

/// Result type for raster I/O operations.
pub type Result<T> = std::result::Result<T, RasterIoError>;
