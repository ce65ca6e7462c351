//! Error types for the applier.

use geo_common::GeometryError;
use raster_io::RasterIoError;
use thiserror::Error;

/// Errors that can occur while setting up or running an applier.
#[derive(Error, Debug)]
pub enum ApplierError {
    /// No input raster and no extent override.
    #[error("cannot derive the output extent: no input rasters and no extent set")]
    MissingExtent,

    /// No input raster and no resolution override.
    #[error("cannot derive the output resolution: no input rasters and no resolution set")]
    MissingResolution,

    /// No input raster and no projection override.
    #[error("cannot derive the output projection: no input rasters and no projection set")]
    MissingProjection,

    /// Input rasters disagree on their projection and none was set.
    #[error("input projections differ ({expected} vs {found}); set a projection explicitly")]
    ProjectionMismatch { expected: String, found: String },

    /// An operator broke the block contract (array shape, band index, unknown key).
    #[error("operator contract violated: {0}")]
    OperatorContract(String),

    /// An operator failed while processing a block.
    #[error("operator failed: {0}")]
    Operator(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Grid or projection error.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Raster or vector I/O error.
    #[error(transparent)]
    RasterIo(#[from] RasterIoError),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A writer thread stopped before the run finished.
    #[error("writer {0} is no longer accepting commands")]
    WriterDisconnected(usize),

    /// A worker or writer thread panicked.
    #[error("thread panicked: {0}")]
    Panic(String),
}

impl ApplierError {
    /// Create an OperatorContract error.
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::OperatorContract(msg.into())
    }

    /// Create an Operator error.
    pub fn operator(msg: impl Into<String>) -> Self {
        Self::Operator(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Turn a panic payload into an error.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panic(msg)
    }
}

impl From<serde_yaml::Error> for ApplierError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ApplierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for applier operations.
pub type Result<T> = std::result::Result<T, ApplierError>;
