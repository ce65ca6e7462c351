//! Error types for geometry construction and grid addressing.

use thiserror::Error;

/// Result type alias using GeometryError.
pub type Result<T> = std::result::Result<T, GeometryError>;

/// Errors raised by geometry primitives and grids.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    // === Construction Errors ===
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported projection: {0}")]
    UnsupportedProjection(String),

    // === Algebra Errors ===
    #[error("extents do not intersect: {a} and {b}")]
    EmptyIntersection { a: String, b: String },

    // === Addressing Errors ===
    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("projection error: {0}")]
    Projection(#[from] projection::ProjectionError),
}

impl GeometryError {
    /// Create an InvalidGeometry error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Create an OutOfRange error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create an UnsupportedProjection error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedProjection(msg.into())
    }
}
