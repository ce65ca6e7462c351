//! Error types for projection math.

use thiserror::Error;

/// Errors raised by forward or inverse projection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// The coordinate cannot be represented in the target projection.
    #[error("coordinate outside projection domain: {0}")]
    OutOfDomain(String),

    /// The projection was constructed with invalid parameters.
    #[error("invalid projection parameters: {0}")]
    InvalidParameters(String),
}

impl ProjectionError {
    /// Create an OutOfDomain error.
    pub fn out_of_domain(msg: impl Into<String>) -> Self {
        Self::OutOfDomain(msg.into())
    }

    /// Create an InvalidParameters error.
    pub fn invalid_parameters(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
