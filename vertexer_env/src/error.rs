//! Error types for the detector environment.

use thiserror::Error;

use crate::types::PlaneId;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// The plane index is not part of the TPC
    #[error("Invalid plane: {0}")]
    InvalidPlane(PlaneId),

    /// Wire number outside the plane
    #[error("Wire {wire} out of range in {plane}")]
    WireOutOfRange { plane: PlaneId, wire: i64 },

    /// The two wires are parallel or do not cross inside the TPC
    #[error("No wire intersection: {0}")]
    NoIntersection(String),

    /// Geometry description could not be used
    #[error("Geometry config error: {0}")]
    ConfigError(String),
}

impl EnvError {
    /// Creates a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates a no-intersection error.
    pub fn no_intersection(msg: impl Into<String>) -> Self {
        Self::NoIntersection(msg.into())
    }
}
