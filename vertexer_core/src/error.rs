//! Error types for the vertex engine.

use thiserror::Error;
use vertexer_env::{Ctp, EnvError};

use crate::ids::{TjId, Vtx3Id, VtxId};

/// Failures that abort an operation on the slice.
///
/// Expected rejections (a candidate failing a cut, a fit not converging)
/// are not errors; they are reported through `bool`/`Option` returns.
#[derive(Debug, Clone, Error)]
pub enum VertexError {
    /// A vertex was stored with an id that does not match its arena slot
    #[error("Vertex id {got} does not match the next slot {expected}")]
    IdMismatch { got: u32, expected: u32 },

    /// Trajectories attached to a vertex are in a different plane
    #[error("{vertex} in {ctp} has trajectories in another plane")]
    CtpMismatch { vertex: VtxId, ctp: Ctp },

    #[error("Unknown trajectory: {0}")]
    UnknownTrajectory(TjId),

    #[error("Unknown vertex: {0}")]
    UnknownVertex(VtxId),

    #[error("Unknown 3D vertex: {0}")]
    UnknownVertex3(Vtx3Id),

    /// A trajectory/vertex association was found broken and was repaired
    #[error("Inconsistent association: {0}")]
    Inconsistent(String),

    #[error("Split rejected: {0}")]
    SplitRejected(String),

    #[error("Merge rejected: {0}")]
    MergeRejected(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Geometry error: {0}")]
    Geometry(#[from] EnvError),
}

impl VertexError {
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    pub fn split(msg: impl Into<String>) -> Self {
        Self::SplitRejected(msg.into())
    }

    pub fn merge(msg: impl Into<String>) -> Self {
        Self::MergeRejected(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
