//! Vertexer Core - vertex finding for wire-plane LArTPC reconstruction
//!
//! Given the trajectories already reconstructed in each wire plane of a
//! slice, this library:
//! 1. **Finds 2D vertices** where trajectory ends meet, including hammer
//!    topologies where a track ends on the side of another
//! 2. **Keeps trajectories and vertices consistent** by attaching, merging,
//!    splitting and pruning around each vertex
//! 3. **Lifts 2D vertices into 3D** by matching drift position and wire
//!    crossings across planes, completing vertices in the missing plane
//!
//! All state lives in a [`Slice`]; the [`VertexEngine`] carries configuration
//! and geometry and mutates the slice it is handed.

pub mod config;
pub mod engine;
pub mod error;
pub mod fit;
pub mod flags;
pub mod geom2d;
pub mod ids;
pub mod score;
pub mod slice;
pub mod store;
pub mod surgery;
pub mod trajectory;
pub mod vertex;

pub mod attach;
pub mod find2d;
pub mod find3d;
pub mod hammer;
pub mod repair;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use attach::TrajectoryStepper;
pub use config::VertexConfig;
pub use engine::{VertexEngine, LAST_PASS};
pub use error::VertexError;
pub use flags::{AlgMod, EndFlag, VtxStat};
pub use ids::{TjId, Vtx3Id, VtxId};
pub use slice::{HitRequest, Slice, SliceHit};
pub use trajectory::{TrajPoint, Trajectory};
pub use vertex::{PfpStruct, Topo, Vtx3Store, VtxStore};
