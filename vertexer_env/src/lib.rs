//! Vertexer Environment Abstraction Layer
//!
//! This crate provides the detector seam of the vertex engine: everything
//! the reconstruction needs to know about wires, drift and channel status
//! is expressed through the [`DetectorGeometry`] trait.
//!
//! # Core Concept: Geometry as a Service
//!
//! The engine only ever asks questions:
//! - Wires (`n_wires()`, `has_wire()`, `is_dead_wire()`)
//! - Crossings (`intersection_point()`, `wire_coordinate()`)
//! - Drift (`ticks_to_x()`, `x_to_ticks()`)
//!
//! so reconstruction on a synthetic detector and on a described one run the
//! same code path.
//!
//! # Example
//!
//! ```ignore
//! use vertexer_env::{DetectorGeometry, TpcId, UniformGeometry};
//!
//! let geom = UniformGeometry::with_defaults()?;
//! let plane = TpcId::new(0, 0).plane(2);
//! let wire = geom.wire_coordinate(10.0, 150.0, plane);
//! let ctp = plane.ctp();
//! ```

mod error;
mod geometry;
mod types;
mod uniform;

pub use error::EnvError;
pub use geometry::DetectorGeometry;
pub use types::{ActiveVolume, Ctp, PlaneId, TpcId};
pub use uniform::{GeometryConfig, PlaneConfig, UniformGeometry};
