//! Vertexer Deterministic Simulation Harness
//!
//! This crate runs the vertex engine over synthetic events whose truth is
//! known, so every topology the engine handles can be replayed from a
//! single 64-bit seed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  truth   ┌──────────────┐  Slice   ┌──────────────┐
//! │  ScenarioId  │─────────►│ EventOracle  │─────────►│ VertexEngine │
//! │  (topology)  │          │ (hits, tjs)  │          │  (2D / 3D)   │
//! └──────────────┘          └──────────────┘          └──────┬───────┘
//!        ▲                                                   │
//!        │              ScenarioRunner checks                │
//!        └───────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vertexer_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::NeutrinoLike);
//! assert!(result.passed);
//! ```

mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod stepper;

pub use error::SimError;
pub use exporter::{SimExport, TrajSummary};
pub use oracle::{EventOracle, TruthEvent, TruthSegment, TruthTrack};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use stepper::LineStepper;
