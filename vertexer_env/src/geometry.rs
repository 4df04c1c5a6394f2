//! Detector geometry trait consumed by the vertex engine.

use crate::types::{ActiveVolume, PlaneId, TpcId};

/// The central interface for detector geometry and channel status.
///
/// The vertex engine never talks to wire-readout or detector-property
/// services directly; everything it needs about the detector goes through
/// this trait so that reconstruction runs identically against a real
/// detector description or a synthetic one.
///
/// # Implementations
///
/// - **Production**: `UniformGeometry` - planes of parallel wires with a
///   constant pitch and angle, uniform drift
/// - **Tests**: any small struct; most unit tests use `UniformGeometry`
///   configured with one tick per wire pitch
///
/// # Units
///
/// 2D positions inside the engine are `(wire, tick * units_per_tick())`,
/// so that both coordinates are measured in wire-pitch units. 3D positions
/// are in cm.
pub trait DetectorGeometry {
    /// Number of wire planes in the TPC.
    fn n_planes(&self, tpc: TpcId) -> u16;

    /// Number of wires in the plane.
    fn n_wires(&self, plane: PlaneId) -> u32;

    /// Number of readout ticks in the plane.
    fn n_ticks(&self, plane: PlaneId) -> u32;

    /// Conversion from ticks to wire-pitch equivalent units.
    fn units_per_tick(&self) -> f64;

    /// Wire spacing in cm.
    fn wire_pitch(&self, plane: PlaneId) -> f64;

    /// True if the channel reading out `wire` is known to be dead.
    fn is_dead_wire(&self, plane: PlaneId, wire: u32) -> bool;

    /// True if `wire` exists in the plane.
    fn has_wire(&self, plane: PlaneId, wire: i64) -> bool {
        wire >= 0 && wire < self.n_wires(plane) as i64
    }

    /// Returns the (y, z) crossing point of two wires in different planes.
    ///
    /// Returns `None` for parallel wires. The point is not required to lie
    /// inside the active volume; callers apply their own bounds.
    fn intersection_point(
        &self,
        wire1: u32,
        plane1: PlaneId,
        wire2: u32,
        plane2: PlaneId,
    ) -> Option<(f64, f64)>;

    /// Continuous wire coordinate of the (y, z) point in the plane.
    fn wire_coordinate(&self, y: f64, z: f64, plane: PlaneId) -> f64;

    /// Drift position (cm) of a signal seen at `ticks` in the plane.
    fn ticks_to_x(&self, ticks: f64, plane: PlaneId) -> f64;

    /// Inverse of [`DetectorGeometry::ticks_to_x`].
    fn x_to_ticks(&self, x: f64, plane: PlaneId) -> f64;

    /// Fiducial bounds of the TPC.
    fn active_volume(&self, tpc: TpcId) -> ActiveVolume;
}
