//! Production geometry: planes of uniformly spaced parallel wires.

use std::collections::HashSet;

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::geometry::DetectorGeometry;
use crate::types::{ActiveVolume, PlaneId, TpcId};

/// One wire plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneConfig {
    /// Wire angle from the vertical (y) axis, in degrees
    pub wire_angle_deg: f64,

    /// Wire spacing in cm
    pub pitch: f64,

    /// Extra drift-time offset of this plane, in ticks
    pub tick_offset: f64,
}

/// Description of a single-TPC detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub tpc: TpcId,

    pub volume: ActiveVolume,

    pub planes: Vec<PlaneConfig>,

    /// Readout window length in ticks
    pub n_ticks: u32,

    /// Sampling period in microseconds
    pub tick_period_us: f64,

    /// Drift velocity in cm/us
    pub drift_velocity: f64,

    /// Tick at which x = volume.x_lo
    pub trigger_offset: f64,

    /// Known bad channels as (plane, wire)
    #[serde(default)]
    pub dead_wires: Vec<(u16, u32)>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            tpc: TpcId::new(0, 0),
            volume: ActiveVolume {
                x_lo: 0.0,
                x_hi: 250.0,
                y_lo: -100.0,
                y_hi: 100.0,
                z_lo: 0.0,
                z_hi: 300.0,
            },
            planes: vec![
                PlaneConfig { wire_angle_deg: 60.0, pitch: 0.3, tick_offset: 0.0 },  // U
                PlaneConfig { wire_angle_deg: -60.0, pitch: 0.3, tick_offset: 0.0 }, // V
                PlaneConfig { wire_angle_deg: 0.0, pitch: 0.3, tick_offset: 0.0 },   // Y (collection)
            ],
            n_ticks: 6400,
            tick_period_us: 0.5,
            drift_velocity: 0.16, // cm/us at 500 V/cm
            trigger_offset: 800.0,
            dead_wires: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PlaneGeom {
    sin: f64,
    cos: f64,
    pitch: f64,
    /// Wire coordinate of wire 0, in wire units
    wire0: f64,
    n_wires: u32,
    tick_offset: f64,
}

/// Planes of uniformly spaced parallel wires in one TPC.
#[derive(Debug, Clone)]
pub struct UniformGeometry {
    config: GeometryConfig,
    planes: Vec<PlaneGeom>,
    dead: HashSet<(u16, u32)>,
}

impl UniformGeometry {
    pub fn new(config: GeometryConfig) -> Result<Self, EnvError> {
        if config.planes.is_empty() {
            return Err(EnvError::config("at least one plane is required"));
        }
        if config.tick_period_us <= 0.0 || config.drift_velocity <= 0.0 {
            return Err(EnvError::config("tick period and drift velocity must be positive"));
        }
        let v = &config.volume;
        let corners = [(v.y_lo, v.z_lo), (v.y_lo, v.z_hi), (v.y_hi, v.z_lo), (v.y_hi, v.z_hi)];

        let mut planes = Vec::with_capacity(config.planes.len());
        for (ipl, pc) in config.planes.iter().enumerate() {
            if pc.pitch <= 0.0 {
                return Err(EnvError::config(format!("plane {} has non-positive pitch", ipl)));
            }
            let (sin, cos) = pc.wire_angle_deg.to_radians().sin_cos();
            let coords = corners.iter().map(|&(y, z)| (z * cos - y * sin) / pc.pitch);
            let (lo, hi) = coords.fold((f64::MAX, f64::MIN), |(lo, hi), u| (lo.min(u), hi.max(u)));
            // tolerate rounding noise in the corner projections
            let wire0 = (lo + 1e-6).floor();
            planes.push(PlaneGeom {
                sin,
                cos,
                pitch: pc.pitch,
                wire0,
                n_wires: (hi - wire0 + 1e-6).floor() as u32 + 1,
                tick_offset: pc.tick_offset,
            });
        }

        let dead = config.dead_wires.iter().copied().collect();
        Ok(Self { config, planes, dead })
    }

    /// Geometry with the default three-plane layout.
    pub fn with_defaults() -> Result<Self, EnvError> {
        Self::new(GeometryConfig::default())
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// Marks a wire dead after construction.
    pub fn add_dead_wire(&mut self, plane: u16, wire: u32) {
        self.dead.insert((plane, wire));
    }

    fn plane_geom(&self, plane: PlaneId) -> Option<&PlaneGeom> {
        self.planes.get(plane.plane as usize)
    }

    /// Drift distance covered in one tick, in cm.
    fn cm_per_tick(&self) -> f64 {
        self.config.tick_period_us * self.config.drift_velocity
    }
}

impl DetectorGeometry for UniformGeometry {
    fn n_planes(&self, _tpc: TpcId) -> u16 {
        self.planes.len() as u16
    }

    fn n_wires(&self, plane: PlaneId) -> u32 {
        self.plane_geom(plane).map_or(0, |p| p.n_wires)
    }

    fn n_ticks(&self, _plane: PlaneId) -> u32 {
        self.config.n_ticks
    }

    fn units_per_tick(&self) -> f64 {
        self.cm_per_tick() / self.planes[0].pitch
    }

    fn wire_pitch(&self, plane: PlaneId) -> f64 {
        self.plane_geom(plane).map_or(0.0, |p| p.pitch)
    }

    fn is_dead_wire(&self, plane: PlaneId, wire: u32) -> bool {
        self.dead.contains(&(plane.plane, wire))
    }

    fn intersection_point(
        &self,
        wire1: u32,
        plane1: PlaneId,
        wire2: u32,
        plane2: PlaneId,
    ) -> Option<(f64, f64)> {
        let p1 = self.plane_geom(plane1)?;
        let p2 = self.plane_geom(plane2)?;
        // (z cos - y sin) = pitch * (wire + wire0) for each plane
        let m = Matrix2::new(-p1.sin, p1.cos, -p2.sin, p2.cos);
        if m.determinant().abs() < 1e-6 {
            return None;
        }
        let rhs = Vector2::new(
            p1.pitch * (wire1 as f64 + p1.wire0),
            p2.pitch * (wire2 as f64 + p2.wire0),
        );
        let yz = m.try_inverse()? * rhs;
        Some((yz[0], yz[1]))
    }

    fn wire_coordinate(&self, y: f64, z: f64, plane: PlaneId) -> f64 {
        match self.plane_geom(plane) {
            Some(p) => (z * p.cos - y * p.sin) / p.pitch - p.wire0,
            None => -1.0,
        }
    }

    fn ticks_to_x(&self, ticks: f64, plane: PlaneId) -> f64 {
        let offset = self.plane_geom(plane).map_or(0.0, |p| p.tick_offset);
        (ticks - self.config.trigger_offset - offset) * self.cm_per_tick() + self.config.volume.x_lo
    }

    fn x_to_ticks(&self, x: f64, plane: PlaneId) -> f64 {
        let offset = self.plane_geom(plane).map_or(0.0, |p| p.tick_offset);
        (x - self.config.volume.x_lo) / self.cm_per_tick() + self.config.trigger_offset + offset
    }

    fn active_volume(&self, _tpc: TpcId) -> ActiveVolume {
        self.config.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(p: u16) -> PlaneId {
        TpcId::new(0, 0).plane(p)
    }

    #[test]
    fn test_collection_plane_measures_z() {
        let geom = UniformGeometry::with_defaults().unwrap();
        let w1 = geom.wire_coordinate(0.0, 30.0, plane(2));
        let w2 = geom.wire_coordinate(50.0, 30.0, plane(2));
        assert!((w1 - w2).abs() < 1e-9, "Vertical wires must not depend on y");
        assert!((w1 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersection_recovers_point() {
        let geom = UniformGeometry::with_defaults().unwrap();
        let (y, z) = (12.0, 140.0);
        let w0 = geom.wire_coordinate(y, z, plane(0)).round() as u32;
        let w2 = geom.wire_coordinate(y, z, plane(2)).round() as u32;
        let (yi, zi) = geom.intersection_point(w0, plane(0), w2, plane(2)).unwrap();

        // Rounding to the nearest wire moves the point by at most ~1 pitch per plane
        assert!((yi - y).abs() < 1.0, "y = {}", yi);
        assert!((zi - z).abs() < 0.5, "z = {}", zi);
    }

    #[test]
    fn test_parallel_planes_do_not_intersect() {
        let mut config = GeometryConfig::default();
        config.planes[1].wire_angle_deg = 60.0;
        let geom = UniformGeometry::new(config).unwrap();
        assert!(geom.intersection_point(100, plane(0), 120, plane(1)).is_none());
    }

    #[test]
    fn test_ticks_x_round_trip() {
        let geom = UniformGeometry::with_defaults().unwrap();
        let x = geom.ticks_to_x(1850.0, plane(1));
        assert!((geom.x_to_ticks(x, plane(1)) - 1850.0).abs() < 1e-9);
    }

    #[test]
    fn test_wire_counts_cover_volume() {
        let geom = UniformGeometry::with_defaults().unwrap();
        // 300 cm / 0.3 cm
        assert_eq!(geom.n_wires(plane(2)), 1001);
        assert!(geom.n_wires(plane(0)) > 1001);
        assert!(geom.has_wire(plane(2), 1000));
        assert!(!geom.has_wire(plane(2), 1001));
        assert!(!geom.has_wire(plane(2), -1));
    }

    #[test]
    fn test_dead_wires() {
        let mut config = GeometryConfig::default();
        config.dead_wires = vec![(1, 400)];
        let mut geom = UniformGeometry::new(config).unwrap();
        geom.add_dead_wire(2, 10);
        assert!(geom.is_dead_wire(plane(1), 400));
        assert!(geom.is_dead_wire(plane(2), 10));
        assert!(!geom.is_dead_wire(plane(0), 400));
    }

    #[test]
    fn test_rejects_bad_pitch() {
        let mut config = GeometryConfig::default();
        config.planes[0].pitch = 0.0;
        assert!(matches!(UniformGeometry::new(config), Err(EnvError::ConfigError(_))));
    }
}
