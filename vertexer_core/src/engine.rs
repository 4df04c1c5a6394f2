//! The vertex engine handle.
//!
//! [`VertexEngine`] carries the configuration, the detector geometry and the
//! UID counters. The algorithms are implemented as `impl VertexEngine` blocks
//! in their own modules; every public operation takes the [`Slice`] it
//! mutates explicitly.

use std::sync::atomic::{AtomicU32, Ordering};

use nalgebra::Vector2;
use vertexer_env::DetectorGeometry;

use crate::config::VertexConfig;
use crate::error::VertexError;
use crate::slice::Slice;
use crate::vertex::Vtx3Store;

/// Pass number that marks the final 2D vertexing pass.
pub const LAST_PASS: u16 = u16::MAX;

/// Vertex reconstruction engine for one detector.
pub struct VertexEngine<'g> {
    pub(crate) config: VertexConfig,
    pub(crate) geom: &'g dyn DetectorGeometry,
    vx2_uid: AtomicU32,
    vx3_uid: AtomicU32,
}

impl<'g> VertexEngine<'g> {
    /// Creates an engine after validating `config`.
    pub fn new(config: VertexConfig, geom: &'g dyn DetectorGeometry) -> Result<Self, VertexError> {
        config.validate()?;
        Ok(Self {
            config,
            geom,
            vx2_uid: AtomicU32::new(0),
            vx3_uid: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &VertexConfig {
        &self.config
    }

    pub fn geometry(&self) -> &dyn DetectorGeometry {
        self.geom
    }

    pub(crate) fn next_vx2_uid(&self) -> u32 {
        self.vx2_uid.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn next_vx3_uid(&self) -> u32 {
        self.vx3_uid.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// +1 when trajectories were stepped toward increasing wire.
    #[inline]
    pub(crate) fn step_dir(&self) -> i64 {
        self.config.step_dir.sign()
    }

    /// Projection of a 3D vertex into `plane` in engine units.
    pub fn pos_in_plane(&self, slc: &Slice, vx3: &Vtx3Store, plane: usize) -> Vector2<f64> {
        let plane_id = vx3.tpc.plane(plane as u16);
        let wire = self.geom.wire_coordinate(vx3.pos[1], vx3.pos[2], plane_id);
        let tick = self.geom.x_to_ticks(vx3.pos[0], plane_id);
        Vector2::new(wire, tick * slc.units_per_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_geometry;

    #[test]
    fn test_uids_increase_per_dimension() {
        let geom = test_geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        assert_eq!(engine.next_vx2_uid(), 1);
        assert_eq!(engine.next_vx2_uid(), 2);
        assert_eq!(engine.next_vx3_uid(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let geom = test_geometry();
        let mut config = VertexConfig::default();
        config.vtx2d.max_pos_err = -1.0;
        assert!(VertexEngine::new(config, &geom).is_err());
    }
}
