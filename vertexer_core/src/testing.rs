//! Builders for small hand-made events used by the unit tests.
//!
//! The test detector has one tick per wire pitch, so 2D positions can be
//! written directly as (wire, tick).

use std::ops::Range;

use nalgebra::Vector2;
use vertexer_env::{ActiveVolume, DetectorGeometry, GeometryConfig, PlaneConfig, TpcId, UniformGeometry};

use crate::engine::VertexEngine;
use crate::ids::{TjId, VtxId};
use crate::slice::{Slice, SliceHit};
use crate::trajectory::{TrajPoint, Trajectory};
use crate::vertex::{Topo, VtxStore};

pub(crate) fn test_geometry_config() -> GeometryConfig {
    GeometryConfig {
        tpc: TpcId::new(0, 0),
        volume: ActiveVolume {
            x_lo: 0.0,
            x_hi: 300.0,
            y_lo: -30.0,
            y_hi: 30.0,
            z_lo: 0.0,
            z_hi: 60.0,
        },
        planes: vec![
            PlaneConfig { wire_angle_deg: 60.0, pitch: 0.3, tick_offset: 0.0 },
            PlaneConfig { wire_angle_deg: -60.0, pitch: 0.3, tick_offset: 0.0 },
            PlaneConfig { wire_angle_deg: 0.0, pitch: 0.3, tick_offset: 0.0 },
        ],
        n_ticks: 2000,
        tick_period_us: 0.5,
        drift_velocity: 0.6,
        trigger_offset: 0.0,
        dead_wires: Vec::new(),
    }
}

pub(crate) fn test_geometry() -> UniformGeometry {
    UniformGeometry::new(test_geometry_config()).unwrap()
}

/// A straight trajectory with one point per wire from `from` to `to`.
pub(crate) fn line_tj(plane: u16, from: (f64, f64), to: (f64, f64), chg: f64) -> Trajectory {
    let n = (to.0 - from.0).abs().round() as usize + 1;
    let dir = Vector2::new(to.0 - from.0, to.1 - from.1);
    let pts: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let f = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            (from.0 + f * (to.0 - from.0), from.1 + f * (to.1 - from.1))
        })
        .collect();
    let ctp = TpcId::new(0, 0).plane(plane).ctp();
    let tps = pts
        .iter()
        .enumerate()
        .map(|(i, &(w, t))| {
            let mut tp = TrajPoint::new(ctp, Vector2::new(w, t), dir);
            tp.chg = chg;
            tp.n_tps_fit = 10;
            tp.step = i as i32;
            tp
        })
        .collect();
    finish(Trajectory::new(ctp, tps))
}

/// A trajectory through explicit points, with directions from the neighbours.
pub(crate) fn tj_from_points(plane: u16, pts: &[(f64, f64)], chg: f64) -> Trajectory {
    let ctp = TpcId::new(0, 0).plane(plane).ctp();
    let tps = (0..pts.len())
        .map(|i| {
            let prev = pts[i.saturating_sub(1)];
            let next = pts[(i + 1).min(pts.len() - 1)];
            let dir = Vector2::new(next.0 - prev.0, next.1 - prev.1);
            let mut tp = TrajPoint::new(ctp, Vector2::new(pts[i].0, pts[i].1), dir);
            tp.chg = chg;
            tp.n_tps_fit = 10;
            tp.step = i as i32;
            tp
        })
        .collect();
    finish(Trajectory::new(ctp, tps))
}

fn finish(mut tj: Trajectory) -> Trajectory {
    tj.update_chg_properties();
    tj.mcs_mom = tj.mcs_mom_full();
    tj
}

/// Links the given trajectory ends to a new vertex at `pos` and stores it.
pub(crate) fn stored_vertex(
    engine: &VertexEngine<'_>,
    slc: &mut Slice,
    plane: u16,
    pos: (f64, f64),
    links: &[(TjId, usize)],
) -> VtxId {
    let mut vx = VtxStore::candidate(slc.ctp(plane as usize), Vector2::new(pos.0, pos.1), Topo::VeeUpstream);
    vx.id = slc.next_vtx_id();
    for &(tid, end) in links {
        slc.tj_mut(tid).unwrap().vtx_id[end] = Some(vx.id);
    }
    engine.store_vertex(slc, vx).unwrap()
}

/// An event assembled from trajectories; hits are made from their points.
#[derive(Default)]
pub(crate) struct TestEvent {
    dead_wires: Vec<(u16, u32)>,
    tjs: Vec<Trajectory>,
    free_hits: Vec<SliceHit>,
}

impl TestEvent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_dead_wires(mut self, plane: u16, wires: Range<u32>) -> Self {
        self.dead_wires.extend(wires.map(|w| (plane, w)));
        self
    }

    /// Queues a trajectory; the returned id is valid in the built slice.
    pub(crate) fn add_tj(&mut self, tj: Trajectory) -> TjId {
        self.tjs.push(tj);
        TjId::from_index(self.tjs.len() - 1)
    }

    /// A hit that no trajectory uses.
    pub(crate) fn add_free_hit(&mut self, plane: u16, wire: u32, tick: f64, chg: f64) {
        self.free_hits.push(SliceHit::new(plane, wire, tick, 1.0, chg));
    }

    pub(crate) fn geometry(&self) -> UniformGeometry {
        let mut config = test_geometry_config();
        config.dead_wires = self.dead_wires.clone();
        UniformGeometry::new(config).unwrap()
    }

    pub(crate) fn build(&self) -> Slice {
        let geom = self.geometry();
        let tpc = TpcId::new(0, 0);
        let upt = geom.units_per_tick();

        let mut tjs = self.tjs.clone();
        let mut hits = self.free_hits.clone();
        let mut on_dead = vec![false; tjs.len()];
        for (itj, tj) in tjs.iter_mut().enumerate() {
            let plane = tj.ctp.plane();
            for tp in tj.pts.iter_mut() {
                let wire = tp.pos[0].round() as u32;
                if tp.chg > 0.0 && geom.is_dead_wire(tpc.plane(plane), wire) {
                    tp.chg = 0.0;
                    on_dead[itj] = true;
                }
                if tp.chg > 0.0 {
                    hits.push(SliceHit::new(plane, wire, tp.pos[1] / upt, 1.0, tp.chg));
                }
            }
        }

        let mut slc = Slice::new(&geom, tpc, hits).unwrap();
        let mut claimed = vec![false; slc.hits.len()];
        for (mut tj, dead) in tjs.into_iter().zip(on_dead) {
            let plane = tj.ctp.plane() as usize;
            for tp in tj.pts.iter_mut().filter(|tp| tp.chg > 0.0) {
                let wire = tp.pos[0].round() as u32;
                let tick = tp.pos[1] / upt;
                let found = slc
                    .hits_on_wire(plane, wire)
                    .and_then(|mut range| range.find(|&i| !claimed[i] && (slc.hits[i].peak_tick - tick).abs() < 1e-6))
                    .unwrap();
                claimed[found] = true;
                tp.hits = vec![found];
                tp.use_hit = vec![true];
            }
            if dead {
                tj.set_end_points();
                tj.update_chg_properties();
            }
            slc.store_trajectory(tj);
        }
        slc
    }
}
