//! 2D vertex fitting and position pulls.
//!
//! The fit intersects every pair of trajectory-end directions, plus the
//! intersections obtained by tilting each direction by one angle error,
//! and takes the weighted mean and spread of those crossing points.

use nalgebra::Vector2;
use tracing::trace;

use crate::engine::VertexEngine;
use crate::flags::{AlgMod, EndFlag, VtxStat};
use crate::geom2d::{point_traj_doca, pos_sep2, traj_intersection};
use crate::ids::VtxId;
use crate::slice::Slice;
use crate::trajectory::TrajPoint;
use crate::vertex::{Topo, Vtx3Store, VtxStore};

/// Weight of each of the four one-sigma samples (0.607 / 4).
const SIGMA_SAMPLE_WEIGHT: f64 = 0.152;

/// Smallest fitted position error.
const MIN_POS_ERR: f64 = 0.5;

/// Pull of a trajectory point against a vertex.
///
/// Close to the vertex this is the impact parameter over the combined
/// position error; further away it is the angular offset over the angle
/// error.
pub fn traj_point_vertex_pull(tp: &TrajPoint, vx: &VtxStore) -> f64 {
    let ip = point_traj_doca(vx.pos[0], vx.pos[1], tp);
    let sep2 = pos_sep2(&vx.pos, &tp.pos);

    // vertex error ellipse projected perpendicular to the point direction
    let err_w = vx.pos_err[0] * tp.dir[1];
    let err_t = vx.pos_err[1] * tp.dir[0];
    let vx_err2 = err_w * err_w + err_t * err_t + tp.hit_pos_err2;

    if sep2 < 1.0 {
        return ip / vx_err2.sqrt();
    }
    let dang = ip / sep2.sqrt();
    let ang_err2 = vx_err2 / sep2 + tp.ang_err * tp.ang_err;
    if ang_err2 == 0.0 {
        return 999.0;
    }
    dang / ang_err2.sqrt()
}

/// Position pull between two 2D vertices using their averaged errors.
pub fn vertex_vertex_pull(vx1: &VtxStore, vx2: &VtxStore) -> f64 {
    let dw = vx1.pos[0] - vx2.pos[0];
    let dt = vx1.pos[1] - vx2.pos[1];
    let dw_err2 = (vx1.pos_err[0].powi(2) + vx2.pos_err[0].powi(2)) / 2.0;
    let dt_err2 = (vx1.pos_err[1].powi(2) + vx2.pos_err[1].powi(2)) / 2.0;
    (dw * dw / dw_err2 + dt * dt / dt_err2).sqrt()
}

/// Position pull between two 3D vertices, normalized by the dimension count.
pub fn vertex3_vertex3_pull(vx1: &Vtx3Store, vx2: &Vtx3Store) -> f64 {
    let mut sum = 0.0;
    for i in 0..3 {
        let d = vx1.pos[i] - vx2.pos[i];
        let err2 = (vx1.pos_err[i].powi(2) + vx2.pos_err[i].powi(2)) / 2.0;
        sum += d * d / err2;
    }
    sum.sqrt() / 3.0
}

#[derive(Default)]
struct Moments {
    sum: Vector2<f64>,
    sum2: Vector2<f64>,
    sumw: f64,
    cnt: f64,
}

impl Moments {
    fn add(&mut self, pos: Option<Vector2<f64>>, wgt: f64) {
        // parallel samples carry no position information
        let Some(p) = pos else {
            return;
        };
        self.sum += wgt * p;
        self.sum2 += wgt * p.component_mul(&p);
        self.sumw += wgt;
        self.cnt += 1.0;
    }

    fn mean_and_err(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        if self.sumw == 0.0 {
            return None;
        }
        let mean = self.sum / self.sumw;
        let root_n = self.cnt.sqrt();
        let err = |i: usize| {
            let var = (self.sum2[i] - self.sumw * mean[i] * mean[i]) / self.sumw;
            (var.max(0.0).sqrt() / root_n).max(MIN_POS_ERR)
        };
        Some((mean, Vector2::new(err(0), err(1))))
    }
}

fn tilted(tp: &TrajPoint, nsigma: f64) -> TrajPoint {
    let mut tmp = tp.clone();
    tmp.set_angle(tp.ang + nsigma * tp.ang_err);
    tmp
}

impl VertexEngine<'_> {
    /// Trajectory end points that constrain the vertex position.
    pub(crate) fn vertex_fit_points(&self, slc: &Slice, vx: &VtxStore) -> Vec<TrajPoint> {
        let mut obs = Vec::new();
        for tj in &slc.tjs {
            if !tj.is_live() || tj.ctp != vx.ctp || tj.alg_mod.contains(AlgMod::Photon) {
                continue;
            }
            for end in 0..2 {
                if tj.vtx_id[end] != Some(vx.id) || tj.end_flags[end].contains(EndFlag::NoFitVx) {
                    continue;
                }
                let mut tp = tj.end_tp(end).clone();
                tp.step = tj.id.0 as i32;
                if tp.n_tps_fit < 4 {
                    tp.ang_err *= 4.0;
                }
                obs.push(tp);
            }
        }
        obs
    }

    /// Fits `vx` to the ends of the trajectories linked to it.
    ///
    /// The vertex does not need to be stored yet, but the trajectories must
    /// already carry its id. A fixed vertex is not moved and the fit
    /// trivially succeeds. On failure the vertex is left unchanged.
    pub fn fit_vertex(&self, slc: &Slice, vx: &mut VtxStore) -> bool {
        if vx.is_fixed() {
            return true;
        }
        let obs = self.vertex_fit_points(slc, vx);
        self.fit_vertex_points(vx, &obs)
    }

    /// Refits a stored vertex in place.
    pub fn refit_vertex(&self, slc: &mut Slice, vid: VtxId) -> bool {
        let Some(mut vx) = slc.live_vtx(vid).cloned() else {
            return false;
        };
        if !self.fit_vertex(slc, &mut vx) {
            return false;
        }
        if let Some(stored) = slc.vtx_mut(vid) {
            *stored = vx;
        }
        true
    }

    /// Fits `vx` to an explicit set of trajectory points.
    pub fn fit_vertex_points(&self, vx: &mut VtxStore, obs: &[TrajPoint]) -> bool {
        if obs.len() < 2 {
            return false;
        }
        let mut m = Moments::default();
        for i in 0..obs.len() - 1 {
            for j in i + 1..obs.len() {
                m.add(traj_intersection(&obs[i], &obs[j]), 1.0);
                for nsigma in [1.0, -1.0] {
                    m.add(traj_intersection(&tilted(&obs[i], nsigma), &obs[j]), SIGMA_SAMPLE_WEIGHT);
                    m.add(traj_intersection(&obs[i], &tilted(&obs[j], nsigma)), SIGMA_SAMPLE_WEIGHT);
                }
            }
        }
        let Some((pos, err)) = m.mean_and_err() else {
            return false;
        };

        if vx.topo != Topo::Neutral {
            let inflate = if vx.stat.contains(VtxStat::OnDeadWire) { 1.5 } else { 1.0 };
            let max_err = inflate * self.config.vtx2d.max_pos_err;
            if err[0] > max_err || err[1] > max_err {
                trace!(vertex = %vx.id, err_w = err[0], err_t = err[1], max_err, "vertex fit error too large");
                return false;
            }
        }

        vx.pos = pos;
        vx.pos_err = err;
        vx.n_traj = obs.len();
        vx.chi_dof = obs.iter().map(|tp| traj_point_vertex_pull(tp, vx)).sum::<f64>() / obs.len() as f64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::testing::test_geometry;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use vertexer_env::Ctp;

    fn aimed_at(from: (f64, f64), target: (f64, f64), ang_err: f64) -> TrajPoint {
        let dir = Vector2::new(target.0 - from.0, target.1 - from.1);
        let mut tp = TrajPoint::new(Ctp(2), Vector2::new(from.0, from.1), dir);
        tp.ang_err = ang_err;
        tp.n_tps_fit = 10;
        tp
    }

    #[test]
    fn test_fit_recovers_exact_intersection() {
        let geom = test_geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let obs = vec![
            aimed_at((10.0, 90.0), (20.0, 100.0), 0.0),
            aimed_at((10.0, 115.0), (20.0, 100.0), 0.0),
            aimed_at((30.0, 90.0), (20.0, 100.0), 0.0),
        ];
        let mut vx = VtxStore::candidate(Ctp(2), Vector2::new(0.0, 0.0), Topo::VeeUpstream);
        assert!(engine.fit_vertex_points(&mut vx, &obs));
        assert_relative_eq!(vx.pos[0], 20.0, epsilon = 1e-9);
        assert_relative_eq!(vx.pos[1], 100.0, epsilon = 1e-9);
        assert_relative_eq!(vx.pos_err[0], MIN_POS_ERR);
        assert_relative_eq!(vx.pos_err[1], MIN_POS_ERR);
        assert_eq!(vx.n_traj, 3);
    }

    #[test]
    fn test_failed_fit_leaves_vertex_unchanged() {
        let geom = test_geometry();
        let mut config = VertexConfig::default();
        config.vtx2d.max_pos_err = 0.6;
        let engine = VertexEngine::new(config, &geom).unwrap();
        // nearly parallel lines with large angle errors scatter the crossing far
        let obs = vec![aimed_at((0.0, 0.0), (100.0, 10.0), 0.3), aimed_at((0.0, 5.0), (100.0, 11.0), 0.3)];
        let mut vx = VtxStore::candidate(Ctp(2), Vector2::new(7.0, 8.0), Topo::VeeUpstream);
        assert!(!engine.fit_vertex_points(&mut vx, &obs));
        assert_eq!(vx.pos, Vector2::new(7.0, 8.0));
        assert_eq!(vx.pos_err, Vector2::new(2.0, 2.0));
    }

    #[test]
    fn test_single_observation_does_not_fit() {
        let geom = test_geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut vx = VtxStore::candidate(Ctp(2), Vector2::new(1.0, 1.0), Topo::VeeUpstream);
        assert!(!engine.fit_vertex_points(&mut vx, &[aimed_at((0.0, 0.0), (1.0, 1.0), 0.1)]));
    }

    #[test]
    fn test_vertex_pull_is_symmetric() {
        let a = VtxStore::candidate(Ctp(2), Vector2::new(10.0, 10.0), Topo::VeeUpstream);
        let mut b = VtxStore::candidate(Ctp(2), Vector2::new(13.0, 14.0), Topo::VeeUpstream);
        b.pos_err = Vector2::new(1.0, 1.0);
        assert_relative_eq!(vertex_vertex_pull(&a, &b), vertex_vertex_pull(&b, &a));
        // averaged errors: 2.5 in both coordinates
        assert_relative_eq!(vertex_vertex_pull(&a, &b), (9.0 / 2.5 + 16.0 / 2.5f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_vertex3_pull_divides_by_three() {
        let tpc = vertexer_env::TpcId::new(0, 0);
        let mut a = Vtx3Store::candidate(tpc, 3);
        let mut b = Vtx3Store::candidate(tpc, 3);
        a.pos_err = nalgebra::Vector3::new(1.0, 1.0, 1.0);
        b.pos_err = a.pos_err;
        b.pos = nalgebra::Vector3::new(3.0, 0.0, 0.0);
        assert_relative_eq!(vertex3_vertex3_pull(&a, &b), 1.0);
    }

    proptest! {
        #[test]
        fn test_pull_grows_with_impact_parameter(off in 0.0f64..20.0, extra in 0.01f64..10.0, sep in 0.0f64..50.0) {
            let mut tp = TrajPoint::new(Ctp(2), Vector2::new(0.0, 0.0), Vector2::new(1.0, 0.0));
            tp.ang_err = 0.05;
            let near = VtxStore::candidate(Ctp(2), Vector2::new(sep, off), Topo::VeeUpstream);
            let far = VtxStore::candidate(Ctp(2), Vector2::new(sep, off + extra), Topo::VeeUpstream);
            prop_assert!(traj_point_vertex_pull(&tp, &far) >= traj_point_vertex_pull(&tp, &near) - 1e-12);
        }

        #[test]
        fn test_fit_round_trip(w in 20.0f64..180.0, t in 20.0f64..1000.0, a1 in 0.2f64..1.2, a2 in 1.9f64..2.9) {
            let geom = test_geometry();
            let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
            let from1 = (w - 10.0 * a1.cos(), t - 10.0 * a1.sin());
            let from2 = (w - 10.0 * a2.cos(), t - 10.0 * a2.sin());
            let obs = vec![aimed_at(from1, (w, t), 0.0), aimed_at(from2, (w, t), 0.0)];
            let mut vx = VtxStore::candidate(Ctp(2), Vector2::new(0.0, 0.0), Topo::VeeUpstream);
            prop_assert!(engine.fit_vertex_points(&mut vx, &obs));
            prop_assert!((vx.pos[0] - w).abs() < 1e-6);
            prop_assert!((vx.pos[1] - t).abs() < 1e-6);
        }
    }
}
