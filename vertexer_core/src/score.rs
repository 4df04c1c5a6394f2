//! Vertex scoring and pruning.

use tracing::debug;

use crate::engine::VertexEngine;
use crate::flags::{AlgMod, EndFlag, VtxStat};
use crate::geom2d::delta_angle;
use crate::ids::{TjId, Vtx3Id, VtxId};
use crate::slice::Slice;
use crate::trajectory::PDG_MUON;
use crate::vertex::Vtx3Store;

/// Trajectories with a normalized charge RMS below this get a bonus weight.
const MAX_CHG_RMS: f64 = 0.25;
const MOM_BIN: f64 = 50.0;

/// Rounds of high-score propagation through attached trajectories.
const MAX_HIGH_SCORE_ROUNDS: usize = 100;

/// Plane-averaged score of the 2D vertices of `vx3`, which need not be stored.
pub(crate) fn vx3_mean_score(slc: &Slice, vx3: &Vtx3Store) -> f64 {
    let sum: f64 = vx3
        .vx2_ids
        .iter()
        .flatten()
        .filter_map(|vid| slc.live_vtx(*vid))
        .map(|vx2| vx2.score)
        .sum();
    (sum / slc.n_planes() as f64).max(0.001)
}

impl VertexEngine<'_> {
    /// Scores a 2D vertex from its position error, 3D match, charge fraction
    /// and the angular separation of its trajectory pairs.
    pub fn set_vx2_score(&self, slc: &mut Slice, vid: VtxId) {
        let Some(vx) = slc.live_vtx(vid) else {
            return;
        };
        let tj_ids = slc.vtx_tj_ids(vid);
        let chg_frac = slc.chg_frac_near_pos(&vx.pos, vx.ctp, &tj_ids);
        let w = self.config.score_weights;

        let weights = self.tj_weights(slc, &tj_ids);

        let score = if vx.topo.has_fixed_score() {
            self.config.fixed_score()
        } else if weights.is_empty() {
            -1000.0
        } else {
            let vpe_score = -w[0] * (vx.pos_err[0] + vx.pos_err[1]);
            let m3d_cnt = match vx.vx3_id.and_then(|id| slc.live_vtx3(id)) {
                Some(vx3) if vx3.wire.is_none() => 2.0,
                Some(_) => 1.0,
                None => 0.0,
            };
            let tj_score = self.tj_pair_score(slc, vid, &weights).map_or(0.0, |sum| w[3] * sum);
            vpe_score + w[1] * m3d_cnt + w[2] * chg_frac + tj_score
        };
        if let Some(vx) = slc.vtx_mut(vid) {
            vx.score = score;
            vx.tj_chg_frac = chg_frac;
        }
    }

    fn tj_weights(&self, slc: &Slice, tj_ids: &[TjId]) -> Vec<(TjId, f64)> {
        let mut n_muon = 0;
        let mut out = Vec::new();
        for &tid in tj_ids {
            let Some(tj) = slc.tj(tid) else {
                continue;
            };
            if tj.alg_mod.contains(AlgMod::Junk) || tj.n_pts_span() < 3 {
                continue;
            }
            let mut wght = tj.mcs_mom / MOM_BIN;
            if tj.pdg_code == PDG_MUON {
                n_muon += 1;
                if n_muon == 1 {
                    wght *= 2.0;
                }
            }
            if tj.chg_rms < MAX_CHG_RMS {
                wght += 1.0;
            }
            if tj.alg_mod.contains(AlgMod::ShowerTj) {
                wght += 1.0;
            }
            if tj.alg_mod.contains(AlgMod::ShowerLike) {
                wght -= 1.0;
            }
            out.push((tid, wght));
        }
        out
    }

    /// Mean summed weight of well separated trajectory pairs, if there are any.
    fn tj_pair_score(&self, slc: &Slice, vid: VtxId, weights: &[(TjId, f64)]) -> Option<f64> {
        // angle, angle error^2 and Bragg-boosted weight at the vertex end
        let ends: Vec<(f64, f64, f64)> = weights
            .iter()
            .filter_map(|&(tid, wght)| {
                let tj = slc.tj(tid)?;
                let end = tj.end_at_vertex(vid)?;
                let tp = tj.end_tp(end);
                let bragg = if tj.end_flags[1 - end].contains(EndFlag::Bragg) { 1.0 } else { 0.0 };
                Some((tp.ang, tp.ang_err * tp.ang_err, wght + bragg))
            })
            .collect();
        let mut sum = 0.0;
        let mut cnt = 0.0;
        for (i, a) in ends.iter().enumerate() {
            for b in &ends[i + 1..] {
                let dang = delta_angle(a.0, b.0);
                let dang_err = 0.5 * (a.1 + b.1).sqrt();
                if dang_err > 0.0 && dang / dang_err > 3.0 && a.2 > 0.0 && b.2 > 0.0 {
                    sum += a.2 + b.2;
                    cnt += 1.0;
                }
            }
        }
        (cnt > 0.0).then(|| sum / cnt)
    }

    /// Scores a 3D vertex as the plane-averaged score of its 2D vertices.
    pub fn set_vx3_score(&self, slc: &mut Slice, v3id: Vtx3Id) {
        let Some(vx3) = slc.live_vtx3(v3id) else {
            return;
        };
        let score = vx3_mean_score(slc, vx3);
        if let Some(vx3) = slc.vtx3_mut(v3id) {
            vx3.score = score;
        }
        if score > self.config.vtx2d.min_score {
            self.set_high_score_bits(slc, v3id);
        }
    }

    /// Tags every trajectory and 2D vertex connected to a high-score 3D vertex.
    pub fn set_high_score_bits(&self, slc: &mut Slice, v3id: Vtx3Id) {
        let Some(vx3) = slc.live_vtx3(v3id) else {
            return;
        };
        let vx2_ids: Vec<VtxId> = vx3.vx2_ids.iter().flatten().copied().collect();
        for vid in vx2_ids {
            let mut tj_list = slc.vtx_tj_ids(vid);
            for _ in 0..MAX_HIGH_SCORE_ROUNDS {
                let mut vx_list = Vec::new();
                for &tid in &tj_list {
                    let Some(tj) = slc.tj_mut(tid) else {
                        continue;
                    };
                    tj.alg_mod.insert(AlgMod::TjHiVx3Score);
                    let ends = tj.vtx_id;
                    for ovid in ends.into_iter().flatten() {
                        let Some(vx2) = slc.vtx_mut(ovid) else {
                            continue;
                        };
                        if vx2.obsolete || vx2.stat.contains(VtxStat::HiVx3Score) {
                            continue;
                        }
                        vx2.stat.insert(VtxStat::HiVx3Score);
                        vx_list.push(ovid);
                    }
                }
                if vx_list.is_empty() {
                    break;
                }
                let mut next = Vec::new();
                for ovid in vx_list {
                    for tid in slc.vtx_tj_ids(ovid) {
                        if !tj_list.contains(&tid) && !next.contains(&tid) {
                            next.push(tid);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                tj_list = next;
            }
        }
    }

    /// Rescores every vertex after clearing the high-score tags.
    pub fn score_vertices(&self, slc: &mut Slice) {
        slc.sync_vertex_tj_counts();
        for vx in slc.vtxs.iter_mut().filter(|v| v.is_live()) {
            vx.stat.remove(VtxStat::HiVx3Score);
        }
        for tj in slc.tjs.iter_mut().filter(|tj| tj.is_live()) {
            tj.alg_mod.remove(AlgMod::TjHiVx3Score);
        }
        for vid in slc.live_vtx_ids() {
            self.set_vx2_score(slc, vid);
        }
        let v3ids: Vec<Vtx3Id> = slc.vtx3s.iter().filter(|v| v.is_live()).map(|v| v.id).collect();
        for v3id in v3ids {
            self.set_vx3_score(slc, v3id);
        }
    }

    /// Removes 2D vertices scoring at or below the kill threshold unless a
    /// primary or well-scored 3D vertex owns them.
    pub fn kill_poor_vertices(&self, slc: &mut Slice) {
        let threshold = self.config.kill_threshold();
        for vid in slc.live_vtx_ids() {
            let Some(vx) = slc.live_vtx(vid) else {
                continue;
            };
            if vx.score > threshold {
                continue;
            }
            if let Some(vx3) = vx.vx3_id.and_then(|id| slc.live_vtx3(id)) {
                if vx3.primary || vx3.score >= self.config.vtx2d.min_score {
                    continue;
                }
            }
            debug!(vertex = %vid, score = vx.score, threshold, "killing poor vertex");
            self.make_vertex_obsolete(slc, vid, false);
        }
        slc.sync_vertex_tj_counts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::testing::{line_tj, stored_vertex, TestEvent};
    use crate::vertex::{Topo, Vtx3Store};
    use approx::assert_relative_eq;

    fn vee_event() -> (TestEvent, TjId, TjId) {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (20.0, 100.0), (40.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (20.0, 100.0), (40.0, 120.0), 100.0));
        (ev, t1, t2)
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let (ev, t1, t2) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 0), (t2, 0)]);
        engine.score_vertices(&mut slc);
        let first: Vec<f64> = slc.vtxs.iter().map(|v| v.score).collect();
        let flags: Vec<_> = slc.tjs.iter().map(|t| t.alg_mod).collect();
        engine.score_vertices(&mut slc);
        let second: Vec<f64> = slc.vtxs.iter().map(|v| v.score).collect();
        assert_eq!(first, second);
        assert_eq!(flags, slc.tjs.iter().map(|t| t.alg_mod).collect::<Vec<_>>());
    }

    #[test]
    fn test_well_separated_pair_scores_higher_than_lone_tj() {
        let (ev, t1, t2) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let v_pair = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 0), (t2, 0)]);
        let v_lone = stored_vertex(&engine, &mut slc, 2, (40.0, 120.0), &[(t2, 1)]);
        engine.score_vertices(&mut slc);
        assert!(slc.vtx(v_pair).unwrap().score > slc.vtx(v_lone).unwrap().score);
        assert!(slc.vtx(v_pair).unwrap().tj_chg_frac > 0.9);
    }

    #[test]
    fn test_fixed_topology_score() {
        let (ev, t1, t2) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 0), (t2, 0)]);
        slc.vtx_mut(vid).unwrap().topo = Topo::Junk;
        engine.set_vx2_score(&mut slc, vid);
        assert_relative_eq!(slc.vtx(vid).unwrap().score, engine.config().fixed_score());
    }

    #[test]
    fn test_kill_boundary_is_inclusive() {
        let (ev, t1, t2) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let at = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 0), (t2, 0)]);
        let above = stored_vertex(&engine, &mut slc, 2, (40.0, 120.0), &[(t2, 1)]);
        let threshold = engine.config().kill_threshold();
        slc.vtx_mut(at).unwrap().score = threshold;
        slc.vtx_mut(above).unwrap().score = threshold + 0.01;
        engine.kill_poor_vertices(&mut slc);
        assert!(slc.vtx(at).unwrap().obsolete);
        assert!(slc.vtx(above).unwrap().is_live());
        assert_eq!(slc.tj(t1).unwrap().vtx_id[0], None);
        assert!(slc.association_violations().is_empty());
    }

    #[test]
    fn test_primary_3d_vertex_protects_poor_2d_vertex() {
        let (ev, t1, t2) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 0), (t2, 0)]);
        let mut vx3 = Vtx3Store::candidate(slc.tpc, 3);
        vx3.vx2_ids[2] = Some(vid);
        vx3.primary = true;
        vx3.score = -5.0;
        engine.store_vertex3(&mut slc, vx3).unwrap();
        slc.vtx_mut(vid).unwrap().score = -10.0;
        engine.kill_poor_vertices(&mut slc);
        assert!(slc.vtx(vid).unwrap().is_live());
    }

    #[test]
    fn test_high_score_bits_propagate_through_chain() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (20.0, 100.0), (40.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (40.0, 100.0), (60.0, 130.0), 100.0));
        let t3 = ev.add_tj(line_tj(2, (60.0, 130.0), (80.0, 130.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let v1 = stored_vertex(&engine, &mut slc, 2, (40.0, 100.0), &[(t1, 1), (t2, 0)]);
        let v2 = stored_vertex(&engine, &mut slc, 2, (60.0, 130.0), &[(t2, 1), (t3, 0)]);
        let mut vx3 = Vtx3Store::candidate(slc.tpc, 3);
        vx3.vx2_ids[2] = Some(v1);
        let v3id = engine.store_vertex3(&mut slc, vx3).unwrap();
        engine.set_high_score_bits(&mut slc, v3id);
        assert!(slc.vtx(v2).unwrap().stat.contains(VtxStat::HiVx3Score));
        for tid in [t1, t2, t3] {
            assert!(slc.tj(tid).unwrap().alg_mod.contains(AlgMod::TjHiVx3Score));
        }
    }
}
