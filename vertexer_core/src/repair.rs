//! Topology repair around 2D vertices.
//!
//! These routines patch the trajectory/vertex graph where plain pairwise
//! vertexing goes wrong: irregular trajectories with unreliable directions,
//! trajectories that run straight through a vertex, and trajectory ends
//! that belong to a neighbour rather than to the vertex they were given.

use tracing::debug;
use vertexer_env::Ctp;

use crate::engine::VertexEngine;
use crate::error::VertexError;
use crate::flags::{AlgMod, VtxStat};
use crate::geom2d::{delta_angle, point_traj_doca, pos_sep};
use crate::ids::{TjId, VtxId};
use crate::slice::Slice;
use crate::vertex::{Topo, VtxStore};

/// Largest end-to-trajectory separation for a junk vertex.
const JUNK_MAX_SEP: f64 = 4.0;

/// Shortest trajectory that can anchor a junk vertex.
const JUNK_MIN_LEN: f64 = 10.0;

const JUNK_MIN_MCS_MOM: f64 = 100.0;

/// Largest trajectory-vertex DOCA for splitting a crossing trajectory.
const CROSSING_DOCA_CUT: f64 = 4.0;

impl VertexEngine<'_> {
    /// Makes proximity vertices at the loose ends of long trajectories.
    ///
    /// Any trajectory with an end within 4 units of the loose end and a
    /// signal between them is linked to the new vertex, which is fixed at
    /// the end point.
    pub fn make_junk_vertices(&self, slc: &mut Slice, ctp: Ctp) -> Result<(), VertexError> {
        if self.config.vtx2d.max_short_tj_len <= 0.0 || !self.config.algs.junk_vx || slc.tjs.len() < 2 {
            return Ok(());
        }
        for it1 in 0..slc.tjs.len() - 1 {
            {
                let tj1 = &slc.tjs[it1];
                if !tj1.is_live() || tj1.is_shower_like() || tj1.ctp != ctp || tj1.alg_mod.contains(AlgMod::Junk) {
                    continue;
                }
                if tj1.length() < JUNK_MIN_LEN || tj1.mcs_mom < JUNK_MIN_MCS_MOM {
                    continue;
                }
            }
            for end1 in 0..2 {
                let tj1 = &slc.tjs[it1];
                if tj1.vtx_id[end1].is_some() {
                    continue;
                }
                let t1 = tj1.id;
                let tp1 = tj1.end_tp(end1).clone();
                let mut links: Vec<(TjId, usize)> = Vec::new();
                for t2 in slc.find_close_tjs(&tp1, &tp1, JUNK_MAX_SEP) {
                    let Some(tj2) = slc.tj(t2) else {
                        continue;
                    };
                    if t2 == t1 || !tj2.is_live() || tj2.ctp != ctp || tj2.is_shower_like() {
                        continue;
                    }
                    let mut close = JUNK_MAX_SEP;
                    let mut close_end = None;
                    for end2 in 0..2 {
                        let sep = pos_sep(&tp1.pos, &tj2.end_tp(end2).pos);
                        if sep < close {
                            close = sep;
                            close_end = Some(end2);
                        }
                    }
                    let Some(end2) = close_end else {
                        continue;
                    };
                    if tj2.vtx_id[end2].is_some() {
                        continue;
                    }
                    if !slc.signal_between_tps(&tp1, tj2.end_tp(end2), 0.8) {
                        continue;
                    }
                    links.push((t2, end2));
                }
                if links.is_empty() {
                    continue;
                }

                let mut vx = VtxStore::candidate(ctp, tp1.pos, Topo::Junk);
                vx.id = slc.next_vtx_id();
                vx.stat.insert(VtxStat::Junk);
                vx.stat.insert(VtxStat::Fixed);
                vx.score = self.config.fixed_score();
                slc.tjs[it1].vtx_id[end1] = Some(vx.id);
                for &(t2, end2) in &links {
                    if let Some(tj2) = slc.tj_mut(t2) {
                        tj2.vtx_id[end2] = Some(vx.id);
                    }
                }
                let vid = self.store_vertex(slc, vx)?;
                debug!(vertex = %vid, tj = %t1, end1, n_close = links.len(), "new junk vertex");
            }
        }
        Ok(())
    }

    /// Checks the trajectories at each vertex of a plane after vertexing.
    ///
    /// A vertex far from every one of its trajectory ends is moved onto the
    /// nearest end. A trajectory whose vertex end sits next to the far end of
    /// another trajectory at the same vertex is detached and merged with it.
    /// End-to-end vertices joining a delta ray are replaced by a merge.
    pub fn chk_vx_tjs(&self, slc: &mut Slice, ctp: Ctp) {
        if !self.config.algs.chk_vx_tj {
            return;
        }
        for vid in slc.live_vtx_ids() {
            let Some(vx) = slc.live_vtx(vid) else {
                continue;
            };
            if vx.ctp != ctp || vx.stat.contains(VtxStat::OnDeadWire) {
                continue;
            }
            let (vx_pos, topo) = (vx.pos, vx.topo);
            let mut vx_tjs = slc.vtx_tj_ids(vid);
            vx_tjs.dedup();
            if vx_tjs.len() < 2 {
                continue;
            }

            let mut close = 200.0;
            let mut close_pos = None;
            for &tid in &vx_tjs {
                let Some(tj) = slc.tj(tid) else {
                    continue;
                };
                let near_end = tj.close_end(&vx_pos);
                if tj.vtx_id[near_end] != Some(vid) {
                    continue;
                }
                let sep = pos_sep(&tj.end_tp(near_end).pos, &vx_pos);
                if sep > close {
                    continue;
                }
                close = sep;
                close_pos = Some(tj.end_tp(near_end).pos);
            }
            if let Some(pos) = close_pos.filter(|_| close > 1.5) {
                debug!(vertex = %vid, w = pos[0], t = pos[1], "moved vertex onto the closest trajectory end");
                self.fix_vertex_at(slc, vid, pos);
            }

            for i1 in 0..vx_tjs.len() - 1 {
                for i2 in i1 + 1..vx_tjs.len() {
                    let (t1, t2) = (vx_tjs[i1], vx_tjs[i2]);
                    self.chk_far_end_merge(slc, vid, t1, t2);
                }
            }

            // delta rays split off a track by an end-to-end vertex
            if topo == Topo::EndMerge && vx_tjs.len() == 2 {
                let (t1, t2) = (vx_tjs[0], vx_tjs[1]);
                let (Some(tj1), Some(tj2)) = (slc.tj(t1), slc.tj(t2)) else {
                    continue;
                };
                if tj1.is_killed() || tj2.is_killed() {
                    continue;
                }
                if tj1.alg_mod.contains(AlgMod::DeltaRay) || tj2.alg_mod.contains(AlgMod::DeltaRay) {
                    self.make_vertex_obsolete(slc, vid, true);
                    if let Err(err) = self.merge_and_store(slc, t1, t2) {
                        debug!(vertex = %vid, error = %err, "delta ray merge failed");
                    }
                }
            }
        }
        slc.sync_vertex_tj_counts();
    }

    /// Merges `t1` and `t2` if the vertex end of one sits next to the far end of the other.
    fn chk_far_end_merge(&self, slc: &mut Slice, vid: VtxId, t1: TjId, t2: TjId) {
        let Some(vx_pos) = slc.live_vtx(vid).map(|vx| vx.pos) else {
            return;
        };
        let (Some(tj1), Some(tj2)) = (slc.tj(t1), slc.tj(t2)) else {
            return;
        };
        if !tj1.is_live() || !tj2.is_live() {
            return;
        }
        let (Some(end1), Some(end2)) = (tj1.end_at_vertex(vid), tj2.end_at_vertex(vid)) else {
            return;
        };
        let vtp1 = tj1.end_tp(end1);
        let otp1 = tj1.end_tp(1 - end1);
        let vtp2 = tj2.end_tp(end2);
        let otp2 = tj2.end_tp(1 - end2);
        let tj1_sep = pos_sep(&vtp1.pos, &vx_pos);
        let tj2_sep = pos_sep(&vtp2.pos, &vx_pos);
        let delta12 = point_traj_doca(otp1.pos[0], otp1.pos[1], vtp2);

        let otj1_tj2 = pos_sep(&otp1.pos, &vtp2.pos);
        let tj1_otj2 = pos_sep(&vtp1.pos, &otp2.pos);
        // (detached trajectory, its end, merge order)
        let (detach, detach_end, first, second) = if otj1_tj2 < tj2_sep && delta12 < 1.0 && otj1_tj2 < 4.0 {
            (t2, end2, t1, t2)
        } else if tj1_otj2 < tj1_sep && delta12 < 1.0 && tj1_otj2 < 4.0 {
            (t1, end1, t2, t1)
        } else {
            return;
        };

        if let Some(tj) = slc.tj_mut(detach) {
            tj.vtx_id[detach_end] = None;
        }
        if self.compatible_merge(slc, first, second) {
            match self.merge_and_store(slc, first, second) {
                Ok(new_id) => {
                    if let Some(tj) = slc.tj_mut(new_id) {
                        tj.alg_mod.insert(AlgMod::ChkVxTj);
                    }
                    debug!(vertex = %vid, t1 = %first, t2 = %second, merged = %new_id, "merged trajectory off vertex");
                    return;
                }
                Err(err) => debug!(vertex = %vid, error = %err, "far end merge failed"),
            }
        }
        if let Some(tj) = slc.tj_mut(detach) {
            tj.vtx_id[detach_end] = Some(vid);
        }
    }

    /// Splits trajectories that pass through an existing vertex.
    ///
    /// A trajectory that would be split by a vertex made from much shorter
    /// trajectories, or that is nearly collinear with every trajectory at
    /// the vertex, is left alone; if it passes within 1 unit of such a
    /// vertex the vertex is destroyed instead.
    pub fn split_traj_crossing_vertices(&self, slc: &mut Slice, ctp: Ctp) {
        if !self.config.algs.split_tj_cvx || slc.vtxs.is_empty() || slc.tjs.is_empty() {
            return;
        }
        let n_tjs = slc.tjs.len();
        for itj in 0..n_tjs {
            let tid = TjId::from_index(itj);
            for iv in 0..slc.vtxs.len() {
                let tj = &slc.tjs[itj];
                if tj.ctp != ctp || !tj.is_live() || tj.alg_mod.contains(AlgMod::SplitTjCVx) || tj.end_pt[1] < 6 {
                    break;
                }
                let vx = &slc.vtxs[iv];
                if !vx.is_live() || vx.n_traj == 0 || vx.ctp != ctp || tj.is_attached_to(vx.id) {
                    continue;
                }
                if vx.score < self.config.vtx2d.min_score {
                    continue;
                }
                let vid = vx.id;
                let on_dead = vx.stat.contains(VtxStat::OnDeadWire);
                let vx_pos = vx.pos;

                // in a dead wire gap, take the first point outside it
                let search = if on_dead { 100.0 } else { CROSSING_DOCA_CUT };
                let Some((mut close_pt, mut doca)) = tj.closest_approach(vx_pos[0], vx_pos[1], search) else {
                    continue;
                };
                if on_dead {
                    doca = point_traj_doca(vx_pos[0], vx_pos[1], &tj.pts[close_pt]);
                }
                if doca > CROSSING_DOCA_CUT {
                    continue;
                }

                let vx_tjs = slc.vtx_tj_ids(vid);
                if vx_tjs.is_empty() {
                    continue;
                }
                let tj_ang = tj.pts[close_pt].ang;
                let mut max_pts = 0;
                let mut max_dang: f64 = 0.0;
                for &vt in &vx_tjs {
                    let Some(vtj) = slc.tj(vt) else {
                        continue;
                    };
                    if vtj.alg_mod.contains(AlgMod::DeltaRay) {
                        continue;
                    }
                    max_pts = max_pts.max(vtj.num_pts_with_charge());
                    let end = vtj.end_at_vertex(vid).unwrap_or(0);
                    max_dang = max_dang.max(delta_angle(vtj.end_tp(end).ang, tj_ang));
                }
                max_pts *= 3;
                let skip = (tj.num_pts_with_charge() > max_pts && max_pts < 100) || max_dang < self.config.kink_angle_cut;
                if skip {
                    if doca < 1.0 {
                        debug!(vertex = %vid, tj = %tid, doca, "killing vertex on a trajectory it cannot split");
                        self.make_vertex_obsolete(slc, vid, true);
                    }
                    continue;
                }

                let [end_pt0, end_pt1] = tj.end_pt;
                if on_dead {
                    // split at the gap edge facing the vertex
                    let close_w = tj.pts[close_pt].pos[0];
                    if tj.step_dir > 0 && close_pt > end_pt0 && close_w > vx_pos[0] {
                        close_pt -= 1;
                    } else if tj.step_dir < 0 && close_pt < end_pt1 && close_w < vx_pos[0] {
                        close_pt += 1;
                    }
                } else {
                    // step towards the vertex when it lies between close_pt and an end
                    let to_close = tj.pts[close_pt].pos - vx_pos;
                    let to_end1 = tj.pts[end_pt1].pos - vx_pos;
                    let to_end0 = tj.pts[end_pt0].pos - vx_pos;
                    if to_close.dot(&to_end1) < 0.0 && close_pt + 1 < end_pt1 {
                        close_pt += 1;
                    } else if to_close.dot(&to_end0) < 0.0 && close_pt > end_pt0 + 1 {
                        close_pt -= 1;
                    }
                }
                if close_pt < end_pt0 + 3 || close_pt + 3 > end_pt1 {
                    continue;
                }

                match self.split_traj(slc, tid, close_pt, Some(vid)) {
                    Ok(new_id) => {
                        for id in [tid, new_id] {
                            if let Some(tj) = slc.tj_mut(id) {
                                tj.alg_mod.insert(AlgMod::SplitTjCVx);
                            }
                        }
                        self.refit_vertex(slc, vid);
                        debug!(vertex = %vid, tj = %tid, new = %new_id, close_pt, "split trajectory crossing vertex");
                    }
                    Err(err) => debug!(vertex = %vid, tj = %tid, error = %err, "crossing split failed"),
                }
            }
        }
    }

    /// Moves end points between the two trajectories at a kink vertex.
    ///
    /// Only vertices with one trajectory starting and one ending there are
    /// considered. A single end point moves when its charge matches the
    /// other trajectory better; a run of points moves when their hits lie on
    /// the other trajectory's line.
    pub fn vtx_hits_swap(&self, slc: &mut Slice, ctp: Ctp) {
        if !self.config.algs.vtx_hits_swap {
            return;
        }
        for vid in slc.live_vtx_ids() {
            let Some(vx) = slc.live_vtx(vid) else {
                continue;
            };
            if vx.ctp != ctp || slc.count_vtx_tjs(vid) != 2 {
                continue;
            }
            let mut at_end: [Option<usize>; 2] = [None, None];
            for (itj, tj) in slc.tjs.iter().enumerate() {
                if !tj.is_live() || tj.ctp != ctp {
                    continue;
                }
                for end in 0..2 {
                    if tj.vtx_id[end] == Some(vid) {
                        at_end[end] = Some(itj);
                    }
                }
            }
            let [Some(a), Some(b)] = at_end else {
                continue;
            };
            if a == b || slc.tjs[a].end_pt[1] < 5 || slc.tjs[b].end_pt[1] < 5 {
                continue;
            }
            for i in 0..2 {
                let (i0, i1) = if i == 0 { (a, b) } else { (b, a) };
                if let Some(moved) = self.swap_candidates(slc, i0, i1, i) {
                    move_points(slc, i0, i1, &moved, i == 0);
                    debug!(vertex = %vid, from = %slc.tjs[i0].id, to = %slc.tjs[i1].id, n_pts = moved.len(), "swapped vertex hits");
                    break;
                }
            }
        }
    }

    /// Points at the vertex end of `tjs[i0]` that belong on `tjs[i1]`.
    fn swap_candidates(&self, slc: &Slice, i0: usize, i1: usize, i: usize) -> Option<Vec<usize>> {
        let tj0 = &slc.tjs[i0];
        let tj1 = &slc.tjs[i1];
        let end_pt0 = tj0.end_pt[i];
        let stop = tj0.end_pt[1 - i];
        let next = |j: usize| if i == 0 { j + 1 } else { j - 1 };
        let tp1 = &tj1.pts[tj1.end_pt[1 - i]];

        let chg0 = slc.tp_sum_hit_chg(&tj0.pts[end_pt0]);
        let (mut chg1, mut w1) = (0.0, 0.0);
        let mut j = end_pt0;
        while j != stop {
            j = next(j);
            if tj0.pts[j].chg > 0.0 {
                chg1 = slc.tp_sum_hit_chg(&tj0.pts[j]);
                w1 = tj0.pts[j].pos[0];
                break;
            }
        }
        let chg2 = slc.tp_sum_hit_chg(tp1);
        let w2 = tp1.pos[0];
        let hit_doca = |ipt: usize| {
            tj0.pts[ipt]
                .used_hits()
                .map(|iht| {
                    let pos = slc.hit_pos(iht);
                    point_traj_doca(pos[0], pos[1], tp1)
                })
                .fold(1000.0, f64::min)
        };

        // the end point charge looks like the other trajectory
        if chg0 > 0.0
            && ((chg0 - chg1) / chg0).abs() - ((chg0 - chg2) / chg0).abs() > 0.2
            && hit_doca(end_pt0) < 1.5
            && (w2 - w1).abs() < 1.5
        {
            return Some(vec![end_pt0]);
        }

        // a run of points whose hits sit on the other trajectory
        let mut run = Vec::new();
        let mut j = end_pt0;
        while j != stop {
            if tj0.pts[j].chg > 0.0 {
                if hit_doca(j) < 0.3 && tj0.pts[j].delta > 1.0 && (j == end_pt0 || !run.is_empty()) {
                    run.push(j);
                } else {
                    break;
                }
            }
            j = next(j);
        }
        (run.len() > 1).then_some(run)
    }
}

/// Moves points from `tjs[from]` onto the vertex end of `tjs[to]`.
///
/// With `append` the points go after the last point of the receiving
/// trajectory, otherwise before its first.
fn move_points(slc: &mut Slice, from: usize, to: usize, pts: &[usize], append: bool) {
    let to_id = slc.tjs[to].id;
    let moved: Vec<_> = pts.iter().map(|&ipt| slc.tjs[from].pts[ipt].clone()).collect();
    for tp in &moved {
        for iht in tp.used_hits() {
            slc.hits[iht].in_traj = Some(to_id);
        }
    }
    let receiver = &mut slc.tjs[to];
    for tp in moved {
        if append {
            receiver.pts.push(tp);
        } else {
            receiver.pts.insert(0, tp);
        }
    }
    receiver.set_end_points();
    receiver.alg_mod.insert(AlgMod::VtxHitsSwap);

    let donor = &mut slc.tjs[from];
    for &ipt in pts {
        donor.pts[ipt].unset_hits();
    }
    donor.set_end_points();
    donor.alg_mod.insert(AlgMod::VtxHitsSwap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::testing::{line_tj, stored_vertex, tj_from_points, TestEvent};
    use nalgebra::Vector2;

    #[test]
    fn test_junk_vertex_at_loose_end() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (30.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (31.0, 101.0), (36.0, 106.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let ctp = slc.ctp(2);

        engine.make_junk_vertices(&mut slc, ctp).unwrap();
        assert_eq!(slc.vtxs.len(), 1);
        let vx = &slc.vtxs[0];
        assert_eq!(vx.topo, Topo::Junk);
        assert!(vx.stat.contains(VtxStat::Junk) && vx.is_fixed());
        assert_eq!(vx.pos, Vector2::new(30.0, 100.0));
        assert_eq!(vx.n_traj, 2);
        assert_eq!(slc.tj(t1).unwrap().vtx_id[1], Some(vx.id));
        assert_eq!(slc.tj(t2).unwrap().vtx_id[0], Some(vx.id));
        assert!(vx.score > engine.config().kill_threshold() - 0.05);
    }

    #[test]
    fn test_far_end_merge_replaces_bad_link() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (20.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (21.0, 100.0), (30.0, 100.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        // t2 starts next to the far end of t1, not at the vertex
        let vid = stored_vertex(&engine, &mut slc, 2, (10.0, 100.0), &[(t1, 0), (t2, 0)]);
        let ctp = slc.ctp(2);

        engine.chk_vx_tjs(&mut slc, ctp);
        assert!(slc.tj(t1).unwrap().is_killed());
        assert!(slc.tj(t2).unwrap().is_killed());
        let merged = slc.tjs.last().unwrap();
        assert!(merged.alg_mod.contains(AlgMod::ChkVxTj));
        assert_eq!(merged.vtx_id, [Some(vid), None]);
        assert_eq!(merged.num_pts_with_charge(), 21);
        assert_eq!(slc.vtx(vid).unwrap().n_traj, 1);
        assert!(slc.association_violations().is_empty());
    }

    #[test]
    fn test_delta_ray_end_merge_is_undone() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (19.0, 100.0), 100.0));
        let mut delta = line_tj(2, (20.0, 100.0), (30.0, 100.0), 100.0);
        delta.alg_mod.insert(AlgMod::DeltaRay);
        let t2 = ev.add_tj(delta);
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (19.5, 100.0), &[(t1, 1), (t2, 0)]);
        slc.vtx_mut(vid).unwrap().topo = Topo::EndMerge;
        let ctp = slc.ctp(2);

        engine.chk_vx_tjs(&mut slc, ctp);
        assert!(!slc.vtx(vid).unwrap().is_live());
        assert_eq!(slc.tjs.len(), 3);
        let killed: Vec<bool> = slc.tjs.iter().map(|tj| tj.is_killed()).collect();
        assert_eq!(killed, vec![true, true, false]);
        assert_eq!(slc.tjs[2].vtx_id, [None, None]);
        assert!(slc.association_violations().is_empty());
    }

    #[test]
    fn test_vertex_moved_onto_nearest_end() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 90.0), (19.0, 99.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (10.0, 110.0), (19.0, 101.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (22.0, 99.5), &[(t1, 1), (t2, 1)]);
        let ctp = slc.ctp(2);

        engine.chk_vx_tjs(&mut slc, ctp);
        let vx = slc.vtx(vid).unwrap();
        assert!(vx.is_fixed());
        assert_eq!(vx.pos, Vector2::new(19.0, 99.0));
        assert_eq!(vx.n_traj, 2);
    }

    #[test]
    fn test_split_trajectory_through_vertex() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 90.0), (19.0, 99.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (10.0, 110.0), (19.0, 101.0), 100.0));
        let t3 = ev.add_tj(line_tj(2, (10.0, 100.0), (35.0, 100.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 1), (t2, 1)]);
        let ctp = slc.ctp(2);

        engine.split_traj_crossing_vertices(&mut slc, ctp);
        assert_eq!(slc.tjs.len(), 4);
        let first = slc.tj(t3).unwrap();
        assert_eq!(first.end_pt[1], 10);
        assert_eq!(first.vtx_id[1], Some(vid));
        assert!(first.alg_mod.contains(AlgMod::SplitTjCVx));
        let second = slc.tjs.last().unwrap();
        assert_eq!(second.vtx_id[0], Some(vid));
        assert!((second.end_tp(0).pos[0] - 21.0).abs() < 1e-9);
        assert!(second.alg_mod.contains(AlgMod::SplitTjCVx));
        assert_eq!(slc.vtx(vid).unwrap().n_traj, 4);
        assert!(slc.association_violations().is_empty());

        // nothing is split twice
        engine.split_traj_crossing_vertices(&mut slc, ctp);
        assert_eq!(slc.tjs.len(), 4);
    }

    #[test]
    fn test_swap_end_hit_to_matching_charge() {
        let mut ev = TestEvent::new();
        let incoming = ev.add_tj(line_tj(2, (10.0, 100.0), (20.0, 100.0), 200.0));
        let mut outgoing = tj_from_points(
            2,
            &[(20.0, 101.0), (21.0, 104.0), (22.0, 107.0), (23.0, 110.0), (24.0, 113.0), (25.0, 116.0), (26.0, 119.0)],
            100.0,
        );
        outgoing.pts[0].chg = 200.0;
        let outgoing = ev.add_tj(outgoing);
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        stored_vertex(&engine, &mut slc, 2, (20.0, 100.5), &[(outgoing, 0), (incoming, 1)]);
        let moved_hit = slc.tj(outgoing).unwrap().pts[0].hits[0];
        let ctp = slc.ctp(2);

        engine.vtx_hits_swap(&mut slc, ctp);
        let inc = slc.tj(incoming).unwrap();
        assert_eq!(inc.pts.len(), 12);
        assert_eq!(inc.end_tp(1).pos, Vector2::new(20.0, 101.0));
        assert!(inc.alg_mod.contains(AlgMod::VtxHitsSwap));
        let out = slc.tj(outgoing).unwrap();
        assert_eq!(out.end_pt[0], 1);
        assert!(out.alg_mod.contains(AlgMod::VtxHitsSwap));
        assert_eq!(slc.hits[moved_hit].in_traj, Some(incoming));
    }
}
