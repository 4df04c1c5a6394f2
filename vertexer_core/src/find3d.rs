//! 3D vertex assembly from 2D vertices in different planes.
//!
//! Pairs of 2D vertices that agree in drift position and whose wires cross
//! inside the active volume make incomplete 3D candidates. In a three-plane
//! TPC a matching vertex in the remaining plane completes the candidate.
//! Candidates are accepted greedily by increasing score so that no 2D vertex
//! is shared, and the incomplete survivors are then completed by looking in
//! the missing plane for a dead-wire gap or a trajectory to attach or split.

use nalgebra::{Vector2, Vector3};
use tracing::{debug, trace};

use crate::engine::VertexEngine;
use crate::error::VertexError;
use crate::flags::{AlgMod, VtxStat};
use crate::geom2d::point_traj_doca;
use crate::ids::{TjId, Vtx3Id};
use crate::score::vx3_mean_score;
use crate::slice::{HitRequest, Slice};
use crate::trajectory::TrajPoint;
use crate::vertex::{Topo, Vtx3Store, VtxStore};

/// Half-size of the hit search box around the projected third-plane position.
const THIRD_PLANE_BOX: f64 = 4.0;

/// Pass number given to vertices made while completing 3D vertices.
const COMPLETION_PASS: u16 = 9;

const GAP_MIN_DEAD_WIRES: u32 = 5;
const GAP_MAX_DOCA: f64 = 2.0;
const GAP_MAX_SEP: f64 = 2.0;
const GAP_MIN_CHG_FRAC: f64 = 0.7;

const COMPLETE_MAX_DOCA: f64 = 3.0;
const COMPLETE_MIN_PTS: usize = 6;
const COMPLETE_MIN_CHG_FRAC: f64 = 0.6;
/// Closest points nearer than this to an end attach instead of splitting.
const COMPLETE_END_PTS: usize = 3;

impl VertexEngine<'_> {
    /// Matches 2D vertices across planes, stores the selected 3D vertices,
    /// tries to complete the incomplete ones and rescores everything.
    pub fn find_3d_vertices(&self, slc: &mut Slice) -> Result<(), VertexError> {
        let cuts = &self.config.vtx3d;
        if cuts.max_dx < 0.0 {
            return Ok(());
        }
        let n_planes = slc.n_planes().min(3);
        if n_planes < 2 {
            return Ok(());
        }

        // live, unmatched 2D vertices per plane
        let mut by_plane: Vec<Vec<usize>> = vec![Vec::new(); n_planes];
        for (ivx, vx) in slc.vtxs.iter().enumerate() {
            if !vx.is_live() || vx.vx3_id.is_some_and(|id| slc.live_vtx3(id).is_some()) {
                continue;
            }
            let plane = vx.ctp.plane() as usize;
            if plane < n_planes {
                by_plane[plane].push(ivx);
            }
        }
        if by_plane.iter().filter(|v| !v.is_empty()).count() < 2 {
            return Ok(());
        }

        let vx_x: Vec<Option<f64>> = slc.vtxs.iter().map(|vx| self.vertex_drift_x(slc, vx)).collect();

        let third_dx_cut = 2.0 * cuts.max_dx;
        let mut candidates: Vec<Vtx3Store> = Vec::new();
        let mut max_complete_score: f64 = 0.0;
        for ipl in 0..n_planes - 1 {
            for &ivx in &by_plane[ipl] {
                let Some(ix) = vx_x[ivx] else {
                    continue;
                };
                let i_wire = slc.vtxs[ivx].pos[0].round() as u32;
                for jpl in ipl + 1..n_planes {
                    for &jvx in &by_plane[jpl] {
                        let Some(jx) = vx_x[jvx] else {
                            continue;
                        };
                        let dx = (ix - jx).abs();
                        if dx > cuts.max_dx {
                            continue;
                        }
                        let j_wire = slc.vtxs[jvx].pos[0].round() as u32;
                        let (i_plane, j_plane) = (slc.tpc.plane(ipl as u16), slc.tpc.plane(jpl as u16));
                        let Some((y, z)) = self.geom.intersection_point(i_wire, i_plane, j_wire, j_plane) else {
                            continue;
                        };
                        if !slc.volume.contains_yz(y, z) {
                            continue;
                        }
                        let kx = 0.5 * (ix + jx);

                        let mut cand = Vtx3Store::candidate(slc.tpc, slc.n_planes());
                        cand.vx2_ids[ipl] = Some(slc.vtxs[ivx].id);
                        cand.vx2_ids[jpl] = Some(slc.vtxs[jvx].id);
                        cand.pos = Vector3::new(kx, y, z);
                        cand.pos_err[0] = dx;

                        if n_planes == 2 {
                            let pos_error = dx / cuts.max_dx;
                            cand.score = self.candidate_score(slc, &cand, pos_error);
                            candidates.push(cand);
                            continue;
                        }

                        let kpl = 3 - ipl - jpl;
                        let Some(k_wire) = self.third_plane_wire(slc, kpl, kx, y, z) else {
                            continue;
                        };
                        cand.wire = Some(k_wire);
                        let pos_error = dx / cuts.max_dx;
                        cand.score = self.candidate_score(slc, &cand, pos_error);
                        trace!(i = %slc.vtxs[ivx].id, j = %slc.vtxs[jvx].id, dx, score = cand.score, "two-plane match");
                        candidates.push(cand.clone());

                        let k_plane = slc.tpc.plane(kpl as u16);
                        let pitch = self.geom.wire_pitch(k_plane);
                        for &kvx in &by_plane[kpl] {
                            let Some(kvx_x) = vx_x[kvx] else {
                                continue;
                            };
                            let dx3 = (kvx_x - kx).abs();
                            let dw = pitch * (slc.vtxs[kvx].pos[0] - k_wire as f64).abs();
                            if dx3 > third_dx_cut || dw > cuts.max_dw {
                                continue;
                            }
                            let Some((y2, z2)) = self.geom.intersection_point(i_wire, i_plane, k_wire as u32, k_plane) else {
                                continue;
                            };
                            let mut full = cand.clone();
                            full.vx2_ids[kpl] = Some(slc.vtxs[kvx].id);
                            full.wire = None;
                            full.pos_err[1] = (y2 - y).abs();
                            full.pos_err[2] = (z2 - z).abs();
                            let (ex, ey, ez) = (
                                (kvx_x - kx) / cuts.max_dx,
                                (y2 - y) / cuts.max_dw,
                                (z2 - z) / cuts.max_dw,
                            );
                            full.score = self.candidate_score(slc, &full, ex * ex + ey * ey + ez * ez);
                            max_complete_score = max_complete_score.max(full.score);
                            candidates.push(full);
                        }
                    }
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        // complete matches are ranked ahead of every incomplete one
        let offset = max_complete_score + 1.0;
        for cand in candidates.iter_mut().filter(|c| c.wire.is_some()) {
            cand.score += offset;
        }
        candidates.sort_by(|a, b| a.score.total_cmp(&b.score));

        let mut selected: Vec<Vtx3Store> = Vec::new();
        for cand in candidates {
            let shared = selected.iter().any(|sel| {
                cand.vx2_ids
                    .iter()
                    .zip(&sel.vx2_ids)
                    .any(|(a, b)| a.is_some() && a == b)
            });
            if !shared {
                selected.push(cand);
            }
        }

        let mut n_incomplete = 0;
        for vx3 in selected {
            if n_planes == 3 && vx3.wire.is_some() {
                n_incomplete += 1;
            }
            let v3id = self.store_vertex3(slc, vx3)?;
            if let Some(vx3) = slc.vtx3(v3id) {
                debug!(vertex = %v3id, n_vx2 = vx3.n_vx2(), wire = ?vx3.wire, "new 3D vertex");
            }
        }

        if n_incomplete > 0 {
            self.complete_incomplete_3d_vertices_in_gaps(slc)?;
            self.complete_incomplete_3d_vertices(slc)?;
        }

        self.score_vertices(slc);
        Ok(())
    }

    /// Drift position of a vertex that may take part in 3D matching.
    fn vertex_drift_x(&self, slc: &Slice, vx: &VtxStore) -> Option<f64> {
        if !vx.is_live() || vx.score < self.config.vtx2d.min_score || vx.pos[0] < -0.4 {
            return None;
        }
        let plane = vx.ctp.decode();
        if !self.geom.has_wire(plane, vx.pos[0].round() as i64) {
            return None;
        }
        Some(self.geom.ticks_to_x(vx.pos[1] / slc.units_per_tick, plane))
    }

    /// Wire in plane `kpl` below (x, y, z), if there is signal near it.
    fn third_plane_wire(&self, slc: &Slice, kpl: usize, x: f64, y: f64, z: f64) -> Option<i32> {
        let k_plane = slc.tpc.plane(kpl as u16);
        let wire = (self.geom.wire_coordinate(y, z, k_plane) + 0.5).floor() as i64;
        if !self.geom.has_wire(k_plane, wire) {
            return None;
        }
        let time = self.geom.x_to_ticks(x, k_plane) * slc.units_per_tick;
        let wire_window = [
            wire - THIRD_PLANE_BOX as i64,
            wire + THIRD_PLANE_BOX as i64,
        ];
        let time_window = [time - THIRD_PLANE_BOX, time + THIRD_PLANE_BOX];
        let (_, hits_near) = slc.find_close_hits(slc.ctp(kpl), wire_window, time_window, HitRequest::All);
        if !hits_near && !slc.is_dead_wire(kpl, wire as u32) {
            return None;
        }
        Some(wire as i32)
    }

    /// Ranking score of a candidate; lower is better.
    fn candidate_score(&self, slc: &Slice, cand: &Vtx3Store, mut pos_error: f64) -> f64 {
        let Some(weight) = self.config.vtx3d.score_weight else {
            return pos_error;
        };
        if pos_error < 0.5 {
            pos_error = 0.0;
        }
        pos_error + weight / vx3_mean_score(slc, cand)
    }

    /// Completes 3D vertices whose missing plane projects into a block of
    /// dead wires, using the trajectory ends that stop at the gap edges.
    pub fn complete_incomplete_3d_vertices_in_gaps(&self, slc: &mut Slice) -> Result<(), VertexError> {
        if !self.config.algs.comp_3d_vx_ig || slc.n_planes() != 3 {
            return Ok(());
        }
        for iv3 in 0..slc.vtx3s.len() {
            let (v3id, wire, m_plane, x) = {
                let vx3 = &slc.vtx3s[iv3];
                let (Some(wire), Some(m_plane)) = (vx3.wire, vx3.missing_plane()) else {
                    continue;
                };
                if !vx3.is_live() {
                    continue;
                }
                (vx3.id, wire, m_plane, vx3.pos[0])
            };
            let m_ctp = slc.ctp(m_plane);
            let w = wire as f64;
            if slc.dead_wire_count(w - 4.0, w + 4.0, m_ctp) < GAP_MIN_DEAD_WIRES {
                continue;
            }
            let m_plane_id = slc.tpc.plane(m_plane as u16);
            let pos = Vector2::new(w, self.geom.x_to_ticks(x, m_plane_id) * slc.units_per_tick);

            let mut ends: Vec<(TjId, usize)> = Vec::new();
            for tj in slc.tjs.iter().filter(|tj| tj.ctp == m_ctp && tj.is_live()) {
                for end in 0..2 {
                    let tp = tj.end_tp(end);
                    let otp = tj.end_tp(1 - end);
                    if (tp.pos[0] - pos[0]).abs() > (otp.pos[0] - pos[0]).abs() {
                        continue;
                    }
                    if point_traj_doca(pos[0], pos[1], tp) > GAP_MAX_DOCA {
                        continue;
                    }
                    let dead = slc.dead_wire_count(pos[0], tp.pos[0], m_ctp) as f64;
                    let sep = (pos[0] - tp.pos[0]).abs() - dead;
                    if !(-GAP_MAX_SEP..=GAP_MAX_SEP).contains(&sep) {
                        continue;
                    }
                    if tj.vtx_id[end].is_some() {
                        continue;
                    }
                    ends.push((tj.id, end));
                }
            }
            if ends.is_empty() {
                continue;
            }
            let tj_ids: Vec<TjId> = ends.iter().map(|&(tid, _)| tid).collect();
            let chg_frac = slc.chg_frac_near_pos(&pos, m_ctp, &tj_ids);
            if chg_frac < GAP_MIN_CHG_FRAC {
                continue;
            }

            let mut vx = VtxStore::candidate(m_ctp, pos, Topo::Complete3dInGap);
            vx.id = slc.next_vtx_id();
            vx.pass = COMPLETION_PASS;
            vx.tj_chg_frac = chg_frac;
            vx.vx3_id = Some(v3id);
            for &(tid, end) in &ends {
                if let Some(tj) = slc.tj_mut(tid) {
                    tj.vtx_id[end] = Some(vx.id);
                    tj.alg_mod.insert(AlgMod::Comp3DVxIG);
                }
            }
            let vid = self.store_vertex(slc, vx)?;
            self.set_vx2_score(slc, vid);
            if let Some(vx3) = slc.vtx3_mut(v3id) {
                vx3.vx2_ids[m_plane] = Some(vid);
                vx3.wire = None;
            }
            debug!(vertex = %vid, vx3 = %v3id, n_traj = ends.len(), "completed 3D vertex in dead-wire gap");
        }
        Ok(())
    }

    /// Completes 3D vertices by attaching or splitting trajectories that pass
    /// the projected position in the missing plane.
    pub fn complete_incomplete_3d_vertices(&self, slc: &mut Slice) -> Result<(), VertexError> {
        if !self.config.algs.comp_3d_vx || slc.n_planes() != 3 {
            return Ok(());
        }
        for iv3 in 0..slc.vtx3s.len() {
            let (v3id, wire, m_plane, x) = {
                let vx3 = &slc.vtx3s[iv3];
                if !vx3.is_live() {
                    continue;
                }
                let Some(wire) = vx3.wire else {
                    continue;
                };
                let Some(m_plane) = vx3.vx2_ids.iter().rposition(|id| id.is_none()) else {
                    continue;
                };
                // induction-plane vertices made without a charge check are too loose
                let loose = vx3
                    .vx2_ids
                    .iter()
                    .flatten()
                    .filter_map(|vid| slc.live_vtx(*vid))
                    .any(|vx2| vx2.stat.contains(VtxStat::IndPlnNoChg));
                if loose {
                    continue;
                }
                (vx3.id, wire, m_plane, vx3.pos[0])
            };
            self.complete_in_plane(slc, v3id, wire, m_plane, x)?;
        }
        Ok(())
    }

    fn complete_in_plane(&self, slc: &mut Slice, v3id: Vtx3Id, wire: i32, m_plane: usize, x: f64) -> Result<(), VertexError> {
        let m_ctp = slc.ctp(m_plane);
        let m_plane_id = slc.tpc.plane(m_plane as u16);
        let pos = Vector2::new(wire as f64, self.geom.x_to_ticks(x, m_plane_id) * slc.units_per_tick);
        let vtp = TrajPoint::new(m_ctp, pos, Vector2::new(1.0, 0.0));

        let mut close: Vec<(TjId, usize)> = Vec::new();
        for tj in slc.tjs.iter().filter(|tj| tj.ctp == m_ctp && tj.is_live()) {
            if tj.pts.len() < COMPLETE_MIN_PTS || tj.alg_mod.contains(AlgMod::Comp3DVx) {
                continue;
            }
            if let Some((close_pt, _)) = tj.closest_to_point(&vtp, COMPLETE_MAX_DOCA) {
                close.push((tj.id, close_pt));
            }
        }
        if close.is_empty() {
            return Ok(());
        }

        // a vertex made from short trajectories must not chop up a long one
        let (vx3_tjs, _) = slc.vtx3_tj_ids(v3id);
        let max_pts = 3 * vx3_tjs
            .iter()
            .filter_map(|tid| slc.tj(*tid))
            .map(|tj| slc.num_pts_with_charge(tj, false))
            .max()
            .unwrap_or(0);
        let too_long = close
            .iter()
            .filter_map(|(tid, _)| slc.tj(*tid))
            .any(|tj| slc.num_pts_with_charge(tj, false) > max_pts);
        if too_long {
            trace!(vx3 = %v3id, max_pts, "completion skipped: trajectory too long");
            return Ok(());
        }

        let tj_ids: Vec<TjId> = close.iter().map(|&(tid, _)| tid).collect();
        let chg_frac = slc.chg_frac_near_pos(&pos, m_ctp, &tj_ids);
        if chg_frac < COMPLETE_MIN_CHG_FRAC {
            return Ok(());
        }

        let mut vx = VtxStore::candidate(m_ctp, pos, Topo::Complete3d);
        vx.id = slc.next_vtx_id();
        vx.pass = COMPLETION_PASS;
        vx.tj_chg_frac = chg_frac;
        let vid = self.store_vertex(slc, vx)?;

        let mut vpos = pos;
        let mut n_traj = 0;
        for &(tid, close_pt) in &close {
            let Some(tj) = slc.tj(tid) else {
                continue;
            };
            let d0 = close_pt.abs_diff(tj.end_pt[0]);
            let d1 = close_pt.abs_diff(tj.end_pt[1]);
            let end = if d0 < d1 { 0 } else { 1 };
            let dpt = d0.min(d1);
            if dpt < COMPLETE_END_PTS {
                if let Some(old) = tj.vtx_id[end] {
                    let old_sep = slc
                        .vtx(old)
                        .map_or(0.0, |ovx| (ovx.pos[0] - tj.end_tp(end).pos[0]).abs().trunc());
                    if (dpt as f64) < old_sep {
                        self.make_vertex_obsolete(slc, old, true);
                    } else {
                        continue;
                    }
                }
                if let Some(tj) = slc.tj_mut(tid) {
                    tj.vtx_id[end] = Some(vid);
                    tj.alg_mod.insert(AlgMod::Comp3DVx);
                    vpos = tj.end_tp(end).pos;
                }
                n_traj += 1;
            } else {
                match self.split_traj(slc, tid, close_pt, Some(vid)) {
                    Ok(new_id) => {
                        n_traj += 2;
                        for id in [tid, new_id] {
                            if let Some(tj) = slc.tj_mut(id) {
                                tj.alg_mod.insert(AlgMod::Comp3DVx);
                            }
                        }
                    }
                    Err(err) => {
                        debug!(tj = %tid, error = %err, "completion split failed");
                        n_traj = 0;
                        break;
                    }
                }
            }
        }

        if n_traj == 0 {
            self.make_vertex_obsolete(slc, vid, true);
            return Ok(());
        }
        if let Some(vx) = slc.vtx_mut(vid) {
            vx.vx3_id = Some(v3id);
        }
        if let Some(vx3) = slc.vtx3_mut(v3id) {
            vx3.vx2_ids[m_plane] = Some(vid);
            vx3.wire = None;
        }
        if n_traj == 1 {
            self.fix_vertex_at(slc, vid, vpos);
        }
        slc.sync_vertex_tj_counts();
        self.attach_any_traj_to_vertex(slc, vid);
        self.set_vx2_score(slc, vid);
        debug!(vertex = %vid, vx3 = %v3id, n_traj, "completed 3D vertex");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::ids::VtxId;
    use crate::testing::{line_tj, stored_vertex, TestEvent};
    use approx::assert_relative_eq;

    /// (wire, tick) of the 3D point x = 6, y = 0, z = 30 in each test plane.
    const U: (f64, f64) = (137.0, 20.0);
    const V: (f64, f64) = (137.0, 20.0);
    const Y: (f64, f64) = (100.0, 20.0);

    /// Adds two trajectories starting at `at` and returns them for linking.
    fn add_vee(ev: &mut TestEvent, plane: u16, at: (f64, f64)) -> [TjId; 2] {
        let a = ev.add_tj(line_tj(plane, at, (at.0 + 10.0, at.1 + 10.0), 100.0));
        let b = ev.add_tj(line_tj(plane, (at.0 + 1.0, at.1 - 1.0), (at.0 + 11.0, at.1 - 11.0), 100.0));
        [a, b]
    }

    fn add_vertex(engine: &VertexEngine<'_>, slc: &mut Slice, plane: u16, at: (f64, f64), tjs: [TjId; 2]) -> VtxId {
        stored_vertex(engine, slc, plane, at, &[(tjs[0], 0), (tjs[1], 0)])
    }

    fn assert_back_links(slc: &Slice) {
        for vx3 in slc.vtx3s.iter().filter(|v| v.is_live()) {
            for vid in vx3.vx2_ids.iter().flatten() {
                assert_eq!(slc.vtx(*vid).unwrap().vx3_id, Some(vx3.id));
            }
        }
        assert!(slc.association_violations().is_empty(), "{:?}", slc.association_violations());
    }

    #[test]
    fn test_three_plane_match() {
        let mut ev = TestEvent::new();
        let u = add_vee(&mut ev, 0, U);
        let v = add_vee(&mut ev, 1, V);
        let y = add_vee(&mut ev, 2, Y);
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        add_vertex(&engine, &mut slc, 0, U, u);
        add_vertex(&engine, &mut slc, 1, V, v);
        add_vertex(&engine, &mut slc, 2, Y, y);

        engine.find_3d_vertices(&mut slc).unwrap();
        assert_eq!(slc.vtx3s.len(), 1);
        let vx3 = &slc.vtx3s[0];
        assert_eq!(vx3.n_vx2(), 3);
        assert!(vx3.wire.is_none());
        assert_relative_eq!(vx3.pos[0], 6.0, epsilon = 1e-6);
        assert_relative_eq!(vx3.pos[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(vx3.pos[2], 30.0, epsilon = 1e-6);
        assert_back_links(&slc);
    }

    #[test]
    fn test_drift_mismatch_makes_no_match() {
        let mut ev = TestEvent::new();
        let u = add_vee(&mut ev, 0, U);
        let y = add_vee(&mut ev, 2, (100.0, 40.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        add_vertex(&engine, &mut slc, 0, U, u);
        add_vertex(&engine, &mut slc, 2, (100.0, 40.0), y);

        engine.find_3d_vertices(&mut slc).unwrap();
        assert!(slc.vtx3s.is_empty());
    }

    #[test]
    fn test_completion_splits_passing_trajectory() {
        let mut ev = TestEvent::new();
        let u = add_vee(&mut ev, 0, U);
        let v = add_vee(&mut ev, 1, V);
        let long = ev.add_tj(line_tj(2, (90.0, 20.0), (115.0, 20.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        add_vertex(&engine, &mut slc, 0, U, u);
        add_vertex(&engine, &mut slc, 1, V, v);
        let n_tjs = slc.tjs.len();

        engine.find_3d_vertices(&mut slc).unwrap();
        assert_eq!(slc.vtx3s.len(), 1);
        let vx3 = &slc.vtx3s[0];
        assert_eq!(vx3.n_vx2(), 3);
        let vid = vx3.vx2_ids[2].unwrap();
        let vx = slc.vtx(vid).unwrap();
        assert_eq!(vx.topo, Topo::Complete3d);
        assert_eq!(vx.pass, COMPLETION_PASS);
        assert_eq!(slc.tjs.len(), n_tjs + 1);
        assert_eq!(slc.count_vtx_tjs(vid), 2);
        assert_eq!(slc.tj(long).unwrap().vtx_id[1], Some(vid));
        assert!(slc.tj(long).unwrap().alg_mod.contains(AlgMod::Comp3DVx));
        assert_back_links(&slc);
    }

    #[test]
    fn test_completion_in_dead_gap() {
        let mut ev = TestEvent::new().with_dead_wires(2, 96..106);
        let u = add_vee(&mut ev, 0, U);
        let v = add_vee(&mut ev, 1, V);
        let before = ev.add_tj(line_tj(2, (85.0, 20.0), (95.0, 20.0), 100.0));
        let after = ev.add_tj(line_tj(2, (106.0, 20.0), (116.0, 20.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        add_vertex(&engine, &mut slc, 0, U, u);
        add_vertex(&engine, &mut slc, 1, V, v);

        engine.find_3d_vertices(&mut slc).unwrap();
        assert_eq!(slc.vtx3s.len(), 1);
        let vid = slc.vtx3s[0].vx2_ids[2].unwrap();
        let vx = slc.vtx(vid).unwrap();
        assert_eq!(vx.topo, Topo::Complete3dInGap);
        assert_relative_eq!(vx.pos[0], 100.0);
        assert_eq!(slc.tj(before).unwrap().vtx_id[1], Some(vid));
        assert_eq!(slc.tj(after).unwrap().vtx_id[0], Some(vid));
        assert!(slc.tj(before).unwrap().alg_mod.contains(AlgMod::Comp3DVxIG));
        assert_back_links(&slc);
    }

    #[test]
    fn test_disabled_by_negative_dx_cut() {
        let mut ev = TestEvent::new();
        let u = add_vee(&mut ev, 0, U);
        let y = add_vee(&mut ev, 2, Y);
        let mut config = VertexConfig::default();
        config.vtx3d.max_dx = -1.0;
        let geom = ev.geometry();
        let engine = VertexEngine::new(config, &geom).unwrap();
        let mut slc = ev.build();
        add_vertex(&engine, &mut slc, 0, U, u);
        add_vertex(&engine, &mut slc, 2, Y, y);
        engine.find_3d_vertices(&mut slc).unwrap();
        assert!(slc.vtx3s.is_empty());
    }
}
