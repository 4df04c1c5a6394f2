//! 2D vertex finding from pairs of trajectory ends.
//!
//! With forward stepping, end 0 is at low wire. A vertex upstream of both
//! trajectory starts (`<`) is topology 0 and one downstream of both ends
//! (`>`) is topology 2; end-to-end merge points are handled elsewhere.

use nalgebra::Vector2;
use tracing::{debug, trace, warn};
use vertexer_env::{Ctp, EnvError};

use crate::engine::{VertexEngine, LAST_PASS};
use crate::error::VertexError;
use crate::flags::VtxStat;
use crate::geom2d::{move_tp_to_wire, pos_sep, pos_sep2, traj_intersection, traj_traj_doca};
use crate::ids::{sort_decreasing, SortEntry, TjId, VtxId};
use crate::slice::Slice;
use crate::trajectory::{TrajPoint, Trajectory, PDG_NEUTRAL};
use crate::vertex::{Topo, VtxStore};

/// Crude wire and time separation beyond which a pair is not considered.
const PAIR_PRE_CUT: f64 = 100.0;

/// A vertex found between two trajectory ends, before fitting.
struct PairVertex {
    end2: usize,
    pos: Vector2<f64>,
    fixed: bool,
    on_dead_wire: bool,
}

/// The point used to represent a trajectory end, moved onto the end wire.
///
/// When few points were fitted at the end, a point three steps inside is
/// used instead since the end direction is likely biased.
pub(crate) fn vertex_end_tp(tj: &Trajectory, end: usize) -> TrajPoint {
    let end_pt = tj.end_pt[end];
    let wire = tj.pts[end_pt].pos[0];
    let mut ipt = end_pt;
    if tj.pts.len() > 6 && tj.pts[end_pt].n_tps_fit < 4 {
        if end == 0 && ipt + 3 < tj.pts.len() {
            ipt += 3;
        } else if end == 1 && ipt >= 3 {
            ipt -= 3;
        }
        if tj.pts[ipt].chg == 0.0 {
            ipt = tj.nearest_pt_with_chg(ipt);
        }
    }
    let mut tp = tj.pts[ipt].clone();
    move_tp_to_wire(&mut tp, wire);
    tp
}

/// True if a trajectory can take part in 2D vertex finding.
fn usable(tj: &Trajectory, ctp: Ctp) -> bool {
    tj.is_live() && !tj.is_shower_like() && tj.ctp == ctp
}

impl VertexEngine<'_> {
    /// Finds 2D vertices between pairs of trajectory ends in one plane.
    ///
    /// Pass 0 applies the short-trajectory separation cut to every pair.
    /// On [`LAST_PASS`] the hammer finders run after the scan.
    pub fn find_2d_vertices(&self, slc: &mut Slice, plane: usize, pass: u16) -> Result<(), VertexError> {
        if plane >= slc.n_planes() {
            return Err(EnvError::InvalidPlane(slc.tpc.plane(plane as u16)).into());
        }
        if !self.config.vertexing_2d_enabled() || slc.tjs.len() < 2 {
            return Ok(());
        }
        let ctp = slc.ctp(plane);
        let first_pass = pass == 0;
        let require_chg = self.config.vtx2d.require_ind_plane_chg || plane + 1 == slc.n_planes();
        let max_short = self.config.vtx2d.max_short_tj_len;

        for it1 in 0..slc.tjs.len() - 1 {
            if !usable(&slc.tjs[it1], ctp) {
                continue;
            }
            let tj1_short = slc.tjs[it1].length() < max_short;
            for end1 in 0..2 {
                {
                    let tj1 = &slc.tjs[it1];
                    if tj1.vtx_id[end1].is_some() {
                        continue;
                    }
                    if tj1.pdg_code == PDG_NEUTRAL && end1 != 0 {
                        continue;
                    }
                }
                for it2 in it1 + 1..slc.tjs.len() {
                    if slc.tjs[it1].vtx_id[end1].is_some() {
                        break;
                    }
                    if !usable(&slc.tjs[it2], ctp) {
                        continue;
                    }
                    let tj1 = &slc.tjs[it1];
                    let tj2 = &slc.tjs[it2];
                    let short = tj1_short || tj2.length() < max_short;
                    let Some(pv) = self.pair_vertex(slc, tj1, end1, tj2, short, first_pass, require_chg) else {
                        continue;
                    };
                    let (t1, t2, pass1) = (tj1.id, tj2.id, tj1.pass);

                    let vid = slc.next_vtx_id();
                    let topo = if end1 == 0 { Topo::VeeUpstream } else { Topo::VeeDownstream };
                    let mut vx = VtxStore::candidate(ctp, pv.pos, topo);
                    vx.id = vid;
                    vx.pass = pass1;
                    vx.stat.set(VtxStat::OnDeadWire, pv.on_dead_wire);
                    vx.stat.set(VtxStat::Fixed, pv.fixed);
                    vx.stat.set(VtxStat::IndPlnNoChg, !require_chg);
                    slc.tjs[it1].vtx_id[end1] = Some(vid);
                    slc.tjs[it2].vtx_id[pv.end2] = Some(vid);
                    if !self.fit_vertex(slc, &mut vx) {
                        slc.tjs[it1].vtx_id[end1] = None;
                        slc.tjs[it2].vtx_id[pv.end2] = None;
                        continue;
                    }
                    if let Some(ovid) = self.is_close_to_vertex(slc, &vx) {
                        if self.merge_with_vertex(slc, &vx, ovid) {
                            debug!(t1 = %t1, t2 = %t2, vertex = %ovid, "candidate merged into close vertex");
                            continue;
                        }
                    }
                    if let Err(err) = self.store_vertex(slc, vx) {
                        warn!(vertex = %vid, t1 = %t1, t2 = %t2, error = %err, "2D vertex not stored");
                        slc.unlink_vertex(vid);
                        continue;
                    }
                    debug!(vertex = %vid, t1 = %t1, end1, t2 = %t2, end2 = pv.end2, pass, "new 2D vertex");
                    self.attach_any_traj_to_vertex(slc, vid);
                    self.set_vx2_score(slc, vid);
                }
            }
        }

        self.chk_vx_tjs(slc, ctp);
        if pass == LAST_PASS {
            self.find_hammer_vertices(slc, ctp)?;
            self.find_hammer_vertices2(slc, ctp)?;
        }
        slc.sync_vertex_tj_counts();
        Ok(())
    }

    /// Applies the pair cuts and returns the vertex position if they pass.
    #[allow(clippy::too_many_arguments)]
    fn pair_vertex(
        &self,
        slc: &Slice,
        tj1: &Trajectory,
        end1: usize,
        tj2: &Trajectory,
        short: bool,
        first_pass: bool,
        require_chg: bool,
    ) -> Option<PairVertex> {
        let cuts = &self.config.vtx2d;
        if tj1.mcs_mom < cuts.min_mcs_mom && tj2.mcs_mom < cuts.min_mcs_mom {
            return None;
        }
        let tp1 = vertex_end_tp(tj1, end1);
        let end2 = tj2.close_end(&tp1.pos);
        if tj2.vtx_id[end2].is_some() {
            return None;
        }
        if tj2.pdg_code == PDG_NEUTRAL && end2 != 0 {
            return None;
        }
        // the other ends already share a vertex
        if tj1.vtx_id[1 - end1].is_some() && tj1.vtx_id[1 - end1] == tj2.vtx_id[1 - end2] {
            return None;
        }
        let otp1 = tj1.end_tp(1 - end1);
        let otp2 = tj2.end_tp(1 - end2);
        if pos_sep2(&otp1.pos, &otp2.pos) < pos_sep2(&tp1.pos, &tj2.end_tp(end2).pos) {
            return None;
        }
        let tp2 = vertex_end_tp(tj2, end2);
        if (tp1.pos[0] - tp2.pos[0]).abs() > PAIR_PRE_CUT || (tp1.pos[1] - tp2.pos[1]).abs() > PAIR_PRE_CUT {
            return None;
        }

        let mut pos = traj_intersection(&tp1, &tp2)?;
        let info = slc.plane_info(tj1.ctp)?;
        if pos[0] < 0.0 || pos[0] > info.max_pos0 - 3.0 || pos[1] < 0.0 || pos[1] > info.max_pos1 {
            return None;
        }

        let sep_cut = if short || first_pass { cuts.short_tj_sep } else { cuts.long_tj_sep };
        let vt1_sep = pos_sep(&pos, &tp1.pos) - slc.dead_wire_count(pos[0], tp1.pos[0], tj1.ctp) as f64;
        let vt2_sep = pos_sep(&pos, &tp2.pos) - slc.dead_wire_count(pos[0], tp2.pos[0], tj1.ctp) as f64;
        let plane = tj1.ctp.plane() as usize;
        let on_dead_wire = pos[0] >= 0.0 && slc.is_dead_wire(plane, pos[0].round() as u32);
        trace!(t1 = %tj1.id, end1, t2 = %tj2.id, end2, w = pos[0], t = pos[1], vt1_sep, vt2_sep, sep_cut, "2D vertex candidate");
        if vt1_sep > sep_cut || vt2_sep > sep_cut {
            return None;
        }
        if pos_sep(&pos, &otp1.pos) < vt1_sep || pos_sep(&pos, &otp2.pos) < vt2_sep {
            return None;
        }

        // the vertex must sit near the end of each trajectory
        let end_pt1 = tj1.end_pt[end1];
        let end_pt2 = tj2.end_pt[end2];
        for (tj, end_pt) in [(tj1, end_pt1), (tj2, end_pt2)] {
            let (close_pt, _) = tj.closest_approach(pos[0], pos[1], sep_cut)?;
            let dpt = self.step_dir() * (close_pt as i64 - end_pt as i64);
            if dpt < -1 {
                return None;
            }
            let max_dpt = if tj.end_pt[1] > 4 { 3 } else { 2 };
            if dpt > max_dpt {
                return None;
            }
        }

        let mut fixed = false;
        if require_chg {
            let mut signal = true;
            for tp in [&tp1, &tp2] {
                let dpt = (pos[0] - tp.pos[0]).abs().trunc();
                if dpt > 2.0 && !slc.signal_between(tp, pos[0], cuts.min_signal_frac) {
                    signal = false;
                }
            }
            if !signal {
                // the end directions may be off while the trajectories meet near their ends
                let (ipt1, ipt2, _) = traj_traj_doca(tj1, tj2, 3.0)?;
                if ipt1.abs_diff(end_pt1) >= 4 || ipt2.abs_diff(end_pt2) >= 4 {
                    return None;
                }
                pos = if pos_sep2(&tp1.pos, &pos) < pos_sep2(&tp2.pos, &pos) { tp1.pos } else { tp2.pos };
                fixed = true;
            }
        }
        Some(PairVertex { end2, pos, fixed, on_dead_wire })
    }

    /// Folds an unstored candidate into the stored vertex `ovid`.
    ///
    /// The trajectories of the candidate must already carry its id. With
    /// more than two trajectories the merged vertex is refit from the two
    /// longest, adding the others one at a time and dropping any that spoil
    /// the fit. Returns false, with the links unchanged, if nothing could
    /// be merged.
    pub fn merge_with_vertex(&self, slc: &mut Slice, vx: &VtxStore, ovid: VtxId) -> bool {
        if !self.config.algs.vx_merge {
            return false;
        }
        let Some(ovx) = slc.live_vtx(ovid).cloned() else {
            return false;
        };
        if vx.ctp != ovx.ctp || vx.id == ovid {
            return false;
        }
        let linked = |vid: VtxId| -> Vec<TjId> {
            slc.tjs
                .iter()
                .filter(|tj| tj.is_live() && tj.ctp == vx.ctp && tj.is_attached_to(vid))
                .map(|tj| tj.id)
                .collect()
        };
        let mut tj_list = linked(vx.id);
        let o_list = linked(ovid);
        if tj_list.is_empty() || o_list.is_empty() {
            return false;
        }
        for tid in o_list {
            if !tj_list.contains(&tid) {
                tj_list.push(tid);
            }
        }
        if tj_list.len() < 2 {
            return false;
        }

        if tj_list.len() == 2 {
            let mut moved = Vec::new();
            for &tid in &tj_list {
                if let Some(tj) = slc.tj_mut(tid) {
                    for end in 0..2 {
                        if tj.vtx_id[end] == Some(vx.id) {
                            tj.vtx_id[end] = Some(ovid);
                            moved.push((tid, end));
                        }
                    }
                }
            }
            let mut merged = ovx;
            merged.stat.remove(VtxStat::Fixed);
            if !self.fit_vertex(slc, &mut merged) {
                for (tid, end) in moved {
                    if let Some(tj) = slc.tj_mut(tid) {
                        tj.vtx_id[end] = Some(vx.id);
                    }
                }
                return false;
            }
            merged.n_traj = slc.count_vtx_tjs(ovid);
            if let Some(slot) = slc.vtx_mut(ovid) {
                *slot = merged;
            }
            self.set_vx2_score(slc, ovid);
            return true;
        }

        let mut order: Vec<SortEntry> = tj_list
            .iter()
            .enumerate()
            .map(|(index, tid)| SortEntry { index, val: slc.tj(*tid).map_or(0.0, |tj| tj.pts.len() as f64) })
            .collect();
        sort_decreasing(&mut order);

        let vpos = 0.5 * (vx.pos + ovx.pos);
        // (trajectory, end, fit point)
        let mut cands: Vec<(TjId, usize, TrajPoint)> = Vec::with_capacity(order.len());
        for entry in &order {
            let tid = tj_list[entry.index];
            let Some(tj) = slc.tj(tid) else {
                continue;
            };
            let end = tj.close_end(&vpos);
            let mut end_pt = tj.end_pt[end];
            if tj.num_pts_with_charge() > 6 && tj.pts[end_pt].n_tps_fit < 4 {
                end_pt = if end == 0 { end_pt + 3 } else { end_pt.saturating_sub(3) };
                end_pt = tj.nearest_pt_with_chg(end_pt.min(tj.pts.len() - 1));
            }
            end_pt = end_pt.clamp(tj.end_pt[0], tj.end_pt[1]);
            // an end held by a third vertex cannot be moved here
            if tj.vtx_id[end].is_some_and(|v| v != vx.id && v != ovid) {
                return false;
            }
            cands.push((tid, end, tj.pts[end_pt].clone()));
        }
        if cands.len() < 2 {
            return false;
        }

        let mut avx = VtxStore::candidate(vx.ctp, vpos, ovx.topo);
        avx.id = ovid;
        let mut fit_pts: Vec<TrajPoint> = cands[..2].iter().map(|c| c.2.clone()).collect();
        if !self.fit_vertex_points(&mut avx, &fit_pts) {
            return false;
        }
        let mut accepted: Vec<(TjId, usize)> = cands[..2].iter().map(|c| (c.0, c.1)).collect();
        for (tid, end, tp) in &cands[2..] {
            fit_pts.push(tp.clone());
            if self.fit_vertex_points(&mut avx, &fit_pts) {
                accepted.push((*tid, *end));
            } else {
                fit_pts.pop();
            }
        }

        for tj in slc.tjs.iter_mut().filter(|tj| tj.is_live() && tj.ctp == vx.ctp) {
            for end in 0..2 {
                if tj.vtx_id[end] == Some(vx.id) || tj.vtx_id[end] == Some(ovid) {
                    tj.vtx_id[end] = None;
                }
            }
        }
        for &(tid, end) in &accepted {
            if let Some(tj) = slc.tj_mut(tid) {
                tj.vtx_id[end] = Some(ovid);
            }
        }
        if let Some(o) = slc.vtx_mut(ovid) {
            o.pos = avx.pos;
            o.pos_err = avx.pos_err;
            o.chi_dof = avx.chi_dof;
            o.n_traj = accepted.len();
            o.stat.insert(VtxStat::Merged);
            o.stat.remove(VtxStat::Fixed);
        }
        self.set_vx2_score(slc, ovid);
        debug!(vertex = %ovid, n_traj = accepted.len(), dropped = cands.len() - accepted.len(), "merged vertices");
        true
    }
}
