//! Hammer vertices: a straight trajectory ending on the side of another.
//!
//! ```text
//! tj2       ---X---
//! tj1         /
//! tj1        /
//! ```
//!
//! The struck trajectory is split at X and both pieces share a new vertex
//! with the end of the striking one.

use nalgebra::Vector2;
use tracing::debug;
use vertexer_env::Ctp;

use crate::engine::VertexEngine;
use crate::error::VertexError;
use crate::flags::AlgMod;
use crate::geom2d::{delta_angle, move_tp_to_wire, point_traj_doca, pos_sep, traj_intersection};
use crate::slice::Slice;
use crate::trajectory::{Trajectory, PDG_MUON, PDG_NEUTRAL};
use crate::vertex::{Topo, VtxStore};

/// Points at either end of the struck trajectory that cannot be split off.
const END_MARGIN: usize = 3;

const MIN_HAMMER_MCS_MOM: f64 = 200.0;

/// Steps taken when looking for the charge peak along the struck trajectory.
const MAX_PEAK_SCAN: usize = 20;

/// Trajectories excluded from either side of a hammer.
fn hammer_excluded(tj: &Trajectory, ctp: Ctp) -> bool {
    tj.ctp != ctp || !tj.is_live() || tj.alg_mod.contains(AlgMod::Junk) || tj.pdg_code == PDG_NEUTRAL
}

/// Already part of a hammer vertex.
fn in_hammer(tj: &Trajectory) -> bool {
    tj.alg_mod.contains(AlgMod::HamVx) || tj.alg_mod.contains(AlgMod::HamVx2)
}

impl VertexEngine<'_> {
    /// Finds hammers from the charge fraction near the crossing.
    pub fn find_hammer_vertices(&self, slc: &mut Slice, ctp: Ctp) -> Result<(), VertexError> {
        if !self.config.algs.ham_vx {
            return Ok(());
        }
        for it1 in 0..slc.tjs.len() {
            {
                let tj1 = &slc.tjs[it1];
                if hammer_excluded(tj1, ctp) || tj1.alg_mod.contains(AlgMod::ShowerLike) {
                    continue;
                }
                if tj1.n_pts_span() < 5 || tj1.mcs_mom < MIN_HAMMER_MCS_MOM {
                    continue;
                }
            }
            'ends: for end1 in 0..2 {
                if slc.tjs[it1].vtx_id[end1].is_some() {
                    continue;
                }
                for it2 in 0..slc.tjs.len() {
                    if it1 == it2 {
                        continue;
                    }
                    let Some((pos, split_pt)) = self.hammer_candidate(slc, it1, end1, it2, ctp) else {
                        continue;
                    };
                    if self.make_hammer(slc, it1, end1, it2, pos, split_pt, Topo::Hammer)? {
                        break 'ends;
                    }
                }
            }
        }
        Ok(())
    }

    fn hammer_candidate(&self, slc: &Slice, it1: usize, end1: usize, it2: usize, ctp: Ctp) -> Option<(Vector2<f64>, usize)> {
        let tj1 = &slc.tjs[it1];
        let tj2 = &slc.tjs[it2];
        if hammer_excluded(tj2, ctp) {
            return None;
        }
        let len2 = tj2.n_pts_span();
        if len2 < 6 {
            return None;
        }
        // probably a cosmic muon
        if len2 > 200 && tj2.pdg_code == PDG_MUON {
            return None;
        }
        let tp1 = tj1.end_tp(end1);
        let min_doca = 5.0 / tp1.dir[0].abs();
        let (close_pt2, _) = tj2.closest_to_point(tp1, min_doca)?;
        if close_pt2 < tj2.end_pt[0] + END_MARGIN || close_pt2 + END_MARGIN > tj2.end_pt[1] {
            return None;
        }
        if delta_angle(tp1.ang, tj2.pts[close_pt2].ang) < 0.4 {
            return None;
        }
        if slc.chg_frac_near_pos(&tj2.pts[close_pt2].pos, ctp, &[tj1.id, tj2.id]) < 0.9 {
            return None;
        }
        let pos = traj_intersection(tp1, &tj2.pts[close_pt2]).unwrap_or(tj2.pts[close_pt2].pos);
        let split_pt = tj2.closest_approach(pos[0], pos[1], min_doca).map_or(close_pt2, |(ipt, _)| ipt);
        Some((pos, split_pt))
    }

    /// Finds hammers from a charge excess on the struck trajectory.
    ///
    /// The split point is moved to the highest charge nearby that the
    /// striking trajectory still points at, and every wire between the two
    /// must have signal.
    pub fn find_hammer_vertices2(&self, slc: &mut Slice, ctp: Ctp) -> Result<(), VertexError> {
        if !self.config.algs.ham_vx2 {
            return Ok(());
        }
        for it1 in 0..slc.tjs.len() {
            {
                let tj1 = &slc.tjs[it1];
                if hammer_excluded(tj1, ctp) || in_hammer(tj1) || tj1.num_pts_with_charge() < 6 || tj1.mcs_mom < MIN_HAMMER_MCS_MOM {
                    continue;
                }
            }
            'ends: for end1 in 0..2 {
                if slc.tjs[it1].vtx_id[end1].is_some() {
                    continue;
                }
                for it2 in 0..slc.tjs.len() {
                    if it1 == it2 {
                        continue;
                    }
                    let Some(split_pt) = self.hammer2_candidate(slc, it1, end1, it2, ctp) else {
                        continue;
                    };
                    let pos = slc.tjs[it2].pts[split_pt].pos;
                    if self.make_hammer(slc, it1, end1, it2, pos, split_pt, Topo::Hammer2)? {
                        break 'ends;
                    }
                }
            }
        }
        Ok(())
    }

    fn hammer2_candidate(&self, slc: &Slice, it1: usize, end1: usize, it2: usize, ctp: Ctp) -> Option<usize> {
        let tj1 = &slc.tjs[it1];
        let tj2 = &slc.tjs[it2];
        if hammer_excluded(tj2, ctp) || in_hammer(tj2) || tj2.alg_mod.contains(AlgMod::ShowerLike) {
            return None;
        }
        let npwc2 = slc.num_pts_with_charge(tj2, true);
        if npwc2 < 6 {
            return None;
        }
        // muon-like
        if npwc2 > 100 && tj2.mcs_mom > 500.0 {
            return None;
        }
        const MIN_DOCA: f64 = 5.0;
        let end_pt1 = tj1.end_pt[end1];
        let tp1 = &tj1.pts[end_pt1];
        let (close_pt2, _) = tj2.closest_to_point(tp1, MIN_DOCA)?;
        if close_pt2 < tj2.end_pt[0] + END_MARGIN || close_pt2 + END_MARGIN > tj2.end_pt[1] {
            return None;
        }
        let cross = traj_intersection(tp1, &tj2.pts[close_pt2])?;
        if delta_angle(tp1.ang, tj2.pts[close_pt2].ang) < 0.2 {
            return None;
        }
        // tj1 must end at tj2 rather than cross it
        let (close_pt1, _) = tj1.closest_to_point(&tj2.pts[close_pt2], MIN_DOCA)?;
        if close_pt1 != end_pt1 {
            return None;
        }
        let (mut int_pt2, _) = tj2.closest_approach(cross[0], cross[1], MIN_DOCA)?;

        // splitting must not make either piece look more scattered
        let mcs = tj2.mcs_mom;
        if tj2.mcs_mom_between(tj2.end_pt[0], int_pt2) < mcs || tj2.mcs_mom_between(int_pt2, tj2.end_pt[1]) < mcs {
            return None;
        }

        let step: i64 = if int_pt2 < close_pt2 { -1 } else { 1 };
        let mut most_chg = tj2.pts[int_pt2].chg;
        let mut ipt = int_pt2 as i64;
        let last = tj2.pts.len() as i64 - 4;
        for _ in 0..MAX_PEAK_SCAN {
            ipt += step;
            if ipt < 3 || ipt > last {
                break;
            }
            let tp = &tj2.pts[ipt as usize];
            let sep = pos_sep(&tp.pos, &tp1.pos);
            if sep == 0.0 || tp1.delta_rms <= 0.0 {
                continue;
            }
            let pull = point_traj_doca(tp.pos[0], tp.pos[1], tp1) / sep / tp1.delta_rms;
            if pull < 2.0 && tp.chg > most_chg {
                most_chg = tp.chg;
                int_pt2 = ipt as usize;
            }
        }

        if tj2.ave_chg <= 0.0 || tj2.chg_rms <= 0.0 {
            return None;
        }
        let chg_pull = (most_chg / tj2.ave_chg - 1.0) / tj2.chg_rms;
        if chg_pull < 10.0 {
            return None;
        }

        let to_pos0 = tj2.pts[int_pt2].pos[0];
        if tp1.pos[0] < -0.4 || to_pos0 < -0.4 {
            return None;
        }
        let from_wire = tp1.pos[0].round() as i64;
        let to_wire = to_pos0.round() as i64;
        let (lo, hi) = if from_wire <= to_wire { (from_wire, to_wire) } else { (to_wire, from_wire) };
        let mut ltp = tp1.clone();
        for wire in lo + 1..hi {
            move_tp_to_wire(&mut ltp, wire as f64);
            if !slc.signal_at_tp(&ltp) {
                return None;
            }
        }
        debug!(t1 = %tj1.id, end1, t2 = %tj2.id, int_pt2, chg_pull, "hammer candidate");
        Some(int_pt2)
    }

    /// Stores a hammer vertex at `pos`, splits `tjs[it2]` at `split_pt` and
    /// links the end of `tjs[it1]`. Returns false if the split failed.
    #[allow(clippy::too_many_arguments)]
    fn make_hammer(
        &self,
        slc: &mut Slice,
        it1: usize,
        end1: usize,
        it2: usize,
        pos: Vector2<f64>,
        split_pt: usize,
        topo: Topo,
    ) -> Result<bool, VertexError> {
        let ctp = slc.tjs[it2].ctp;
        let (t1, t2) = (slc.tjs[it1].id, slc.tjs[it2].id);
        let mut vx = VtxStore::candidate(ctp, pos, topo);
        vx.id = slc.next_vtx_id();
        vx.pass = slc.tjs[it2].pass;
        let vid = self.store_vertex(slc, vx)?;
        let new_id = match self.split_traj(slc, t2, split_pt, Some(vid)) {
            Ok(id) => id,
            Err(err) => {
                debug!(vertex = %vid, tj = %t2, error = %err, "hammer split failed");
                self.make_vertex_obsolete(slc, vid, true);
                return Ok(false);
            }
        };
        let flag = if topo == Topo::Hammer { AlgMod::HamVx } else { AlgMod::HamVx2 };
        slc.tjs[it1].vtx_id[end1] = Some(vid);
        for id in [t1, t2, new_id] {
            if let Some(tj) = slc.tj_mut(id) {
                tj.alg_mod.insert(flag);
            }
        }
        slc.sync_vertex_tj_counts();
        self.set_vx2_score(slc, vid);
        debug!(vertex = %vid, topo = topo.code(), t1 = %t1, t2 = %t2, new = %new_id, "new hammer vertex");
        Ok(true)
    }
}
