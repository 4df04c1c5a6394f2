//! Trajectory surgery: splitting at a vertex and merging end to end.
//!
//! Both operations change the trajectory arena. Callers must drop any
//! reference into `slc.tjs` before calling and re-resolve their handles
//! afterwards.

use std::collections::HashSet;

use tracing::debug;

use crate::engine::VertexEngine;
use crate::error::VertexError;
use crate::flags::{AlgMod, EndFlagSet};
use crate::geom2d::{delta_angle, pos_sep2};
use crate::ids::{TjId, VtxId};
use crate::slice::Slice;
use crate::trajectory::{Trajectory, PDG_ELECTRON, PDG_MUON, PDG_NEUTRAL};

/// Min points with charge on both sides before the MCSMom asymmetry is checked.
const MIN_PTS_MOM_ASYM: usize = 5;

impl VertexEngine<'_> {
    /// Splits a trajectory after point `pos`.
    ///
    /// The trajectory keeps its id and the points up to and including
    /// `pos`; the remaining points become a new trajectory, whose id is
    /// returned. When `vid` is given both new inner ends are linked to it.
    pub fn split_traj(&self, slc: &mut Slice, tid: TjId, pos: usize, vid: Option<VtxId>) -> Result<TjId, VertexError> {
        let tj = slc.tj(tid).ok_or(VertexError::UnknownTrajectory(tid))?;
        if tj.is_killed() {
            return Err(VertexError::split(format!("{} is killed", tid)));
        }
        if pos < tj.end_pt[0] + 1 || pos + 1 > tj.end_pt[1] {
            return Err(VertexError::split(format!(
                "{} point {} is not inside [{}, {}]",
                tid, pos, tj.end_pt[0], tj.end_pt[1]
            )));
        }
        if let Some(vid) = vid {
            let vx = slc.live_vtx(vid).ok_or(VertexError::UnknownVertex(vid))?;
            if vx.ctp != tj.ctp {
                return Err(VertexError::CtpMismatch { vertex: vid, ctp: tj.ctp });
            }
        }

        let mut first = tj.clone();
        let mut second = tj.clone();
        first.pts.truncate(pos + 1);
        second.pts.drain(..=pos);

        first.vtx_id[1] = vid;
        first.end_flags[1] = EndFlagSet::new();
        second.vtx_id[0] = vid;
        second.end_flags[0] = EndFlagSet::new();

        for part in [&mut first, &mut second] {
            part.alg_mod.insert(AlgMod::Split);
            part.set_end_points();
            part.update_chg_properties();
            part.mcs_mom = part.mcs_mom_full();
            self.set_pdg_code(part);
        }

        if let Some(slot) = slc.tj_mut(tid) {
            *slot = first;
        }
        let new_id = slc.store_trajectory(second);
        if let Some(vid) = vid {
            let n = slc.count_vtx_tjs(vid);
            if let Some(vx) = slc.vtx_mut(vid) {
                vx.n_traj = n;
            }
        }
        debug!(tj = %tid, new_tj = %new_id, pos, vertex = ?vid, "split trajectory");
        Ok(new_id)
    }

    /// Joins two trajectories end to end and stores the result.
    ///
    /// The closest pair of ends is joined, reversing either trajectory as
    /// needed. A vertex shared by the joined ends is destroyed when it has
    /// no other trajectories and blocks the merge otherwise. Both inputs are
    /// killed on success.
    pub fn merge_and_store(&self, slc: &mut Slice, t1: TjId, t2: TjId) -> Result<TjId, VertexError> {
        if t1 == t2 {
            return Err(VertexError::merge(format!("{} with itself", t1)));
        }
        let mut tj1 = slc.tj(t1).cloned().ok_or(VertexError::UnknownTrajectory(t1))?;
        let mut tj2 = slc.tj(t2).cloned().ok_or(VertexError::UnknownTrajectory(t2))?;
        if !tj1.is_live() || !tj2.is_live() {
            return Err(VertexError::merge(format!("{} or {} is not live", t1, t2)));
        }
        if tj1.ctp != tj2.ctp {
            return Err(VertexError::merge(format!("{} and {} are in different planes", t1, t2)));
        }

        let (end1, end2) = closest_ends(&tj1, &tj2);
        if end1 == 0 {
            tj1.reverse();
        }
        if end2 == 1 {
            tj2.reverse();
        }

        let mut junction_vx = None;
        if let (Some(v1), Some(v2)) = (tj1.vtx_id[1], tj2.vtx_id[0]) {
            if v1 == v2 {
                if slc.count_vtx_tjs(v1) > 2 {
                    return Err(VertexError::merge(format!("{} has other trajectories", v1)));
                }
                junction_vx = Some(v1);
            }
        }

        tj1.pts.truncate(tj1.end_pt[1] + 1);
        tj2.pts.drain(..tj2.end_pt[0]);
        let hits1: HashSet<usize> = tj1.pts.iter().flat_map(|tp| tp.used_hits()).collect();
        while tj2.pts.first().is_some_and(|tp| tp.used_hits().any(|iht| hits1.contains(&iht))) {
            tj2.pts.remove(0);
        }
        if tj2.pts.iter().all(|tp| tp.chg == 0.0) {
            return Err(VertexError::merge(format!("{} is contained in {}", t2, t1)));
        }
        if tj2.pts.iter().flat_map(|tp| tp.used_hits()).any(|iht| hits1.contains(&iht)) {
            return Err(VertexError::merge(format!("{} and {} share hits", t1, t2)));
        }

        let mut merged = tj1.clone();
        merged.pts.extend(tj2.pts);
        merged.vtx_id = [tj1.vtx_id[0], tj2.vtx_id[1]];
        merged.end_flags = [tj1.end_flags[0], tj2.end_flags[1]];
        for flag in tj2.alg_mod.iter() {
            merged.alg_mod.insert(flag);
        }
        merged.alg_mod.remove(AlgMod::Killed);
        merged.alg_mod.insert(AlgMod::Merge);
        merged.pass = tj1.pass.max(tj2.pass);
        merged.step_dir = match (merged.pts.first(), merged.pts.last()) {
            (Some(a), Some(b)) if b.pos[0] < a.pos[0] => -1,
            _ => 1,
        };
        merged.set_end_points();
        merged.update_chg_properties();
        merged.mcs_mom = merged.mcs_mom_full();
        self.set_pdg_code(&mut merged);

        if let Some(vid) = junction_vx {
            self.make_vertex_obsolete(slc, vid, true);
        }
        slc.make_trajectory_obsolete(t1);
        slc.make_trajectory_obsolete(t2);
        let id = slc.store_trajectory(merged);
        slc.sync_vertex_tj_counts();
        debug!(t1 = %t1, t2 = %t2, merged = %id, "merged trajectories");
        Ok(id)
    }

    /// True if two trajectories look like pieces of one particle.
    ///
    /// The closest ends must be nearly collinear, the momenta not too
    /// different, and the gap between the ends covered by charge.
    pub fn compatible_merge(&self, slc: &Slice, t1: TjId, t2: TjId) -> bool {
        let (Some(tj1), Some(tj2)) = (slc.tj(t1), slc.tj(t2)) else {
            return false;
        };
        if t1 == t2 || !tj1.is_live() || !tj2.is_live() || tj1.ctp != tj2.ctp {
            return false;
        }
        let (end1, end2) = closest_ends(tj1, tj2);
        let tp1 = tj1.end_tp(end1);
        let tp2 = tj2.end_tp(end2);
        if delta_angle(tp1.ang, tp2.ang) > self.config.kink_angle_cut {
            return false;
        }
        if tj1.num_pts_with_charge() > MIN_PTS_MOM_ASYM && tj2.num_pts_with_charge() > MIN_PTS_MOM_ASYM {
            let sum = tj1.mcs_mom + tj2.mcs_mom;
            if sum > 0.0 && (tj1.mcs_mom - tj2.mcs_mom).abs() / sum > self.config.vtx2d.mcs_mom_asym {
                return false;
            }
        }
        if !slc.signal_between_tps(tp1, tp2, 0.8) {
            return false;
        }
        let mid = 0.5 * (tp1.pos + tp2.pos);
        slc.chg_frac_near_pos(&mid, tj1.ctp, &[t1, t2]) >= self.config.vtx2d.merge_chg_frac
    }

    /// Assigns a particle hypothesis from the shower tag, length and MCSMom.
    pub fn set_pdg_code(&self, tj: &mut Trajectory) {
        if tj.pdg_code == PDG_NEUTRAL {
            return;
        }
        if tj.is_shower_like() {
            tj.pdg_code = PDG_ELECTRON;
            return;
        }
        let tag = &self.config.muon_tag;
        tj.pdg_code = if tag.min_pts > 0.0
            && tj.num_pts_with_charge() as f64 >= tag.min_pts
            && tj.mcs_mom >= tag.min_mcs_mom
        {
            PDG_MUON
        } else {
            0
        };
    }
}

/// The pair of ends, one per trajectory, that are closest to each other.
pub(crate) fn closest_ends(tj1: &Trajectory, tj2: &Trajectory) -> (usize, usize) {
    let mut best = (0, 0);
    let mut min_sep2 = f64::INFINITY;
    for e1 in 0..2 {
        for e2 in 0..2 {
            let sep2 = pos_sep2(&tj1.end_tp(e1).pos, &tj2.end_tp(e2).pos);
            if sep2 < min_sep2 {
                min_sep2 = sep2;
                best = (e1, e2);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::testing::{line_tj, stored_vertex, TestEvent};

    #[test]
    fn test_split_keeps_id_for_first_part() {
        let mut ev = TestEvent::new();
        let tid = ev.add_tj(line_tj(2, (10.0, 200.0), (29.0, 200.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 200.0), &[]);

        let new_id = engine.split_traj(&mut slc, tid, 10, Some(vid)).unwrap();
        let first = slc.tj(tid).unwrap();
        let second = slc.tj(new_id).unwrap();
        assert_eq!(first.pts.len(), 11);
        assert_eq!(second.pts.len(), 9);
        assert_eq!(first.vtx_id, [None, Some(vid)]);
        assert_eq!(second.vtx_id, [Some(vid), None]);
        assert!(first.alg_mod.contains(AlgMod::Split));
        assert_eq!(slc.vtx(vid).unwrap().n_traj, 2);

        let iht = second.pts[0].hits[0];
        assert_eq!(slc.hits[iht].in_traj, Some(new_id));
        assert!(slc.association_violations().is_empty());
    }

    #[test]
    fn test_split_moves_far_end_link() {
        let mut ev = TestEvent::new();
        let tid = ev.add_tj(line_tj(2, (10.0, 200.0), (29.0, 200.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let far = stored_vertex(&engine, &mut slc, 2, (29.0, 200.0), &[(tid, 1)]);
        let new_id = engine.split_traj(&mut slc, tid, 5, None).unwrap();
        assert_eq!(slc.tj(tid).unwrap().vtx_id[1], None);
        assert_eq!(slc.tj(new_id).unwrap().vtx_id[1], Some(far));
        assert_eq!(slc.count_vtx_tjs(far), 1);
    }

    #[test]
    fn test_split_rejects_end_points() {
        let mut ev = TestEvent::new();
        let tid = ev.add_tj(line_tj(2, (10.0, 200.0), (29.0, 200.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        assert!(matches!(engine.split_traj(&mut slc, tid, 0, None), Err(VertexError::SplitRejected(_))));
        assert!(matches!(engine.split_traj(&mut slc, tid, 19, None), Err(VertexError::SplitRejected(_))));
        assert_eq!(slc.tjs.len(), 1);
    }

    #[test]
    fn test_merge_through_two_tj_vertex() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (19.0, 100.0), 100.0));
        // stored backwards; the merge reverses it
        let t2 = ev.add_tj(line_tj(2, (30.0, 100.0), (20.0, 100.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let junction = stored_vertex(&engine, &mut slc, 2, (19.5, 100.0), &[(t1, 1), (t2, 1)]);
        let outer = stored_vertex(&engine, &mut slc, 2, (10.0, 100.0), &[(t1, 0)]);

        let merged = engine.merge_and_store(&mut slc, t1, t2).unwrap();
        let tj = slc.tj(merged).unwrap();
        assert_eq!(tj.pts.len(), 21);
        assert_eq!(tj.vtx_id, [Some(outer), None]);
        assert!(tj.alg_mod.contains(AlgMod::Merge));
        assert!(slc.tj(t1).unwrap().is_killed());
        assert!(slc.tj(t2).unwrap().is_killed());
        assert!(slc.vtx(junction).unwrap().obsolete);
        assert!(slc.hits.iter().all(|h| h.in_traj == Some(merged)));
        assert!(slc.association_violations().is_empty());
    }

    #[test]
    fn test_merge_blocked_by_busy_vertex() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (19.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (20.0, 100.0), (30.0, 100.0), 100.0));
        let t3 = ev.add_tj(line_tj(2, (20.0, 105.0), (30.0, 120.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        stored_vertex(&engine, &mut slc, 2, (19.5, 100.0), &[(t1, 1), (t2, 0), (t3, 0)]);
        assert!(matches!(engine.merge_and_store(&mut slc, t1, t2), Err(VertexError::MergeRejected(_))));
        assert!(slc.tj(t1).unwrap().is_live());
    }

    #[test]
    fn test_compatible_merge_needs_small_kink() {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 100.0), (19.0, 100.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (20.0, 100.0), (30.0, 101.0), 100.0));
        let t3 = ev.add_tj(line_tj(2, (20.0, 130.0), (30.0, 150.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let slc = ev.build();
        assert!(engine.compatible_merge(&slc, t1, t2));
        assert!(!engine.compatible_merge(&slc, t1, t3));
    }

    #[test]
    fn test_pdg_code_from_muon_tag() {
        let geom = crate::testing::test_geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut tj = line_tj(2, (10.0, 100.0), (69.0, 110.0), 100.0);
        tj.mcs_mom = 600.0;
        engine.set_pdg_code(&mut tj);
        assert_eq!(tj.pdg_code, PDG_MUON);

        tj.alg_mod.insert(AlgMod::ShowerLike);
        engine.set_pdg_code(&mut tj);
        assert_eq!(tj.pdg_code, PDG_ELECTRON);

        let mut short = line_tj(2, (10.0, 100.0), (20.0, 100.0), 100.0);
        short.mcs_mom = 600.0;
        engine.set_pdg_code(&mut short);
        assert_eq!(short.pdg_code, 0);
    }
}
