//! Attaching loose trajectory ends to vertices, and vertices to particles.

use tracing::{debug, trace};

use crate::engine::VertexEngine;
use crate::fit::traj_point_vertex_pull;
use crate::flags::{AlgMod, EndFlag, VtxStat};
use crate::geom2d::{make_bare_tp, pos_sep, pos_sep2};
use crate::ids::{sort_decreasing, SortEntry, TjId, VtxId};
use crate::slice::{HitRequest, Slice};
use crate::trajectory::{TrajPoint, Trajectory};
use crate::vertex::PfpStruct;

/// Ends further than this from a vertex are never ranked.
const MAX_RANK_SEP: f64 = 100.0;

/// Grows trajectories out of hits that no trajectory uses yet.
pub trait TrajectoryStepper {
    /// Steps from `start` through the hit `seed_hit`.
    ///
    /// `start` sits at the vertex and points at the seed hit. The returned
    /// trajectory begins at the vertex end and its points reference the
    /// hits they use. Returns `None` if no usable trajectory was made.
    fn step_from(&mut self, slc: &Slice, start: &TrajPoint, seed_hit: usize) -> Option<Trajectory>;
}

impl VertexEngine<'_> {
    /// Links the nearer end of a trajectory to a vertex and refits it.
    ///
    /// Returns true if the trajectory ends up attached. When the refit
    /// fails the link is kept and the end is excluded from later fits.
    /// A trajectory whose closest point to the vertex lies more than two
    /// points in from its end is not attached and gives false.
    pub fn attach_traj_to_vertex(&self, slc: &mut Slice, tid: TjId, vid: VtxId) -> bool {
        let cuts = &self.config.vtx2d;
        let Some(vx) = slc.live_vtx(vid).cloned() else {
            return false;
        };
        let Some(tj) = slc.tj(tid) else {
            return false;
        };
        if !tj.is_live() || tj.ctp != vx.ctp || tj.is_attached_to(vid) {
            return false;
        }
        let end = tj.close_end(&vx.pos);
        if tj.vtx_id[end].is_some() {
            return false;
        }

        // electron-like trajectories get the short cuts
        let tj_short = ((tj.end_pt[1] - tj.end_pt[0]) as f64) < cuts.max_short_tj_len || tj.chg_rms > 0.5;
        let sep_cut = if tj_short { cuts.short_tj_sep } else { cuts.long_tj_sep };
        let tp = tj.end_tp(end);
        let sep2 = pos_sep2(&vx.pos, &tp.pos);
        if sep2 > sep_cut * sep_cut {
            return false;
        }
        let pull = traj_point_vertex_pull(tp, &vx);
        let signal = slc.signal_between(tp, vx.pos[0], 0.8);
        let Some((close_pt, _)) = tj.closest_approach(vx.pos[0], vx.pos[1], sep_cut) else {
            return false;
        };
        let dpt = if end == 0 {
            close_pt as i64 - tj.end_pt[0] as i64
        } else {
            tj.end_pt[1] as i64 - close_pt as i64
        };
        let length = tj.length();
        if length > 4.0 && length < sep2.sqrt() {
            return false;
        }
        let pull_cut = if tj_short { 2.0 * cuts.max_pull } else { cuts.max_pull };
        trace!(tj = %tid, end, vertex = %vid, pull, pull_cut, dpt, "attach candidate");
        if pull > pull_cut || dpt > 2 {
            return false;
        }

        let mut trial = vx.clone();
        if vx.is_fixed() && vx.n_traj < 2 {
            trial.stat.remove(VtxStat::Fixed);
        }
        if let Some(tj) = slc.tj_mut(tid) {
            tj.vtx_id[end] = Some(vid);
            // photon-like ends stay out of the fit
            tj.alg_mod.set(AlgMod::Photon, !signal);
        }
        if self.fit_vertex(slc, &mut trial) {
            trial.n_traj = slc.count_vtx_tjs(vid);
            if let Some(stored) = slc.vtx_mut(vid) {
                *stored = trial;
            }
            self.set_vx2_score(slc, vid);
            debug!(tj = %tid, end, vertex = %vid, "attached trajectory");
        } else {
            if let Some(tj) = slc.tj_mut(tid) {
                tj.end_flags[end].insert(EndFlag::NoFitVx);
            }
            let n_traj = slc.count_vtx_tjs(vid);
            if let Some(stored) = slc.vtx_mut(vid) {
                stored.n_traj = n_traj;
            }
            debug!(tj = %tid, end, vertex = %vid, "attached trajectory without fitting it");
        }
        true
    }

    /// Attaches the loose trajectory end that best matches a vertex.
    pub fn attach_any_traj_to_vertex(&self, slc: &mut Slice, vid: VtxId) -> bool {
        let cuts = &self.config.vtx2d;
        if cuts.max_short_tj_len < 0.0 {
            return false;
        }
        let Some(vx) = slc.live_vtx(vid) else {
            return false;
        };
        // hammer vertices are kept clean
        if vx.topo.is_hammer() {
            return false;
        }
        let mut best_fom = 2.0 * cuts.max_pull * (cuts.max_short_tj_len + 1.0);
        let mut best = None;
        for tj in slc.tjs.iter().filter(|tj| tj.is_live() && tj.ctp == vx.ctp && !tj.is_attached_to(vid)) {
            let end = tj.close_end(&vx.pos);
            let tp = tj.end_tp(end);
            let sep = pos_sep(&vx.pos, &tp.pos);
            if sep > MAX_RANK_SEP || tj.vtx_id[end].is_some() {
                continue;
            }
            let fom = traj_point_vertex_pull(tp, vx) * (sep + 1.0);
            if fom > best_fom {
                continue;
            }
            best_fom = fom;
            best = Some(tj.id);
        }
        match best {
            Some(tid) => self.attach_traj_to_vertex(slc, tid, vid),
            None => false,
        }
    }

    /// Attaches a trajectory to the vertex that best matches one of its loose ends.
    ///
    /// The ranking includes the vertex score, so a low-scoring vertex is
    /// preferred only when it matches much better.
    pub fn attach_any_vertex_to_traj(&self, slc: &mut Slice, tid: TjId) -> bool {
        let cuts = &self.config.vtx2d;
        if cuts.max_short_tj_len <= 0.0 || slc.vtxs.is_empty() {
            return false;
        }
        let Some(tj) = slc.tj(tid) else {
            return false;
        };
        if tj.is_killed() {
            return false;
        }
        let mut best_fom = 2.0 * cuts.max_pull * (cuts.max_short_tj_len + 1.0) * cuts.min_score;
        let mut best = None;
        for vx in slc.vtxs.iter().filter(|vx| vx.is_live() && vx.ctp == tj.ctp) {
            let end = tj.close_end(&vx.pos);
            let tp = tj.end_tp(end);
            let sep = pos_sep(&vx.pos, &tp.pos);
            if sep > MAX_RANK_SEP || tj.vtx_id[end].is_some() {
                continue;
            }
            let fom = traj_point_vertex_pull(tp, vx) * (sep + 1.0) * vx.score;
            if fom > best_fom {
                continue;
            }
            best_fom = fom;
            best = Some(vx.id);
        }
        match best {
            Some(vid) => self.attach_traj_to_vertex(slc, tid, vid),
            None => false,
        }
    }

    /// Points each end of a particle at the best 3D vertex within `max_sep`.
    ///
    /// Existing assignments are cleared first. The figure of merit is the
    /// separation times the alignment of the particle direction with the
    /// vertex-to-end direction; a vertex must score below 100 to be used.
    pub fn attach_to_any_vertex(&self, slc: &Slice, pfp: &mut PfpStruct, max_sep: f64) -> bool {
        if pos_sep3(&pfp.xyz[0], &pfp.xyz[1]) == 0.0 {
            return false;
        }
        pfp.vx3_id = [None, None];
        let mut foms = [MAX_RANK_SEP; 2];
        let mut best = [None; 2];
        for vx3 in slc.vtx3s.iter().filter(|v| v.is_live() && v.tpc == pfp.tpc) {
            let seps = [pos_sep3(&vx3.pos, &pfp.xyz[0]), pos_sep3(&vx3.pos, &pfp.xyz[1])];
            let end = if seps[1] < seps[0] { 1 } else { 0 };
            if seps[end] > MAX_RANK_SEP || seps[end] > max_sep {
                continue;
            }
            let to_end = pfp.xyz[end] - vx3.pos;
            let dotp = if seps[end] > 0.0 { (to_end / seps[end]).dot(&pfp.dir[end]).abs() } else { 0.0 };
            let fom = dotp * seps[end];
            if fom < foms[end] {
                foms[end] = fom;
                best[end] = Some(vx3.id);
            }
        }
        pfp.vx3_id = best;
        best.iter().any(Option::is_some)
    }

    /// Grows new trajectories from unused hits around a vertex.
    ///
    /// Runs at most once per vertex. Returns the number of trajectories made.
    pub fn find_vtx_tjs(&self, slc: &mut Slice, vid: VtxId, stepper: &mut dyn TrajectoryStepper) -> usize {
        let cuts = &self.config.vtx2d;
        if !self.config.algs.vtx_tj {
            return 0;
        }
        let Some(vx) = slc.live_vtx(vid).cloned() else {
            return 0;
        };
        if vx.stat.contains(VtxStat::VtxTrjTried) || vx.score < cuts.min_score {
            return 0;
        }

        let window = cuts.short_tj_sep;
        let wire_window = [(vx.pos[0] - window).round() as i64, (vx.pos[0] + window).round() as i64];
        let time_window = [vx.pos[1] - window, vx.pos[1] + window];
        let (close, _) = slc.find_close_hits(vx.ctp, wire_window, time_window, HitRequest::Unused);

        // most distant hits first so the longest lever arm seeds the stepper
        let mut order: Vec<SortEntry> = close
            .iter()
            .enumerate()
            .map(|(index, &iht)| SortEntry { index, val: pos_sep2(&slc.hit_pos(iht), &vx.pos) })
            .collect();
        sort_decreasing(&mut order);

        let v_wire = vx.pos[0].round() as u32;
        let v_tick = (vx.pos[1] / slc.units_per_tick).trunc();
        let mut n_made = 0;
        for entry in order {
            let iht = close[entry.index];
            let hit = &slc.hits[iht];
            if hit.in_traj.is_some() {
                continue;
            }
            // the direction is poorly defined for hits right at the vertex
            if hit.wire == v_wire && (hit.peak_tick - v_tick).abs() < 10.0 {
                continue;
            }
            let Some(start) = make_bare_tp(&TrajPoint::new(vx.ctp, vx.pos, vx.pos), &slc.hit_pos(iht)) else {
                continue;
            };
            let Some(mut tj) = stepper.step_from(slc, &start, iht) else {
                continue;
            };
            if tj.pts.is_empty() || tj.pts[0].pos[0] < 0.0 {
                continue;
            }
            let claimed = tj
                .pts
                .iter()
                .flat_map(|tp| tp.used_hits())
                .any(|h| slc.hits.get(h).map_or(true, |h| h.in_traj.is_some()));
            if claimed {
                trace!(vertex = %vid, seed = iht, "stepped trajectory reuses hits");
                continue;
            }
            tj.ctp = vx.ctp;
            tj.set_end_points();
            if slc.num_pts_with_charge(&tj, true) < 2 {
                continue;
            }
            tj.vtx_id = [Some(vid), None];
            tj.alg_mod.insert(AlgMod::VtxTj);
            tj.update_chg_properties();
            tj.mcs_mom = tj.mcs_mom_full();
            self.set_pdg_code(&mut tj);
            let tid = slc.store_trajectory(tj);
            debug!(vertex = %vid, tj = %tid, seed = iht, "made vertex trajectory");
            n_made += 1;
        }

        let n_traj = slc.count_vtx_tjs(vid);
        if let Some(stored) = slc.vtx_mut(vid) {
            stored.stat.insert(VtxStat::VtxTrjTried);
            stored.n_traj = n_traj;
        }
        n_made
    }
}

fn pos_sep3(a: &nalgebra::Vector3<f64>, b: &nalgebra::Vector3<f64>) -> f64 {
    (a - b).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexConfig;
    use crate::testing::{line_tj, stored_vertex, TestEvent};
    use crate::vertex::Vtx3Store;
    use nalgebra::Vector3;
    use vertexer_env::TpcId;

    /// Follows unused hits at the seed tick one wire at a time away from the vertex.
    struct FlatStepper;

    impl TrajectoryStepper for FlatStepper {
        fn step_from(&mut self, slc: &Slice, start: &TrajPoint, seed_hit: usize) -> Option<Trajectory> {
            let seed = &slc.hits[seed_hit];
            let step: i64 = if seed.wire as f64 > start.pos[0] { 1 } else { -1 };
            let mut wire = start.pos[0].round() as i64 + step;
            let mut pts = Vec::new();
            while wire >= 0 {
                let found = slc.hits_on_wire(seed.plane as usize, wire as u32).and_then(|mut range| {
                    range.find(|&i| slc.hits[i].in_traj.is_none() && (slc.hits[i].peak_tick - seed.peak_tick).abs() < 1.0)
                });
                let Some(iht) = found else {
                    break;
                };
                let mut tp = TrajPoint::new(start.ctp, slc.hit_pos(iht), start.dir);
                tp.chg = slc.hits[iht].integral;
                tp.hits = vec![iht];
                tp.use_hit = vec![true];
                tp.n_tps_fit = 10;
                pts.push(tp);
                wire += step;
            }
            (!pts.is_empty()).then(|| Trajectory::new(start.ctp, pts))
        }
    }

    fn vee_event() -> (TestEvent, TjId, TjId) {
        let mut ev = TestEvent::new();
        let t1 = ev.add_tj(line_tj(2, (10.0, 90.0), (19.0, 99.0), 100.0));
        let t2 = ev.add_tj(line_tj(2, (10.0, 110.0), (19.0, 101.0), 100.0));
        (ev, t1, t2)
    }

    #[test]
    fn test_attach_best_traj() {
        let (mut ev, t1, t2) = vee_event();
        let t3 = ev.add_tj(line_tj(2, (20.0, 100.0), (35.0, 100.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 1), (t2, 1)]);

        assert!(engine.attach_any_traj_to_vertex(&mut slc, vid));
        let tj = slc.tj(t3).unwrap();
        assert_eq!(tj.vtx_id[0], Some(vid));
        assert!(!tj.alg_mod.contains(AlgMod::Photon));
        assert_eq!(slc.vtx(vid).unwrap().n_traj, 3);
        assert!(slc.association_violations().is_empty());

        // nothing loose is left
        assert!(!engine.attach_any_traj_to_vertex(&mut slc, vid));
    }

    #[test]
    fn test_attach_rejects_far_side_point() {
        let (mut ev, t1, t2) = vee_event();
        // the vertex lies well inside this trajectory, not at an end
        let t3 = ev.add_tj(line_tj(2, (15.0, 100.0), (35.0, 100.0), 100.0));
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 1), (t2, 1)]);
        assert!(!engine.attach_traj_to_vertex(&mut slc, t3, vid));
        assert_eq!(slc.tj(t3).unwrap().vtx_id, [None, None]);
    }

    #[test]
    fn test_attach_vertex_to_pfp() {
        let (ev, _, _) = vee_event();
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let tpc = TpcId::new(0, 0);
        let mut near = Vtx3Store::candidate(tpc, 3);
        near.pos = Vector3::new(50.0, 0.0, 20.0);
        let near = engine.store_vertex3(&mut slc, near).unwrap();
        let mut far = Vtx3Store::candidate(tpc, 3);
        far.pos = Vector3::new(50.0, 0.0, 40.0);
        engine.store_vertex3(&mut slc, far).unwrap();

        let mut pfp = PfpStruct::new(1, tpc, Vector3::new(50.0, 0.0, 21.0), Vector3::new(50.0, 0.0, 30.0));
        assert!(engine.attach_to_any_vertex(&slc, &mut pfp, 5.0));
        assert_eq!(pfp.vx3_id, [Some(near), None]);

        assert!(!engine.attach_to_any_vertex(&slc, &mut pfp, 0.5));
        assert_eq!(pfp.vx3_id, [None, None]);
    }

    #[test]
    fn test_find_vtx_tjs_grows_once() {
        let (mut ev, t1, t2) = vee_event();
        for wire in 21..=25 {
            ev.add_free_hit(2, wire, 100.0, 100.0);
        }
        let geom = ev.geometry();
        let engine = VertexEngine::new(VertexConfig::default(), &geom).unwrap();
        let mut slc = ev.build();
        let vid = stored_vertex(&engine, &mut slc, 2, (20.0, 100.0), &[(t1, 1), (t2, 1)]);

        assert_eq!(engine.find_vtx_tjs(&mut slc, vid, &mut FlatStepper), 1);
        let new_tj = slc.tjs.last().unwrap();
        assert_eq!(new_tj.vtx_id[0], Some(vid));
        assert!(new_tj.alg_mod.contains(AlgMod::VtxTj));
        assert_eq!(new_tj.num_pts_with_charge(), 5);
        let vx = slc.vtx(vid).unwrap();
        assert!(vx.stat.contains(VtxStat::VtxTrjTried));
        assert_eq!(vx.n_traj, 3);
        assert!(slc.hits.iter().all(|h| h.in_traj.is_some()));

        assert_eq!(engine.find_vtx_tjs(&mut slc, vid, &mut FlatStepper), 0);
        assert!(slc.association_violations().is_empty());
    }
}
