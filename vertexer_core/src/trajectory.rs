//! Trajectories and trajectory points.
//!
//! A [`Trajectory`] is produced by the stepping engine and consumed here; the
//! vertex engine only edits its end-vertex links, flags, and (through
//! [`crate::surgery`]) splits, merges or reverses it.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use vertexer_env::Ctp;

use crate::flags::{AlgMod, AlgModSet, EndFlagSet};
use crate::geom2d::{make_bare_tp, point_traj_doca2};
use crate::ids::{TjId, VtxId};

/// PDG code assigned to muon-like trajectories.
pub const PDG_MUON: i32 = 13;
/// PDG code assigned to electron/shower-like trajectories.
pub const PDG_ELECTRON: i32 = 11;
/// PDG code reserved for neutral (photon-like) parents.
pub const PDG_NEUTRAL: i32 = 111;

/// Upper bound of the MCS momentum estimate.
pub const MCS_MOM_MAX: f64 = 999.0;

// ============================================================================
// TRAJECTORY POINT
// ============================================================================

/// One sample along a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajPoint {
    pub ctp: Ctp,

    /// (wire, tick * units_per_tick)
    pub pos: Vector2<f64>,

    /// Unit direction
    pub dir: Vector2<f64>,

    pub ang: f64,
    pub ang_err: f64,

    /// Perpendicular residual of the point to the local fit
    pub delta: f64,
    pub delta_rms: f64,

    /// Summed charge of the used hits; 0 for points without signal
    pub chg: f64,
    pub chg_pull: f64,

    /// Squared position error of the hit cluster
    pub hit_pos_err2: f64,

    /// Number of points used in the local direction fit
    pub n_tps_fit: u16,

    pub step: i32,

    /// Indices into [`Slice::hits`](crate::slice::Slice::hits)
    pub hits: Vec<usize>,

    /// Per-hit inclusion flags, parallel to `hits`
    pub use_hit: Vec<bool>,
}

impl TrajPoint {
    /// A point with the given position and direction and no hits.
    pub fn new(ctp: Ctp, pos: Vector2<f64>, dir: Vector2<f64>) -> Self {
        let dir = if dir.norm() > 0.0 { dir.normalize() } else { Vector2::new(1.0, 0.0) };
        Self {
            ctp,
            pos,
            dir,
            ang: dir[1].atan2(dir[0]),
            ang_err: 0.1,
            delta: 0.0,
            delta_rms: 0.1,
            chg: 0.0,
            chg_pull: 0.0,
            hit_pos_err2: 0.0,
            n_tps_fit: 0,
            step: 0,
            hits: Vec::new(),
            use_hit: Vec::new(),
        }
    }

    /// Sets the angle and the matching unit direction.
    pub fn set_angle(&mut self, ang: f64) {
        self.ang = ang;
        self.dir = Vector2::new(ang.cos(), ang.sin());
    }

    /// Hits that contribute to this point.
    pub fn used_hits(&self) -> impl Iterator<Item = usize> + '_ {
        self.hits
            .iter()
            .zip(self.use_hit.iter())
            .filter_map(|(&iht, &used)| used.then_some(iht))
    }

    /// Drops every hit from the point and clears its charge.
    pub fn unset_hits(&mut self) {
        self.use_hit.iter_mut().for_each(|u| *u = false);
        self.chg = 0.0;
    }
}

// ============================================================================
// TRAJECTORY
// ============================================================================

/// An ordered sequence of points on one plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    // === Identity ===

    /// 1-based; `TjId(0)` until the trajectory is stored in a slice
    pub id: TjId,
    pub ctp: Ctp,
    pub pass: u16,

    // === Geometry ===

    pub pts: Vec<TrajPoint>,

    /// First and last point with charge
    pub end_pt: [usize; 2],

    /// +1 if stepping toward increasing wire, -1 otherwise
    pub step_dir: i8,

    // === Associations ===

    pub vtx_id: [Option<VtxId>; 2],

    /// Shower this trajectory was assigned to, if any
    pub ss_id: Option<u32>,

    // === Quality ===

    pub mcs_mom: f64,
    pub pdg_code: i32,
    pub ave_chg: f64,

    /// Charge RMS normalized to the average charge
    pub chg_rms: f64,

    pub alg_mod: AlgModSet,
    pub end_flags: [EndFlagSet; 2],
}

impl Trajectory {
    pub fn new(ctp: Ctp, pts: Vec<TrajPoint>) -> Self {
        let step_dir = match (pts.first(), pts.last()) {
            (Some(first), Some(last)) if last.pos[0] < first.pos[0] => -1,
            _ => 1,
        };
        let mut tj = Self {
            id: TjId(0),
            ctp,
            pass: 0,
            pts,
            end_pt: [0, 0],
            step_dir,
            vtx_id: [None, None],
            ss_id: None,
            mcs_mom: 0.0,
            pdg_code: 0,
            ave_chg: 0.0,
            chg_rms: 0.0,
            alg_mod: AlgModSet::new(),
            end_flags: [EndFlagSet::new(), EndFlagSet::new()],
        };
        tj.set_end_points();
        tj
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.alg_mod.contains(AlgMod::Killed)
    }

    /// Not killed and not a shower halo.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.alg_mod.contains(AlgMod::Killed) && !self.alg_mod.contains(AlgMod::Halo)
    }

    /// Assigned to a shower or tagged shower-like.
    #[inline]
    pub fn is_shower_like(&self) -> bool {
        self.ss_id.is_some() || self.alg_mod.contains(AlgMod::ShowerLike)
    }

    /// The point at `end` (0 or 1).
    #[inline]
    pub fn end_tp(&self, end: usize) -> &TrajPoint {
        &self.pts[self.end_pt[end]]
    }

    /// The end linked to `vid`, if any.
    pub fn end_at_vertex(&self, vid: VtxId) -> Option<usize> {
        (0..2).find(|&end| self.vtx_id[end] == Some(vid))
    }

    /// True if either end is linked to `vid`.
    pub fn is_attached_to(&self, vid: VtxId) -> bool {
        self.vtx_id.contains(&Some(vid))
    }

    /// The end whose point is closest to `pos`.
    pub fn close_end(&self, pos: &Vector2<f64>) -> usize {
        let d0 = (self.end_tp(0).pos - pos).norm_squared();
        let d1 = (self.end_tp(1).pos - pos).norm_squared();
        if d1 < d0 {
            1
        } else {
            0
        }
    }

    /// Number of points between the end points; a cheap length measure.
    #[inline]
    pub fn n_pts_span(&self) -> usize {
        self.end_pt[1] - self.end_pt[0] + 1
    }

    /// Resets `end_pt` to the first and last points with charge.
    pub fn set_end_points(&mut self) {
        let first = self.pts.iter().position(|tp| tp.chg > 0.0);
        let last = self.pts.iter().rposition(|tp| tp.chg > 0.0);
        self.end_pt = match (first, last) {
            (Some(first), Some(last)) => [first, last],
            _ => [0, 0],
        };
    }

    /// Points with charge between the end points.
    pub fn num_pts_with_charge(&self) -> usize {
        self.num_pts_with_charge_between(self.end_pt[0], self.end_pt[1])
    }

    pub fn num_pts_with_charge_between(&self, first: usize, last: usize) -> usize {
        if self.pts.is_empty() || first > last {
            return 0;
        }
        let last = last.min(self.pts.len() - 1);
        self.pts[first..=last].iter().filter(|tp| tp.chg > 0.0).count()
    }

    /// Path length summed over consecutive points with charge.
    pub fn length(&self) -> f64 {
        if self.pts.is_empty() {
            return 0.0;
        }
        let mut len = 0.0;
        let mut prev = self.end_pt[0];
        for ipt in self.end_pt[0] + 1..=self.end_pt[1] {
            if self.pts[ipt].chg == 0.0 {
                continue;
            }
            len += (self.pts[ipt].pos - self.pts[prev].pos).norm();
            prev = ipt;
        }
        len
    }

    /// A point near `the_pt` that has charge, searching up to 9 points either way.
    pub fn nearest_pt_with_chg(&self, the_pt: usize) -> usize {
        if the_pt > self.end_pt[1] || self.pts[the_pt].chg > 0.0 {
            return the_pt;
        }
        for off in 1..10 {
            let up = the_pt + off;
            if up <= self.end_pt[1] && self.pts[up].chg > 0.0 {
                return up;
            }
            if let Some(down) = the_pt.checked_sub(off) {
                if down >= self.end_pt[0] && self.pts[down].chg > 0.0 {
                    return down;
                }
            }
        }
        the_pt
    }

    /// Closest point with charge to (x, y) within `doca` in both coordinates.
    ///
    /// Returns the point index and its distance.
    pub fn closest_approach(&self, x: f64, y: f64, doca: f64) -> Option<(usize, f64)> {
        let mut close2 = doca * doca;
        let mut best = None;
        for ipt in self.end_pt[0]..=self.end_pt[1] {
            let tp = &self.pts[ipt];
            if tp.chg == 0.0 {
                continue;
            }
            let dx = tp.pos[0] - x;
            if dx.abs() > doca {
                continue;
            }
            let dy = tp.pos[1] - y;
            if dy.abs() > doca {
                continue;
            }
            let sep2 = dx * dx + dy * dy;
            if sep2 < close2 {
                close2 = sep2;
                best = Some(ipt);
            }
        }
        best.map(|ipt| (ipt, close2.sqrt()))
    }

    /// Point between the end points closest to `tp`, if closer than `min_sep`.
    pub fn closest_to_point(&self, tp: &TrajPoint, min_sep: f64) -> Option<(usize, f64)> {
        let mut best = min_sep * min_sep;
        let mut close_pt = None;
        for ipt in self.end_pt[0]..=self.end_pt[1] {
            let dp2 = (self.pts[ipt].pos - tp.pos).norm_squared();
            if dp2 < best {
                best = dp2;
                close_pt = Some(ipt);
            }
        }
        close_pt.map(|ipt| (ipt, best.sqrt()))
    }

    /// RMS scatter of the points between `first` and `last` about the chord joining them.
    ///
    /// Returns `None` when fewer than two interior points contribute.
    pub fn delta_rms_between(&self, first: usize, last: usize) -> Option<f64> {
        if first < self.end_pt[0] || last > self.end_pt[1] {
            return None;
        }
        let first = self.nearest_pt_with_chg(first);
        let last = self.nearest_pt_with_chg(last);
        if first >= last {
            return None;
        }
        let chord = make_bare_tp(&self.pts[first], &self.pts[last].pos)?;
        let mut dsum = 0.0;
        let mut cnt = 0usize;
        for tp in &self.pts[first + 1..last] {
            if tp.chg == 0.0 || tp.hit_pos_err2 > 4.0 {
                continue;
            }
            dsum += point_traj_doca2(tp.pos[0], tp.pos[1], &chord);
            cnt += 1;
        }
        if cnt < 2 {
            return None;
        }
        Some((dsum / (cnt - 1) as f64).sqrt())
    }

    /// Multiple-scattering momentum estimate between two points, capped at 999.
    pub fn mcs_mom_between(&self, first: usize, last: usize) -> f64 {
        if first == last || self.pts.is_empty() {
            return 0.0;
        }
        let (first, last) = if first > last { (last, first) } else { (first, last) };
        let first = self.nearest_pt_with_chg(first);
        let last = self.nearest_pt_with_chg(last);
        if first >= last || first < self.end_pt[0] || last > self.end_pt[1] {
            return 0.0;
        }
        if self.num_pts_with_charge_between(first, last) < 3 {
            return 0.0;
        }
        if self.alg_mod.contains(AlgMod::Junk) {
            return 0.0;
        }
        let tj_len = (self.pts[last].pos - self.pts[first].pos).norm();
        if tj_len < 1.0 {
            return 0.0;
        }
        let theta_rms = match self.delta_rms_between(first, last) {
            Some(sigma_s) => 6.8 * sigma_s / tj_len,
            None => 1.0,
        };
        if theta_rms < 0.001 {
            return MCS_MOM_MAX;
        }
        (13.8 * (tj_len / 14.0).sqrt() / theta_rms).min(MCS_MOM_MAX).floor()
    }

    /// MCS momentum over the whole trajectory.
    pub fn mcs_mom_full(&self) -> f64 {
        self.mcs_mom_between(self.end_pt[0], self.end_pt[1])
    }

    /// Recomputes the average charge, normalized charge RMS and per-point charge pulls.
    pub fn update_chg_properties(&mut self) {
        if self.pts.is_empty() {
            return;
        }
        let charged: Vec<f64> = self.pts[self.end_pt[0]..=self.end_pt[1]]
            .iter()
            .filter(|tp| tp.chg > 0.0)
            .map(|tp| tp.chg)
            .collect();
        if charged.is_empty() {
            self.ave_chg = 0.0;
            self.chg_rms = 0.0;
            return;
        }
        let n = charged.len() as f64;
        let ave = charged.iter().sum::<f64>() / n;
        let var = charged.iter().map(|c| (c - ave).powi(2)).sum::<f64>() / n;
        self.ave_chg = ave;
        self.chg_rms = if ave > 0.0 { var.sqrt() / ave } else { 0.0 };
        let rms = self.chg_rms;
        for tp in self.pts.iter_mut().filter(|tp| tp.chg > 0.0) {
            tp.chg_pull = if rms > 0.0 { (tp.chg / ave - 1.0) / rms } else { 0.0 };
        }
    }

    /// Reverses the point order and everything that depends on it.
    pub fn reverse(&mut self) {
        self.pts.reverse();
        for tp in &mut self.pts {
            tp.dir = -tp.dir;
            let ang = tp.ang + std::f64::consts::PI;
            tp.ang = if ang > std::f64::consts::PI { ang - 2.0 * std::f64::consts::PI } else { ang };
        }
        self.vtx_id.swap(0, 1);
        self.end_flags.swap(0, 1);
        self.step_dir = -self.step_dir;
        self.set_end_points();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight_tj(n: usize, slope: f64) -> Trajectory {
        let ctp = Ctp(2);
        let dir = Vector2::new(1.0, slope);
        let pts = (0..n)
            .map(|i| {
                let mut tp = TrajPoint::new(ctp, Vector2::new(10.0 + i as f64, 50.0 + slope * i as f64), dir);
                tp.chg = 100.0;
                tp
            })
            .collect();
        Trajectory::new(ctp, pts)
    }

    #[test]
    fn test_end_points_skip_uncharged() {
        let mut tj = straight_tj(8, 0.0);
        tj.pts[0].chg = 0.0;
        tj.pts[7].chg = 0.0;
        tj.set_end_points();
        assert_eq!(tj.end_pt, [1, 6]);
        assert_eq!(tj.num_pts_with_charge(), 6);
    }

    #[test]
    fn test_straight_line_saturates_mcs_mom() {
        let tj = straight_tj(20, 0.5);
        assert_relative_eq!(tj.mcs_mom_full(), MCS_MOM_MAX);
    }

    #[test]
    fn test_wiggly_line_has_lower_mcs_mom() {
        let mut tj = straight_tj(20, 0.0);
        for (i, tp) in tj.pts.iter_mut().enumerate() {
            tp.pos[1] += if i % 2 == 0 { 0.4 } else { -0.4 };
        }
        let mom = tj.mcs_mom_full();
        assert!(mom > 0.0 && mom < MCS_MOM_MAX, "mom = {}", mom);
    }

    #[test]
    fn test_closest_approach_ignores_uncharged_points() {
        let mut tj = straight_tj(10, 0.0);
        tj.pts[4].chg = 0.0;
        let (ipt, doca) = tj.closest_approach(14.0, 50.0, 3.0).unwrap();
        assert_ne!(ipt, 4);
        assert_relative_eq!(doca, 1.0);
        assert!(tj.closest_approach(40.0, 50.0, 3.0).is_none());
    }

    #[test]
    fn test_reverse_swaps_ends() {
        let mut tj = straight_tj(6, 0.0);
        tj.vtx_id = [Some(VtxId(3)), None];
        tj.reverse();
        assert_eq!(tj.vtx_id, [None, Some(VtxId(3))]);
        assert_eq!(tj.step_dir, -1);
        assert_relative_eq!(tj.end_tp(0).pos[0], 15.0);
        assert_relative_eq!(tj.end_tp(0).dir[0], -1.0);
    }

    #[test]
    fn test_charge_properties() {
        let mut tj = straight_tj(4, 0.0);
        tj.pts[3].chg = 300.0;
        tj.update_chg_properties();
        assert_relative_eq!(tj.ave_chg, 150.0);
        assert!(tj.pts[3].chg_pull > 1.0);
        assert!(tj.pts[0].chg_pull < 0.0);
    }
}
