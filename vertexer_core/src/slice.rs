//! The per-slice reconstruction context.
//!
//! A [`Slice`] owns every arena the vertex engine mutates (trajectories, 2D
//! and 3D vertices, particle-flow stubs) plus the sorted hit list and a
//! per-wire hit index used by the signal queries. Operations receive it by
//! `&mut` and resolve handles against it on every access.

use std::ops::Range;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use vertexer_env::{ActiveVolume, Ctp, DetectorGeometry, EnvError, TpcId};

use crate::error::VertexError;
use crate::flags::AlgMod;
use crate::geom2d::{make_bare_tp, move_tp_to_wire};
use crate::ids::{TjId, Vtx3Id, VtxId};
use crate::trajectory::{TrajPoint, Trajectory};
use crate::vertex::{PfpStruct, Vtx3Store, VtxStore};

// ============================================================================
// HITS
// ============================================================================

/// A reconstructed hit on one wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceHit {
    pub plane: u16,
    pub wire: u32,
    pub peak_tick: f64,
    pub rms: f64,
    pub start_tick: f64,
    pub end_tick: f64,
    pub integral: f64,

    /// Trajectory that uses this hit
    pub in_traj: Option<TjId>,
}

impl SliceHit {
    /// A hit whose signal region spans two RMS either side of the peak.
    pub fn new(plane: u16, wire: u32, peak_tick: f64, rms: f64, integral: f64) -> Self {
        Self {
            plane,
            wire,
            peak_tick,
            rms,
            start_tick: peak_tick - 2.0 * rms,
            end_tick: peak_tick + 2.0 * rms,
            integral,
            in_traj: None,
        }
    }
}

/// Which hits a proximity query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitRequest {
    All,
    Used,
    Unused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireHits {
    Dead,
    Empty,
    Range { first: usize, last: usize },
}

/// Static description of one plane in the slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneInfo {
    pub ctp: Ctp,
    pub n_wires: u32,

    /// Largest valid wire position
    pub max_pos0: f64,

    /// Largest valid time position (ticks * units_per_tick)
    pub max_pos1: f64,
}

// ============================================================================
// SLICE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Slice {
    pub tpc: TpcId,
    pub units_per_tick: f64,
    pub planes: Vec<PlaneInfo>,
    pub volume: ActiveVolume,

    /// Hits sorted by plane, wire and peak time
    pub hits: Vec<SliceHit>,
    wire_hits: Vec<Vec<WireHits>>,

    pub tjs: Vec<Trajectory>,
    pub vtxs: Vec<VtxStore>,
    pub vtx3s: Vec<Vtx3Store>,
    pub pfps: Vec<PfpStruct>,
}

impl Slice {
    /// Builds a slice over `hits` and indexes them by wire.
    pub fn new(geom: &dyn DetectorGeometry, tpc: TpcId, mut hits: Vec<SliceHit>) -> Result<Self, VertexError> {
        let n_planes = geom.n_planes(tpc);
        let upt = geom.units_per_tick();
        let planes: Vec<PlaneInfo> = (0..n_planes)
            .map(|p| {
                let plane = tpc.plane(p);
                let n_wires = geom.n_wires(plane);
                PlaneInfo {
                    ctp: plane.ctp(),
                    n_wires,
                    max_pos0: n_wires as f64,
                    max_pos1: geom.n_ticks(plane) as f64 * upt,
                }
            })
            .collect();

        for hit in &hits {
            let info = planes
                .get(hit.plane as usize)
                .ok_or(EnvError::InvalidPlane(tpc.plane(hit.plane)))?;
            if hit.wire >= info.n_wires {
                return Err(EnvError::WireOutOfRange { plane: tpc.plane(hit.plane), wire: hit.wire as i64 }.into());
            }
        }
        hits.sort_by(|a, b| {
            (a.plane, a.wire)
                .cmp(&(b.plane, b.wire))
                .then(a.peak_tick.total_cmp(&b.peak_tick))
        });

        let mut wire_hits: Vec<Vec<WireHits>> = planes
            .iter()
            .enumerate()
            .map(|(ipl, info)| {
                let plane = tpc.plane(ipl as u16);
                (0..info.n_wires)
                    .map(|w| if geom.is_dead_wire(plane, w) { WireHits::Dead } else { WireHits::Empty })
                    .collect()
            })
            .collect();
        let mut first = 0;
        while first < hits.len() {
            let (plane, wire) = (hits[first].plane, hits[first].wire);
            let mut last = first;
            while last < hits.len() && hits[last].plane == plane && hits[last].wire == wire {
                last += 1;
            }
            wire_hits[plane as usize][wire as usize] = WireHits::Range { first, last };
            first = last;
        }

        Ok(Self {
            tpc,
            units_per_tick: upt,
            planes,
            volume: geom.active_volume(tpc),
            hits,
            wire_hits,
            tjs: Vec::new(),
            vtxs: Vec::new(),
            vtx3s: Vec::new(),
            pfps: Vec::new(),
        })
    }

    #[inline]
    pub fn n_planes(&self) -> usize {
        self.planes.len()
    }

    /// CTP code of a plane in this slice.
    pub fn ctp(&self, plane: usize) -> Ctp {
        self.tpc.plane(plane as u16).ctp()
    }

    /// Plane info for the plane encoded in `ctp`.
    pub fn plane_info(&self, ctp: Ctp) -> Option<&PlaneInfo> {
        self.planes.get(ctp.plane() as usize)
    }

    // ========================================================================
    // HANDLE RESOLUTION
    // ========================================================================

    pub fn tj(&self, id: TjId) -> Option<&Trajectory> {
        if id.0 == 0 {
            return None;
        }
        self.tjs.get(id.index())
    }

    pub fn tj_mut(&mut self, id: TjId) -> Option<&mut Trajectory> {
        if id.0 == 0 {
            return None;
        }
        self.tjs.get_mut(id.index())
    }

    /// The vertex record, live or obsolete.
    pub fn vtx(&self, id: VtxId) -> Option<&VtxStore> {
        if id.0 == 0 {
            return None;
        }
        self.vtxs.get(id.index())
    }

    pub fn vtx_mut(&mut self, id: VtxId) -> Option<&mut VtxStore> {
        if id.0 == 0 {
            return None;
        }
        self.vtxs.get_mut(id.index())
    }

    /// The vertex, if it exists and is not obsolete.
    pub fn live_vtx(&self, id: VtxId) -> Option<&VtxStore> {
        self.vtx(id).filter(|vx| vx.is_live())
    }

    pub fn vtx3(&self, id: Vtx3Id) -> Option<&Vtx3Store> {
        if id.0 == 0 {
            return None;
        }
        self.vtx3s.get(id.index())
    }

    pub fn vtx3_mut(&mut self, id: Vtx3Id) -> Option<&mut Vtx3Store> {
        if id.0 == 0 {
            return None;
        }
        self.vtx3s.get_mut(id.index())
    }

    pub fn live_vtx3(&self, id: Vtx3Id) -> Option<&Vtx3Store> {
        self.vtx3(id).filter(|vx3| vx3.is_live())
    }

    /// Id the next stored 2D vertex will receive.
    #[inline]
    pub fn next_vtx_id(&self) -> VtxId {
        VtxId::from_index(self.vtxs.len())
    }

    #[inline]
    pub fn next_tj_id(&self) -> TjId {
        TjId::from_index(self.tjs.len())
    }

    /// Ids of live vertices, in storage order.
    pub fn live_vtx_ids(&self) -> Vec<VtxId> {
        self.vtxs.iter().filter(|vx| vx.is_live()).map(|vx| vx.id).collect()
    }

    // ========================================================================
    // TRAJECTORY STORE
    // ========================================================================

    /// Stores a finished trajectory and claims its used hits.
    pub fn store_trajectory(&mut self, mut tj: Trajectory) -> TjId {
        let id = self.next_tj_id();
        tj.id = id;
        tj.set_end_points();
        for tp in &tj.pts {
            for iht in tp.used_hits() {
                if let Some(hit) = self.hits.get_mut(iht) {
                    hit.in_traj = Some(id);
                }
            }
        }
        self.tjs.push(tj);
        id
    }

    /// Kills a trajectory and releases the hits it still owns.
    pub fn make_trajectory_obsolete(&mut self, id: TjId) {
        let Some(tj) = self.tjs.get_mut(id.index()) else {
            return;
        };
        tj.alg_mod.insert(AlgMod::Killed);
        for hit in self.hits.iter_mut().filter(|h| h.in_traj == Some(id)) {
            hit.in_traj = None;
        }
    }

    /// Points with charge, optionally counting dead wires spanned by the trajectory.
    pub fn num_pts_with_charge(&self, tj: &Trajectory, include_dead_wires: bool) -> usize {
        let npwc = tj.num_pts_with_charge();
        if !include_dead_wires || tj.pts.is_empty() {
            return npwc;
        }
        let dead = self.dead_wire_count(tj.end_tp(0).pos[0], tj.end_tp(1).pos[0], tj.ctp);
        npwc + dead as usize
    }

    /// Live trajectories linked to a 2D vertex, one entry per linked end.
    pub fn vtx_tj_ids(&self, vid: VtxId) -> Vec<TjId> {
        let Some(vx) = self.live_vtx(vid) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        for tj in &self.tjs {
            if tj.is_killed() || tj.ctp != vx.ctp {
                continue;
            }
            for end in 0..2 {
                if tj.vtx_id[end] == Some(vid) {
                    ids.push(tj.id);
                }
            }
        }
        ids
    }

    /// Trajectories in all planes attached to a 3D vertex, sorted by id,
    /// and the mean score of its 2D vertices.
    pub fn vtx3_tj_ids(&self, v3id: Vtx3Id) -> (Vec<TjId>, f64) {
        if self.live_vtx3(v3id).is_none() {
            return (Vec::new(), 0.0);
        }
        let mut ids = Vec::new();
        let mut score = 0.0;
        let mut nvx2 = 0.0;
        for vx2 in self.vtxs.iter().filter(|vx| vx.is_live() && vx.vx3_id == Some(v3id)) {
            ids.extend(self.vtx_tj_ids(vx2.id));
            score += vx2.score;
            nvx2 += 1.0;
        }
        if nvx2 < 1.0 {
            return (ids, 0.0);
        }
        ids.sort();
        (ids, score / nvx2)
    }

    /// Number of live trajectory ends linked to the vertex.
    pub fn count_vtx_tjs(&self, vid: VtxId) -> usize {
        self.tjs
            .iter()
            .filter(|tj| !tj.is_killed())
            .map(|tj| tj.vtx_id.iter().filter(|v| **v == Some(vid)).count())
            .sum()
    }

    /// Clears every live trajectory link to `vid`.
    pub fn unlink_vertex(&mut self, vid: VtxId) {
        for tj in self.tjs.iter_mut().filter(|tj| !tj.is_killed()) {
            for end in 0..2 {
                if tj.vtx_id[end] == Some(vid) {
                    tj.vtx_id[end] = None;
                }
            }
        }
    }

    /// Recounts `n_traj` of every live vertex from the trajectory links.
    pub fn sync_vertex_tj_counts(&mut self) {
        let counts: Vec<usize> = self.vtxs.iter().map(|vx| self.count_vtx_tjs(vx.id)).collect();
        for (vx, n) in self.vtxs.iter_mut().zip(counts) {
            if vx.is_live() {
                vx.n_traj = n;
            }
        }
    }

    // ========================================================================
    // SIGNAL QUERIES
    // ========================================================================

    fn wire_entry(&self, plane: usize, wire: u32) -> Option<WireHits> {
        self.wire_hits.get(plane)?.get(wire as usize).copied()
    }

    /// Hit index range on a wire; `None` for dead or empty wires.
    pub fn hits_on_wire(&self, plane: usize, wire: u32) -> Option<Range<usize>> {
        match self.wire_entry(plane, wire)? {
            WireHits::Range { first, last } => Some(first..last),
            _ => None,
        }
    }

    pub fn is_dead_wire(&self, plane: usize, wire: u32) -> bool {
        matches!(self.wire_entry(plane, wire), Some(WireHits::Dead))
    }

    /// Hit position in engine units.
    pub fn hit_pos(&self, iht: usize) -> Vector2<f64> {
        let hit = &self.hits[iht];
        Vector2::new(hit.wire as f64, hit.peak_tick * self.units_per_tick)
    }

    /// Dead wires in `[round(w1), round(w2))`.
    pub fn dead_wire_count(&self, w1: f64, w2: f64, ctp: Ctp) -> u32 {
        if w1 < -0.4 || w2 < -0.4 {
            return 0;
        }
        let plane = ctp.plane() as usize;
        let Some(info) = self.planes.get(plane) else {
            return 0;
        };
        let (mut a, mut b) = (w1.round() as u32, w2.round() as u32);
        if a > info.n_wires || b > info.n_wires {
            return 0;
        }
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        (a..b).filter(|&w| self.is_dead_wire(plane, w)).count() as u32
    }

    /// True if a hit covers `pos` or the wire there is dead.
    pub fn signal_at_pos(&self, pos: &Vector2<f64>, ctp: Ctp) -> bool {
        if pos[0] < 0.0 || pos[1] < 0.0 {
            return false;
        }
        let plane = ctp.plane() as usize;
        let Some(info) = self.planes.get(plane) else {
            return false;
        };
        let wire = pos[0].round() as u32;
        if wire >= info.n_wires || pos[1] > info.max_pos1 {
            return false;
        }
        match self.wire_entry(plane, wire) {
            Some(WireHits::Dead) => true,
            Some(WireHits::Range { first, last }) => {
                let tick = pos[1] / self.units_per_tick;
                self.hits[first..last]
                    .iter()
                    .any(|hit| tick > hit.start_tick && tick < hit.end_tick)
            }
            _ => false,
        }
    }

    #[inline]
    pub fn signal_at_tp(&self, tp: &TrajPoint) -> bool {
        self.signal_at_pos(&tp.pos, tp.ctp)
    }

    /// Fraction of wires between `tp` and `to_pos0` with signal on the line through `tp`.
    pub fn chg_frac_between(&self, tp: &TrajPoint, to_pos0: f64) -> f64 {
        if tp.pos[0] < -0.4 || to_pos0 < -0.4 {
            return 0.0;
        }
        let from_wire = tp.pos[0].round() as i64;
        let to_wire = to_pos0.round() as i64;
        if from_wire == to_wire {
            return if self.signal_at_tp(tp) { 1.0 } else { 0.0 };
        }
        let n_wires = (to_wire - from_wire).abs() + 1;
        let mut tp = tp.clone();
        if tp.dir[0].abs() < 0.001 {
            tp.dir[0] = 0.001;
        }
        let mut step = (1.0 / tp.dir[0]).abs();
        if (to_wire > from_wire && tp.dir[0] < 0.0) || (to_wire < from_wire && tp.dir[0] > 0.0) {
            step = -step;
        }
        let mut nsig = 0.0;
        for _ in 0..n_wires {
            if self.signal_at_tp(&tp) {
                nsig += 1.0;
            }
            tp.pos += tp.dir * step;
        }
        nsig / n_wires as f64
    }

    /// True if at least `min_frac` of the wires between `tp` and `to_pos0` have signal.
    pub fn signal_between(&self, tp: &TrajPoint, to_pos0: f64, min_frac: f64) -> bool {
        self.chg_frac_between(tp, to_pos0) >= min_frac
    }

    /// Signal test along the straight line joining two points.
    pub fn signal_between_tps(&self, tp1: &TrajPoint, tp2: &TrajPoint, min_frac: f64) -> bool {
        if min_frac == 0.0 {
            return true;
        }
        if tp1.pos[0] < -0.4 || tp2.pos[0] < -0.4 {
            return false;
        }
        if tp1.pos[0].round() == tp2.pos[0].round() {
            return true;
        }
        match make_bare_tp(tp1, &tp2.pos) {
            Some(line) => self.signal_between(&line, tp2.pos[0], min_frac),
            None => true,
        }
    }

    /// Hits inside a wire/time box; `time_window` is in engine units.
    ///
    /// Also reports whether any hit, used or not, was found in the box.
    pub fn find_close_hits(
        &self,
        ctp: Ctp,
        wire_window: [i64; 2],
        time_window: [f64; 2],
        request: HitRequest,
    ) -> (Vec<usize>, bool) {
        let mut close = Vec::new();
        let mut hits_near = false;
        let plane = ctp.plane() as usize;
        let Some(info) = self.planes.get(plane) else {
            return (close, false);
        };
        let lo = wire_window[0].max(0);
        let hi = wire_window[1].min(info.n_wires as i64 - 1);
        for wire in lo..=hi {
            let Some(range) = self.hits_on_wire(plane, wire as u32) else {
                continue;
            };
            for iht in range {
                let t = self.hits[iht].peak_tick * self.units_per_tick;
                if t < time_window[0] || t > time_window[1] {
                    continue;
                }
                hits_near = true;
                let take = match request {
                    HitRequest::All => true,
                    HitRequest::Used => self.hits[iht].in_traj.is_some(),
                    HitRequest::Unused => self.hits[iht].in_traj.is_none(),
                };
                if take {
                    close.push(iht);
                }
            }
        }
        (close, hits_near)
    }

    /// Trajectories owning hits within `max_delta` of the line between two points.
    ///
    /// When both points are on the same wire a square box around `from` is searched.
    pub fn find_close_tjs(&self, from: &TrajPoint, to: &TrajPoint, max_delta: f64) -> Vec<TjId> {
        let mut found = Vec::new();
        if from.pos[0] < -0.4 || to.pos[0] < -0.4 {
            return found;
        }
        let (mut tp, first_wire, last_wire) = if to.pos[0] > from.pos[0] {
            match make_bare_tp(from, &to.pos) {
                Some(tp) => (tp, from.pos[0].round() as i64, to.pos[0].round() as i64),
                None => return found,
            }
        } else if to.pos[0] < from.pos[0] {
            match make_bare_tp(to, &from.pos) {
                Some(tp) => (tp, to.pos[0].round() as i64, from.pos[0].round() as i64),
                None => return found,
            }
        } else {
            let mut tp = from.clone();
            tp.dir = Vector2::new(0.0, 1.0);
            let first = (from.pos[0] - max_delta).max(0.0).round() as i64;
            (tp, first, (from.pos[0] + max_delta).round() as i64)
        };
        let plane = from.ctp.plane() as usize;
        let Some(info) = self.planes.get(plane) else {
            return found;
        };
        let last_wire = last_wire.min(info.n_wires as i64 - 1);
        for wire in first_wire.max(0)..=last_wire {
            let Some(range) = self.hits_on_wire(plane, wire as u32) else {
                continue;
            };
            move_tp_to_wire(&mut tp, wire as f64);
            let min_tick = (tp.pos[1] - max_delta) / self.units_per_tick;
            let max_tick = (tp.pos[1] + max_delta) / self.units_per_tick;
            for iht in range {
                let hit = &self.hits[iht];
                let Some(tid) = hit.in_traj else {
                    continue;
                };
                if hit.peak_tick < min_tick {
                    continue;
                }
                if hit.peak_tick > max_tick {
                    break;
                }
                if !found.contains(&tid) {
                    found.push(tid);
                }
            }
        }
        found
    }

    /// Fraction of the hit charge within 5 units of `pos` owned by `tj_ids`.
    pub fn chg_frac_near_pos(&self, pos: &Vector2<f64>, ctp: Ctp, tj_ids: &[TjId]) -> f64 {
        if tj_ids.is_empty() {
            return 0.0;
        }
        const NN_DELTA: f64 = 5.0;
        let wire_window = [
            (pos[0] - NN_DELTA).max(0.0) as i64,
            (pos[0] + NN_DELTA).max(0.0) as i64,
        ];
        let time_window = [(pos[1] - NN_DELTA).max(0.0), (pos[1] + NN_DELTA).max(0.0)];
        let (close, _) = self.find_close_hits(ctp, wire_window, time_window, HitRequest::All);
        let mut chg = 0.0;
        let mut tchg = 0.0;
        for iht in close {
            let hit = &self.hits[iht];
            chg += hit.integral;
            if let Some(tid) = hit.in_traj {
                if tj_ids.contains(&tid) {
                    tchg += hit.integral;
                }
            }
        }
        if chg == 0.0 {
            return 0.0;
        }
        tchg / chg
    }

    /// Summed integral of the hits used by a point.
    pub fn tp_sum_hit_chg(&self, tp: &TrajPoint) -> f64 {
        tp.used_hits().map(|iht| self.hits[iht].integral).sum()
    }
}
