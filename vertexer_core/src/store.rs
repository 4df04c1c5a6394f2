//! Storing, destroying and querying vertices.
//!
//! Every mutation here keeps the two association invariants intact:
//! a trajectory end only names a live vertex of its own plane, and a 3D
//! vertex's per-plane entries point back at it.

use nalgebra::Vector2;
use tracing::{debug, warn};
use vertexer_env::Ctp;

use crate::engine::VertexEngine;
use crate::error::VertexError;
use crate::fit::{vertex3_vertex3_pull, vertex_vertex_pull};
use crate::flags::{AlgMod, VtxStat};
use crate::geom2d::pos_sep2;
use crate::ids::{Vtx3Id, VtxId};
use crate::slice::Slice;
use crate::trajectory::TrajPoint;
use crate::vertex::{Topo, Vtx3Store, VtxStore};

impl VertexEngine<'_> {
    /// Appends a candidate vertex to the slice.
    ///
    /// The candidate must carry the next free id, and every live trajectory
    /// linked to it must share its CTP. On a CTP mismatch the links are
    /// removed before the error is returned.
    pub fn store_vertex(&self, slc: &mut Slice, mut vx: VtxStore) -> Result<VtxId, VertexError> {
        let expected = slc.next_vtx_id();
        if vx.id != expected {
            return Err(VertexError::IdMismatch { got: vx.id.0, expected: expected.0 });
        }
        let mut n_linked = 0;
        let mut n_ok = 0;
        for tj in slc.tjs.iter().filter(|tj| !tj.is_killed()) {
            if tj.is_attached_to(vx.id) {
                n_linked += 1;
                if tj.ctp == vx.ctp {
                    n_ok += 1;
                }
            }
        }
        if n_ok != n_linked {
            warn!(vertex = %vx.id, ctp = %vx.ctp, "vertex has trajectories in another plane");
            slc.unlink_vertex(vx.id);
            return Err(VertexError::CtpMismatch { vertex: vx.id, ctp: vx.ctp });
        }
        vx.uid = self.next_vx2_uid();
        vx.obsolete = false;
        vx.n_traj = slc.count_vtx_tjs(vx.id);
        debug!(vertex = %vx.id, topo = vx.topo.code(), w = vx.pos[0], t = vx.pos[1], n_traj = vx.n_traj, "stored 2D vertex");
        let id = vx.id;
        slc.vtxs.push(vx);
        Ok(id)
    }

    /// Appends a 3D vertex and links its 2D vertices back to it.
    pub fn store_vertex3(&self, slc: &mut Slice, mut vx3: Vtx3Store) -> Result<Vtx3Id, VertexError> {
        let id = Vtx3Id::from_index(slc.vtx3s.len());
        for vid in vx3.vx2_ids.iter().flatten() {
            if slc.live_vtx(*vid).is_none() {
                return Err(VertexError::UnknownVertex(*vid));
            }
        }
        vx3.id = id;
        vx3.uid = self.next_vx3_uid();
        vx3.obsolete = false;
        for vid in vx3.vx2_ids.iter().flatten() {
            if let Some(vx2) = slc.vtx_mut(*vid) {
                vx2.vx3_id = Some(id);
            }
        }
        debug!(vertex = %id, x = vx3.pos[0], y = vx3.pos[1], z = vx3.pos[2], "stored 3D vertex");
        slc.vtx3s.push(vx3);
        Ok(id)
    }

    /// Destroys a 2D vertex.
    ///
    /// Without `forced`, a vertex owned by a 3D vertex that scores at least
    /// `min_score` survives and `false` is returned. A 3D vertex left with
    /// fewer than two 2D vertices is destroyed as well.
    pub fn make_vertex_obsolete(&self, slc: &mut Slice, vid: VtxId, forced: bool) -> bool {
        let Some(vx) = slc.live_vtx(vid) else {
            return false;
        };
        let v3id = vx.vx3_id.filter(|id| slc.live_vtx3(*id).is_some());
        if let Some(v3id) = v3id {
            let score = slc.vtx3(v3id).map_or(0.0, |v| v.score);
            if !forced && score >= self.config.vtx2d.min_score {
                return false;
            }
        }
        let wire = vx.pos[0];
        debug!(vertex = %vid, forced, "vertex made obsolete");

        if let Some(vx) = slc.vtx_mut(vid) {
            vx.obsolete = true;
            vx.n_traj = 0;
            vx.vx3_id = None;
        }
        let hi_score: Vec<bool> = slc.vtxs.iter().map(|v| v.stat.contains(VtxStat::HiVx3Score)).collect();
        for tj in slc.tjs.iter_mut().filter(|tj| tj.is_live()) {
            for end in 0..2 {
                if tj.vtx_id[end] != Some(vid) {
                    continue;
                }
                tj.vtx_id[end] = None;
                tj.alg_mod.remove(AlgMod::Photon);
                if tj.alg_mod.contains(AlgMod::TjHiVx3Score) {
                    // keep the tag only if the other end is still at a high-score vertex
                    let keep = tj.vtx_id[1 - end].is_some_and(|ov| hi_score.get(ov.index()).copied().unwrap_or(false));
                    if !keep {
                        tj.alg_mod.remove(AlgMod::TjHiVx3Score);
                    }
                }
            }
        }

        let Some(v3id) = v3id else {
            return true;
        };
        let n_remaining = {
            let Some(vx3) = slc.vtx3_mut(v3id) else {
                return true;
            };
            for slot in vx3.vx2_ids.iter_mut() {
                if *slot == Some(vid) {
                    *slot = None;
                }
            }
            vx3.wire = Some(wire.round() as i32);
            vx3.n_vx2()
        };
        if n_remaining > 1 {
            self.set_vx3_score(slc, v3id);
            return true;
        }
        for vx2 in slc.vtxs.iter_mut().filter(|v| v.vx3_id == Some(v3id)) {
            vx2.vx3_id = None;
        }
        if let Some(vx3) = slc.vtx3_mut(v3id) {
            vx3.vx2_ids.iter_mut().for_each(|slot| *slot = None);
            vx3.obsolete = true;
        }
        for pfp in slc.pfps.iter_mut() {
            for end in 0..2 {
                if pfp.vx3_id[end] == Some(v3id) {
                    pfp.vx3_id[end] = None;
                }
            }
        }
        debug!(vertex = %v3id, "3D vertex made obsolete with its last 2D vertex");
        true
    }

    /// Destroys a 3D vertex and force-kills all of its 2D vertices.
    pub fn make_vertex3_obsolete(&self, slc: &mut Slice, v3id: Vtx3Id) -> bool {
        let Some(vx3) = slc.vtx3(v3id) else {
            return false;
        };
        if vx3.obsolete {
            return true;
        }
        let vx2_ids: Vec<VtxId> = vx3.vx2_ids.iter().flatten().copied().collect();
        for vid in vx2_ids {
            self.make_vertex_obsolete(slc, vid, true);
        }
        if let Some(vx3) = slc.vtx3_mut(v3id) {
            vx3.obsolete = true;
            vx3.vx2_ids.iter_mut().for_each(|slot| *slot = None);
        }
        for vx2 in slc.vtxs.iter_mut().filter(|v| v.vx3_id == Some(v3id)) {
            vx2.vx3_id = None;
        }
        for pfp in slc.pfps.iter_mut() {
            for end in 0..2 {
                if pfp.vx3_id[end] == Some(v3id) {
                    pfp.vx3_id[end] = None;
                }
            }
        }
        true
    }

    /// The live vertex in the same plane with the smallest pull below `max_pull`.
    pub fn is_close_to_vertex(&self, slc: &Slice, vx: &VtxStore) -> Option<VtxId> {
        let mut min_pull = self.config.vtx2d.max_pull;
        let mut best = None;
        for other in slc.vtxs.iter().filter(|v| v.is_live() && v.ctp == vx.ctp && v.id != vx.id) {
            let pull = vertex_vertex_pull(vx, other);
            if pull < min_pull {
                min_pull = pull;
                best = Some(other.id);
            }
        }
        best
    }

    /// The live 3D vertex with the smallest pull below `vtx3d.max_dw`.
    pub fn is_close_to_vertex3(&self, slc: &Slice, vx3: &Vtx3Store) -> Option<Vtx3Id> {
        let mut min_pull = self.config.vtx3d.max_dw;
        let mut best = None;
        for other in slc.vtx3s.iter().filter(|v| v.is_live() && v.id != vx3.id) {
            if (other.pos[0] - vx3.pos[0]).abs() > self.config.vtx3d.max_dx {
                continue;
            }
            let pull = vertex3_vertex3_pull(vx3, other);
            if pull < min_pull {
                min_pull = pull;
                best = Some(other.id);
            }
        }
        best
    }

    /// True if a live vertex in the point's plane lies within 1.2 units of it.
    pub fn tp_near_vertex(&self, slc: &Slice, tp: &TrajPoint) -> bool {
        slc.vtxs
            .iter()
            .filter(|vx| vx.is_live() && vx.ctp == tp.ctp)
            .any(|vx| (vx.pos[0] - tp.pos[0]).abs() <= 1.2 && (vx.pos[1] - tp.pos[1]).abs() <= 1.2)
    }

    /// Most common topology code (0-9) among the 2D vertices of a 3D vertex.
    pub fn vx3_topo(&self, slc: &Slice, v3id: Vtx3Id) -> Option<Topo> {
        let vx3 = slc.live_vtx3(v3id)?;
        let mut counts = [0u16; 10];
        for vid in vx3.vx2_ids.iter().flatten() {
            if let Some(vx2) = slc.vtx(*vid) {
                let code = vx2.topo.code() as usize;
                if code < counts.len() {
                    counts[code] += 1;
                }
            }
        }
        let mut most = 0;
        let mut best = None;
        for (code, &n) in counts.iter().enumerate() {
            if n > most {
                most = n;
                best = Topo::from_code(code as u8);
            }
        }
        best
    }

    /// Verifies and repairs the 2D/3D and trajectory/2D links in one plane.
    ///
    /// Dangling links are cleared; any repair is reported as an error after
    /// the whole plane has been checked.
    pub fn chk_vtx_associations(&self, slc: &mut Slice, ctp: Ctp) -> Result<(), VertexError> {
        let plane = ctp.plane() as usize;
        let mut problems = Vec::new();

        for i in 0..slc.vtxs.len() {
            let vx2 = &slc.vtxs[i];
            if vx2.ctp != ctp || !vx2.is_live() {
                continue;
            }
            let Some(v3id) = vx2.vx3_id else {
                continue;
            };
            let (vid, ok) = match slc.vtx3(v3id) {
                Some(vx3) => (vx2.id, vx3.is_live() && vx3.vx2_ids.get(plane).copied().flatten() == Some(vx2.id)),
                None => (vx2.id, false),
            };
            if !ok {
                problems.push(format!("{} claims {} which does not list it", vid, v3id));
                slc.vtxs[i].vx3_id = None;
            }
        }

        for i in 0..slc.vtx3s.len() {
            if !slc.vtx3s[i].is_live() {
                continue;
            }
            let Some(vid) = slc.vtx3s[i].vx2_ids.get(plane).copied().flatten() else {
                continue;
            };
            let v3id = slc.vtx3s[i].id;
            let ok = slc.live_vtx(vid).is_some_and(|vx2| vx2.vx3_id == Some(v3id));
            if !ok {
                problems.push(format!("{} lists {} which does not claim it", v3id, vid));
                slc.vtx3s[i].vx2_ids[plane] = None;
            }
        }

        let live: Vec<bool> = slc.vtxs.iter().map(|v| v.is_live()).collect();
        for tj in slc.tjs.iter_mut().filter(|tj| tj.is_live() && tj.ctp == ctp) {
            for end in 0..2 {
                let Some(vid) = tj.vtx_id[end] else {
                    continue;
                };
                if !live.get(vid.index()).copied().unwrap_or(false) {
                    problems.push(format!("{} end {} points at dead vertex {}", tj.id, end, vid));
                    tj.vtx_id[end] = None;
                }
            }
        }

        if problems.is_empty() {
            return Ok(());
        }
        slc.sync_vertex_tj_counts();
        for p in &problems {
            warn!(ctp = %ctp, "{}", p);
        }
        Err(VertexError::inconsistent(problems.join("; ")))
    }

    /// Moves a 2D vertex and marks it fixed.
    pub(crate) fn fix_vertex_at(&self, slc: &mut Slice, vid: VtxId, pos: Vector2<f64>) {
        if let Some(vx) = slc.vtx_mut(vid) {
            vx.pos = pos;
            vx.stat.insert(VtxStat::Fixed);
        }
    }
}

impl Slice {
    /// Association invariants that do not hold, as human-readable messages.
    pub fn association_violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        for tj in self.tjs.iter().filter(|tj| !tj.is_killed()) {
            for end in 0..2 {
                let Some(vid) = tj.vtx_id[end] else {
                    continue;
                };
                match self.vtx(vid) {
                    Some(vx) if vx.is_live() && vx.ctp == tj.ctp => {}
                    Some(vx) if vx.is_live() => out.push(format!("{} end {} is linked to {} in another plane", tj.id, end, vid)),
                    _ => out.push(format!("{} end {} is linked to dead vertex {}", tj.id, end, vid)),
                }
            }
        }
        for vx in self.vtxs.iter().filter(|vx| vx.is_live()) {
            let n = self.count_vtx_tjs(vx.id);
            if n != vx.n_traj {
                out.push(format!("{} has n_traj {} but {} linked ends", vx.id, vx.n_traj, n));
            }
            if let Some(v3id) = vx.vx3_id {
                let plane = vx.ctp.plane() as usize;
                let ok = self
                    .live_vtx3(v3id)
                    .is_some_and(|vx3| vx3.vx2_ids.get(plane).copied().flatten() == Some(vx.id));
                if !ok {
                    out.push(format!("{} claims {} which does not list it", vx.id, v3id));
                }
            }
        }
        for vx3 in self.vtx3s.iter().filter(|v| v.is_live()) {
            for vid in vx3.vx2_ids.iter().flatten() {
                let ok = self.live_vtx(*vid).is_some_and(|vx2| vx2.vx3_id == Some(vx3.id));
                if !ok {
                    out.push(format!("{} lists {} which does not claim it", vx3.id, vid));
                }
            }
        }
        out
    }

    /// Squared distance between two live vertices, if both exist.
    pub fn vtx_sep2(&self, a: VtxId, b: VtxId) -> Option<f64> {
        Some(pos_sep2(&self.live_vtx(a)?.pos, &self.live_vtx(b)?.pos))
    }
}
