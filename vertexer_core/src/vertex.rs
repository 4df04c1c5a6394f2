//! 2D and 3D vertex records.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use vertexer_env::{Ctp, TpcId};

use crate::flags::{VtxStat, VtxStatSet};
use crate::ids::{Vtx3Id, VtxId};

// ============================================================================
// TOPOLOGY
// ============================================================================

/// The algorithmic path that created a 2D vertex.
///
/// The numeric codes are stable and appear in exported data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topo {
    /// Vertex upstream of both trajectory starts (`<`)
    VeeUpstream,
    /// End-to-end merge point (`/\` or `\/`)
    EndMerge,
    /// Vertex downstream of both trajectory ends (`>`)
    VeeDownstream,
    /// Completes a 3D vertex by attaching or splitting in the missing plane
    Complete3d,
    /// Completes a 3D vertex inside a dead-wire gap
    Complete3dInGap,
    /// Hammer vertex from the charge-fraction test
    Hammer,
    /// Hammer vertex from the charge-pull test
    Hammer2,
    /// Charge excess at the beginning of a trajectory
    BeginChg,
    /// Proximity vertex between junk trajectories
    Junk,
    /// Deliberately loose vertex of a neutral particle
    Neutral,
    /// Vertex imported from particle-flow objects
    Pfp,
}

impl Topo {
    pub fn code(self) -> u8 {
        match self {
            Topo::VeeUpstream => 0,
            Topo::EndMerge => 1,
            Topo::VeeDownstream => 2,
            Topo::Complete3d => 3,
            Topo::Complete3dInGap => 4,
            Topo::Hammer => 5,
            Topo::Hammer2 => 6,
            Topo::BeginChg => 8,
            Topo::Junk => 9,
            Topo::Neutral => 11,
            Topo::Pfp => 12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Topo::VeeUpstream,
            1 => Topo::EndMerge,
            2 => Topo::VeeDownstream,
            3 => Topo::Complete3d,
            4 => Topo::Complete3dInGap,
            5 => Topo::Hammer,
            6 => Topo::Hammer2,
            8 => Topo::BeginChg,
            9 => Topo::Junk,
            11 => Topo::Neutral,
            12 => Topo::Pfp,
            _ => return None,
        })
    }

    /// Topologies that get a fixed score just above the minimum.
    pub fn has_fixed_score(self) -> bool {
        matches!(self, Topo::BeginChg | Topo::Junk | Topo::Neutral | Topo::Pfp)
    }

    /// Hammer vertices stay isolated: nothing else is attached to them.
    pub fn is_hammer(self) -> bool {
        matches!(self, Topo::Hammer | Topo::Hammer2)
    }
}

// ============================================================================
// 2D VERTEX
// ============================================================================

/// A vertex in one plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VtxStore {
    // === Identity ===

    pub id: VtxId,

    /// Process-wide unique id, assigned when stored
    pub uid: u32,
    pub ctp: Ctp,
    pub pass: u16,

    /// Set when the vertex has been destroyed; the slot is never reused
    pub obsolete: bool,

    // === Fit ===

    pub pos: Vector2<f64>,
    pub pos_err: Vector2<f64>,
    pub chi_dof: f64,

    // === Bookkeeping ===

    pub topo: Topo,
    pub n_traj: usize,
    pub stat: VtxStatSet,
    pub vx3_id: Option<Vtx3Id>,
    pub score: f64,

    /// Fraction of the charge near the vertex owned by its trajectories
    pub tj_chg_frac: f64,
}

impl VtxStore {
    /// An unstored candidate vertex.
    pub fn candidate(ctp: Ctp, pos: Vector2<f64>, topo: Topo) -> Self {
        Self {
            id: VtxId(0),
            uid: 0,
            ctp,
            pass: 0,
            obsolete: false,
            pos,
            pos_err: Vector2::new(2.0, 2.0),
            chi_dof: 0.0,
            topo,
            n_traj: 0,
            stat: VtxStatSet::new(),
            vx3_id: None,
            score: 0.0,
            tj_chg_frac: 0.0,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !self.obsolete
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.stat.contains(VtxStat::Fixed)
    }
}

// ============================================================================
// 3D VERTEX
// ============================================================================

/// A vertex matched across planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vtx3Store {
    pub id: Vtx3Id,
    pub uid: u32,
    pub tpc: TpcId,
    pub obsolete: bool,

    /// (x, y, z) in cm
    pub pos: Vector3<f64>,
    pub pos_err: Vector3<f64>,

    /// 2D vertex in each plane
    pub vx2_ids: Vec<Option<VtxId>>,

    /// Projected wire in the plane that has no 2D vertex; `None` once complete
    pub wire: Option<i32>,

    pub score: f64,
    pub primary: bool,
}

impl Vtx3Store {
    pub fn candidate(tpc: TpcId, n_planes: usize) -> Self {
        Self {
            id: Vtx3Id(0),
            uid: 0,
            tpc,
            obsolete: false,
            pos: Vector3::zeros(),
            pos_err: Vector3::new(0.5, 0.5, 0.5),
            vx2_ids: vec![None; n_planes],
            wire: None,
            score: 0.0,
            primary: false,
        }
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        !self.obsolete
    }

    /// Number of planes with a 2D vertex.
    pub fn n_vx2(&self) -> usize {
        self.vx2_ids.iter().filter(|id| id.is_some()).count()
    }

    /// The first plane without a 2D vertex.
    pub fn missing_plane(&self) -> Option<usize> {
        self.vx2_ids.iter().position(|id| id.is_none())
    }
}

// ============================================================================
// PARTICLE-FLOW INTERFACE
// ============================================================================

/// The part of a 3D particle-flow object that vertexing reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PfpStruct {
    pub id: u32,
    pub tpc: TpcId,

    /// Start and end positions in cm
    pub xyz: [Vector3<f64>; 2],

    /// Unit directions at the start and end
    pub dir: [Vector3<f64>; 2],

    pub vx3_id: [Option<Vtx3Id>; 2],
}

impl PfpStruct {
    pub fn new(id: u32, tpc: TpcId, start: Vector3<f64>, end: Vector3<f64>) -> Self {
        let d = end - start;
        let dir = if d.norm() > 0.0 { d.normalize() } else { Vector3::new(0.0, 0.0, 1.0) };
        Self {
            id,
            tpc,
            xyz: [start, end],
            dir: [dir, dir],
            vx3_id: [None, None],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topo_codes_round_trip() {
        for code in 0u8..=12 {
            if let Some(topo) = Topo::from_code(code) {
                assert_eq!(topo.code(), code);
            }
        }
        assert!(Topo::from_code(7).is_none());
        assert!(Topo::from_code(10).is_none());
    }

    #[test]
    fn test_fixed_score_topologies() {
        assert!(Topo::Junk.has_fixed_score());
        assert!(Topo::Neutral.has_fixed_score());
        assert!(!Topo::VeeDownstream.has_fixed_score());
        assert!(Topo::Hammer2.is_hammer());
    }

    #[test]
    fn test_missing_plane() {
        let mut vx3 = Vtx3Store::candidate(TpcId::new(0, 0), 3);
        vx3.vx2_ids[0] = Some(VtxId(1));
        vx3.vx2_ids[2] = Some(VtxId(4));
        assert_eq!(vx3.n_vx2(), 2);
        assert_eq!(vx3.missing_plane(), Some(1));
    }
}
